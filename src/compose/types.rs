//! Second-pass (composition) output shapes.

use serde::{Deserialize, Serialize};

use crate::evidence::types::Relation;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sentiment {
    /// In `[-1, 1]`
    pub score: f64,
    pub label: String,
    /// The quoted sentence that best supports the score
    pub rationale_sid: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rationale {
    pub sid: u32,
    pub why: String,
}

/// Small follow-ups shown under the summary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Micro {
    pub next_action: String,
    pub question: String,
}

/// What the composition claims to have drawn on
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trace {
    #[serde(default)]
    pub used_themes: Vec<String>,
    #[serde(default)]
    pub used_entities: Vec<String>,
    #[serde(default)]
    pub used_quote_sids: Vec<u32>,
}

/// A validated composition, safe to hand to storage and rendering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecondPassOutput {
    pub summary: String,
    pub narrative_summary: String,
    pub observation: String,
    pub sentiment: Sentiment,
    #[serde(default)]
    pub rationales: Vec<Rationale>,
    #[serde(default)]
    pub micro: Micro,
    #[serde(default)]
    pub trace: Trace,
    #[serde(default)]
    pub surfaced_relations: Vec<Relation>,
}
