//! Outbound prompts for the two model passes.
//!
//! The first pass sees the numbered sentences and must address quotes by
//! sid. The second pass sees only the first-pass evidence and the list of
//! sids it may cite.

use std::fmt::Write;

use serde::{Deserialize, Serialize};

use super::ModelRequest;
use crate::evidence::types::FirstPass;
use crate::text::Segmentation;

/// Bounds on what goes into a prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptLimits {
    /// Sentences listed per extraction request
    #[serde(default = "default_max_sentences")]
    pub max_sentences: usize,
}

fn default_max_sentences() -> usize {
    150
}

impl Default for PromptLimits {
    fn default() -> Self {
        Self {
            max_sentences: default_max_sentences(),
        }
    }
}

pub const EXTRACTION_TEMPERATURE: f32 = 0.2;
pub const COMPOSITION_TEMPERATURE: f32 = 0.4;

const EXTRACTION_SYSTEM: &str = "You select evidence from a personal journal entry. \
You never paraphrase when quoting: you point at sentences by their sid. \
Respond with a single JSON object and nothing else.";

const EXTRACTION_SCHEMA: &str = r#"Return JSON with exactly these keys:
{
  "quotes": [
    {"sid": 3, "reason": "why it matters", "tag": "trigger"},
    {"sidRange": [7, 9], "reason": "..."},
    {"sid": 12, "t0": 2, "t1": 6, "reason": "..."}
  ],
  "emotions": [{"label": "anxious", "confidence": 0.0-1.0}],
  "themes": [{"name": "work", "confidence": 0.0-1.0}],
  "entities": [{"name": "Sam", "type": "person|place|organization|activity|object|concept", "salience": 0.0-1.0, "sentiment": -1.0-1.0}],
  "relations": [{"type": "contradiction|uncertainty|escalation|pattern|tension", "sidA": 2, "sidB": 5, "confidence": 0.0-1.0, "note": "short"}],
  "observation": {"text": "one neutral sentence", "evidenceSids": [2, 5]},
  "coverage": {"begin": true, "middle": false, "end": true},
  "buckets": {"feeling": true, "rule": false, "consequence": true, "decision": false},
  "uncertainties": ["anything you could not ground"]
}

Addressing rules:
- Prefer {"sid": n} for one whole sentence or {"sidRange": [a, b]} for consecutive sentences. Ranges are INCLUSIVE of both a and b.
- Use {"sid": n, "t0": i, "t1": j} only when the idea sits entirely inside sentence n. Tokens are the sentence's whitespace-separated words numbered from 0; t1 is EXCLUSIVE. Start and end on whole words.
- {"sid": n, "char0": i, "char1": j} counts characters within sentence n; char1 is EXCLUSIVE. Use it only if tokens cannot express the span.
- Never invent sids. Never return character offsets into the whole entry.
- You may add "text" with the exact words quoted; it is used only if the address is wrong."#;

const COMPOSITION_SYSTEM: &str = "You write a short, grounded reflection on a journal entry. \
You may only use the evidence you are given. Every sid you cite must come from the allowed list. \
Respond with a single JSON object and nothing else.";

const COMPOSITION_SCHEMA: &str = r#"Return JSON with exactly these keys:
{
  "summary": "1-2 sentences",
  "narrativeSummary": "3-5 sentences in second person",
  "observation": "one pattern you notice, grounded in the quotes",
  "sentiment": {"score": -1.0-1.0, "label": "mixed", "rationaleSid": 3},
  "rationales": [{"sid": 3, "why": "short"}],
  "micro": {"nextAction": "at most 50 characters", "question": "at most 80 characters"},
  "trace": {"usedThemes": ["work"], "usedEntities": ["Sam"], "usedQuoteSids": [3, 7]},
  "surfacedRelations": [{"type": "tension", "sidA": 2, "sidB": 5, "note": "copied exactly"}]
}
Only surface relations listed above, copied exactly. Do not invent themes, entities or sids."#;

/// Build the first-pass request for one segmentation (or chunk subset).
pub fn build_extraction_request(segmentation: &Segmentation, limits: &PromptLimits) -> ModelRequest {
    let mut prompt = String::new();
    let listed = segmentation.sentences.len().min(limits.max_sentences);

    prompt.push_str("Journal entry, one sentence per line as [sid] (~tokens) text:\n\n");
    for sentence in segmentation.sentences.iter().take(listed) {
        let _ = writeln!(
            prompt,
            "[{}] (~{}) {}",
            sentence.sid,
            sentence.token_count,
            sentence.text.replace('\n', " ")
        );
    }
    if listed < segmentation.sentences.len() {
        let _ = writeln!(
            prompt,
            "\n({} later sentences omitted; do not cite them.)",
            segmentation.sentences.len() - listed
        );
    }
    prompt.push('\n');
    prompt.push_str(EXTRACTION_SCHEMA);

    ModelRequest {
        prompt,
        system: EXTRACTION_SYSTEM.to_string(),
        temperature: EXTRACTION_TEMPERATURE,
    }
}

/// Build the second-pass request from a grounded first pass.
pub fn build_composition_request(first_pass: &FirstPass, segmentation: &Segmentation) -> ModelRequest {
    let evidence = &first_pass.evidence;
    let mut prompt = String::new();

    prompt.push_str("Evidence quotes:\n");
    for quote in &evidence.quotes {
        let sids = quote
            .sids
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let _ = write!(prompt, "- [{}] \"{}\"", sids, quote.text.replace('\n', " "));
        if let Some(reason) = &quote.reason {
            let _ = write!(prompt, " ({})", reason);
        }
        prompt.push('\n');
    }

    if !evidence.emotions.is_empty() {
        let labels: Vec<String> = evidence
            .emotions
            .iter()
            .map(|e| format!("{} {:.2}", e.label, e.confidence))
            .collect();
        let _ = writeln!(prompt, "\nEmotions: {}", labels.join("; "));
    }
    if !evidence.themes.is_empty() {
        let names: Vec<&str> = evidence.themes.iter().map(|t| t.name.as_str()).collect();
        let _ = writeln!(prompt, "Themes: {}", names.join(", "));
    }
    if !evidence.entities.is_empty() {
        let names: Vec<String> = evidence
            .entities
            .iter()
            .map(|e| format!("{} ({})", e.name, e.entity_type))
            .collect();
        let _ = writeln!(prompt, "Entities: {}", names.join(", "));
    }

    if !first_pass.relations.is_empty() {
        prompt.push_str("\nRelations:\n");
        for relation in &first_pass.relations {
            let _ = writeln!(
                prompt,
                "- {{\"type\": \"{}\", \"sidA\": {}, \"sidB\": {}, \"note\": {}}}",
                relation.kind.as_str(),
                relation.sid_a,
                relation.sid_b,
                serde_json::Value::String(relation.note.clone())
            );
        }
    }

    if !first_pass.observation.text.is_empty() {
        let _ = writeln!(prompt, "\nDraft observation: {}", first_pass.observation.text);
    }
    if !first_pass.buckets.missing.is_empty() {
        let _ = writeln!(
            prompt,
            "The entry does not state: {}. Do not fill these in.",
            first_pass.buckets.missing.join(", ")
        );
    }

    let allowed = first_pass
        .quote_sid_list
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    let _ = writeln!(
        prompt,
        "\nAllowed sids (entry has {} sentences): [{}]\n",
        segmentation.sentences.len(),
        allowed
    );
    prompt.push_str(COMPOSITION_SCHEMA);

    ModelRequest {
        prompt,
        system: COMPOSITION_SYSTEM.to_string(),
        temperature: COMPOSITION_TEMPERATURE,
    }
}
