//! Evidence data types for the first (extraction) pass.
//!
//! These are the shapes exchanged with the persistence collaborator, so
//! field names serialize in camelCase.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Schema tag stamped on every first pass and persisted record
pub const SCHEMA_VERSION: &str = "groundnote.evidence/v2";

/// A model's claim about a span of interest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub address: Address,
    /// Literal quoted text, used when structured addressing fails
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Optional categorical tag (e.g. "trigger", "belief")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl Selection {
    /// A selection addressed only by its literal text
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            address: Address::Unaddressed,
            text: Some(text.into()),
            reason: None,
            tag: None,
        }
    }

    pub fn sentence(sid: u32) -> Self {
        Self {
            address: Address::Sentence { sid },
            text: None,
            reason: None,
            tag: None,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }
}

/// How a selection points into the segmentation.
///
/// Sentence ranges are inclusive; token and char ranges are end-exclusive
/// and relative to the named sentence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Address {
    Sentence { sid: u32 },
    SentenceRange { first: u32, last: u32 },
    Tokens { sid: u32, t0: u32, t1: u32 },
    Chars { sid: u32, char0: u32, char1: u32 },
    /// No structured address; resolved by text search only
    Unaddressed,
}

/// Strategy that produced a resolved span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMethod {
    Sentence,
    SentenceRange,
    TokenRange,
    CharRange,
    /// Exact substring of the source
    Exact,
    /// Substring after matching-mode folding
    Normalized,
    /// Word-overlap window
    Fuzzy,
}

/// A selection resolved to an exact range of the source text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedSpan {
    pub text: String,
    pub start: usize,
    pub end: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    pub method: ResolutionMethod,
    /// Sentences the span touches
    #[serde(default)]
    pub sids: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Emotion {
    pub label: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Theme {
    pub name: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    /// person, place, organization, activity, object, concept
    #[serde(rename = "type")]
    pub entity_type: String,
    pub salience: f64,
    pub sentiment: f64,
}

/// The evidence bundle produced by one extraction call (or a merge)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvidenceExtraction {
    #[serde(default)]
    pub quotes: Vec<ResolvedSpan>,
    #[serde(default)]
    pub emotions: Vec<Emotion>,
    #[serde(default)]
    pub themes: Vec<Theme>,
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub uncertainties: Vec<String>,
}

/// Typed edge between two sentences
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    Contradiction,
    Uncertainty,
    Escalation,
    Pattern,
    Tension,
}

impl RelationKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "contradiction" => Some(Self::Contradiction),
            "uncertainty" => Some(Self::Uncertainty),
            "escalation" => Some(Self::Escalation),
            "pattern" => Some(Self::Pattern),
            "tension" => Some(Self::Tension),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contradiction => "contradiction",
            Self::Uncertainty => "uncertainty",
            Self::Escalation => "escalation",
            Self::Pattern => "pattern",
            Self::Tension => "tension",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relation {
    #[serde(rename = "type")]
    pub kind: RelationKind,
    pub sid_a: u32,
    pub sid_b: u32,
    pub confidence: f64,
    #[serde(default)]
    pub note: String,
}

impl Relation {
    /// Identity used to check second-pass relations against the first pass
    pub fn grounding_key(&self) -> (RelationKind, u32, u32, String) {
        (self.kind, self.sid_a, self.sid_b, self.note.trim().to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    pub text: String,
    #[serde(default)]
    pub evidence_sids: Vec<u32>,
}

/// Which parts of the entry the quotes reach
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coverage {
    pub begin: bool,
    pub middle: bool,
    pub end: bool,
}

impl Coverage {
    /// Which thirds of a `len`-byte source the spans touch
    pub fn from_spans(spans: &[ResolvedSpan], len: usize) -> Self {
        let third = len / 3;
        let touches = |lo: usize, hi: usize| spans.iter().any(|s| s.start < hi && lo < s.end);
        Self {
            begin: touches(0, third.max(1)),
            middle: touches(third, 2 * third),
            end: touches(2 * third, len),
        }
    }
}

/// The four narrative elements a reflection needs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Buckets {
    pub feeling: bool,
    pub rule: bool,
    pub consequence: bool,
    pub decision: bool,
    #[serde(default)]
    pub missing: Vec<String>,
}

impl Buckets {
    pub fn new(feeling: bool, rule: bool, consequence: bool, decision: bool) -> Self {
        let mut buckets = Self {
            feeling,
            rule,
            consequence,
            decision,
            missing: Vec::new(),
        };
        buckets.missing = buckets.compute_missing();
        buckets
    }

    /// Names of the elements that are absent, in fixed order
    pub fn compute_missing(&self) -> Vec<String> {
        [
            ("feeling", self.feeling),
            ("rule", self.rule),
            ("consequence", self.consequence),
            ("decision", self.decision),
        ]
        .into_iter()
        .filter(|(_, present)| !present)
        .map(|(name, _)| name.to_string())
        .collect()
    }
}

/// Closed-world evidence set the second pass may cite
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirstPass {
    pub schema_version: String,
    #[serde(flatten)]
    pub evidence: EvidenceExtraction,
    #[serde(default)]
    pub relations: Vec<Relation>,
    #[serde(default)]
    pub observation: Observation,
    #[serde(default)]
    pub coverage: Coverage,
    #[serde(default)]
    pub buckets: Buckets,
    /// Sorted, deduplicated sids referenced by any quote
    #[serde(default)]
    pub quote_sid_list: Vec<u32>,
}

impl FirstPass {
    /// Assemble a first pass, deriving `quote_sid_list` from the quotes.
    pub fn new(
        evidence: EvidenceExtraction,
        relations: Vec<Relation>,
        observation: Observation,
        coverage: Coverage,
        buckets: Buckets,
    ) -> Self {
        let quote_sid_list = quote_sid_list(&evidence.quotes);
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            evidence,
            relations,
            observation,
            coverage,
            buckets,
            quote_sid_list,
        }
    }

    /// Whether `sid` may be cited by the second pass
    pub fn cites(&self, sid: u32) -> bool {
        self.quote_sid_list.binary_search(&sid).is_ok()
    }
}

/// Flattened, deduplicated, ascending union of every quoted sid
pub fn quote_sid_list(quotes: &[ResolvedSpan]) -> Vec<u32> {
    quotes
        .iter()
        .flat_map(|q| q.sids.iter().copied())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Clamp into `[0, 1]`, mapping non-finite values to `default`
pub(crate) fn clamp_unit(value: f64, default: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        default
    }
}

/// Clamp into `[-1, 1]`, mapping non-finite values to `default`
pub(crate) fn clamp_signed(value: f64, default: f64) -> f64 {
    if value.is_finite() {
        value.clamp(-1.0, 1.0)
    } else {
        default
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(sids: Vec<u32>) -> ResolvedSpan {
        ResolvedSpan {
            text: "x".to_string(),
            start: 0,
            end: 1,
            reason: None,
            tag: None,
            method: ResolutionMethod::Sentence,
            sids,
        }
    }

    #[test]
    fn test_quote_sid_list_sorted_unique() {
        let quotes = vec![span(vec![7, 8, 9]), span(vec![3]), span(vec![8]), span(vec![12])];
        assert_eq!(quote_sid_list(&quotes), vec![3, 7, 8, 9, 12]);
    }

    #[test]
    fn test_first_pass_derives_sid_list() {
        let evidence = EvidenceExtraction {
            quotes: vec![span(vec![2]), span(vec![1])],
            ..Default::default()
        };
        let first = FirstPass::new(
            evidence,
            Vec::new(),
            Observation::default(),
            Coverage::default(),
            Buckets::default(),
        );
        assert_eq!(first.quote_sid_list, vec![1, 2]);
        assert!(first.cites(2));
        assert!(!first.cites(3));
        assert_eq!(first.schema_version, SCHEMA_VERSION);
    }

    #[test]
    fn test_coverage_from_spans() {
        let mut early = span(vec![1]);
        early.start = 0;
        early.end = 10;
        let mut late = span(vec![9]);
        late.start = 85;
        late.end = 90;

        let coverage = Coverage::from_spans(&[early, late], 90);
        assert_eq!(
            coverage,
            Coverage {
                begin: true,
                middle: false,
                end: true
            }
        );
        assert_eq!(Coverage::from_spans(&[], 90), Coverage::default());
    }

    #[test]
    fn test_buckets_missing() {
        let buckets = Buckets::new(true, false, true, false);
        assert_eq!(buckets.missing, vec!["rule", "decision"]);
    }

    #[test]
    fn test_clamps() {
        assert_eq!(clamp_unit(1.7, 0.5), 1.0);
        assert_eq!(clamp_unit(f64::NAN, 0.5), 0.5);
        assert_eq!(clamp_signed(-3.0, 0.0), -1.0);
    }

    #[test]
    fn test_relation_kind_parse() {
        assert_eq!(RelationKind::parse(" Tension "), Some(RelationKind::Tension));
        assert_eq!(RelationKind::parse("causal"), None);
    }

    #[test]
    fn test_first_pass_serialization() {
        let first = FirstPass::new(
            EvidenceExtraction::default(),
            vec![Relation {
                kind: RelationKind::Contradiction,
                sid_a: 1,
                sid_b: 4,
                confidence: 0.8,
                note: "says both".to_string(),
            }],
            Observation::default(),
            Coverage::default(),
            Buckets::new(true, true, true, true),
        );
        let json = serde_json::to_value(&first).unwrap();
        assert_eq!(json["schemaVersion"], SCHEMA_VERSION);
        assert_eq!(json["relations"][0]["type"], "contradiction");
        assert_eq!(json["relations"][0]["sidA"], 1);

        let parsed: FirstPass = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, first);
    }
}
