//! Closed-world validation of the second (composition) pass.
//!
//! Hard failures are grounding violations: a citation to evidence that the
//! first pass never produced. Everything else is repaired in place and
//! reported as a warning.

use std::collections::HashSet;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

use super::types::{Micro, Rationale, SecondPassOutput, Sentiment, Trace};
use crate::evidence::types::{clamp_signed, FirstPass, Relation};
use crate::protocol::decode::{field, index, number, parse_value, relation, text};

pub const MAX_NEXT_ACTION_CHARS: usize = 50;
pub const MAX_QUESTION_CHARS: usize = 80;
pub const MAX_OBSERVATION_CHARS: usize = 400;
pub const DEFAULT_SENTIMENT_LABEL: &str = "neutral";

/// Why a composition was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Composition is not valid JSON: {0}")]
    Unparseable(String),

    #[error("Composition is missing required fields: {}", .0.join(", "))]
    MissingCoreFields(Vec<&'static str>),

    #[error("First pass has no quoted sentences to cite")]
    NoGroundingEvidence,

    #[error("Rationale cites sentence {0}, which is not in the evidence")]
    InvalidRationaleSid(u32),

    #[error("Sentiment rationale {} is not in the evidence", .0.map(|sid| sid.to_string()).unwrap_or_else(|| "(missing)".to_string()))]
    InvalidSentimentRationale(Option<u32>),
}

/// A composition that passed validation, with the repairs applied
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedComposition {
    pub output: SecondPassOutput,
    pub warnings: Vec<String>,
}

/// Validate a raw composition response against its first pass.
///
/// `first_pass` is only read. An empty quote sid list fails before the
/// response is looked at.
pub fn validate(raw: &str, first_pass: &FirstPass) -> Result<ValidatedComposition, ValidationError> {
    if first_pass.quote_sid_list.is_empty() {
        return Err(ValidationError::NoGroundingEvidence);
    }

    let value = parse_value(raw).map_err(ValidationError::Unparseable)?;
    let obj = value
        .as_object()
        .ok_or_else(|| ValidationError::Unparseable("expected a JSON object".to_string()))?;

    let summary = text(field(obj, &["summary"]));
    let narrative = text(field(obj, &["narrativeSummary", "narrative_summary"]));
    let observation = text(field(obj, &["observation"]));

    let mut missing = Vec::new();
    if summary.is_none() {
        missing.push("summary");
    }
    if narrative.is_none() {
        missing.push("narrativeSummary");
    }
    if observation.is_none() {
        missing.push("observation");
    }
    let (Some(summary), Some(narrative_summary), Some(observation)) = (summary, narrative, observation) else {
        return Err(ValidationError::MissingCoreFields(missing));
    };

    let mut warnings = Vec::new();

    let rationales = rationales(obj, &mut warnings);
    if let Some(bad) = rationales.iter().find(|r| !first_pass.cites(r.sid)) {
        return Err(ValidationError::InvalidRationaleSid(bad.sid));
    }

    let sentiment = sentiment(obj.get("sentiment"));
    let rationale_sid = match sentiment.rationale_sid {
        Some(sid) if first_pass.cites(sid) => sid,
        other => return Err(ValidationError::InvalidSentimentRationale(other)),
    };

    let observation = bounded(observation, MAX_OBSERVATION_CHARS, "observation", &mut warnings);
    let micro = micro(obj.get("micro"), &mut warnings);
    let trace = trace(obj.get("trace"), first_pass, &mut warnings);
    let surfaced_relations = surfaced_relations(obj, first_pass, &mut warnings);

    for warning in &warnings {
        warn!(%warning, "Repaired composition");
    }

    Ok(ValidatedComposition {
        output: SecondPassOutput {
            summary,
            narrative_summary,
            observation,
            sentiment: Sentiment {
                score: sentiment.score,
                label: sentiment.label,
                rationale_sid,
            },
            rationales,
            micro,
            trace,
            surfaced_relations,
        },
        warnings,
    })
}

/// Cut to `max` chars, ending in "..." when cut.
pub fn truncate_chars(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        return value.to_string();
    }
    let kept: String = value.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", kept)
}

fn bounded(value: String, max: usize, name: &str, warnings: &mut Vec<String>) -> String {
    if value.chars().count() <= max {
        return value;
    }
    warnings.push(format!("{} truncated to {} characters", name, max));
    truncate_chars(&value, max)
}

fn rationales(obj: &Map<String, Value>, warnings: &mut Vec<String>) -> Vec<Rationale> {
    let Some(items) = field(obj, &["rationales"]).and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let entry = item.as_object();
            let sid = entry.and_then(|o| index(field(o, &["sid"])));
            if sid.is_none() {
                warnings.push(format!("dropped rationale without a sentence id: {}", item));
            }
            Some(Rationale {
                sid: sid?,
                why: entry.and_then(|o| text(field(o, &["why", "reason"]))).unwrap_or_default(),
            })
        })
        .collect()
}

struct RawSentiment {
    score: f64,
    label: String,
    rationale_sid: Option<u32>,
}

fn sentiment(value: Option<&Value>) -> RawSentiment {
    let obj = value.and_then(Value::as_object);
    let get = |keys: &[&str]| obj.and_then(|o| field(o, keys));
    RawSentiment {
        score: clamp_signed(number(get(&["score"])).unwrap_or(0.0), 0.0),
        label: text(get(&["label"])).unwrap_or_else(|| DEFAULT_SENTIMENT_LABEL.to_string()),
        rationale_sid: index(get(&["rationaleSid", "rationale_sid"])),
    }
}

fn micro(value: Option<&Value>, warnings: &mut Vec<String>) -> Micro {
    let obj = value.and_then(Value::as_object);
    let get = |keys: &[&str]| text(obj.and_then(|o| field(o, keys))).unwrap_or_default();
    Micro {
        next_action: bounded(
            get(&["nextAction", "next_action"]),
            MAX_NEXT_ACTION_CHARS,
            "micro.nextAction",
            warnings,
        ),
        question: bounded(get(&["question"]), MAX_QUESTION_CHARS, "micro.question", warnings),
    }
}

fn strings(obj: Option<&Map<String, Value>>, keys: &[&str]) -> Vec<String> {
    obj.and_then(|o| field(o, keys))
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(|v| text(Some(v))).collect())
        .unwrap_or_default()
}

fn trace(value: Option<&Value>, first_pass: &FirstPass, warnings: &mut Vec<String>) -> Trace {
    let obj = value.and_then(Value::as_object);
    let trace = Trace {
        used_themes: strings(obj, &["usedThemes", "used_themes"]),
        used_entities: strings(obj, &["usedEntities", "used_entities"]),
        used_quote_sids: obj
            .and_then(|o| field(o, &["usedQuoteSids", "used_quote_sids"]))
            .and_then(Value::as_array)
            .map(|sids| sids.iter().filter_map(|v| index(Some(v))).collect())
            .unwrap_or_default(),
    };

    for sid in trace.used_quote_sids.iter().filter(|sid| !first_pass.cites(**sid)) {
        warnings.push(format!("trace cites sentence {} outside the evidence", sid));
    }

    let known_themes: HashSet<String> = first_pass
        .evidence
        .themes
        .iter()
        .map(|t| t.name.to_lowercase())
        .collect();
    for theme in trace.used_themes.iter().filter(|t| !known_themes.contains(&t.to_lowercase())) {
        warnings.push(format!("trace uses theme \"{}\" not in the evidence", theme));
    }

    let known_entities: HashSet<String> = first_pass
        .evidence
        .entities
        .iter()
        .map(|e| e.name.to_lowercase())
        .collect();
    for entity in trace
        .used_entities
        .iter()
        .filter(|e| !known_entities.contains(&e.to_lowercase()))
    {
        warnings.push(format!("trace uses entity \"{}\" not in the evidence", entity));
    }

    trace
}

/// Relations are kept even when ungrounded; mismatches become warnings.
fn surfaced_relations(
    obj: &Map<String, Value>,
    first_pass: &FirstPass,
    warnings: &mut Vec<String>,
) -> Vec<Relation> {
    let known: HashSet<_> = first_pass.relations.iter().map(|r| r.grounding_key()).collect();
    let Some(items) = field(obj, &["surfacedRelations", "surfaced_relations"]).and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut kept = Vec::new();
    for item in items {
        let Some(relation) = relation(item) else {
            warnings.push(format!("dropped malformed surfaced relation: {}", item));
            continue;
        };
        if !known.contains(&relation.grounding_key()) {
            warnings.push(format!(
                "surfaced relation {} {}-{} does not match a first-pass relation",
                relation.kind.as_str(),
                relation.sid_a,
                relation.sid_b
            ));
        }
        kept.push(relation);
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::types::{
        Buckets, Coverage, EvidenceExtraction, Observation, RelationKind, ResolutionMethod,
        ResolvedSpan, Theme,
    };

    fn first_pass(sids: &[u32]) -> FirstPass {
        let quotes = sids
            .iter()
            .map(|&sid| ResolvedSpan {
                text: format!("sentence {}", sid),
                start: sid as usize * 20,
                end: sid as usize * 20 + 10,
                reason: None,
                tag: None,
                method: ResolutionMethod::Sentence,
                sids: vec![sid],
            })
            .collect();
        FirstPass::new(
            EvidenceExtraction {
                quotes,
                themes: vec![Theme {
                    name: "work".to_string(),
                    confidence: 0.8,
                }],
                ..Default::default()
            },
            vec![Relation {
                kind: RelationKind::Tension,
                sid_a: 1,
                sid_b: 2,
                confidence: 0.7,
                note: "rest vs deadline".to_string(),
            }],
            Observation::default(),
            Coverage::default(),
            Buckets::default(),
        )
    }

    fn composition(rationale_sid: u32, sentiment_sid: u32) -> String {
        serde_json::json!({
            "summary": "A hard day at work.",
            "narrativeSummary": "You pushed through a long day.",
            "observation": "Rest keeps coming up.",
            "sentiment": {"score": -0.4, "label": "strained", "rationaleSid": sentiment_sid},
            "rationales": [{"sid": rationale_sid, "why": "names the pressure"}],
            "micro": {"nextAction": "Take a walk", "question": "What would rest look like?"},
            "trace": {"usedThemes": ["work"], "usedEntities": [], "usedQuoteSids": [1]},
            "surfacedRelations": [{"type": "tension", "sidA": 1, "sidB": 2, "note": "rest vs deadline"}]
        })
        .to_string()
    }

    #[test]
    fn test_valid_composition() {
        let result = validate(&composition(2, 3), &first_pass(&[1, 2, 3])).unwrap();
        assert!(result.warnings.is_empty());
        assert_eq!(result.output.sentiment.rationale_sid, 3);
        assert_eq!(result.output.sentiment.score, -0.4);
        assert_eq!(result.output.surfaced_relations.len(), 1);
    }

    #[test]
    fn test_invalid_rationale_sid() {
        let err = validate(&composition(99, 1), &first_pass(&[1, 2, 3, 5, 8])).unwrap_err();
        assert_eq!(err, ValidationError::InvalidRationaleSid(99));
    }

    #[test]
    fn test_invalid_sentiment_rationale() {
        let err = validate(&composition(1, 4), &first_pass(&[1, 2, 3])).unwrap_err();
        assert_eq!(err, ValidationError::InvalidSentimentRationale(Some(4)));

        let mut value: Value = serde_json::from_str(&composition(1, 1)).unwrap();
        value["sentiment"].as_object_mut().unwrap().remove("rationaleSid");
        let err = validate(&value.to_string(), &first_pass(&[1])).unwrap_err();
        assert_eq!(err, ValidationError::InvalidSentimentRationale(None));
    }

    #[test]
    fn test_empty_sid_list_is_no_grounding() {
        let err = validate(&composition(1, 1), &first_pass(&[])).unwrap_err();
        assert_eq!(err, ValidationError::NoGroundingEvidence);

        for raw in [r#"{"summary": "ok"}"#, "not json", "[1, 2]"] {
            assert_eq!(
                validate(raw, &first_pass(&[])).unwrap_err(),
                ValidationError::NoGroundingEvidence
            );
        }
    }

    #[test]
    fn test_missing_core_fields() {
        let raw = r#"{"summary": "ok", "observation": "  "}"#;
        let err = validate(raw, &first_pass(&[1])).unwrap_err();
        assert_eq!(
            err,
            ValidationError::MissingCoreFields(vec!["narrativeSummary", "observation"])
        );
    }

    #[test]
    fn test_unparseable() {
        let err = validate("no json here", &first_pass(&[1])).unwrap_err();
        assert!(matches!(err, ValidationError::Unparseable(_)));
    }

    #[test]
    fn test_micro_truncation_counts_chars() {
        let mut value: Value = serde_json::from_str(&composition(1, 1)).unwrap();
        value["micro"]["nextAction"] = Value::String("\u{00E9}".repeat(60));
        value["micro"]["question"] = Value::String("why ".repeat(30));
        let result = validate(&value.to_string(), &first_pass(&[1])).unwrap();

        let micro = &result.output.micro;
        assert_eq!(micro.next_action.chars().count(), MAX_NEXT_ACTION_CHARS);
        assert!(micro.next_action.ends_with("..."));
        assert_eq!(micro.question.chars().count(), MAX_QUESTION_CHARS);
        assert!(micro.question.ends_with("..."));
        assert_eq!(result.warnings.len(), 2);
    }

    #[test]
    fn test_ungrounded_relation_is_kept_with_warning() {
        let mut value: Value = serde_json::from_str(&composition(1, 1)).unwrap();
        value["surfacedRelations"][0]["note"] = Value::String("paraphrased".to_string());
        value["trace"]["usedQuoteSids"] = serde_json::json!([1, 7]);
        let first = first_pass(&[1, 2]);
        let before = first.clone();

        let result = validate(&value.to_string(), &first).unwrap();
        assert_eq!(result.output.surfaced_relations.len(), 1);
        assert_eq!(result.warnings.len(), 2);
        assert_eq!(first, before);
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("abcdefghij", 8), "abcde...");
        // Whitespace at the cut is kept
        assert_eq!(truncate_chars("abcd efghij", 8), "abcd ...");
    }
}
