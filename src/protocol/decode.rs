//! Decoding of untrusted model responses.
//!
//! Responses may arrive fenced, commented, with trailing commas or with
//! typographic quotes. We strip, parse strictly, then repair and parse once
//! more. The typed decode always yields a complete record or an explicit
//! [`Decoded::Unparseable`]; missing or malformed optional fields take the
//! documented defaults below instead of failing the whole response.
//!
//! | field                   | default        |
//! |-------------------------|----------------|
//! | emotion/theme confidence| 0.5            |
//! | relation confidence     | 0.5            |
//! | entity salience         | 0.5            |
//! | entity sentiment        | 0.0            |
//! | entity type             | `"concept"`    |
//! | booleans                | `false`        |
//! | lists, strings          | empty          |

use serde_json::{Map, Value};
use tracing::debug;

use crate::evidence::types::{
    clamp_signed, clamp_unit, Address, Buckets, Coverage, Emotion, Entity, Observation, Relation,
    RelationKind, Selection, Theme,
};

pub const DEFAULT_CONFIDENCE: f64 = 0.5;
pub const DEFAULT_SALIENCE: f64 = 0.5;
pub const DEFAULT_SENTIMENT: f64 = 0.0;
pub const DEFAULT_ENTITY_TYPE: &str = "concept";

/// Result of decoding an untrusted response
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded<T> {
    Parsed(T),
    Unparseable { reason: String },
}

impl<T> Decoded<T> {
    pub fn is_parsed(&self) -> bool {
        matches!(self, Self::Parsed(_))
    }
}

/// A first-pass response, fully typed but not yet grounded
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawExtraction {
    pub selections: Vec<Selection>,
    pub emotions: Vec<Emotion>,
    pub themes: Vec<Theme>,
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
    pub observation: Observation,
    pub coverage: Coverage,
    pub buckets: Buckets,
    pub uncertainties: Vec<String>,
}

/// Parse a loosely formed JSON response, or `None` if every repair fails.
pub fn parse_loose(raw: &str) -> Option<Value> {
    parse_value(raw).ok()
}

/// Parse with the failure reason kept for logging.
pub fn parse_value(raw: &str) -> Result<Value, String> {
    let unfenced = strip_code_fences(raw);
    let uncommented = strip_comments(&unfenced);
    let body = extract_json_object(&uncommented).unwrap_or(uncommented.trim());
    if body.is_empty() {
        return Err("empty response".to_string());
    }

    match serde_json::from_str(body) {
        Ok(value) => Ok(value),
        Err(strict_err) => {
            let repaired = remove_trailing_commas(&fold_quotes(body));
            serde_json::from_str(&repaired).map_err(|repair_err| {
                debug!(%strict_err, %repair_err, "Response is not JSON after repair");
                format!("invalid JSON: {}", repair_err)
            })
        }
    }
}

/// Decode a first-pass extraction response.
pub fn decode_extraction(raw: &str) -> Decoded<RawExtraction> {
    let value = match parse_value(raw) {
        Ok(value) => value,
        Err(reason) => return Decoded::Unparseable { reason },
    };
    let Some(obj) = value.as_object() else {
        return Decoded::Unparseable {
            reason: "expected a JSON object".to_string(),
        };
    };

    Decoded::Parsed(RawExtraction {
        selections: list(obj, &["quotes", "evidence"])
            .filter_map(selection)
            .collect(),
        emotions: list(obj, &["emotions"]).filter_map(emotion).collect(),
        themes: list(obj, &["themes"]).filter_map(theme).collect(),
        entities: list(obj, &["entities"]).filter_map(entity).collect(),
        relations: list(obj, &["relations"]).filter_map(relation).collect(),
        observation: obj.get("observation").map(observation).unwrap_or_default(),
        coverage: obj.get("coverage").map(coverage).unwrap_or_default(),
        buckets: obj.get("buckets").map(buckets).unwrap_or_default(),
        uncertainties: list(obj, &["uncertainties"])
            .filter_map(|v| text(Some(v)))
            .collect(),
    })
}

/// Keep only the body of the first fenced block, if there is one.
fn strip_code_fences(text: &str) -> String {
    if !text.contains("```") {
        return text.to_string();
    }
    let mut out = String::new();
    let mut in_code = false;
    for line in text.lines() {
        if line.trim_start().starts_with("```") {
            if in_code {
                return out;
            }
            in_code = true;
            continue;
        }
        if in_code {
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

/// Remove `//` and `/* */` comments outside string literals.
fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match (c, chars.peek()) {
            ('"', _) => {
                in_string = true;
                out.push(c);
            }
            ('/', Some('/')) => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = '\0';
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
            }
            _ => out.push(c),
        }
    }

    out
}

/// The outermost balanced `{...}`, skipping braces inside strings.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, byte) in text.bytes().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=idx]);
                }
            }
            _ => {}
        }
    }

    // Unbalanced: hand the repair pass everything from the first brace.
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn fold_quotes(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{00AB}' | '\u{00BB}' => '"',
            '\u{2018}' | '\u{2019}' => '\'',
            other => other,
        })
        .collect()
}

/// Drop commas directly before `}` or `]`, outside strings.
fn remove_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            out.push(c);
            continue;
        }
        if c == '"' {
            in_string = true;
        } else if c == ',' {
            let next = chars[i + 1..].iter().find(|n| !n.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        out.push(c);
    }

    out
}

fn list<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> impl Iterator<Item = &'a Value> {
    keys.iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_array))
        .into_iter()
        .flatten()
}

pub(crate) fn field<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| obj.get(*k).filter(|v| !v.is_null()))
}

/// Number or numeric string
pub(crate) fn number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Non-negative integer, tolerating `3.0` and `"3"`
pub(crate) fn index(value: Option<&Value>) -> Option<u32> {
    let n = number(value)?;
    (n >= 0.0 && n.fract() == 0.0 && n <= u32::MAX as f64).then_some(n as u32)
}

pub(crate) fn text(value: Option<&Value>) -> Option<String> {
    let s = value?.as_str()?.trim();
    (!s.is_empty()).then(|| s.to_string())
}

fn flag(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.trim().eq_ignore_ascii_case("true"),
        _ => false,
    }
}

/// A quote; sentence and range addressing win over partial addressing.
fn selection(value: &Value) -> Option<Selection> {
    if let Some(quote) = text(Some(value)) {
        return Some(Selection::from_text(quote));
    }
    let obj = value.as_object()?;

    let sid = index(field(obj, &["sid"]));
    let range = field(obj, &["sidRange", "sid_range"])
        .and_then(Value::as_array)
        .filter(|pair| pair.len() == 2)
        .and_then(|pair| Some((index(pair.first())?, index(pair.get(1))?)));
    let tokens = (index(field(obj, &["t0"])), index(field(obj, &["t1"])));
    let chars = (index(field(obj, &["char0"])), index(field(obj, &["char1"])));

    let address = match (range, sid, tokens, chars) {
        (Some((first, last)), ..) => Address::SentenceRange { first, last },
        (None, Some(sid), (Some(t0), Some(t1)), _) => Address::Tokens { sid, t0, t1 },
        (None, Some(sid), _, (Some(char0), Some(char1))) => Address::Chars { sid, char0, char1 },
        (None, Some(sid), ..) => Address::Sentence { sid },
        _ => Address::Unaddressed,
    };
    let quote = text(field(obj, &["text", "quote"]));
    if address == Address::Unaddressed && quote.is_none() {
        debug!(?value, "Skipping quote with neither address nor text");
        return None;
    }

    Some(Selection {
        address,
        text: quote,
        reason: text(field(obj, &["reason", "why"])),
        tag: text(field(obj, &["tag", "category"])),
    })
}

fn emotion(value: &Value) -> Option<Emotion> {
    let (label, confidence) = named_score(value, &["label", "emotion", "name"], &["confidence", "score"])?;
    Some(Emotion { label, confidence })
}

fn theme(value: &Value) -> Option<Theme> {
    let (name, confidence) = named_score(value, &["name", "theme", "label"], &["confidence", "score"])?;
    Some(Theme { name, confidence })
}

/// Bare strings or `{name, confidence}` objects
fn named_score(value: &Value, names: &[&str], scores: &[&str]) -> Option<(String, f64)> {
    if let Some(name) = text(Some(value)) {
        return Some((name, DEFAULT_CONFIDENCE));
    }
    let obj = value.as_object()?;
    let name = text(field(obj, names))?;
    let score = number(field(obj, scores)).unwrap_or(DEFAULT_CONFIDENCE);
    Some((name, clamp_unit(score, DEFAULT_CONFIDENCE)))
}

fn entity(value: &Value) -> Option<Entity> {
    if let Some(name) = text(Some(value)) {
        return Some(Entity {
            name,
            entity_type: DEFAULT_ENTITY_TYPE.to_string(),
            salience: DEFAULT_SALIENCE,
            sentiment: DEFAULT_SENTIMENT,
        });
    }
    let obj = value.as_object()?;
    Some(Entity {
        name: text(field(obj, &["name"]))?,
        entity_type: text(field(obj, &["type", "kind"]))
            .map(|t| t.to_lowercase())
            .unwrap_or_else(|| DEFAULT_ENTITY_TYPE.to_string()),
        salience: clamp_unit(
            number(field(obj, &["salience"])).unwrap_or(DEFAULT_SALIENCE),
            DEFAULT_SALIENCE,
        ),
        sentiment: clamp_signed(
            number(field(obj, &["sentiment"])).unwrap_or(DEFAULT_SENTIMENT),
            DEFAULT_SENTIMENT,
        ),
    })
}

pub(crate) fn relation(value: &Value) -> Option<Relation> {
    let obj = value.as_object()?;
    let raw_kind = text(field(obj, &["type", "kind"]))?;
    let Some(kind) = RelationKind::parse(&raw_kind) else {
        debug!(kind = %raw_kind, "Skipping relation of unknown type");
        return None;
    };
    Some(Relation {
        kind,
        sid_a: index(field(obj, &["sidA", "sid_a", "a"]))?,
        sid_b: index(field(obj, &["sidB", "sid_b", "b"]))?,
        confidence: clamp_unit(
            number(field(obj, &["confidence"])).unwrap_or(DEFAULT_CONFIDENCE),
            DEFAULT_CONFIDENCE,
        ),
        note: text(field(obj, &["note"])).unwrap_or_default(),
    })
}

fn observation(value: &Value) -> Observation {
    if let Some(text) = text(Some(value)) {
        return Observation {
            text,
            evidence_sids: Vec::new(),
        };
    }
    let Some(obj) = value.as_object() else {
        return Observation::default();
    };
    Observation {
        text: text(field(obj, &["text"])).unwrap_or_default(),
        evidence_sids: field(obj, &["evidenceSids", "evidence_sids", "sids"])
            .and_then(Value::as_array)
            .map(|sids| sids.iter().filter_map(|v| index(Some(v))).collect())
            .unwrap_or_default(),
    }
}

fn coverage(value: &Value) -> Coverage {
    Coverage {
        begin: flag(value.get("begin")),
        middle: flag(value.get("middle")),
        end: flag(value.get("end")),
    }
}

fn buckets(value: &Value) -> Buckets {
    Buckets::new(
        flag(value.get("feeling")),
        flag(value.get("rule")),
        flag(value.get("consequence")),
        flag(value.get("decision")),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(raw: &str) -> RawExtraction {
        match decode_extraction(raw) {
            Decoded::Parsed(extraction) => extraction,
            Decoded::Unparseable { reason } => panic!("unparseable: {}", reason),
        }
    }

    #[test]
    fn test_plain_json() {
        let value = parse_loose(r#"{"quotes": []}"#).unwrap();
        assert!(value["quotes"].is_array());
    }

    #[test]
    fn test_fenced_with_prose() {
        let raw = "Here you go:\n```json\n{\"themes\": [\"work\"]}\n```\nHope that helps.";
        assert_eq!(parsed(raw).themes[0].name, "work");
    }

    #[test]
    fn test_comments_outside_strings_only() {
        let raw = r#"{
            // which sentence
            "quotes": [{"sid": 2, "reason": "see http://x.y /* kept */"}] /* trailing */
        }"#;
        let extraction = parsed(raw);
        assert_eq!(extraction.selections[0].address, Address::Sentence { sid: 2 });
        assert_eq!(
            extraction.selections[0].reason.as_deref(),
            Some("see http://x.y /* kept */")
        );
    }

    #[test]
    fn test_repairs_trailing_commas_and_smart_quotes() {
        let raw = "{\u{201C}themes\u{201D}: [{\"name\": \"rest\", \"confidence\": 0.4,},],}";
        let extraction = parsed(raw);
        assert_eq!(extraction.themes.len(), 1);
        assert_eq!(extraction.themes[0].confidence, 0.4);
    }

    #[test]
    fn test_total_failure_is_unparseable() {
        assert!(!decode_extraction("I could not find any quotes.").is_parsed());
        assert!(!decode_extraction("").is_parsed());
        assert!(!decode_extraction("[1, 2]").is_parsed());
        assert!(parse_loose("{not json at all").is_none());
    }

    #[test]
    fn test_address_precedence() {
        let raw = r#"{"quotes": [
            {"sid": 3},
            {"sidRange": [7, 9], "t0": 1, "t1": 2},
            {"sid": 4, "t0": 1, "t1": 3, "char0": 0, "char1": 5},
            {"sid": 5, "char0": "2", "char1": 8.0},
            {"text": "just words"},
            "bare string",
            {"reason": "nothing to locate"}
        ]}"#;
        let addresses: Vec<Address> = parsed(raw).selections.iter().map(|s| s.address).collect();
        assert_eq!(
            addresses,
            vec![
                Address::Sentence { sid: 3 },
                Address::SentenceRange { first: 7, last: 9 },
                Address::Tokens { sid: 4, t0: 1, t1: 3 },
                Address::Chars { sid: 5, char0: 2, char1: 8 },
                Address::Unaddressed,
                Address::Unaddressed,
            ]
        );
    }

    #[test]
    fn test_defaults_and_clamping() {
        let raw = r#"{
            "emotions": ["calm", {"label": "angry", "confidence": 7}],
            "entities": [{"name": "Sam", "type": "Person", "sentiment": -4}, {"type": "place"}],
            "relations": [
                {"type": "tension", "sidA": 1, "sidB": 2},
                {"type": "causal", "sidA": 1, "sidB": 2},
                {"type": "pattern", "sidA": 1}
            ],
            "buckets": {"feeling": true, "decision": "true"},
            "observation": "You return to rest often."
        }"#;
        let e = parsed(raw);
        assert_eq!(e.emotions[0].confidence, DEFAULT_CONFIDENCE);
        assert_eq!(e.emotions[1].confidence, 1.0);
        assert_eq!(e.entities.len(), 1);
        assert_eq!(e.entities[0].entity_type, "person");
        assert_eq!(e.entities[0].salience, DEFAULT_SALIENCE);
        assert_eq!(e.entities[0].sentiment, -1.0);
        assert_eq!(e.relations.len(), 1);
        assert_eq!(e.relations[0].confidence, DEFAULT_CONFIDENCE);
        assert_eq!(e.buckets.missing, vec!["rule", "consequence"]);
        assert_eq!(e.observation.text, "You return to rest often.");
        assert_eq!(e.coverage, Coverage::default());
    }

    #[test]
    fn test_negative_index_is_ignored() {
        let e = parsed(r#"{"quotes": [{"sid": -1, "text": "fallback"}]}"#);
        assert_eq!(e.selections[0].address, Address::Unaddressed);
        assert_eq!(e.selections[0].text.as_deref(), Some("fallback"));
    }
}
