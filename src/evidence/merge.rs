//! Fan-in of per-chunk extraction results.
//!
//! Merging is pure. When two chunks contribute the same item, the copy from
//! the earlier input wins unless a score says otherwise; ties keep first-seen.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::types::{Emotion, Entity, EvidenceExtraction, Theme};

/// Characters that join several themes into one model-supplied name
const THEME_SEPARATORS: &[char] = &['/', ',', ';', '|', '&'];

/// Caps applied to a merged evidence set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeLimits {
    #[serde(default = "default_max_quotes")]
    pub max_quotes: usize,
    #[serde(default = "default_max_themes")]
    pub max_themes: usize,
    #[serde(default = "default_max_entities")]
    pub max_entities: usize,
}

fn default_max_quotes() -> usize {
    24
}

fn default_max_themes() -> usize {
    8
}

fn default_max_entities() -> usize {
    12
}

impl Default for MergeLimits {
    fn default() -> Self {
        Self {
            max_quotes: default_max_quotes(),
            max_themes: default_max_themes(),
            max_entities: default_max_entities(),
        }
    }
}

/// Combine extractions into one bounded, de-duplicated set.
pub fn merge(extractions: &[EvidenceExtraction], limits: &MergeLimits) -> EvidenceExtraction {
    let mut seen_quotes = HashSet::new();
    let mut quotes = Vec::new();
    for quote in extractions.iter().flat_map(|e| e.quotes.iter()) {
        if seen_quotes.insert((quote.text.as_str(), quote.start, quote.end)) {
            quotes.push(quote.clone());
        }
    }
    quotes.truncate(limits.max_quotes);

    let emotions = keep_max(
        extractions.iter().flat_map(|e| e.emotions.iter().cloned()),
        |e: &Emotion| name_key(&e.label),
        |e| e.confidence,
    );

    let mut themes = keep_max(
        extractions
            .iter()
            .flat_map(|e| e.themes.iter())
            .flat_map(split_theme),
        |t: &Theme| name_key(&t.name),
        |t| t.confidence,
    );
    themes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    themes.truncate(limits.max_themes);

    let mut entities = keep_max(
        extractions.iter().flat_map(|e| e.entities.iter().cloned()),
        |e: &Entity| name_key(&e.name),
        |e| e.salience,
    );
    entities.sort_by(|a, b| b.salience.total_cmp(&a.salience));
    entities.truncate(limits.max_entities);

    let mut seen_notes = HashSet::new();
    let uncertainties = extractions
        .iter()
        .flat_map(|e| e.uncertainties.iter())
        .filter(|note| seen_notes.insert(note.as_str()))
        .cloned()
        .collect();

    EvidenceExtraction {
        quotes,
        emotions,
        themes,
        entities,
        uncertainties,
    }
}

impl EvidenceExtraction {
    /// Apply the merge rules to a single extraction.
    pub fn dedup_local(&self, limits: &MergeLimits) -> Self {
        merge(std::slice::from_ref(self), limits)
    }
}

fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Dedup by key, keeping the highest-scoring instance in the slot of its
/// first occurrence. Items with an empty key are dropped.
fn keep_max<T, K, S>(items: impl Iterator<Item = T>, key: K, score: S) -> Vec<T>
where
    K: Fn(&T) -> String,
    S: Fn(&T) -> f64,
{
    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut kept: Vec<T> = Vec::new();

    for item in items {
        let k = key(&item);
        if k.is_empty() {
            continue;
        }
        match slots.get(&k) {
            Some(&idx) => {
                if score(&item) > score(&kept[idx]) {
                    kept[idx] = item;
                }
            }
            None => {
                slots.insert(k, kept.len());
                kept.push(item);
            }
        }
    }

    kept
}

/// "work/family" becomes two themes sharing the original confidence
fn split_theme(theme: &Theme) -> Vec<Theme> {
    theme
        .name
        .split(THEME_SEPARATORS)
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| Theme {
            name: part.to_string(),
            confidence: theme.confidence,
        })
        .collect()
}
