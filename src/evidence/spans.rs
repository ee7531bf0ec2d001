//! Span resolution: turning model selections into exact source ranges.
//!
//! # Resolution order (per selection)
//!
//! 1. **Sentence / range addressing**: `sid` or `sidRange` map straight to
//!    sentence offsets.
//! 2. **Partial addressing**: `t0/t1` or `char0/char1` inside one sentence,
//!    snapped outward so quotes never start or end mid-word.
//! 3. **Exact search** for the literal text, from a monotonically advancing
//!    cursor, then once over the whole source.
//! 4. **Normalized search** in matching-mode folded space, mapped back.
//! 5. **Fuzzy search**: first word window where at least 70% of the
//!    candidate's words appear.
//!
//! Anything else is recorded as an uncertainty. We never emit a span that
//! is not an exact slice of the source: `&source[start..end] == text`.
//!
//! All offsets are UTF-8 byte offsets into the storage-normalized source.

use std::collections::HashSet;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::types::{Address, ResolutionMethod as Method, ResolvedSpan, Selection};
use crate::text::{normalize_for_matching, normalize_for_storage, word_spans, FoldedText, Segmentation};

/// Minimum candidate words before fuzzy matching is attempted
pub const FUZZY_MIN_WORDS: usize = 3;

/// Output of one resolution call
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub spans: Vec<ResolvedSpan>,
    /// One note per selection that could not be located
    pub uncertainties: Vec<String>,
}

/// A source word prepared for fuzzy comparison
#[derive(Debug, Clone)]
struct SourceWord {
    start: usize,
    end: usize,
    key: String,
}

/// Resolves selections against one source text.
///
/// Holds the search cursor and the seen-set for a single resolution call;
/// create one per chunk, seeded with the chunk's base offset.
pub struct SpanResolver<'a> {
    source: &'a str,
    segmentation: &'a Segmentation,
    cursor: usize,
    seen: HashSet<(usize, usize)>,
    folded: Option<FoldedText>,
    words: Option<Vec<SourceWord>>,
}

/// Outcome of resolving one selection
enum Outcome {
    Resolved(ResolvedSpan),
    Duplicate,
    Unresolved(String),
}

impl<'a> SpanResolver<'a> {
    pub fn new(source: &'a str, segmentation: &'a Segmentation, base_offset: usize) -> Self {
        let mut cursor = base_offset.min(source.len());
        while !source.is_char_boundary(cursor) {
            cursor += 1;
        }
        Self {
            source,
            segmentation,
            cursor,
            seen: HashSet::new(),
            folded: None,
            words: None,
        }
    }

    /// Current search cursor (byte offset)
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Resolve every selection in order.
    pub fn resolve_all(mut self, selections: &[Selection]) -> Resolution {
        let mut resolution = Resolution::default();

        for selection in selections {
            match self.resolve_one(selection) {
                Outcome::Resolved(span) => resolution.spans.push(span),
                Outcome::Duplicate => {}
                Outcome::Unresolved(note) => {
                    warn!(%note, "Dropping unresolved selection");
                    resolution.uncertainties.push(note);
                }
            }
        }

        resolution
    }

    fn resolve_one(&mut self, selection: &Selection) -> Outcome {
        let located = self
            .structured(&selection.address)
            .or_else(|| self.search(selection.text.as_deref()?));

        let Some((start, end, method)) = located else {
            return Outcome::Unresolved(unresolved_note(selection));
        };

        if start >= end || end > self.source.len() {
            return Outcome::Unresolved(unresolved_note(selection));
        }
        self.cursor = self.cursor.max(end);

        if !self.seen.insert((start, end)) {
            debug!(start, end, "Skipping duplicate span");
            return Outcome::Duplicate;
        }

        debug!(start, end, ?method, "Resolved selection");
        Outcome::Resolved(ResolvedSpan {
            text: self.source[start..end].to_string(),
            start,
            end,
            reason: selection.reason.clone(),
            tag: selection.tag.clone(),
            method,
            sids: self.segmentation.sids_overlapping(start, end),
        })
    }

    /// Steps 1 and 2: sentence, range, token and char addressing.
    fn structured(&self, address: &Address) -> Option<(usize, usize, Method)> {
        let seg = self.segmentation;
        match *address {
            Address::Sentence { sid } => {
                let sentence = seg.sentence(sid)?;
                Some((sentence.char_start, sentence.char_end, Method::Sentence))
            }
            Address::SentenceRange { first, last } => {
                let (first, last) = if first <= last { (first, last) } else { (last, first) };
                // Every sid in between must exist, not just the endpoints.
                if (first..=last).any(|sid| seg.sentence(sid).is_none()) {
                    return None;
                }
                let start = seg.sentence(first)?.char_start;
                let end = seg.sentence(last)?.char_end;
                Some((start, end, Method::SentenceRange))
            }
            Address::Tokens { sid, t0, t1 } => {
                let sentence = seg.sentence(sid)?;
                let tokens = seg.tokens_of(sid);
                let t1 = (t1 as usize).min(tokens.len());
                let t0 = t0 as usize;
                if t0 >= t1 {
                    return None;
                }
                let (start, end) = snap_to_words(
                    self.source,
                    tokens[t0].char_start,
                    tokens[t1 - 1].char_end,
                    sentence.char_start,
                    sentence.char_end,
                )?;
                Some((start, end, Method::TokenRange))
            }
            Address::Chars { sid, char0, char1 } => {
                let sentence = seg.sentence(sid)?;
                let start = char_to_byte(&sentence.text, char0 as usize)?;
                let end = char_to_byte(&sentence.text, char1 as usize)?;
                if start >= end {
                    return None;
                }
                let (start, end) = snap_to_words(
                    self.source,
                    sentence.char_start + start,
                    sentence.char_start + end,
                    sentence.char_start,
                    sentence.char_end,
                )?;
                Some((start, end, Method::CharRange))
            }
            Address::Unaddressed => None,
        }
    }

    /// Steps 3 to 5: exact, normalized, then fuzzy search for `text`.
    fn search(&mut self, text: &str) -> Option<(usize, usize, Method)> {
        let needle = clean_quote(&normalize_for_storage(text));
        if needle.is_empty() {
            return None;
        }

        self
            .find_exact(&needle)
            .map(|(s, e)| (s, e, Method::Exact))
            .or_else(|| self.find_normalized(&needle).map(|(s, e)| (s, e, Method::Normalized)))
            .or_else(|| self.find_fuzzy(&needle).map(|(s, e)| (s, e, Method::Fuzzy)))
    }

    fn find_exact(&self, needle: &str) -> Option<(usize, usize)> {
        let from_cursor = self.source[self.cursor..]
            .find(needle)
            .map(|pos| self.cursor + pos);
        let start = from_cursor.or_else(|| self.source.find(needle))?;
        Some((start, start + needle.len()))
    }

    fn find_normalized(&mut self, needle: &str) -> Option<(usize, usize)> {
        let needle = clean_quote(&normalize_for_matching(needle));
        if needle.is_empty() {
            return None;
        }

        let cursor = self.cursor;
        let source = self.source;
        let folded = self.folded.get_or_insert_with(|| FoldedText::new(source));
        let from = folded.folded_offset(cursor);
        let pos = folded.text[from..]
            .find(needle.as_str())
            .map(|p| from + p)
            .or_else(|| folded.text.find(needle.as_str()))?;

        folded.source_range(pos, pos + needle.len())
    }

    fn find_fuzzy(&mut self, needle: &str) -> Option<(usize, usize)> {
        let candidate: Vec<String> = word_spans(needle)
            .into_iter()
            .map(|(s, e)| word_key(&needle[s..e]))
            .filter(|w| !w.is_empty())
            .collect();
        let n = candidate.len();
        if n < FUZZY_MIN_WORDS {
            return None;
        }
        let required = (7 * n + 9) / 10; // ceil(0.7 * n)

        let source = self.source;
        let cursor = self.cursor;
        let words = self.words.get_or_insert_with(|| {
            word_spans(source)
                .into_iter()
                .map(|(start, end)| SourceWord {
                    start,
                    end,
                    key: word_key(&source[start..end]),
                })
                .collect()
        });
        if words.len() < n {
            return None;
        }

        let matches = |key: &str, w: &str| !key.is_empty() && (key.contains(w) || w.contains(key));
        let hit = |word: &SourceWord| candidate.iter().any(|w| matches(word.key.as_str(), w.as_str()));

        let last_start = words.len() - n;
        let cursor_idx = words.partition_point(|w| w.start < cursor).min(last_start + 1);

        let first = (cursor_idx..=last_start).chain(0..cursor_idx).find(|&i| {
            let window = &words[i..i + n];
            let hits = candidate
                .iter()
                .filter(|w| window.iter().any(|x| matches(x.key.as_str(), w.as_str())))
                .count();
            hits >= required
        })?;

        // Shed edge words that match nothing in the candidate.
        let (mut a, mut b) = (first, first + n - 1);
        while a < b && !hit(&words[a]) {
            a += 1;
        }
        while b > a && !hit(&words[b]) {
            b -= 1;
        }
        Some((words[a].start, words[b].end))
    }
}

/// Resolve `selections` against `source`, seeding the cursor at `base_offset`.
pub fn resolve(
    selections: &[Selection],
    segmentation: &Segmentation,
    source: &str,
    base_offset: usize,
) -> Resolution {
    SpanResolver::new(source, segmentation, base_offset).resolve_all(selections)
}

fn unresolved_note(selection: &Selection) -> String {
    match &selection.text {
        Some(text) => {
            let preview: String = text.chars().take(60).collect();
            format!("Could not locate quote \"{}\"", preview)
        }
        None => format!("Could not resolve selection {:?}", selection.address),
    }
}

/// Trim whitespace and wrapping double quotes the model often adds.
fn clean_quote(text: &str) -> String {
    text.trim()
        .trim_matches(|c: char| matches!(c, '"' | '\u{201C}' | '\u{201D}'))
        .trim()
        .to_string()
}

/// Lowercased matching-mode key of a word, stripped of edge punctuation
fn word_key(word: &str) -> String {
    normalize_for_matching(word)
        .to_lowercase()
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_string()
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '\'' | '\u{2019}' | '-')
}

/// Byte offset of the `n`th char of `text`, clamped to its length
fn char_to_byte(text: &str, n: usize) -> Option<usize> {
    Some(text.char_indices().nth(n).map(|(i, _)| i).unwrap_or(text.len()))
}

/// Expand `[start, end)` outward to word boundaries within `[lo, hi)`,
/// then trim whitespace. Returns `None` if nothing is left.
pub fn snap_to_words(source: &str, start: usize, end: usize, lo: usize, hi: usize) -> Option<(usize, usize)> {
    let mut start = start.clamp(lo, hi);
    let mut end = end.clamp(start, hi);

    let char_at = |i: usize| source[i..].chars().next();
    let char_before = |i: usize| source[..i].chars().next_back();

    while start > lo {
        match (char_before(start), char_at(start)) {
            (Some(prev), Some(cur)) if is_word_char(prev) && is_word_char(cur) => {
                start -= prev.len_utf8();
            }
            _ => break,
        }
    }
    while end < hi {
        match (char_before(end), char_at(end)) {
            (Some(prev), Some(next)) if is_word_char(prev) && is_word_char(next) => {
                end += next.len_utf8();
            }
            _ => break,
        }
    }

    let slice = &source[start..end];
    let trimmed_start = start + (slice.len() - slice.trim_start().len());
    let trimmed_end = start + slice.trim_end().len();
    if trimmed_start >= trimmed_end {
        return None;
    }
    Some((trimmed_start, trimmed_end))
}

/// Compute SHA256 hash of a byte slice, returning hex string with prefix
///
/// Used to detect whether stored analyses are stale against an entry.
pub fn compute_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let result = hasher.finalize();
    format!("sha256:{}", hex::encode(result))
}

/// Context around a span, with ellipses where the source was cut.
pub fn extract_anchor_text(source: &str, start: usize, end: usize, window: usize) -> String {
    let span_len = end.saturating_sub(start);
    let each_side = window.saturating_sub(span_len) / 2;

    let mut anchor_start = start.saturating_sub(each_side);
    while anchor_start > 0 && !source.is_char_boundary(anchor_start) {
        anchor_start -= 1;
    }
    let mut anchor_end = (end + each_side).min(source.len());
    while anchor_end < source.len() && !source.is_char_boundary(anchor_end) {
        anchor_end += 1;
    }

    let prefix = if anchor_start > 0 { "..." } else { "" };
    let suffix = if anchor_end < source.len() { "..." } else { "" };
    format!("{}{}{}", prefix, &source[anchor_start..anchor_end], suffix)
}

/// Line and column position (1-indexed for editor compatibility)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineCol {
    pub line: usize,
    pub col: usize,
}

/// Convert a byte offset to a 1-indexed line/column (column in chars).
pub fn offset_to_line_col(source: &str, offset: usize) -> LineCol {
    let offset = offset.min(source.len());
    let prefix = &source[..offset];
    let line = prefix.matches('\n').count() + 1;
    let line_start = prefix.rfind('\n').map(|i| i + 1).unwrap_or(0);
    let col = source[line_start..offset].chars().count() + 1;
    LineCol { line, col }
}
