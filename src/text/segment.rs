//! Deterministic sentence and token segmentation.
//!
//! Sentences get stable 1-based `sid`s; tokens get sentence-local 0-based
//! `tid`s. All offsets are UTF-8 byte offsets into the segmented text and
//! always land on char boundaries.

use serde::{Deserialize, Serialize};

/// Default cap on tokens listed per sentence
pub const DEFAULT_MAX_TOKENS_PER_SENTENCE: usize = 80;

/// Words that end with '.' without ending a sentence
const ABBREVIATIONS: &[&str] = &[
    "mr", "mrs", "ms", "dr", "prof", "sr", "jr", "st", "vs", "e.g", "i.e", "cf", "approx",
];

/// One sentence of the source text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sentence {
    pub sid: u32,
    pub text: String,
    pub char_start: usize,
    pub char_end: usize,
    /// Whitespace-delimited word count (uncapped)
    pub token_count: usize,
}

/// One whitespace-delimited token inside a sentence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    /// Index within the owning sentence
    pub tid: u32,
    pub text: String,
    pub char_start: usize,
    pub char_end: usize,
    pub sid: u32,
}

/// Sentences and tokens for one analysis run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segmentation {
    pub sentences: Vec<Sentence>,
    pub tokens: Vec<Token>,
}

impl Segmentation {
    /// Segment `text` into sentences and per-sentence capped tokens.
    pub fn new(text: &str, max_tokens_per_sentence: usize) -> Self {
        let sentences = segment_sentences(text);
        let tokens = tokens_for(&sentences, max_tokens_per_sentence);
        Self { sentences, tokens }
    }

    /// Look up a sentence by sid
    pub fn sentence(&self, sid: u32) -> Option<&Sentence> {
        self.sentences
            .binary_search_by_key(&sid, |s| s.sid)
            .ok()
            .map(|idx| &self.sentences[idx])
    }

    /// Tokens belonging to one sentence, in tid order
    pub fn tokens_of(&self, sid: u32) -> &[Token] {
        let start = self.tokens.partition_point(|t| t.sid < sid);
        let end = self.tokens.partition_point(|t| t.sid <= sid);
        &self.tokens[start..end]
    }

    /// Sids of all sentences intersecting the byte range `[start, end)`
    pub fn sids_overlapping(&self, start: usize, end: usize) -> Vec<u32> {
        self.sentences
            .iter()
            .filter(|s| s.char_start < end && start < s.char_end)
            .map(|s| s.sid)
            .collect()
    }

    /// A copy restricted to the inclusive sid range `first..=last`
    pub fn subset(&self, first: u32, last: u32) -> Self {
        let sentences = self
            .sentences
            .iter()
            .filter(|s| s.sid >= first && s.sid <= last)
            .cloned()
            .collect();
        let tokens = self
            .tokens
            .iter()
            .filter(|t| t.sid >= first && t.sid <= last)
            .cloned()
            .collect();
        Self { sentences, tokens }
    }

    pub fn is_empty(&self) -> bool {
        self.sentences.is_empty()
    }
}

/// Byte ranges of whitespace-delimited words in `text`
pub fn word_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut word_start: Option<usize> = None;

    for (offset, c) in text.char_indices() {
        match (c.is_whitespace(), word_start) {
            (true, Some(start)) => {
                spans.push((start, offset));
                word_start = None;
            }
            (false, None) => word_start = Some(offset),
            _ => {}
        }
    }
    if let Some(start) = word_start {
        spans.push((start, text.len()));
    }

    spans
}

fn is_terminal(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | '\u{2026}')
}

fn is_closer(c: char) -> bool {
    matches!(c, '"' | '\'' | '\u{201D}' | '\u{2019}' | ')' | ']' | '\u{00BB}')
}

fn opens_sentence(c: char) -> bool {
    (c.is_alphabetic() && !c.is_lowercase())
        || c.is_ascii_digit()
        || matches!(c, '"' | '\'' | '\u{201C}' | '\u{2018}' | '(' | '[' | '\u{00AB}')
}

fn bare_word(word: &str) -> &str {
    word.trim_start_matches(|c: char| !c.is_alphanumeric())
}

/// Whether the '.' at `dot` closes an abbreviation or an initial.
fn is_abbreviation(text: &str, sentence_start: usize, dot: usize) -> bool {
    let mut words = text[sentence_start..dot].split_whitespace().rev();
    let word = words.next().map(bare_word).unwrap_or("");
    if word.is_empty() {
        return false;
    }

    // Single capital initial opening a sentence or following a capitalised
    // word, e.g. "J. Smith" or "John F. Kennedy" but not "plan A."
    let mut chars = word.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        let after_name = words
            .next()
            .map(bare_word)
            .map_or(true, |prev| prev.chars().next().is_some_and(char::is_uppercase));
        if c.is_uppercase() && c != 'I' && after_name {
            return true;
        }
    }
    let lowered = word.to_lowercase();
    ABBREVIATIONS.contains(&lowered.as_str())
}

/// Split `text` into sentences.
///
/// Every char belongs to exactly one sentence or to whitespace between
/// sentences; sentence text never has leading or trailing whitespace.
/// Paragraph breaks end a sentence only when the text has terminal
/// punctuation somewhere; otherwise the whole trimmed text is one sentence.
pub fn segment_sentences(text: &str) -> Vec<Sentence> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let n = chars.len();
    let split_paragraphs = chars.iter().any(|&(_, c)| is_terminal(c));
    let byte_at = |idx: usize| if idx < n { chars[idx].0 } else { text.len() };

    let mut bounds: Vec<(usize, usize)> = Vec::new();
    let mut start: Option<usize> = None;
    let mut i = 0;

    while i < n {
        let (offset, c) = chars[i];

        if c.is_whitespace() {
            let mut k = i;
            let mut newlines = 0;
            while k < n && chars[k].1.is_whitespace() {
                if chars[k].1 == '\n' {
                    newlines += 1;
                }
                k += 1;
            }
            if let Some(s) = start {
                if split_paragraphs && newlines >= 2 && k < n {
                    bounds.push((s, offset));
                    start = None;
                }
            }
            i = k;
            continue;
        }

        let sentence_start = *start.get_or_insert(offset);

        if is_terminal(c) {
            let mut j = i + 1;
            while j < n && (is_terminal(chars[j].1) || is_closer(chars[j].1)) {
                j += 1;
            }
            if j < n && chars[j].1.is_whitespace() {
                let mut k = j;
                while k < n && chars[k].1.is_whitespace() {
                    k += 1;
                }
                let abbreviation = c == '.' && j == i + 1 && is_abbreviation(text, sentence_start, offset);
                if k < n && opens_sentence(chars[k].1) && !abbreviation {
                    bounds.push((sentence_start, byte_at(j)));
                    start = None;
                    i = k;
                    continue;
                }
            }
            i = j;
            continue;
        }

        i += 1;
    }

    if let Some(s) = start {
        let end = text.trim_end().len();
        if end > s {
            bounds.push((s, end));
        }
    }

    bounds
        .into_iter()
        .enumerate()
        .map(|(idx, (char_start, char_end))| {
            let text = &text[char_start..char_end];
            Sentence {
                sid: idx as u32 + 1,
                text: text.to_string(),
                char_start,
                char_end,
                token_count: word_spans(text).len(),
            }
        })
        .collect()
}

/// Tokenize already-segmented sentences, capping tokens per sentence.
fn tokens_for(sentences: &[Sentence], max_per_sentence: usize) -> Vec<Token> {
    let mut tokens = Vec::new();
    for sentence in sentences {
        for (tid, (start, end)) in word_spans(&sentence.text)
            .into_iter()
            .take(max_per_sentence)
            .enumerate()
        {
            tokens.push(Token {
                tid: tid as u32,
                text: sentence.text[start..end].to_string(),
                char_start: sentence.char_start + start,
                char_end: sentence.char_start + end,
                sid: sentence.sid,
            });
        }
    }
    tokens
}

/// Whitespace tokenization per sentence with absolute offsets.
pub fn segment_tokens(text: &str, max_tokens_per_sentence: usize) -> Vec<Token> {
    tokens_for(&segment_sentences(text), max_tokens_per_sentence)
}
