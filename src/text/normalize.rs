//! Text normalization in two strengths.
//!
//! - **Storage** (offset-preserving): NFC composition and line-ending fold.
//!   The result is the canonical source for every absolute offset.
//! - **Matching**: storage plus quote/dash/ellipsis folding and whitespace
//!   collapse. Only used to *locate* a quote, never to report its span.
//!
//! [`FoldedText`] carries the matching-mode text together with a map back
//! to byte offsets in the storage-normalized source.

use unicode_normalization::UnicodeNormalization;

/// Apply NFC composition and fold `\r\n` / `\r` to `\n`.
pub fn normalize_for_storage(text: &str) -> String {
    let composed: String = text.nfc().collect();
    if !composed.contains('\r') {
        return composed;
    }
    composed.replace("\r\n", "\n").replace('\r', "\n")
}

/// Storage normalization plus glyph folding and whitespace collapse.
pub fn normalize_for_matching(text: &str) -> String {
    FoldedText::new(&normalize_for_storage(text)).text
}

/// Fold a single char into its matching-mode form.
///
/// Returns `None` for whitespace (handled by the caller's collapse logic).
fn fold_char(c: char) -> Option<&'static str> {
    let folded = match c {
        '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}' | '\u{2032}' | '\u{0060}' | '\u{00B4}' => "'",
        '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{201F}' | '\u{2033}' | '\u{00AB}' | '\u{00BB}' => "\"",
        '\u{2010}' | '\u{2011}' | '\u{2012}' | '\u{2013}' | '\u{2014}' | '\u{2015}' | '\u{2212}' => "-",
        '\u{2026}' => "...",
        _ => return None,
    };
    Some(folded)
}

/// Matching-mode text with a byte map back into its source.
#[derive(Debug, Clone)]
pub struct FoldedText {
    /// The folded, whitespace-collapsed text
    pub text: String,
    /// For each byte of `text`, the source byte offset where its char starts
    starts: Vec<usize>,
    /// For each byte of `text`, the source byte offset where its char ends
    ends: Vec<usize>,
}

impl FoldedText {
    /// Fold `source` (expected to be storage-normalized already).
    pub fn new(source: &str) -> Self {
        let mut text = String::with_capacity(source.len());
        let mut starts = Vec::with_capacity(source.len());
        let mut ends = Vec::with_capacity(source.len());
        let mut pending_space: Option<(usize, usize)> = None;

        for (offset, c) in source.char_indices() {
            let char_end = offset + c.len_utf8();

            if c.is_whitespace() {
                // Leading whitespace is dropped; interior runs collapse to one space.
                if !text.is_empty() {
                    pending_space = Some(match pending_space {
                        Some((start, _)) => (start, char_end),
                        None => (offset, char_end),
                    });
                }
                continue;
            }

            if let Some((space_start, space_end)) = pending_space.take() {
                text.push(' ');
                starts.push(space_start);
                ends.push(space_end);
            }

            match fold_char(c) {
                Some(replacement) => {
                    for _ in 0..replacement.len() {
                        starts.push(offset);
                        ends.push(char_end);
                    }
                    text.push_str(replacement);
                }
                None => {
                    for _ in 0..c.len_utf8() {
                        starts.push(offset);
                        ends.push(char_end);
                    }
                    text.push(c);
                }
            }
        }

        Self { text, starts, ends }
    }

    /// Map a folded byte range back to a source byte range.
    pub fn source_range(&self, start: usize, end: usize) -> Option<(usize, usize)> {
        if start >= end || end > self.text.len() {
            return None;
        }
        Some((self.starts[start], self.ends[end - 1]))
    }

    /// First folded byte whose source char starts at or after `source_offset`.
    pub fn folded_offset(&self, source_offset: usize) -> usize {
        let idx = self.starts.partition_point(|&s| s < source_offset);
        // Land on a char boundary of the folded text.
        let mut idx = idx.min(self.text.len());
        while idx < self.text.len() && !self.text.is_char_boundary(idx) {
            idx += 1;
        }
        idx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_folds_line_endings() {
        assert_eq!(normalize_for_storage("a\r\nb\rc\n"), "a\nb\nc\n");
    }

    #[test]
    fn test_storage_composes_nfc() {
        // "e" + combining acute -> single precomposed char
        let decomposed = "caf\u{0065}\u{0301}";
        let normalized = normalize_for_storage(decomposed);
        assert_eq!(normalized, "caf\u{00E9}");
        assert_eq!(normalized.chars().count(), 4);
    }

    #[test]
    fn test_matching_folds_glyphs() {
        let text = "\u{201C}I can\u{2019}t\u{201D} \u{2014} well\u{2026}";
        assert_eq!(normalize_for_matching(text), "\"I can't\" - well...");
    }

    #[test]
    fn test_matching_collapses_whitespace() {
        assert_eq!(normalize_for_matching("  one \n\n two\tthree  "), "one two three");
    }

    #[test]
    fn test_folded_maps_back_to_source() {
        let source = "She said \u{201C}no\u{201D}  again.";
        let folded = FoldedText::new(source);
        let needle = "\"no\" again";
        let pos = folded.text.find(needle).unwrap();
        let (start, end) = folded.source_range(pos, pos + needle.len()).unwrap();
        assert_eq!(&source[start..end], "\u{201C}no\u{201D}  again");
    }

    #[test]
    fn test_folded_offset_is_monotonic() {
        let source = "a\u{2014}b c";
        let folded = FoldedText::new(source);
        assert_eq!(folded.text, "a-b c");
        assert_eq!(folded.folded_offset(0), 0);
        assert_eq!(folded.folded_offset(1), 1);
        assert_eq!(folded.folded_offset(4), 2);
        assert_eq!(folded.folded_offset(source.len()), folded.text.len());
    }
}
