//! Chunk planning for entries that exceed the single-pass size budget.
//!
//! Chunks are runs of whole sentences, so they always split on whitespace
//! and sids stay global across chunks. Paragraph breaks are preferred cut
//! points.

use serde::{Deserialize, Serialize};

use super::segment::Segmentation;

/// A contiguous run of sentences extracted in one model call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    /// Position in document order
    pub index: usize,
    /// Byte offset of the first sentence in the source
    pub base_offset: usize,
    /// Byte offset one past the last sentence
    pub end_offset: usize,
    pub first_sid: u32,
    pub last_sid: u32,
}

impl Chunk {
    /// The chunk's slice of the source text
    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.base_offset..self.end_offset]
    }
}

/// Group sentences into chunks of at most `max_chunk_bytes` each.
///
/// A single sentence longer than the budget becomes its own chunk. Empty
/// segmentations produce no chunks.
pub fn plan_chunks(source: &str, segmentation: &Segmentation, max_chunk_bytes: usize) -> Vec<Chunk> {
    let sentences = &segmentation.sentences;
    let mut chunks = Vec::new();
    let mut first = 0usize;

    while first < sentences.len() {
        let base = sentences[first].char_start;
        let mut last = first;
        // Index of the last sentence followed by a paragraph break
        let mut paragraph_cut: Option<usize> = None;

        while last + 1 < sentences.len() && sentences[last + 1].char_end - base <= max_chunk_bytes {
            let gap = &source[sentences[last].char_end..sentences[last + 1].char_start];
            if gap.matches('\n').count() >= 2 {
                paragraph_cut = Some(last);
            }
            last += 1;
        }

        if last + 1 < sentences.len() {
            if let Some(cut) = paragraph_cut {
                if sentences[cut].char_end - base >= max_chunk_bytes / 2 {
                    last = cut;
                }
            }
        }

        chunks.push(Chunk {
            index: chunks.len(),
            base_offset: base,
            end_offset: sentences[last].char_end,
            first_sid: sentences[first].sid,
            last_sid: sentences[last].sid,
        });
        first = last + 1;
    }

    chunks
}
