//! Highlight segmentation for rendering.
//!
//! Works only from final span offsets, so the output is independent of how
//! each span was found.

use serde::{Deserialize, Serialize};

use super::types::ResolvedSpan;

/// One run of the source text, either quoted or plain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub text: String,
    pub is_highlight: bool,
    /// Index of the originating span in the caller's list
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range_id: Option<usize>,
}

impl Segment {
    fn plain(text: &str) -> Self {
        Self {
            text: text.to_string(),
            is_highlight: false,
            range_id: None,
        }
    }
}

/// Split `source` into non-overlapping segments covering it exactly.
///
/// Spans are taken in start order; when two overlap, the earlier start keeps
/// the shared bytes and the later span is clipped to begin where it ends.
/// Spans that are empty, out of bounds, or not on char boundaries are ignored.
pub fn highlight(source: &str, spans: &[ResolvedSpan]) -> Vec<Segment> {
    let mut ranges: Vec<(usize, usize, usize)> = spans
        .iter()
        .enumerate()
        .filter(|(_, s)| {
            s.start < s.end
                && s.end <= source.len()
                && source.is_char_boundary(s.start)
                && source.is_char_boundary(s.end)
        })
        .map(|(idx, s)| (s.start, s.end, idx))
        .collect();
    ranges.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)).then(a.2.cmp(&b.2)));

    let mut segments = Vec::new();
    let mut pos = 0;

    for (start, end, idx) in ranges {
        if end <= pos {
            continue;
        }
        let start = start.max(pos);
        if start > pos {
            segments.push(Segment::plain(&source[pos..start]));
        }
        segments.push(Segment {
            text: source[start..end].to_string(),
            is_highlight: true,
            range_id: Some(idx),
        });
        pos = end;
    }

    if pos < source.len() {
        segments.push(Segment::plain(&source[pos..]));
    }

    segments
}
