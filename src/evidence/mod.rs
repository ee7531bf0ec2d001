//! Evidence grounding for model selections
//!
//! Turns untrusted model selections into exact spans of the source text,
//! merges per-chunk results, and lays spans out for rendering.
//!
//! # Design Principles
//!
//! - **Honest unresolved**: Never generate wrong spans. If nothing matches, record an uncertainty.
//! - **Exact slices**: Every span's text is `source[start..end]`, byte for byte.
//! - **Forward cursor**: Text search never re-matches a position an earlier selection consumed.
//! - **Deterministic**: Same source and selections always produce the same spans.
//!
//! # Example
//!
//! ```
//! use groundnote::evidence::{resolve, Selection};
//! use groundnote::text::Segmentation;
//!
//! let source = "I woke early. The call went badly. I stayed calm.";
//! let seg = Segmentation::new(source, 80);
//! let selections = vec![Selection::sentence(2), Selection::from_text("stayed calm")];
//!
//! let resolution = resolve(&selections, &seg, source, 0);
//! assert_eq!(resolution.spans[0].text, "The call went badly.");
//! assert_eq!(resolution.spans[1].text, "stayed calm");
//! ```

pub mod highlight;
pub mod merge;
pub mod spans;
pub mod types;

pub use highlight::{highlight, Segment};
pub use merge::{merge, MergeLimits};
pub use spans::{
    compute_hash, extract_anchor_text, offset_to_line_col, resolve, snap_to_words, LineCol,
    Resolution, SpanResolver, FUZZY_MIN_WORDS,
};
pub use types::{
    quote_sid_list, Address, Buckets, Coverage, Emotion, Entity, EvidenceExtraction, FirstPass,
    Observation, Relation, RelationKind, ResolutionMethod, ResolvedSpan, Selection, Theme,
    SCHEMA_VERSION,
};
