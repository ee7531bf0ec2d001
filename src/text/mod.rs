//! Text preparation: normalization, segmentation and chunk planning.
//!
//! Everything here is pure and deterministic; the same input always yields
//! byte-for-byte identical output.

pub mod chunk;
pub mod normalize;
pub mod segment;

pub use chunk::{plan_chunks, Chunk};
pub use normalize::{normalize_for_matching, normalize_for_storage, FoldedText};
pub use segment::{
    segment_sentences, segment_tokens, word_spans, Segmentation, Sentence, Token,
    DEFAULT_MAX_TOKENS_PER_SENTENCE,
};
