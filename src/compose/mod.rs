//! Second pass: a narrative composed strictly from first-pass evidence.

pub mod types;
pub mod validator;

pub use types::{Micro, Rationale, SecondPassOutput, Sentiment, Trace};
pub use validator::{
    truncate_chars, validate, ValidatedComposition, ValidationError, MAX_NEXT_ACTION_CHARS,
    MAX_OBSERVATION_CHARS, MAX_QUESTION_CHARS,
};
