//! Caller-visible failures of an analysis run.
//!
//! Parse and resolution failures never appear here: they are recovered
//! per chunk or per selection and reported as warnings/uncertainties.

use thiserror::Error;

use crate::compose::ValidationError;
use crate::core::LimitViolation;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("No language model configured (set GROUNDNOTE_MODEL_ENDPOINT or GROUNDNOTE_MODEL_COMMAND)")]
    NotConfigured,

    #[error(transparent)]
    Limit(#[from] LimitViolation),

    #[error("Model call timed out after {timeout_ms}ms during {stage}")]
    LlmTimeout { stage: &'static str, timeout_ms: u64 },

    #[error("Model call failed during {stage}: {message}")]
    Llm { stage: &'static str, message: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Analysis cancelled")]
    Cancelled,
}

impl AnalysisError {
    /// Whether retrying the same request could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LlmTimeout { .. } | Self::Llm { .. })
    }
}
