//! Resource limits for an analysis run.
//!
//! Bounds what a single run may cost:
//! - Input size
//! - Prompt size (sentences listed, tokens per sentence)
//! - Chunking threshold and concurrent model calls
//! - Per-call timeout
//! - Size of the merged evidence set

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::evidence::MergeLimits;
use crate::protocol::PromptLimits;

/// Limits applied by the analyzer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisLimits {
    /// Maximum entry size in bytes (default: 256KB)
    #[serde(default = "default_max_input_bytes")]
    pub max_input_bytes: usize,

    /// Entries larger than this are extracted chunk by chunk (default: 12KB)
    #[serde(default = "default_chunk_threshold")]
    pub chunk_threshold_bytes: usize,

    /// Sentences listed per extraction prompt (default: 150)
    #[serde(default = "default_max_sentences")]
    pub max_sentences_in_prompt: usize,

    /// Tokens kept per sentence (default: 80)
    #[serde(default = "default_max_tokens")]
    pub max_tokens_per_sentence: usize,

    /// Chunk extraction calls in flight at once (default: 4)
    #[serde(default = "default_max_concurrent_calls")]
    pub max_concurrent_calls: usize,

    /// Per model call timeout in milliseconds (default: 60000)
    #[serde(default = "default_call_timeout")]
    pub call_timeout_ms: u64,

    #[serde(default)]
    pub merge: MergeLimits,
}

fn default_max_input_bytes() -> usize {
    256 * 1024
}
fn default_chunk_threshold() -> usize {
    12 * 1024
}
fn default_max_sentences() -> usize {
    150
}
fn default_max_tokens() -> usize {
    crate::text::DEFAULT_MAX_TOKENS_PER_SENTENCE
}
fn default_max_concurrent_calls() -> usize {
    4
}
fn default_call_timeout() -> u64 {
    60_000
}

impl Default for AnalysisLimits {
    fn default() -> Self {
        Self {
            max_input_bytes: default_max_input_bytes(),
            chunk_threshold_bytes: default_chunk_threshold(),
            max_sentences_in_prompt: default_max_sentences(),
            max_tokens_per_sentence: default_max_tokens(),
            max_concurrent_calls: default_max_concurrent_calls(),
            call_timeout_ms: default_call_timeout(),
            merge: MergeLimits::default(),
        }
    }
}

impl AnalysisLimits {
    /// Validate an entry before any model call
    pub fn validate_input(&self, input: &str) -> Result<(), LimitViolation> {
        let size = input.len();
        if size > self.max_input_bytes {
            return Err(LimitViolation::MaxInputBytes {
                actual: size,
                limit: self.max_input_bytes,
            });
        }
        if input.trim().is_empty() {
            return Err(LimitViolation::EmptyInput);
        }
        Ok(())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn prompt_limits(&self) -> PromptLimits {
        PromptLimits {
            max_sentences: self.max_sentences_in_prompt,
        }
    }
}

/// Limit violation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LimitViolation {
    #[error("Maximum input bytes exceeded: {actual} > {limit}")]
    MaxInputBytes { actual: usize, limit: usize },

    #[error("Entry is empty")]
    EmptyInput,
}
