//! Selection protocol: prompts out, loosely formed JSON back in.

pub mod decode;
pub mod prompt;

use serde::{Deserialize, Serialize};

pub use decode::{decode_extraction, parse_loose, Decoded, RawExtraction};
pub use prompt::{build_composition_request, build_extraction_request, PromptLimits};

/// An opaque request to the language-model collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRequest {
    pub prompt: String,
    pub system: String,
    pub temperature: f32,
}
