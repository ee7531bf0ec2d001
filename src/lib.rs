//! groundnote - grounded insights for journal entries
//!
//! Turns a free-form journal entry into a summary, sentiment and follow-up
//! prompts that are traceable to exact spans of the writer's own words.
//!
//! # Architecture
//!
//! Analysis runs in two passes over a language model:
//! - The evidence pass asks the model to *select* sentences, token ranges
//!   or short quotes; selections are resolved locally to byte offsets
//! - The composition pass may only cite sentences the evidence pass quoted,
//!   and is rejected when it does not
//!
//! # Modules
//!
//! - `text`: Normalization, segmentation and chunk planning
//! - `protocol`: Prompts out, tolerant JSON decoding back in
//! - `evidence`: Span resolution, merging and highlighting
//! - `compose`: Second-pass validation
//! - `core`: Analyzer, limits and the analysis store
//! - `adapters`: Language-model backends (HTTP, local command)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Show how an entry is split into sentences
//! groundnote segment entry.txt
//!
//! # Run both passes and store the result
//! GROUNDNOTE_MODEL_ENDPOINT=http://localhost:11434/v1 groundnote analyze entry.txt
//!
//! # Inspect the stored analysis
//! groundnote show entry --text entry.txt
//! ```

pub mod adapters;
pub mod cli;
pub mod compose;
pub mod config;
pub mod core;
pub mod error;
pub mod evidence;
pub mod protocol;
pub mod text;

// Re-export main types at crate root for convenience
pub use adapters::LanguageModel;
pub use compose::{validate, SecondPassOutput, ValidationError};
pub use core::{Analysis, AnalysisLimits, AnalysisRecord, AnalysisStore, Analyzer, AnalyzerConfig};
pub use error::AnalysisError;
pub use evidence::{highlight, merge, resolve, FirstPass, ResolvedSpan, Selection};
pub use text::{normalize_for_storage, Segmentation};
