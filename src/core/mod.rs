//! Core orchestration logic.
//!
//! This module contains:
//! - Analyzer: Two-pass analysis engine
//! - Limits: Resource limits and input validation
//! - Store: Append-only analysis log

pub mod analyzer;
pub mod limits;
pub mod store;

pub use analyzer::{Analysis, Analyzer, AnalyzerConfig, Extraction};
pub use limits::{AnalysisLimits, LimitViolation};
pub use store::{AnalysisRecord, AnalysisStore};
