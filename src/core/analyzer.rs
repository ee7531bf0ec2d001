//! Main analyzer for a journal entry.
//!
//! Coordinates normalization, chunked evidence extraction (fan-out/fan-in),
//! span resolution, merging, the composition call and its validation.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::adapters::LanguageModel;
use crate::compose::{validate, SecondPassOutput, ValidationError};
use crate::config::ResolvedConfig;
use crate::error::AnalysisError;
use crate::evidence::{
    highlight, merge, Buckets, Coverage, EvidenceExtraction, FirstPass, Observation, Relation, Segment,
    SpanResolver,
};
use crate::protocol::{
    build_composition_request, build_extraction_request, decode_extraction, Decoded, ModelRequest,
    RawExtraction,
};
use crate::text::{normalize_for_storage, plan_chunks, Chunk, Segmentation};

use super::limits::AnalysisLimits;

const EXTRACTION: &str = "extraction";
const COMPOSITION: &str = "composition";

/// Settings threaded into the analyzer
#[derive(Debug, Clone, Default)]
pub struct AnalyzerConfig {
    pub limits: AnalysisLimits,
}

impl From<&ResolvedConfig> for AnalyzerConfig {
    fn from(config: &ResolvedConfig) -> Self {
        Self {
            limits: config.limits.clone(),
        }
    }
}

/// Result of the first pass alone
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Extraction {
    /// Storage-normalized entry; all offsets refer to it
    pub source: String,
    pub segmentation: Segmentation,
    pub chunks: Vec<Chunk>,
    pub first_pass: FirstPass,
    pub warnings: Vec<String>,
}

/// A complete, validated analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub entry_id: String,
    pub source: String,
    pub first_pass: FirstPass,
    pub second_pass: SecondPassOutput,
    pub highlights: Vec<Segment>,
    pub warnings: Vec<String>,
}

/// Two-pass analysis engine
pub struct Analyzer {
    config: AnalyzerConfig,
    model: Arc<dyn LanguageModel>,
}

impl Analyzer {
    pub fn new(config: AnalyzerConfig, model: Arc<dyn LanguageModel>) -> Self {
        Self { config, model }
    }

    /// Build from resolved configuration, failing before any network work
    /// when no model is configured.
    pub fn from_config(config: &ResolvedConfig) -> Result<Self, AnalysisError> {
        if !config.is_configured() {
            return Err(AnalysisError::NotConfigured);
        }
        let model = config
            .model
            .build()
            .map_err(|err| AnalysisError::Llm {
                stage: "setup",
                message: format!("{:#}", err),
            })?
            .ok_or(AnalysisError::NotConfigured)?;
        Ok(Self::new(AnalyzerConfig::from(config), model))
    }

    /// Run only the first pass
    pub async fn extract(&self, text: &str) -> Result<Extraction, AnalysisError> {
        let (_keep, mut cancel) = watch::channel(false);
        self.extract_with_cancel(text, &mut cancel).await
    }

    /// Run only the first pass; flipping `cancel` to true aborts in-flight calls
    pub async fn extract_with_cancel(
        &self,
        text: &str,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<Extraction, AnalysisError> {
        let limits = &self.config.limits;
        let source = normalize_for_storage(text);
        limits.validate_input(&source)?;

        let segmentation = Segmentation::new(&source, limits.max_tokens_per_sentence);
        let chunks = plan_chunks(&source, &segmentation, limits.chunk_threshold_bytes.max(1));
        info!(
            sentences = segmentation.sentences.len(),
            chunks = chunks.len(),
            "Extracting evidence"
        );

        let responses = self.extract_chunks(&segmentation, &chunks, cancel).await?;

        let mut warnings = Vec::new();
        let mut extractions = Vec::with_capacity(chunks.len());
        let mut relations = Vec::new();
        let mut observations = Vec::new();
        let mut claimed = Coverage::default();
        let mut buckets = Buckets::default();

        for (chunk, response) in chunks.iter().zip(responses) {
            let raw = match decode_extraction(&response) {
                Decoded::Parsed(raw) => raw,
                Decoded::Unparseable { reason } => {
                    warn!(chunk = chunk.index, %reason, "Extraction response unparseable");
                    warnings.push(format!(
                        "chunk {}: response unparseable ({}); no evidence taken",
                        chunk.index, reason
                    ));
                    continue;
                }
            };
            let RawExtraction {
                selections,
                emotions,
                themes,
                entities,
                relations: chunk_relations,
                observation,
                coverage,
                buckets: chunk_buckets,
                uncertainties,
            } = raw;

            // Addressing is limited to the sentences this chunk's prompt listed.
            let view = segmentation.subset(chunk.first_sid, chunk.last_sid);
            let mut resolution = SpanResolver::new(&source, &view, chunk.base_offset).resolve_all(&selections);
            for span in &mut resolution.spans {
                span.sids = segmentation.sids_overlapping(span.start, span.end);
            }
            debug!(
                chunk = chunk.index,
                selections = selections.len(),
                resolved = resolution.spans.len(),
                "Resolved chunk selections"
            );

            let mut notes = uncertainties;
            notes.extend(resolution.uncertainties);
            extractions.push(EvidenceExtraction {
                quotes: resolution.spans,
                emotions,
                themes,
                entities,
                uncertainties: notes,
            });

            relations.extend(chunk_relations);
            observations.push(observation);
            claimed.begin |= coverage.begin;
            claimed.middle |= coverage.middle;
            claimed.end |= coverage.end;
            buckets.feeling |= chunk_buckets.feeling;
            buckets.rule |= chunk_buckets.rule;
            buckets.consequence |= chunk_buckets.consequence;
            buckets.decision |= chunk_buckets.decision;
        }

        let evidence = merge(&extractions, &limits.merge);
        let coverage = Coverage::from_spans(&evidence.quotes, source.len());
        if claimed != coverage {
            debug!(?claimed, ?coverage, "Model coverage differs from quoted coverage");
        }
        let relations = ground_relations(relations, &segmentation, &mut warnings);
        let observation = first_observation(observations, &segmentation);
        let buckets = Buckets::new(buckets.feeling, buckets.rule, buckets.consequence, buckets.decision);

        let first_pass = FirstPass::new(evidence, relations, observation, coverage, buckets);
        info!(
            quotes = first_pass.evidence.quotes.len(),
            sids = first_pass.quote_sid_list.len(),
            "First pass ready"
        );

        Ok(Extraction {
            source,
            segmentation,
            chunks,
            first_pass,
            warnings,
        })
    }

    /// Run both passes
    pub async fn analyze(&self, entry_id: &str, text: &str) -> Result<Analysis, AnalysisError> {
        let (_keep, cancel) = watch::channel(false);
        self.analyze_with_cancel(entry_id, text, cancel).await
    }

    /// Run both passes; flipping `cancel` to true aborts in-flight calls
    #[instrument(skip(self, text, cancel), fields(model = %self.model.name()))]
    pub async fn analyze_with_cancel(
        &self,
        entry_id: &str,
        text: &str,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<Analysis, AnalysisError> {
        info!("Starting analysis");

        let Extraction {
            source,
            segmentation,
            first_pass,
            mut warnings,
            ..
        } = self.extract_with_cancel(text, &mut cancel).await?;

        if first_pass.quote_sid_list.is_empty() {
            warn!("No grounded quotes; skipping composition");
            return Err(ValidationError::NoGroundingEvidence.into());
        }

        let request = build_composition_request(&first_pass, &segmentation);
        let composed = tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => Err(AnalysisError::Cancelled),
            result = call_model(self.model.as_ref(), &request, COMPOSITION, self.config.limits.call_timeout()) => result,
        };
        let raw = composed?;

        let validated = validate(&raw, &first_pass).map_err(|err| {
            warn!(%err, "Composition rejected");
            err
        })?;
        warnings.extend(validated.warnings);

        let highlights = highlight(&source, &first_pass.evidence.quotes);
        info!(
            quotes = first_pass.evidence.quotes.len(),
            warnings = warnings.len(),
            "Analysis complete"
        );

        Ok(Analysis {
            entry_id: entry_id.to_string(),
            source,
            first_pass,
            second_pass: validated.output,
            highlights,
            warnings,
        })
    }

    /// Issue one extraction call per chunk, concurrently, and return the
    /// responses in chunk order.
    async fn extract_chunks(
        &self,
        segmentation: &Segmentation,
        chunks: &[Chunk],
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<Vec<String>, AnalysisError> {
        let limits = &self.config.limits;
        let permits = Arc::new(Semaphore::new(limits.max_concurrent_calls.max(1)));
        let mut tasks = JoinSet::new();

        for chunk in chunks {
            let view = segmentation.subset(chunk.first_sid, chunk.last_sid);
            let request = build_extraction_request(&view, &limits.prompt_limits());
            let model = Arc::clone(&self.model);
            let permits = Arc::clone(&permits);
            let deadline = limits.call_timeout();
            let index = chunk.index;

            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                (index, call_model(model.as_ref(), &request, EXTRACTION, deadline).await)
            });
        }

        let mut responses: Vec<Option<String>> = vec![None; chunks.len()];
        loop {
            let next = tokio::select! {
                biased;
                _ = cancelled(cancel) => None,
                joined = tasks.join_next() => Some(joined),
            };
            let Some(joined) = next else {
                info!("Extraction cancelled");
                tasks.abort_all();
                return Err(AnalysisError::Cancelled);
            };
            let Some(joined) = joined else {
                break;
            };

            let (index, result) = joined.map_err(|err| AnalysisError::Llm {
                stage: EXTRACTION,
                message: err.to_string(),
            })?;
            debug!(chunk = index, ok = result.is_ok(), "Chunk call finished");
            // Returning early drops the set, which aborts the other calls.
            responses[index] = Some(result?);
        }

        Ok(responses.into_iter().map(Option::unwrap_or_default).collect())
    }
}

/// One model call under a deadline. The call future is dropped on expiry.
async fn call_model(
    model: &dyn LanguageModel,
    request: &ModelRequest,
    stage: &'static str,
    deadline: Duration,
) -> Result<String, AnalysisError> {
    match timeout(deadline, model.complete(request)).await {
        Ok(Ok(response)) => Ok(response),
        Ok(Err(err)) => {
            warn!(stage, error = %err, "Model call failed");
            Err(AnalysisError::Llm {
                stage,
                message: format!("{:#}", err),
            })
        }
        Err(_) => {
            let timeout_ms = deadline.as_millis() as u64;
            warn!(stage, timeout_ms, "Model call timed out");
            Err(AnalysisError::LlmTimeout { stage, timeout_ms })
        }
    }
}

/// Resolves once `cancel` reads true; never resolves if the sender is gone.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Keep relations whose sids exist, first occurrence of each key.
fn ground_relations(
    relations: Vec<Relation>,
    segmentation: &Segmentation,
    warnings: &mut Vec<String>,
) -> Vec<Relation> {
    let mut seen = HashSet::new();
    let mut kept = Vec::new();
    for relation in relations {
        if segmentation.sentence(relation.sid_a).is_none() || segmentation.sentence(relation.sid_b).is_none() {
            warnings.push(format!(
                "dropped {} relation between unknown sentences {} and {}",
                relation.kind.as_str(),
                relation.sid_a,
                relation.sid_b
            ));
            continue;
        }
        if seen.insert(relation.grounding_key()) {
            kept.push(relation);
        }
    }
    kept
}

/// First non-empty observation, citing only sentences that exist
fn first_observation(observations: Vec<Observation>, segmentation: &Segmentation) -> Observation {
    observations
        .into_iter()
        .find(|o| !o.text.trim().is_empty())
        .map(|o| Observation {
            evidence_sids: o
                .evidence_sids
                .into_iter()
                .filter(|sid| segmentation.sentence(*sid).is_some())
                .collect(),
            text: o.text,
        })
        .unwrap_or_default()
}
