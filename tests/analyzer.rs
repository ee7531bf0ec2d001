//! Analyzer Integration Tests
//!
//! Drives the full two-pass flow against a scripted language model:
//! chunk fan-out and ordering, timeouts, cancellation and grounding
//! failures.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::watch;

use groundnote::adapters::LanguageModel;
use groundnote::config::{ModelConfig, ResolvedConfig};
use groundnote::core::{AnalysisLimits, Analyzer, AnalyzerConfig};
use groundnote::evidence::ResolutionMethod;
use groundnote::protocol::ModelRequest;
use groundnote::{AnalysisError, ValidationError};

/// Scripted model: answers extraction requests by quoting every listed
/// sentence, and composition requests by citing the first allowed sid.
struct ScriptedModel {
    extraction: Box<dyn Fn(&[u32]) -> String + Send + Sync>,
    composition: Box<dyn Fn(&[u32]) -> String + Send + Sync>,
    delay: Box<dyn Fn(&[u32]) -> Duration + Send + Sync>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedModel {
    fn new() -> Self {
        Self {
            extraction: Box::new(|sids: &[u32]| quote_all(sids)),
            composition: Box::new(|allowed: &[u32]| compose_citing(allowed[0])),
            delay: Box::new(|_: &[u32]| Duration::ZERO),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    fn extraction(mut self, f: impl Fn(&[u32]) -> String + Send + Sync + 'static) -> Self {
        self.extraction = Box::new(f);
        self
    }

    fn composition(mut self, f: impl Fn(&[u32]) -> String + Send + Sync + 'static) -> Self {
        self.composition = Box::new(f);
        self
    }

    fn delay(mut self, f: impl Fn(&[u32]) -> Duration + Send + Sync + 'static) -> Self {
        self.delay = Box::new(f);
        self
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &ModelRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let is_composition = request.prompt.contains("Allowed sids");
        let sids = if is_composition {
            allowed_sids(&request.prompt)
        } else {
            listed_sids(&request.prompt)
        };

        tokio::time::sleep((self.delay)(&sids)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        Ok(if is_composition {
            (self.composition)(&sids)
        } else {
            (self.extraction)(&sids)
        })
    }
}

/// Sids of the `[n] (~k) text` lines in an extraction prompt
fn listed_sids(prompt: &str) -> Vec<u32> {
    prompt
        .lines()
        .filter_map(|line| line.strip_prefix('['))
        .filter_map(|rest| rest.split(']').next()?.parse().ok())
        .collect()
}

/// Sids from the `Allowed sids ...: [a, b]` line of a composition prompt
fn allowed_sids(prompt: &str) -> Vec<u32> {
    prompt
        .lines()
        .find(|line| line.starts_with("Allowed sids"))
        .and_then(|line| line.rsplit('[').next())
        .map(|list| {
            list.trim_end_matches(']')
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect()
        })
        .unwrap_or_default()
}

fn quote_all(sids: &[u32]) -> String {
    let quotes: Vec<String> = sids
        .iter()
        .map(|sid| format!(r#"{{"sid": {}, "reason": "listed"}}"#, sid))
        .collect();
    format!(
        r#"{{"quotes": [{}], "emotions": [{{"label": "tired", "confidence": 0.6}}], "themes": [{{"name": "work", "confidence": 0.7}}]}}"#,
        quotes.join(", ")
    )
}

fn compose_citing(sid: u32) -> String {
    format!(
        r#"{{
  "summary": "A long day.",
  "narrativeSummary": "You noticed a run of small things.",
  "observation": "The same thing keeps happening.",
  "sentiment": {{"score": -0.2, "label": "mixed", "rationaleSid": {sid}}},
  "rationales": [{{"sid": {sid}, "why": "states it"}}],
  "micro": {{"nextAction": "Take a walk", "question": "What changed?"}},
  "trace": {{"usedThemes": ["work"], "usedEntities": [], "usedQuoteSids": [{sid}]}}
}}"#
    )
}

fn entry(sentences: usize) -> String {
    (1..=sentences)
        .map(|i| format!("Today I noticed thing {} happened.", i))
        .collect::<Vec<_>>()
        .join(" ")
}

fn analyzer(model: Arc<ScriptedModel>, limits: AnalysisLimits) -> Analyzer {
    Analyzer::new(AnalyzerConfig { limits }, model)
}

#[tokio::test]
async fn test_single_chunk_analysis() {
    let model = Arc::new(ScriptedModel::new().extraction(|_| {
        r#"```json
{"quotes": [{"sid": 3}, {"sidRange": [7, 9]}, {"sid": 12}],
 "observation": {"text": "Things keep happening.", "evidenceSids": [3, 40]},
 "buckets": {"feeling": true}}
```"#
            .to_string()
    }));
    let text = entry(15);
    let analysis = analyzer(model.clone(), AnalysisLimits::default())
        .analyze("day-1", &text)
        .await
        .unwrap();

    let first_pass = &analysis.first_pass;
    assert_eq!(first_pass.quote_sid_list, vec![3, 7, 8, 9, 12]);
    assert_eq!(first_pass.evidence.quotes.len(), 3);
    assert_eq!(first_pass.evidence.quotes[1].method, ResolutionMethod::SentenceRange);
    assert_eq!(first_pass.evidence.quotes[1].sids, vec![7, 8, 9]);
    for quote in &first_pass.evidence.quotes {
        assert_eq!(&analysis.source[quote.start..quote.end], quote.text);
    }
    assert_eq!(first_pass.observation.evidence_sids, vec![3]);
    assert!(first_pass.buckets.missing.contains(&"decision".to_string()));
    assert!(first_pass.coverage.begin && first_pass.coverage.middle && first_pass.coverage.end);

    assert_eq!(analysis.entry_id, "day-1");
    assert_eq!(analysis.second_pass.sentiment.rationale_sid, 3);
    let rebuilt: String = analysis.highlights.iter().map(|s| s.text.as_str()).collect();
    assert_eq!(rebuilt, analysis.source);
    assert_eq!(analysis.highlights.iter().filter(|s| s.is_highlight).count(), 3);

    // One extraction call and one composition call
    assert_eq!(model.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_chunks_fan_out_and_merge_in_order() {
    // Later chunks answer first
    let model = Arc::new(
        ScriptedModel::new().delay(|sids| Duration::from_millis(60u64.saturating_sub(sids[0] as u64 * 4))),
    );
    let limits = AnalysisLimits {
        chunk_threshold_bytes: 80,
        max_concurrent_calls: 3,
        ..Default::default()
    };
    let analyzer = analyzer(model.clone(), limits);
    let extraction = analyzer.extract(&entry(15)).await.unwrap();

    assert!(extraction.chunks.len() > 3);
    assert_eq!(model.calls.load(Ordering::SeqCst), extraction.chunks.len());
    assert!(model.max_in_flight.load(Ordering::SeqCst) <= 3);

    let quotes = &extraction.first_pass.evidence.quotes;
    assert_eq!(quotes.len(), 15);
    assert!(quotes.windows(2).all(|w| w[0].start < w[1].start));
    assert_eq!(extraction.first_pass.quote_sid_list, (1..=15).collect::<Vec<u32>>());

    // Emotions and themes from every chunk collapse to one each
    assert_eq!(extraction.first_pass.evidence.emotions.len(), 1);
    assert_eq!(extraction.first_pass.evidence.themes.len(), 1);
}

#[tokio::test]
async fn test_chunk_cannot_cite_outside_its_sentences() {
    // Every chunk cites sid 1; only the chunk that lists it may resolve it
    let model = Arc::new(ScriptedModel::new().extraction(|_| r#"{"quotes": [{"sid": 1}]}"#.to_string()));
    let limits = AnalysisLimits {
        chunk_threshold_bytes: 80,
        ..Default::default()
    };
    let extraction = analyzer(model, limits).extract(&entry(6)).await.unwrap();

    assert!(extraction.chunks.len() > 1);
    assert_eq!(extraction.first_pass.evidence.quotes.len(), 1);
    assert_eq!(extraction.first_pass.quote_sid_list, vec![1]);
    assert!(!extraction.first_pass.evidence.uncertainties.is_empty());
}

#[tokio::test]
async fn test_extraction_timeout() {
    let model = Arc::new(ScriptedModel::new().delay(|_| Duration::from_millis(500)));
    let limits = AnalysisLimits {
        call_timeout_ms: 20,
        ..Default::default()
    };
    let err = analyzer(model, limits).analyze("slow", &entry(3)).await.unwrap_err();

    assert!(matches!(
        err,
        AnalysisError::LlmTimeout {
            stage: "extraction",
            timeout_ms: 20
        }
    ));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_composition_timeout() {
    // Extraction prompts list sids 1..=3; composition allows only sid 2
    let model = Arc::new(
        ScriptedModel::new()
            .extraction(|_| r#"{"quotes": [{"sid": 2}]}"#.to_string())
            .delay(|sids| {
                if sids == [2] {
                    Duration::from_millis(500)
                } else {
                    Duration::ZERO
                }
            }),
    );
    let limits = AnalysisLimits {
        call_timeout_ms: 50,
        ..Default::default()
    };
    let err = analyzer(model, limits).analyze("slow", &entry(3)).await.unwrap_err();

    assert!(matches!(err, AnalysisError::LlmTimeout { stage: "composition", .. }));
}

#[tokio::test]
async fn test_cancellation_drops_in_flight_calls() {
    let model = Arc::new(ScriptedModel::new().delay(|_| Duration::from_secs(30)));
    let analyzer = analyzer(model, AnalysisLimits::default());
    let (tx, rx) = watch::channel(false);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let _ = tx.send(true);
    });

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        analyzer.analyze_with_cancel("cancelled", &entry(5), rx),
    )
    .await
    .expect("cancellation should end the run promptly");

    assert!(matches!(result, Err(AnalysisError::Cancelled)));
}

#[tokio::test]
async fn test_unparseable_extraction_yields_no_grounding() {
    let model = Arc::new(ScriptedModel::new().extraction(|_| "I cannot help with that.".to_string()));
    let analyzer = analyzer(model.clone(), AnalysisLimits::default());

    let extraction = analyzer.extract(&entry(4)).await.unwrap();
    assert!(extraction.first_pass.evidence.quotes.is_empty());
    assert_eq!(extraction.warnings.len(), 1);

    let err = analyzer.analyze("empty", &entry(4)).await.unwrap_err();
    assert!(matches!(
        err,
        AnalysisError::Validation(ValidationError::NoGroundingEvidence)
    ));
    // The composition model is never asked
    assert_eq!(model.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_composition_citing_unquoted_sid_is_rejected() {
    let model = Arc::new(
        ScriptedModel::new()
            .extraction(|_| r#"{"quotes": [{"sid": 1}, {"sid": 2}]}"#.to_string())
            .composition(|_| compose_citing(4)),
    );
    let err = analyzer(model, AnalysisLimits::default())
        .analyze("bad", &entry(4))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AnalysisError::Validation(ValidationError::InvalidRationaleSid(4))
    ));
}

#[tokio::test]
async fn test_input_limits_checked_before_calls() {
    let model = Arc::new(ScriptedModel::new());
    let limits = AnalysisLimits {
        max_input_bytes: 10,
        ..Default::default()
    };
    let analyzer = analyzer(model.clone(), limits);

    assert!(matches!(
        analyzer.analyze("big", &entry(3)).await,
        Err(AnalysisError::Limit(_))
    ));
    assert!(matches!(analyzer.analyze("blank", "  \n ").await, Err(AnalysisError::Limit(_))));
    assert_eq!(model.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_unconfigured_analyzer_fails_early() {
    let config = ResolvedConfig {
        home: std::env::temp_dir(),
        config_file: None,
        model: ModelConfig::default(),
        limits: AnalysisLimits::default(),
    };
    assert!(matches!(Analyzer::from_config(&config), Err(AnalysisError::NotConfigured)));
}
