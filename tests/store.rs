//! Analysis Store Integration Tests
//!
//! Append, reload and staleness detection for stored analyses.

use groundnote::compose::{Micro, Rationale, SecondPassOutput, Sentiment, Trace};
use groundnote::core::{Analysis, AnalysisRecord, AnalysisStore};
use groundnote::evidence::{
    highlight, resolve, Buckets, Coverage, EvidenceExtraction, FirstPass, Observation, Selection,
    SCHEMA_VERSION,
};
use groundnote::text::{normalize_for_storage, Segmentation};
use tempfile::TempDir;

fn analysis(entry_id: &str, text: &str) -> Analysis {
    let source = normalize_for_storage(text);
    let seg = Segmentation::new(&source, 80);
    let resolution = resolve(&[Selection::sentence(1)], &seg, &source, 0);
    let first_pass = FirstPass::new(
        EvidenceExtraction {
            quotes: resolution.spans,
            ..Default::default()
        },
        Vec::new(),
        Observation::default(),
        Coverage::default(),
        Buckets::default(),
    );
    let highlights = highlight(&source, &first_pass.evidence.quotes);

    Analysis {
        entry_id: entry_id.to_string(),
        source,
        first_pass,
        second_pass: SecondPassOutput {
            summary: format!("Summary of {}", entry_id),
            narrative_summary: "You wrote something.".to_string(),
            observation: "It repeats.".to_string(),
            sentiment: Sentiment {
                score: 0.1,
                label: "calm".to_string(),
                rationale_sid: 1,
            },
            rationales: vec![Rationale {
                sid: 1,
                why: "opens the entry".to_string(),
            }],
            micro: Micro {
                next_action: "Rest".to_string(),
                question: "Why now?".to_string(),
            },
            trace: Trace::default(),
            surfaced_relations: Vec::new(),
        },
        highlights,
        warnings: Vec::new(),
    }
}

#[tokio::test]
async fn test_append_and_reload() {
    let temp = TempDir::new().unwrap();
    let home = temp.path().join("state");
    let store = AnalysisStore::open(&home).await.unwrap();
    assert!(home.is_dir());
    assert!(store.load_all().await.unwrap().is_empty());

    let first = AnalysisRecord::new(&analysis("monday", "I rested. Then I read."));
    let second = AnalysisRecord::new(&analysis("tuesday", "Long day. Short night."));
    store.append(&first).unwrap();
    store.append(&second).unwrap();

    let records = store.load_all().await.unwrap();
    assert_eq!(records, vec![first.clone(), second]);
    assert_eq!(records[0].schema_version, SCHEMA_VERSION);
    assert!(records[0].text_sha256.starts_with("sha256:"));

    let content = std::fs::read_to_string(store.path()).unwrap();
    assert_eq!(content.lines().count(), 2);
    assert!(content.contains("\"entryId\":\"monday\""));
}

#[tokio::test]
async fn test_latest_returns_newest_record_for_entry() {
    let temp = TempDir::new().unwrap();
    let store = AnalysisStore::open(temp.path()).await.unwrap();

    let older = AnalysisRecord::new(&analysis("monday", "I rested. Then I read."));
    let other = AnalysisRecord::new(&analysis("tuesday", "Long day."));
    let newer = AnalysisRecord::new(&analysis("monday", "I rested. Then I read a lot."));
    for record in [&older, &other, &newer] {
        store.append(record).unwrap();
    }

    let latest = store.latest("monday").await.unwrap().unwrap();
    assert_eq!(latest.id, newer.id);
    assert!(store.latest("sunday").await.unwrap().is_none());
}

#[test]
fn test_staleness_follows_storage_normalization() {
    let record = AnalysisRecord::new(&analysis("monday", "I rested.\r\nThen I read."));

    assert!(!record.is_stale("I rested.\nThen I read."));
    assert!(!record.is_stale("I rested.\r\nThen I read."));
    assert!(record.is_stale("I rested.\nThen I read twice."));
}
