//! Append-only analysis log with file-based persistence.
//!
//! Each completed analysis is one line of `analyses.jsonl` under the
//! groundnote home. Records carry the hash of the text they were computed
//! from so a later edit of the entry can be detected.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tokio::fs::{self, File};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;
use uuid::Uuid;

use super::analyzer::Analysis;
use crate::compose::SecondPassOutput;
use crate::config::STORE_FILE;
use crate::evidence::{compute_hash, FirstPass, SCHEMA_VERSION};
use crate::text::normalize_for_storage;

/// One stored analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRecord {
    pub id: Uuid,
    pub entry_id: String,
    /// `sha256:` hash of the storage-normalized entry
    pub text_sha256: String,
    pub schema_version: String,
    pub created_at: DateTime<Utc>,
    pub first_pass: FirstPass,
    pub second_pass: SecondPassOutput,
}

impl AnalysisRecord {
    pub fn new(analysis: &Analysis) -> Self {
        Self {
            id: Uuid::new_v4(),
            entry_id: analysis.entry_id.clone(),
            text_sha256: compute_hash(analysis.source.as_bytes()),
            schema_version: SCHEMA_VERSION.to_string(),
            created_at: Utc::now(),
            first_pass: analysis.first_pass.clone(),
            second_pass: analysis.second_pass.clone(),
        }
    }

    /// Whether `text` differs from the text this record was computed from
    pub fn is_stale(&self, text: &str) -> bool {
        compute_hash(normalize_for_storage(text).as_bytes()) != self.text_sha256
    }
}

/// JSONL store of analysis records
pub struct AnalysisStore {
    path: PathBuf,
}

impl AnalysisStore {
    /// Open the store under `home`, creating the directory if needed
    pub async fn open(home: &Path) -> Result<Self> {
        fs::create_dir_all(home)
            .await
            .with_context(|| format!("Failed to create store directory: {}", home.display()))?;

        Ok(Self {
            path: home.join(STORE_FILE),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a record under an exclusive lock
    pub fn append(&self, record: &AnalysisRecord) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open store: {}", self.path.display()))?;

        file.lock_exclusive()
            .context("Failed to acquire file lock on analyses.jsonl")?;

        let json = serde_json::to_string(record).context("Failed to serialize analysis")?;

        let mut file = file;
        writeln!(file, "{}", json).context("Failed to write analysis")?;
        file.flush().context("Failed to flush analysis")?;

        debug!(entry_id = %record.entry_id, id = %record.id, "Stored analysis");
        // Lock is released when file is dropped
        Ok(())
    }

    /// All records in append order
    pub async fn load_all(&self) -> Result<Vec<AnalysisRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path)
            .await
            .with_context(|| format!("Failed to open store: {}", self.path.display()))?;

        let mut lines = BufReader::new(file).lines();
        let mut records = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let record: AnalysisRecord = serde_json::from_str(&line)
                .with_context(|| format!("Failed to parse analysis record: {}", line))?;
            records.push(record);
        }

        Ok(records)
    }

    /// Most recently appended record for an entry
    pub async fn latest(&self, entry_id: &str) -> Result<Option<AnalysisRecord>> {
        let records = self.load_all().await?;
        Ok(records.into_iter().rev().find(|r| r.entry_id == entry_id))
    }
}
