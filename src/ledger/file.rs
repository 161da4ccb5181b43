//! File-backed ledger.
//!
//! Each run is stored as `<run_id>.json` in one directory. Files are created
//! with create-new semantics, so a run can be recorded at most once.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::{Ledger, RunRecord};
use crate::error::LedgerError;

/// Ledger that keeps one JSON file per run.
pub struct FileLedger {
    base_path: PathBuf,
}

impl FileLedger {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Returns the file path for a run.
    pub fn record_path(&self, run_id: &str) -> PathBuf {
        self.base_path.join(format!("{}.json", run_id))
    }

    async fn ensure_directory(&self) -> Result<(), LedgerError> {
        if !self.base_path.exists() {
            fs::create_dir_all(&self.base_path).await.map_err(|e| {
                LedgerError::DirectoryCreationFailed(format!(
                    "Failed to create directory {:?}: {}",
                    self.base_path, e
                ))
            })?;
        }
        Ok(())
    }

    async fn read_record(path: &Path) -> Result<RunRecord, LedgerError> {
        let contents = fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Paths of every `.json` file in the ledger directory.
    async fn record_files(&self) -> Result<Vec<PathBuf>, LedgerError> {
        self.ensure_directory().await?;

        let mut paths = Vec::new();
        let mut entries = fs::read_dir(&self.base_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }
}

/// Run ids become file names, so only a conservative alphabet is accepted.
fn check_run_id(run_id: &str) -> Result<(), LedgerError> {
    let valid = !run_id.is_empty()
        && run_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(LedgerError::InvalidData(format!(
            "run id '{}' is not a valid identifier",
            run_id
        )))
    }
}

#[async_trait]
impl Ledger for FileLedger {
    async fn record(&self, record: RunRecord) -> Result<(), LedgerError> {
        check_run_id(&record.run_id)?;
        self.ensure_directory().await?;

        let path = self.record_path(&record.run_id);
        let json = serde_json::to_string_pretty(&record)?;

        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(LedgerError::DuplicateRun(record.run_id));
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;

        debug!(run_id = %record.run_id, path = ?path, "Recorded run");
        Ok(())
    }

    async fn load(&self, run_id: &str) -> Result<RunRecord, LedgerError> {
        check_run_id(run_id)?;
        let path = self.record_path(run_id);
        if !path.exists() {
            return Err(LedgerError::NotFound(run_id.to_string()));
        }

        let record = Self::read_record(&path).await?;
        if record.run_id != run_id {
            return Err(LedgerError::InvalidData(format!(
                "Run ID mismatch: expected {}, got {}",
                run_id, record.run_id
            )));
        }
        Ok(record)
    }

    async fn list(&self) -> Result<Vec<RunRecord>, LedgerError> {
        let mut records = Vec::new();
        for path in self.record_files().await? {
            match Self::read_record(&path).await {
                Ok(record) => records.push(record),
                Err(e) => warn!(path = ?path, error = %e, "Skipping unreadable ledger file"),
            }
        }
        records.sort_by(|a, b| {
            a.recorded_at
                .cmp(&b.recorded_at)
                .then_with(|| a.run_id.cmp(&b.run_id))
        });
        Ok(records)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<Vec<String>, LedgerError> {
        let mut purged = Vec::new();
        for path in self.record_files().await? {
            let record = match Self::read_record(&path).await {
                Ok(record) => record,
                Err(e) => {
                    warn!(path = ?path, error = %e, "Skipping unreadable ledger file");
                    continue;
                }
            };
            if record.is_expired(now) {
                fs::remove_file(&path).await?;
                purged.push(record.run_id);
            }
        }
        Ok(purged)
    }
}
