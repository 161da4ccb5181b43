//! In-process ledger.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{Ledger, RunRecord};
use crate::error::LedgerError;

/// Ledger that keeps records in memory, keyed by run id.
#[derive(Default)]
pub struct MemoryLedger {
    records: Mutex<BTreeMap<String, RunRecord>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn record(&self, record: RunRecord) -> Result<(), LedgerError> {
        let mut records = self.records.lock().await;
        if records.contains_key(&record.run_id) {
            return Err(LedgerError::DuplicateRun(record.run_id));
        }
        records.insert(record.run_id.clone(), record);
        Ok(())
    }

    async fn load(&self, run_id: &str) -> Result<RunRecord, LedgerError> {
        self.records
            .lock()
            .await
            .get(run_id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(run_id.to_string()))
    }

    async fn list(&self) -> Result<Vec<RunRecord>, LedgerError> {
        let mut records: Vec<RunRecord> = self.records.lock().await.values().cloned().collect();
        records.sort_by(|a, b| {
            a.recorded_at
                .cmp(&b.recorded_at)
                .then_with(|| a.run_id.cmp(&b.run_id))
        });
        Ok(records)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<Vec<String>, LedgerError> {
        let mut records = self.records.lock().await;
        let expired: Vec<String> = records
            .values()
            .filter(|r| r.is_expired(now))
            .map(|r| r.run_id.clone())
            .collect();
        for run_id in &expired {
            records.remove(run_id);
        }
        Ok(expired)
    }
}
