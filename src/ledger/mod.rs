//! Run/artifact ledger.
//!
//! Every finished synthesis run is recorded exactly once. Records are
//! append-only by run id and carry an expiry after which
//! [`Ledger::purge_expired`] may remove them.

pub mod file;
pub mod memory;
pub mod record;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use file::FileLedger;
pub use memory::MemoryLedger;
pub use record::RunRecord;

use crate::error::LedgerError;

/// Storage for finished runs.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Stores a record. Fails with `DuplicateRun` if the run id is taken.
    async fn record(&self, record: RunRecord) -> Result<(), LedgerError>;

    async fn load(&self, run_id: &str) -> Result<RunRecord, LedgerError>;

    /// All records, oldest first.
    async fn list(&self) -> Result<Vec<RunRecord>, LedgerError>;

    /// Removes records that expired at or before `now`, returning their ids.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<Vec<String>, LedgerError>;
}
