//! Persistence collaborator.
//!
//! The engine persists through the [`ArpStore`] trait; durability,
//! indexing, and query concerns live behind it. Upserts are keyed by
//! natural keys (control code for headers, derived id for items) so
//! re-ingesting a record is harmless.

use async_trait::async_trait;

use crate::tracker::{ErrorRecord, ExecutionRecord, RunCounters, RunStatus};
use crate::{Arp, ArpItem};

pub mod memory;

/// Store failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Unknown execution id
    #[error("execution not found: {0}")]
    ExecutionNotFound(String),

    /// A terminal execution was asked to transition again
    #[error("execution {0} is already finalized")]
    AlreadyFinalized(String),

    /// Backend failure (connection, constraint, serialization)
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Result of an idempotent batch upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    /// Rows that did not exist before
    pub inserted: u64,
    /// Rows that existed and were overwritten
    pub updated: u64,
}

impl UpsertOutcome {
    /// Total rows touched.
    pub fn total(&self) -> u64 {
        self.inserted + self.updated
    }
}

/// Persistence operations the engine needs.
#[async_trait]
pub trait ArpStore: Send + Sync {
    /// Upsert header rows, keyed by control code.
    async fn upsert_arps(&self, arps: &[Arp]) -> Result<UpsertOutcome, StoreError>;

    /// Upsert item rows, keyed by their derived id.
    async fn upsert_items(&self, items: &[ArpItem]) -> Result<UpsertOutcome, StoreError>;

    /// Point lookup of a header row by its control code.
    async fn find_arp_by_control_code(&self, control_code: &str)
        -> Result<Option<Arp>, StoreError>;

    /// Create a new execution record.
    async fn create_execution(&self, record: ExecutionRecord) -> Result<(), StoreError>;

    /// Overwrite the progress checkpoint and counters of an execution.
    async fn update_progress(
        &self,
        execution_id: &str,
        last_page_processed: u32,
        total_pages: u32,
        counters: &RunCounters,
    ) -> Result<(), StoreError>;

    /// Move an execution to a terminal status, setting `completed_at` and
    /// duration. Rejects a second terminal transition.
    async fn complete_execution(
        &self,
        execution_id: &str,
        status: RunStatus,
        counters: &RunCounters,
        error_message: Option<String>,
    ) -> Result<(), StoreError>;

    /// Append a dead-letter error record.
    async fn insert_error(&self, record: ErrorRecord) -> Result<(), StoreError>;

    /// Fetch one execution by id.
    async fn get_execution(&self, execution_id: &str)
        -> Result<Option<ExecutionRecord>, StoreError>;

    /// Most recently started execution that completed successfully.
    async fn last_completed_execution(&self) -> Result<Option<ExecutionRecord>, StoreError>;

    /// Most recently started non-completed execution with a checkpoint,
    /// i.e. a candidate for resume.
    async fn last_resumable_execution(&self) -> Result<Option<ExecutionRecord>, StoreError>;
}
