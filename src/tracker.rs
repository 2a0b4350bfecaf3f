//! Execution tracking.
//!
//! Every ingestion run gets an execution record with counters, a progress
//! checkpoint, and a dead-letter log of entity-level failures. Records make
//! runs observable after the fact and carry the state resume builds on.

use std::sync::Arc;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use crate::store::{ArpStore, StoreError};
use crate::windows::FetchWindow;

/// Kind of ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunType {
    /// Chunked historical backfill over a date range
    FullBackfill,
    /// Bounded sync since the last completed run
    Incremental,
}

impl RunType {
    /// Stable label used in logs and stored records.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FullBackfill => "full_backfill",
            Self::Incremental => "incremental",
        }
    }
}

/// Lifecycle state of an execution. `Running` moves to exactly one of the
/// terminal states and never leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// In progress
    Running,
    /// Finished without a run-level failure
    Completed,
    /// Aborted by a run-level failure
    Failed,
}

impl RunStatus {
    /// Whether this status is terminal.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Which entity a dead-letter error concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityKind {
    /// A header record
    Arp,
    /// A line item (or an ARP's whole item set)
    Item,
}

/// Counters accumulated over one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounters {
    /// Header records fetched from the API
    pub arps_fetched: u64,
    /// Header rows newly inserted
    pub arps_inserted: u64,
    /// Header rows updated in place
    pub arps_updated: u64,
    /// Header records dropped by validation or transformation
    pub arps_skipped: u64,
    /// Line items fetched from the API
    pub items_fetched: u64,
    /// Item rows newly inserted
    pub items_inserted: u64,
    /// Item rows updated in place
    pub items_updated: u64,
    /// Line items dropped by validation
    pub items_skipped: u64,
    /// Dead-letter errors recorded
    pub errors: u64,
}

impl RunCounters {
    /// Fold another counter set into this one.
    pub fn merge(&mut self, other: &RunCounters) {
        self.arps_fetched += other.arps_fetched;
        self.arps_inserted += other.arps_inserted;
        self.arps_updated += other.arps_updated;
        self.arps_skipped += other.arps_skipped;
        self.items_fetched += other.items_fetched;
        self.items_inserted += other.items_inserted;
        self.items_updated += other.items_updated;
        self.items_skipped += other.items_skipped;
        self.errors += other.errors;
    }
}

/// Stored record of one ingestion run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Opaque execution id
    pub id: String,
    /// Kind of run
    pub run_type: RunType,
    /// Lifecycle state
    pub status: RunStatus,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run reached a terminal state; set exactly when terminal
    pub completed_at: Option<DateTime<Utc>>,
    /// Wall-clock duration in seconds, computed at finalization
    pub duration_secs: Option<i64>,
    /// Date range this run covers
    pub date_range: FetchWindow,
    /// Counters at the last checkpoint or finalization
    pub counters: RunCounters,
    /// Progress checkpoint: completed windows so far (1-based count)
    pub last_page_processed: u32,
    /// Total windows planned for this run
    pub total_pages: u32,
    /// Run-level error message, set when failed
    pub error_message: Option<String>,
    /// Effective configuration, stored opaquely for diagnosis
    pub config_snapshot: serde_json::Value,
}

/// Dead-letter record of one entity-level failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Opaque record id
    pub id: String,
    /// Execution this error belongs to
    pub execution_id: String,
    /// Coarse classification (e.g. "retryable", "non_retryable")
    pub error_type: String,
    /// Failure detail
    pub error_message: String,
    /// Which entity kind failed
    pub entity_type: EntityKind,
    /// Identifier of the failed entity (control code, item id)
    pub entity_identifier: String,
    /// Attempts made before giving up
    pub retry_count: u32,
    /// Whether a later run resolved this failure
    pub resolved: bool,
    /// When the error was recorded
    pub occurred_at: DateTime<Utc>,
}

/// Tracker errors.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// A second run was started while one is active in this process
    #[error("an execution is already running: {0}")]
    AlreadyRunning(String),

    /// Store failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Tracks the lifecycle of ingestion runs against the store.
///
/// Enforces the single-active-run invariant within the process; the store
/// holds the durable record.
pub struct RunTracker {
    store: Arc<dyn ArpStore>,
    active: Mutex<Option<String>>,
}

impl RunTracker {
    /// Create a tracker over `store`.
    pub fn new(store: Arc<dyn ArpStore>) -> Self {
        Self {
            store,
            active: Mutex::new(None),
        }
    }

    /// Start a new execution covering `window`. Fails if one is already
    /// active in this process.
    pub async fn start(
        &self,
        run_type: RunType,
        window: FetchWindow,
        total_pages: u32,
        config_snapshot: serde_json::Value,
    ) -> Result<String, TrackerError> {
        let id = Uuid::new_v4().to_string();
        {
            let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(current) = active.as_ref() {
                return Err(TrackerError::AlreadyRunning(current.clone()));
            }
            *active = Some(id.clone());
        }

        let record = ExecutionRecord {
            id: id.clone(),
            run_type,
            status: RunStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            duration_secs: None,
            date_range: window,
            counters: RunCounters::default(),
            last_page_processed: 0,
            total_pages,
            error_message: None,
            config_snapshot,
        };

        if let Err(store_error) = self.store.create_execution(record).await {
            let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            *active = None;
            return Err(store_error.into());
        }

        info!(
            execution_id = %id,
            run_type = run_type.as_str(),
            window = %window,
            total_windows = total_pages,
            "execution started"
        );
        Ok(id)
    }

    /// Overwrite the progress checkpoint of the active execution.
    /// Idempotent; a repeated checkpoint for the same page is harmless.
    pub async fn checkpoint(
        &self,
        execution_id: &str,
        page: u32,
        total_pages: u32,
        counters: &RunCounters,
    ) -> Result<(), TrackerError> {
        self.store
            .update_progress(execution_id, page, total_pages, counters)
            .await?;
        info!(
            execution_id,
            window = page,
            total_windows = total_pages,
            arps = counters.arps_fetched,
            items = counters.items_fetched,
            "checkpoint"
        );
        Ok(())
    }

    /// Finalize the active execution. Must be called exactly once per run;
    /// the store rejects a second terminal transition.
    pub async fn finish(
        &self,
        execution_id: &str,
        status: RunStatus,
        counters: &RunCounters,
        error_message: Option<String>,
    ) -> Result<(), TrackerError> {
        self.store
            .complete_execution(execution_id, status, counters, error_message.clone())
            .await?;

        {
            let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            if active.as_deref() == Some(execution_id) {
                *active = None;
            }
        }

        match status {
            RunStatus::Failed => {
                error!(
                    execution_id,
                    error = error_message.as_deref().unwrap_or("unknown"),
                    "execution failed"
                );
            }
            _ => {
                info!(
                    execution_id,
                    arps_fetched = counters.arps_fetched,
                    items_fetched = counters.items_fetched,
                    errors = counters.errors,
                    "execution completed"
                );
            }
        }
        Ok(())
    }

    /// Append a dead-letter error without touching the execution status.
    pub async fn record_error(
        &self,
        execution_id: &str,
        entity_type: EntityKind,
        entity_identifier: &str,
        error_type: &str,
        error_message: &str,
        retry_count: u32,
    ) -> Result<(), TrackerError> {
        let record = ErrorRecord {
            id: Uuid::new_v4().to_string(),
            execution_id: execution_id.to_string(),
            error_type: error_type.to_string(),
            error_message: error_message.to_string(),
            entity_type,
            entity_identifier: entity_identifier.to_string(),
            retry_count,
            resolved: false,
            occurred_at: Utc::now(),
        };
        self.store.insert_error(record).await?;
        Ok(())
    }

    /// Finalize a stale execution left behind by an interrupted run, so a
    /// replacement run can start.
    pub async fn supersede(&self, execution_id: &str) -> Result<(), TrackerError> {
        let stale = self
            .store
            .get_execution(execution_id)
            .await?
            .ok_or(StoreError::ExecutionNotFound(execution_id.to_string()))?;

        if stale.status == RunStatus::Running {
            self.store
                .complete_execution(
                    execution_id,
                    RunStatus::Failed,
                    &stale.counters,
                    Some("superseded by resume".to_string()),
                )
                .await?;
        }
        Ok(())
    }
}
