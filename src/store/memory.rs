//! In-memory store.
//!
//! Backs tests and dry runs. Keeps the same natural-key semantics a SQL
//! implementation would: headers keyed by control code, items by derived
//! id, executions by id.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::store::{ArpStore, StoreError, UpsertOutcome};
use crate::tracker::{ErrorRecord, ExecutionRecord, RunCounters, RunStatus};
use crate::{Arp, ArpItem};

#[derive(Default)]
struct Inner {
    arps: HashMap<String, Arp>,
    items: HashMap<String, ArpItem>,
    executions: Vec<ExecutionRecord>,
    errors: Vec<ErrorRecord>,
}

/// Hash-map backed [`ArpStore`].
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of header rows held.
    pub async fn arp_count(&self) -> usize {
        self.inner.lock().await.arps.len()
    }

    /// Number of item rows held.
    pub async fn item_count(&self) -> usize {
        self.inner.lock().await.items.len()
    }

    /// Number of dead-letter errors held.
    pub async fn error_count(&self) -> usize {
        self.inner.lock().await.errors.len()
    }

    /// Snapshot of all execution records, in creation order.
    pub async fn executions(&self) -> Vec<ExecutionRecord> {
        self.inner.lock().await.executions.clone()
    }

    /// Snapshot of all dead-letter errors, in insertion order.
    pub async fn errors(&self) -> Vec<ErrorRecord> {
        self.inner.lock().await.errors.clone()
    }
}

#[async_trait]
impl ArpStore for MemoryStore {
    async fn upsert_arps(&self, arps: &[Arp]) -> Result<UpsertOutcome, StoreError> {
        let mut inner = self.inner.lock().await;
        let mut outcome = UpsertOutcome::default();
        for arp in arps {
            if inner
                .arps
                .insert(arp.control_code.clone(), arp.clone())
                .is_some()
            {
                outcome.updated += 1;
            } else {
                outcome.inserted += 1;
            }
        }
        Ok(outcome)
    }

    async fn upsert_items(&self, items: &[ArpItem]) -> Result<UpsertOutcome, StoreError> {
        let mut inner = self.inner.lock().await;
        let mut outcome = UpsertOutcome::default();
        for item in items {
            if inner.items.insert(item.id.clone(), item.clone()).is_some() {
                outcome.updated += 1;
            } else {
                outcome.inserted += 1;
            }
        }
        Ok(outcome)
    }

    async fn find_arp_by_control_code(
        &self,
        control_code: &str,
    ) -> Result<Option<Arp>, StoreError> {
        Ok(self.inner.lock().await.arps.get(control_code).cloned())
    }

    async fn create_execution(&self, record: ExecutionRecord) -> Result<(), StoreError> {
        self.inner.lock().await.executions.push(record);
        Ok(())
    }

    async fn update_progress(
        &self,
        execution_id: &str,
        last_page_processed: u32,
        total_pages: u32,
        counters: &RunCounters,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let record = inner
            .executions
            .iter_mut()
            .find(|e| e.id == execution_id)
            .ok_or_else(|| StoreError::ExecutionNotFound(execution_id.to_string()))?;
        record.last_page_processed = last_page_processed;
        record.total_pages = total_pages;
        record.counters = *counters;
        Ok(())
    }

    async fn complete_execution(
        &self,
        execution_id: &str,
        status: RunStatus,
        counters: &RunCounters,
        error_message: Option<String>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let record = inner
            .executions
            .iter_mut()
            .find(|e| e.id == execution_id)
            .ok_or_else(|| StoreError::ExecutionNotFound(execution_id.to_string()))?;

        if record.status.is_terminal() {
            return Err(StoreError::AlreadyFinalized(execution_id.to_string()));
        }

        let now = Utc::now();
        record.status = status;
        record.counters = *counters;
        record.completed_at = Some(now);
        record.duration_secs = Some((now - record.started_at).num_seconds());
        record.error_message = error_message;
        Ok(())
    }

    async fn insert_error(&self, record: ErrorRecord) -> Result<(), StoreError> {
        self.inner.lock().await.errors.push(record);
        Ok(())
    }

    async fn get_execution(
        &self,
        execution_id: &str,
    ) -> Result<Option<ExecutionRecord>, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .executions
            .iter()
            .find(|e| e.id == execution_id)
            .cloned())
    }

    async fn last_completed_execution(&self) -> Result<Option<ExecutionRecord>, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .executions
            .iter()
            .filter(|e| e.status == RunStatus::Completed)
            .max_by_key(|e| e.started_at)
            .cloned())
    }

    async fn last_resumable_execution(&self) -> Result<Option<ExecutionRecord>, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .executions
            .iter()
            .filter(|e| e.status != RunStatus::Completed && e.last_page_processed > 0)
            .max_by_key(|e| e.started_at)
            .cloned())
    }
}
