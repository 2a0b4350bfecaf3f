//! Shared test fakes and builders.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use arp_ingest::client::{ApiArp, ApiArpItem, ApiError, ArpSource, ItemQuery, PageOutcome};
use arp_ingest::config::IngestConfig;
use arp_ingest::shutdown::SharedShutdown;
use arp_ingest::store::memory::MemoryStore;
use arp_ingest::store::{ArpStore, StoreError, UpsertOutcome};
use arp_ingest::tracker::{ErrorRecord, ExecutionRecord, RunCounters, RunStatus};
use arp_ingest::windows::FetchWindow;
use arp_ingest::{Arp, ArpItem};

/// Configuration tuned for tests: no real endpoint, fast retries.
pub fn test_config() -> IngestConfig {
    IngestConfig {
        base_url: "http://localhost:1".to_string(),
        requests_per_second: 1000.0,
        max_retries: 2,
        backoff_factor: 1.0,
        max_concurrent_item_fetches: 5,
        ..Default::default()
    }
}

/// Build a raw header record with the fields the engine needs.
pub fn api_arp(control_code: &str, purchase_number: &str, valid_from: &str) -> ApiArp {
    ApiArp {
        control_code: Some(control_code.to_string()),
        purchase_number: Some(json!(purchase_number)),
        managing_unit: Some(json!("155008")),
        valid_from: Some(valid_from.to_string()),
        valid_until: Some("2099-12-31".to_string()),
        ..Default::default()
    }
}

/// Build a raw line item.
pub fn api_item(number: i64) -> ApiArpItem {
    ApiArpItem {
        item_number: Some(json!(number)),
        item_code: Some(json!(format!("C{number}"))),
        description: Some(format!("item {number}")),
        unit_value: Some(json!(10.5)),
        quantity: Some(json!(2)),
        ..Default::default()
    }
}

/// Scripted in-process [`ArpSource`].
///
/// Header scripts are keyed by the window's start date, item scripts by the
/// parent's purchase number. Unscripted queries return empty pages.
#[derive(Default)]
pub struct ScriptedSource {
    headers: HashMap<String, Vec<ApiArp>>,
    failing_windows: HashSet<String>,
    items: HashMap<String, Vec<ApiArpItem>>,
    failing_items: HashSet<String>,
    permanently_failing_items: HashSet<String>,
    item_delay: Option<Duration>,
    shutdown_after_window: Option<(String, SharedShutdown)>,
    requested_windows: Mutex<Vec<String>>,
    header_calls: AtomicUsize,
    item_calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_headers(mut self, window_start: &str, records: Vec<ApiArp>) -> Self {
        self.headers.insert(window_start.to_string(), records);
        self
    }

    pub fn with_failing_window(mut self, window_start: &str) -> Self {
        self.failing_windows.insert(window_start.to_string());
        self
    }

    pub fn with_items(mut self, purchase_number: &str, records: Vec<ApiArpItem>) -> Self {
        self.items.insert(purchase_number.to_string(), records);
        self
    }

    pub fn with_failing_items(mut self, purchase_number: &str) -> Self {
        self.failing_items.insert(purchase_number.to_string());
        self
    }

    pub fn with_permanently_failing_items(mut self, purchase_number: &str) -> Self {
        self.permanently_failing_items
            .insert(purchase_number.to_string());
        self
    }

    /// Request shutdown right after the window starting at `window_start`
    /// has been served, so cancellation lands between windows.
    pub fn with_shutdown_after_window(
        mut self,
        window_start: &str,
        shutdown: SharedShutdown,
    ) -> Self {
        self.shutdown_after_window = Some((window_start.to_string(), shutdown));
        self
    }

    /// Make every item fetch hold its slot for `delay`, so concurrency can
    /// be observed.
    pub fn with_item_delay(mut self, delay: Duration) -> Self {
        self.item_delay = Some(delay);
        self
    }

    pub fn header_calls(&self) -> usize {
        self.header_calls.load(Ordering::SeqCst)
    }

    pub fn item_calls(&self) -> usize {
        self.item_calls.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Window start dates requested so far, in order.
    pub fn requested_windows(&self) -> Vec<String> {
        self.requested_windows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl ArpSource for ScriptedSource {
    async fn fetch_arps(
        &self,
        window: &FetchWindow,
        _max_pages: Option<u32>,
    ) -> PageOutcome<ApiArp> {
        self.header_calls.fetch_add(1, Ordering::SeqCst);
        let key = window.start.to_string();
        self.requested_windows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(key.clone());

        if self.failing_windows.contains(&key) {
            return PageOutcome {
                records: Vec::new(),
                pages_fetched: 0,
                total_pages: None,
                error: Some(ApiError::retryable("scripted header failure")),
            };
        }

        let records = self.headers.get(&key).cloned().unwrap_or_default();

        if let Some((trigger, shutdown)) = &self.shutdown_after_window {
            if *trigger == key {
                shutdown.request_shutdown();
            }
        }

        PageOutcome {
            pages_fetched: if records.is_empty() { 0 } else { 1 },
            total_pages: Some(1),
            records,
            error: None,
        }
    }

    async fn fetch_items(&self, query: &ItemQuery) -> PageOutcome<ApiArpItem> {
        self.item_calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);

        if let Some(delay) = self.item_delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing_items.contains(&query.purchase_number) {
            return PageOutcome {
                records: Vec::new(),
                pages_fetched: 0,
                total_pages: None,
                error: Some(ApiError::retryable("scripted item failure")),
            };
        }

        if self.permanently_failing_items.contains(&query.purchase_number) {
            return PageOutcome {
                records: Vec::new(),
                pages_fetched: 0,
                total_pages: None,
                error: Some(ApiError::non_retryable("scripted permanent item failure")),
            };
        }

        let records = self
            .items
            .get(&query.purchase_number)
            .cloned()
            .unwrap_or_default();
        PageOutcome {
            pages_fetched: if records.is_empty() { 0 } else { 1 },
            total_pages: Some(1),
            records,
            error: None,
        }
    }
}

/// [`MemoryStore`] wrapper that records every progress checkpoint, so tests
/// can assert on checkpoint order rather than only the final value.
#[derive(Default)]
pub struct RecordingStore {
    inner: MemoryStore,
    progress: Mutex<Vec<u32>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// `last_page_processed` values in the order they were written.
    pub fn progress_history(&self) -> Vec<u32> {
        self.progress
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Snapshot of all execution records, in creation order.
    pub async fn executions(&self) -> Vec<ExecutionRecord> {
        self.inner.executions().await
    }
}

#[async_trait]
impl ArpStore for RecordingStore {
    async fn upsert_arps(&self, arps: &[Arp]) -> Result<UpsertOutcome, StoreError> {
        self.inner.upsert_arps(arps).await
    }

    async fn upsert_items(&self, items: &[ArpItem]) -> Result<UpsertOutcome, StoreError> {
        self.inner.upsert_items(items).await
    }

    async fn find_arp_by_control_code(
        &self,
        control_code: &str,
    ) -> Result<Option<Arp>, StoreError> {
        self.inner.find_arp_by_control_code(control_code).await
    }

    async fn create_execution(&self, record: ExecutionRecord) -> Result<(), StoreError> {
        self.inner.create_execution(record).await
    }

    async fn update_progress(
        &self,
        execution_id: &str,
        last_page_processed: u32,
        total_pages: u32,
        counters: &RunCounters,
    ) -> Result<(), StoreError> {
        self.progress
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(last_page_processed);
        self.inner
            .update_progress(execution_id, last_page_processed, total_pages, counters)
            .await
    }

    async fn complete_execution(
        &self,
        execution_id: &str,
        status: RunStatus,
        counters: &RunCounters,
        error_message: Option<String>,
    ) -> Result<(), StoreError> {
        self.inner
            .complete_execution(execution_id, status, counters, error_message)
            .await
    }

    async fn insert_error(&self, record: ErrorRecord) -> Result<(), StoreError> {
        self.inner.insert_error(record).await
    }

    async fn get_execution(
        &self,
        execution_id: &str,
    ) -> Result<Option<ExecutionRecord>, StoreError> {
        self.inner.get_execution(execution_id).await
    }

    async fn last_completed_execution(&self) -> Result<Option<ExecutionRecord>, StoreError> {
        self.inner.last_completed_execution().await
    }

    async fn last_resumable_execution(&self) -> Result<Option<ExecutionRecord>, StoreError> {
        self.inner.last_resumable_execution().await
    }
}
