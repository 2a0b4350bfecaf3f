//! Run orchestration.
//!
//! Ties the planner, client, transform, store, and tracker together into
//! the three run modes: full backfill over quarterly windows, bounded
//! incremental sync, and window-level resume. The orchestrator owns all
//! sequencing; persistence and checkpoint calls happen from its control
//! flow, so counters never need cross-task locking.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::client::fanout::fan_out;
use crate::client::{ApiError, ArpSource, ItemQuery, PageOutcome};
use crate::config::IngestConfig;
use crate::shutdown::SharedShutdown;
use crate::store::{ArpStore, StoreError};
use crate::tracker::{EntityKind, RunCounters, RunStatus, RunTracker, RunType, TrackerError};
use crate::transform::{item_query_for, transform_arp, transform_item};
use crate::windows::{incremental_window, quarterly_chunks, FetchWindow};
use crate::Arp;

/// Run-level failures.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// A header-window fetch failed; the run stops at that window
    #[error("window {window} failed: {source}")]
    WindowFailed {
        /// The window that failed
        window: FetchWindow,
        /// The underlying API failure
        #[source]
        source: ApiError,
    },

    /// The run was cancelled by shutdown
    #[error("run cancelled by shutdown")]
    Cancelled,

    /// Tracker failure
    #[error(transparent)]
    Tracker(#[from] TrackerError),

    /// Store failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Drives ingestion runs end to end.
pub struct Orchestrator {
    config: IngestConfig,
    source: Arc<dyn ArpSource>,
    store: Arc<dyn ArpStore>,
    tracker: RunTracker,
    shutdown: Option<SharedShutdown>,
}

impl Orchestrator {
    /// Create an orchestrator over a source and store.
    pub fn new(
        config: IngestConfig,
        source: Arc<dyn ArpSource>,
        store: Arc<dyn ArpStore>,
    ) -> Self {
        let tracker = RunTracker::new(store.clone());
        Self {
            config,
            source,
            store,
            tracker,
            shutdown: None,
        }
    }

    /// Attach a shutdown handle, observed between windows and inside the
    /// item fan-out.
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Full historical backfill of `[start, end]`, chunked by quarter.
    pub async fn run_full_backfill(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<RunCounters, IngestError> {
        let windows = quarterly_chunks(start, end);
        info!(
            start = %start,
            end = %end,
            windows = windows.len(),
            "starting full backfill"
        );
        self.run_plan(RunType::FullBackfill, FetchWindow::new(start, end), windows, 0)
            .await
    }

    /// Incremental sync since the last completed run, with the configured
    /// lookback. Falls back to a full backfill when no run has completed.
    pub async fn run_incremental(&self) -> Result<RunCounters, IngestError> {
        match self.store.last_completed_execution().await? {
            Some(last) => {
                let window = incremental_window(
                    last.started_at.date_naive(),
                    self.config.incremental_lookback_days,
                );
                info!(window = %window, "starting incremental sync");
                self.run_plan(RunType::Incremental, window, vec![window], 0)
                    .await
            }
            None => {
                info!("no completed execution found, falling back to full backfill");
                self.run_full_backfill(
                    self.config.initial_start_date,
                    self.config.initial_end_date_or_today(),
                )
                .await
            }
        }
    }

    /// Resume the most recent interrupted run.
    ///
    /// The checkpoint unit is the whole window: completed windows are
    /// skipped, the interrupted one restarts from its beginning (the
    /// upstream is idempotently re-fetchable). Work runs under a fresh
    /// execution record; the stale one is finalized as failed first. With
    /// nothing to resume, returns empty counters.
    pub async fn resume(&self) -> Result<RunCounters, IngestError> {
        let stale = match self.store.last_resumable_execution().await? {
            Some(record) => record,
            None => {
                info!("no resumable execution found");
                return Ok(RunCounters::default());
            }
        };

        info!(
            stale_execution = %stale.id,
            completed_windows = stale.last_page_processed,
            total_windows = stale.total_pages,
            "resuming interrupted run"
        );
        self.tracker.supersede(&stale.id).await?;

        let windows = quarterly_chunks(stale.date_range.start, stale.date_range.end);
        let skip = stale.last_page_processed.min(windows.len() as u32);
        self.run_plan(stale.run_type, stale.date_range, windows, skip)
            .await
    }

    /// Execute a planned sequence of windows under one execution record,
    /// skipping the first `skip` windows.
    async fn run_plan(
        &self,
        run_type: RunType,
        overall: FetchWindow,
        windows: Vec<FetchWindow>,
        skip: u32,
    ) -> Result<RunCounters, IngestError> {
        let total_windows = windows.len() as u32;
        let execution_id = self
            .tracker
            .start(run_type, overall, total_windows, self.config.snapshot())
            .await?;

        let mut totals = RunCounters::default();

        for (index, window) in windows.iter().enumerate() {
            if (index as u32) < skip {
                debug!(window = %window, "window already completed, skipping");
                continue;
            }

            if self.is_cancelled() {
                self.tracker
                    .finish(
                        &execution_id,
                        RunStatus::Failed,
                        &totals,
                        Some("cancelled by shutdown".to_string()),
                    )
                    .await?;
                return Err(IngestError::Cancelled);
            }

            let (counters, failure) = self.process_window(&execution_id, window).await?;
            totals.merge(&counters);

            if let Some(error) = failure {
                let message = format!("window {window} failed: {error}");
                self.tracker
                    .record_error(
                        &execution_id,
                        EntityKind::Arp,
                        &window.to_string(),
                        error_type(&error),
                        &error.to_string(),
                        self.attempts_made(&error),
                    )
                    .await?;
                totals.errors += 1;
                self.tracker
                    .finish(&execution_id, RunStatus::Failed, &totals, Some(message))
                    .await?;
                return Err(IngestError::WindowFailed {
                    window: *window,
                    source: error,
                });
            }

            self.tracker
                .checkpoint(&execution_id, index as u32 + 1, total_windows, &totals)
                .await?;
        }

        self.tracker
            .finish(&execution_id, RunStatus::Completed, &totals, None)
            .await?;
        Ok(totals)
    }

    /// Ingest one window: fetch headers, persist them, fan out item
    /// fetches, persist items, dead-letter per-parent failures.
    ///
    /// A header-page failure does not abort the window's work: the fetched
    /// prefix is persisted and the error is returned alongside the
    /// counters for the caller to act on.
    async fn process_window(
        &self,
        execution_id: &str,
        window: &FetchWindow,
    ) -> Result<(RunCounters, Option<ApiError>), IngestError> {
        let mut counters = RunCounters::default();

        let header_outcome = self
            .source
            .fetch_arps(window, self.config.max_pages)
            .await;
        counters.arps_fetched = header_outcome.records.len() as u64;
        debug!(
            window = %window,
            fetched = header_outcome.records.len(),
            pages = header_outcome.pages_fetched,
            complete = header_outcome.is_complete(),
            "header fetch done"
        );

        let mut rows = Vec::new();
        for raw in &header_outcome.records {
            match transform_arp(raw) {
                Some(arp) => {
                    if self.config.validate_data {
                        if let Err(reason) = arp.validate() {
                            warn!(control_code = %arp.control_code, %reason, "skipping invalid record");
                            counters.arps_skipped += 1;
                            continue;
                        }
                    }
                    rows.push(arp);
                }
                None => {
                    warn!("skipping record without a control code");
                    counters.arps_skipped += 1;
                }
            }
        }

        let upserted = self.store.upsert_arps(&rows).await?;
        counters.arps_inserted = upserted.inserted;
        counters.arps_updated = upserted.updated;
        debug!(window = %window, rows = upserted.total(), "headers persisted");

        self.process_items(execution_id, &rows, &mut counters).await?;

        Ok((counters, header_outcome.error))
    }

    /// Fetch and persist the items of every header row in `rows`, at most
    /// K fetches in flight. Per-parent batches are persisted serially here
    /// after the fan-out so the store sees bounded write pressure.
    async fn process_items(
        &self,
        execution_id: &str,
        rows: &[Arp],
        counters: &mut RunCounters,
    ) -> Result<(), IngestError> {
        let mut units = Vec::new();
        let mut code_by_arp: HashMap<String, String> = HashMap::new();

        for arp in rows {
            match item_query_for(arp) {
                Some(query) => {
                    code_by_arp.insert(arp.id.clone(), arp.control_code.clone());
                    units.push((arp.id.clone(), query));
                }
                None => {
                    counters.errors += 1;
                    self.tracker
                        .record_error(
                            execution_id,
                            EntityKind::Item,
                            &arp.control_code,
                            "non_retryable",
                            "record lacks the fields required to query items",
                            0,
                        )
                        .await?;
                }
            }
        }

        let source = self.source.clone();
        let results = fan_out(
            units,
            self.config.max_concurrent_item_fetches,
            self.shutdown.clone(),
            move |query: ItemQuery| {
                let source = source.clone();
                async move { Ok(source.fetch_items(&query).await) }
            },
        )
        .await;

        for (arp_id, result) in results {
            let identifier = code_by_arp
                .get(&arp_id)
                .cloned()
                .unwrap_or_else(|| arp_id.clone());

            let outcome: PageOutcome<_> = match result {
                Ok(outcome) => outcome,
                Err(error) => {
                    counters.errors += 1;
                    self.tracker
                        .record_error(
                            execution_id,
                            EntityKind::Item,
                            &identifier,
                            error_type(&error),
                            &error.to_string(),
                            0,
                        )
                        .await?;
                    continue;
                }
            };

            counters.items_fetched += outcome.records.len() as u64;
            let mut items = Vec::new();
            for raw in &outcome.records {
                let item = transform_item(raw, &arp_id);
                if self.config.validate_data {
                    if let Err(reason) = item.validate() {
                        warn!(arp = %identifier, %reason, "skipping invalid item");
                        counters.items_skipped += 1;
                        continue;
                    }
                }
                items.push(item);
            }

            let upserted = self.store.upsert_items(&items).await?;
            counters.items_inserted += upserted.inserted;
            counters.items_updated += upserted.updated;

            // Partial item pages are kept; the failure still goes to the
            // dead-letter log so a later run can revisit this parent.
            if let Some(error) = outcome.error {
                counters.errors += 1;
                self.tracker
                    .record_error(
                        execution_id,
                        EntityKind::Item,
                        &identifier,
                        error_type(&error),
                        &error.to_string(),
                        self.attempts_made(&error),
                    )
                    .await?;
            }
        }

        Ok(())
    }

    /// Attempts behind a surfaced API error: retryable failures exhausted
    /// the full retry allotment, permanent ones stopped after one call.
    fn attempts_made(&self, error: &ApiError) -> u32 {
        if error.is_retryable() {
            self.config.max_retries
        } else {
            1
        }
    }

    fn is_cancelled(&self) -> bool {
        self.shutdown
            .as_ref()
            .map(|s| s.is_shutdown_requested())
            .unwrap_or(false)
    }
}

fn error_type(error: &ApiError) -> &'static str {
    if error.is_retryable() {
        "retryable"
    } else {
        "non_retryable"
    }
}
