//! Incremental sync behavior.

use std::sync::Arc;

use chrono::{Days, Utc};

use arp_ingest::orchestrator::Orchestrator;
use arp_ingest::store::memory::MemoryStore;
use arp_ingest::store::ArpStore;
use arp_ingest::tracker::{RunCounters, RunStatus, RunType};
use arp_ingest::windows::FetchWindow;

use crate::support::{api_arp, test_config, ScriptedSource};

/// Seed a completed execution started `days_ago`.
async fn seed_completed_execution(store: &MemoryStore, days_ago: u64) {
    let started = Utc::now() - chrono::Duration::days(days_ago as i64);
    let day = started.date_naive();
    let record = arp_ingest::tracker::ExecutionRecord {
        id: "seed-completed".to_string(),
        run_type: RunType::FullBackfill,
        status: RunStatus::Completed,
        started_at: started,
        completed_at: Some(started),
        duration_secs: Some(10),
        date_range: FetchWindow::new(day, day),
        counters: RunCounters::default(),
        last_page_processed: 1,
        total_pages: 1,
        error_message: None,
        config_snapshot: serde_json::json!({}),
    };
    store.create_execution(record).await.unwrap();
}

#[tokio::test]
async fn test_incremental_syncs_lookback_window() {
    let store = Arc::new(MemoryStore::new());
    seed_completed_execution(&store, 0).await;

    let window_start = Utc::now()
        .date_naive()
        .checked_sub_days(Days::new(7))
        .unwrap();
    let source = Arc::new(ScriptedSource::new().with_headers(
        &window_start.to_string(),
        vec![api_arp("c-new", "1", &window_start.to_string())],
    ));

    let orchestrator = Orchestrator::new(test_config(), source.clone(), store.clone());
    let stats = orchestrator.run_incremental().await.unwrap();

    assert_eq!(stats.arps_fetched, 1);
    assert_eq!(source.requested_windows(), vec![window_start.to_string()]);

    let executions = store.executions().await;
    assert_eq!(executions.len(), 2);
    let run = &executions[1];
    assert_eq!(run.run_type, RunType::Incremental);
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.total_pages, 1);
    assert_eq!(run.last_page_processed, 1);
}

#[tokio::test]
async fn test_incremental_falls_back_to_backfill_without_history() {
    let store = Arc::new(MemoryStore::new());
    let source = Arc::new(ScriptedSource::new());

    let mut config = test_config();
    config.initial_start_date = chrono::NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
    config.initial_end_date = chrono::NaiveDate::from_ymd_opt(2023, 6, 30);

    let orchestrator = Orchestrator::new(config, source.clone(), store.clone());
    orchestrator.run_incremental().await.unwrap();

    let executions = store.executions().await;
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].run_type, RunType::FullBackfill);
    // Two quarterly windows for the half year.
    assert_eq!(executions[0].total_pages, 2);
    assert_eq!(source.header_calls(), 2);
}

#[tokio::test]
async fn test_overlap_duplicates_resolve_by_upsert() {
    let store = Arc::new(MemoryStore::new());
    seed_completed_execution(&store, 0).await;

    let window_start = Utc::now()
        .date_naive()
        .checked_sub_days(Days::new(7))
        .unwrap();
    let record = api_arp("c-dup", "1", &window_start.to_string());
    let source = Arc::new(
        ScriptedSource::new().with_headers(&window_start.to_string(), vec![record]),
    );

    let orchestrator = Orchestrator::new(test_config(), source, store.clone());

    let first = orchestrator.run_incremental().await.unwrap();
    assert_eq!(first.arps_inserted, 1);
    assert_eq!(first.arps_updated, 0);

    let second = orchestrator.run_incremental().await.unwrap();
    assert_eq!(second.arps_inserted, 0);
    assert_eq!(second.arps_updated, 1);
    assert_eq!(store.arp_count().await, 1);
}
