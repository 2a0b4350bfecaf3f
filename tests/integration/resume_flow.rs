//! Window-level resume behavior.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};

use arp_ingest::orchestrator::Orchestrator;
use arp_ingest::store::memory::MemoryStore;
use arp_ingest::store::ArpStore;
use arp_ingest::tracker::{ExecutionRecord, RunCounters, RunStatus, RunType};
use arp_ingest::windows::FetchWindow;

use crate::support::{api_arp, test_config, ScriptedSource};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Seed an interrupted yearly backfill with `completed_windows` of its four
/// quarterly windows checkpointed.
async fn seed_interrupted(store: &MemoryStore, status: RunStatus, completed_windows: u32) {
    let record = ExecutionRecord {
        id: "seed-stale".to_string(),
        run_type: RunType::FullBackfill,
        status,
        started_at: Utc::now(),
        completed_at: None,
        duration_secs: None,
        date_range: FetchWindow::new(date(2023, 1, 1), date(2023, 12, 31)),
        counters: RunCounters {
            arps_fetched: 7,
            ..Default::default()
        },
        last_page_processed: completed_windows,
        total_pages: 4,
        error_message: None,
        config_snapshot: serde_json::json!({}),
    };
    store.create_execution(record).await.unwrap();
}

#[tokio::test]
async fn test_resume_skips_completed_windows() {
    let store = Arc::new(MemoryStore::new());
    seed_interrupted(&store, RunStatus::Failed, 2).await;

    let source = Arc::new(
        ScriptedSource::new()
            .with_headers("2023-07-01", vec![api_arp("c-3", "3", "2023-08-01")])
            .with_headers("2023-10-01", vec![api_arp("c-4", "4", "2023-11-01")]),
    );
    let orchestrator = Orchestrator::new(test_config(), source.clone(), store.clone());

    let stats = orchestrator.resume().await.unwrap();

    // Only the third and fourth windows are refetched, from the beginning.
    assert_eq!(source.requested_windows(), vec!["2023-07-01", "2023-10-01"]);
    assert_eq!(stats.arps_fetched, 2);

    let executions = store.executions().await;
    assert_eq!(executions.len(), 2);
    let fresh = &executions[1];
    assert_eq!(fresh.run_type, RunType::FullBackfill);
    assert_eq!(fresh.status, RunStatus::Completed);
    assert_eq!(fresh.last_page_processed, 4);
    assert_eq!(fresh.total_pages, 4);
}

#[tokio::test]
async fn test_resume_finalizes_stale_running_execution() {
    let store = Arc::new(MemoryStore::new());
    seed_interrupted(&store, RunStatus::Running, 3).await;

    let source = Arc::new(ScriptedSource::new());
    let orchestrator = Orchestrator::new(test_config(), source, store.clone());
    orchestrator.resume().await.unwrap();

    let stale = store.get_execution("seed-stale").await.unwrap().unwrap();
    assert_eq!(stale.status, RunStatus::Failed);
    assert_eq!(
        stale.error_message.as_deref(),
        Some("superseded by resume")
    );
    assert!(stale.completed_at.is_some());
}

#[tokio::test]
async fn test_resume_with_nothing_to_do_returns_empty_stats() {
    let store = Arc::new(MemoryStore::new());
    let source = Arc::new(ScriptedSource::new());
    let orchestrator = Orchestrator::new(test_config(), source.clone(), store.clone());

    let stats = orchestrator.resume().await.unwrap();

    assert_eq!(stats, RunCounters::default());
    assert_eq!(source.header_calls(), 0);
    assert!(store.executions().await.is_empty());
}

#[tokio::test]
async fn test_unstarted_interrupted_run_is_not_resumable() {
    // No checkpoint was ever written, so there is nothing to resume.
    let store = Arc::new(MemoryStore::new());
    seed_interrupted(&store, RunStatus::Failed, 0).await;

    let source = Arc::new(ScriptedSource::new());
    let orchestrator = Orchestrator::new(test_config(), source.clone(), store.clone());

    orchestrator.resume().await.unwrap();
    assert_eq!(source.header_calls(), 0);
    assert_eq!(store.executions().await.len(), 1);
}
