//! # ARP Ingest Library
//!
//! An ingestion engine for Brazilian government ARP (Ata de Registro de
//! Preços, price-registration record) open data. Fetches paginated records
//! from the rate-limited public API, transforms them, and persists them
//! idempotently through an abstract store while tracking the health and
//! progress of every ingestion run.
//!
//! ## Features
//!
//! - **Rate Limiting**: token-bucket limiter shared across all requests
//! - **Retry with Backoff**: jittered exponential backoff, `Retry-After` aware
//! - **Bounded Concurrency**: semaphore-capped fan-out for per-ARP item fetches
//! - **Checkpointed Runs**: execution records with per-window progress and a
//!   dead-letter error log
//! - **Two Run Modes**: full historical backfill (chunked by quarter) and
//!   bounded incremental sync, plus conservative window-level resume
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use arp_ingest::config::IngestConfig;
//! use arp_ingest::client::http::ArpApiClient;
//! use arp_ingest::orchestrator::Orchestrator;
//! use arp_ingest::store::memory::MemoryStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = IngestConfig::from_env()?;
//! let source = Arc::new(ArpApiClient::new(&config)?);
//! let store = Arc::new(MemoryStore::new());
//!
//! let orchestrator = Orchestrator::new(config, source, store);
//! let stats = orchestrator.run_incremental().await?;
//! println!("ARPs fetched: {}", stats.arps_fetched);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`client`] - API client: rate limiter, retrier, pagination, fan-out
//! - [`windows`] - date-window planning (quarterly chunks, incremental window)
//! - [`transform`] - API payload to database-row transformation
//! - [`tracker`] - execution records, checkpoints, and dead-letter errors
//! - [`store`] - persistence collaborator trait and in-memory implementation
//! - [`orchestrator`] - backfill / incremental / resume flows
//! - [`config`] - explicitly constructed, injected configuration
//! - [`shutdown`] - cooperative cancellation shared across tasks

#![warn(missing_docs)]
#![warn(clippy::all)]

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// API client: rate limiting, retry, pagination, bounded fan-out
pub mod client;

/// Configuration loading and validation
pub mod config;

/// Run orchestration: backfill, incremental sync, resume
pub mod orchestrator;

/// Graceful shutdown coordination shared across tasks
pub mod shutdown;

/// Persistence collaborator trait and implementations
pub mod store;

/// API payload to database-row transformation
pub mod transform;

/// Execution tracking: run records, checkpoints, dead-letter errors
pub mod tracker;

/// Date-window planning for backfill and incremental runs
pub mod windows;

pub use orchestrator::Orchestrator;
pub use tracker::RunCounters;
pub use windows::FetchWindow;

/// A price-registration record (header record) in database-ready form.
///
/// The natural unique key is [`Arp::control_code`] (the PNCP control number);
/// [`Arp::id`] is derived deterministically from it so that re-ingesting the
/// same record is a pure upsert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Arp {
    /// Stable row id, derived from `control_code`
    pub id: String,
    /// PNCP control number, the natural unique key
    pub control_code: String,
    /// ARP number as published (e.g., "00421/2023")
    pub arp_number: Option<String>,
    /// Purchase number, required to query this ARP's items
    pub purchase_number: String,
    /// Year of the purchase
    pub purchase_year: Option<i32>,
    /// Managing-unit (UASG) code, required to query this ARP's items
    pub managing_unit: String,
    /// Start of validity
    pub valid_from: Option<NaiveDate>,
    /// End of validity
    pub valid_until: Option<NaiveDate>,
    /// Signature date
    pub signed_at: Option<NaiveDate>,
    /// Last update timestamp reported by the source
    pub source_updated_at: Option<NaiveDateTime>,
    /// Object description
    pub object: Option<String>,
    /// Total registered value
    pub total_value: Option<Decimal>,
    /// Declared number of items
    pub item_count: Option<i32>,
    /// Status as published (e.g., "Vigente")
    pub status: Option<String>,
    /// Purchase modality code
    pub modality_code: Option<String>,
    /// Purchase modality name
    pub modality_name: Option<String>,
    /// Link to the ARP on the PNCP portal
    pub pncp_ata_link: Option<String>,
    /// Link to the purchase on the PNCP portal
    pub pncp_purchase_link: Option<String>,
    /// Soft-delete flag from the source
    pub deleted: bool,
}

impl Arp {
    /// Derive the stable row id for a control code.
    pub fn derive_id(control_code: &str) -> String {
        Uuid::new_v5(&Uuid::NAMESPACE_OID, control_code.as_bytes()).to_string()
    }

    /// Validate record integrity before persistence.
    pub fn validate(&self) -> Result<(), String> {
        if self.control_code.is_empty() {
            return Err("control code cannot be empty".to_string());
        }

        if self.purchase_number.is_empty() {
            return Err("purchase number cannot be empty".to_string());
        }

        if self.managing_unit.is_empty() {
            return Err("managing unit cannot be empty".to_string());
        }

        if self.valid_from.is_none() {
            return Err("validity start date is required".to_string());
        }

        if let (Some(from), Some(until)) = (self.valid_from, self.valid_until) {
            if until < from {
                return Err(format!(
                    "validity end ({until}) must not precede validity start ({from})"
                ));
            }
        }

        if let Some(value) = self.total_value {
            if value < Decimal::ZERO {
                return Err(format!("total value must be non-negative, got {value}"));
            }
        }

        Ok(())
    }
}

/// A line item belonging to exactly one [`Arp`], in database-ready form.
///
/// The row id is derived from the parent id plus the item's number and code,
/// so the same item upserts onto itself across runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArpItem {
    /// Stable row id, derived from parent id + item number + item code
    pub id: String,
    /// Parent ARP row id
    pub arp_id: String,
    /// Item sequence number within the ARP
    pub item_number: Option<i32>,
    /// Catalog code of the item
    pub item_code: Option<String>,
    /// Item description
    pub description: Option<String>,
    /// Item type (material/service)
    pub item_type: Option<String>,
    /// Registered unit value
    pub unit_value: Option<Decimal>,
    /// Registered total value
    pub total_value: Option<Decimal>,
    /// Registered quantity
    pub quantity: Option<Decimal>,
    /// Unit of measurement
    pub unit: Option<String>,
    /// Brand
    pub brand: Option<String>,
    /// Model
    pub model: Option<String>,
    /// Supplier tax id (CNPJ)
    pub supplier_tax_id: Option<String>,
    /// Supplier name
    pub supplier_name: Option<String>,
    /// Quantity already committed
    pub committed_quantity: Option<Decimal>,
    /// Maximum adhesion quantity for non-participants
    pub max_adhesion: Option<Decimal>,
    /// Soft-delete flag from the source
    pub deleted: bool,
}

impl ArpItem {
    /// Derive the stable row id for an item within a parent ARP.
    pub fn derive_id(arp_id: &str, item_number: Option<i32>, item_code: Option<&str>) -> String {
        let key = format!(
            "{}/{}/{}",
            arp_id,
            item_number.map(|n| n.to_string()).unwrap_or_default(),
            item_code.unwrap_or_default()
        );
        Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()).to_string()
    }

    /// Validate record integrity before persistence.
    pub fn validate(&self) -> Result<(), String> {
        if self.arp_id.is_empty() {
            return Err("parent ARP id cannot be empty".to_string());
        }

        if let Some(value) = self.unit_value {
            if value < Decimal::ZERO {
                return Err(format!("unit value must be non-negative, got {value}"));
            }
        }

        if let Some(qty) = self.quantity {
            if qty < Decimal::ZERO {
                return Err(format!("quantity must be non-negative, got {qty}"));
            }
        }

        Ok(())
    }
}
