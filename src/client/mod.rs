//! API client building blocks.
//!
//! The pieces that talk to the upstream API, kept separate so each is
//! testable without a network: a token-bucket [`rate_limit::RateLimiter`],
//! an explicit [`retry::Retrier`], a generic page walker in [`pagination`],
//! a semaphore-bounded [`fanout::fan_out`], and the concrete
//! [`http::ArpApiClient`] that composes them behind the [`ArpSource`] trait.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;

use crate::windows::FetchWindow;

pub mod fanout;
pub mod http;
pub mod pagination;
pub mod rate_limit;
pub mod retry;

/// Errors from API interaction, tagged by whether a retry can help.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    /// Transient failure; retrying after a delay may succeed
    #[error("retryable: {message}")]
    Retryable {
        /// Failure detail
        message: String,
        /// Server-mandated wait, when the response carried one
        retry_after: Option<Duration>,
    },

    /// Permanent failure; retrying will not help
    #[error("non-retryable: {message}")]
    NonRetryable {
        /// Failure detail
        message: String,
        /// HTTP status, when the failure came from a response
        status: Option<u16>,
    },
}

impl ApiError {
    /// Build a retryable error without a server-mandated wait.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Retryable {
            message: message.into(),
            retry_after: None,
        }
    }

    /// Build a non-retryable error.
    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self::NonRetryable {
            message: message.into(),
            status: None,
        }
    }

    /// Error used when shutdown interrupts an operation. Retryable so a
    /// later run can pick the work back up.
    pub fn cancelled() -> Self {
        Self::retryable("operation cancelled by shutdown")
    }

    /// Whether a retry can help.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable { .. })
    }
}

/// Result alias for API operations.
pub type ApiResult<T> = Result<T, ApiError>;

/// One page of the upstream pagination envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct PageEnvelope<T> {
    /// Records on this page
    #[serde(rename = "resultado", default = "Vec::new")]
    pub records: Vec<T>,
    /// Total records matching the query
    #[serde(rename = "totalRegistros", default)]
    pub total_records: u64,
    /// Total pages for the query
    #[serde(rename = "totalPaginas", default)]
    pub total_pages: u32,
    /// Pages remaining after this one
    #[serde(rename = "paginasRestantes", default)]
    pub pages_remaining: u32,
}

/// Raw ARP header record as returned by the listing endpoint.
///
/// Field types are kept loose (`serde_json::Value` for codes the API
/// sometimes serializes as numbers, sometimes as strings); coercion to row
/// types happens in [`crate::transform`].
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ApiArp {
    /// PNCP control number, the natural unique key
    #[serde(rename = "numeroControlePncpAta")]
    pub control_code: Option<String>,
    /// ARP number as published
    #[serde(rename = "numeroAtaRegistroPreco")]
    pub arp_number: Option<String>,
    /// Purchase number
    #[serde(rename = "numeroCompra")]
    pub purchase_number: Option<serde_json::Value>,
    /// Year of the purchase
    #[serde(rename = "anoCompra")]
    pub purchase_year: Option<serde_json::Value>,
    /// Managing-unit (UASG) code
    #[serde(rename = "codigoUnidadeGerenciadora")]
    pub managing_unit: Option<serde_json::Value>,
    /// Start of validity, ISO date or datetime
    #[serde(rename = "dataVigenciaInicial")]
    pub valid_from: Option<String>,
    /// End of validity
    #[serde(rename = "dataVigenciaFinal")]
    pub valid_until: Option<String>,
    /// Signature date
    #[serde(rename = "dataAssinatura")]
    pub signed_at: Option<String>,
    /// Last update timestamp reported by the source
    #[serde(rename = "dataAtualizacao")]
    pub source_updated_at: Option<String>,
    /// Object description
    #[serde(rename = "objeto")]
    pub object: Option<String>,
    /// Total registered value
    #[serde(rename = "valorTotal")]
    pub total_value: Option<serde_json::Value>,
    /// Declared number of items
    #[serde(rename = "quantidadeItens")]
    pub item_count: Option<serde_json::Value>,
    /// Status as published
    #[serde(rename = "statusAta")]
    pub status: Option<String>,
    /// Purchase modality code
    #[serde(rename = "codigoModalidade")]
    pub modality_code: Option<serde_json::Value>,
    /// Purchase modality name
    #[serde(rename = "nomeModalidade")]
    pub modality_name: Option<String>,
    /// Link to the ARP on the PNCP portal
    #[serde(rename = "linkAtaPNCP")]
    pub pncp_ata_link: Option<String>,
    /// Link to the purchase on the PNCP portal
    #[serde(rename = "linkCompraPNCP")]
    pub pncp_purchase_link: Option<String>,
    /// Soft-delete flag from the source
    #[serde(rename = "excluido")]
    pub deleted: Option<bool>,
}

/// Raw ARP line item as returned by the item endpoint.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ApiArpItem {
    /// Item sequence number within the ARP
    #[serde(rename = "numeroItem")]
    pub item_number: Option<serde_json::Value>,
    /// Catalog code of the item
    #[serde(rename = "codigoItem")]
    pub item_code: Option<serde_json::Value>,
    /// Item description
    #[serde(rename = "descricaoItem")]
    pub description: Option<String>,
    /// Item type (material/service)
    #[serde(rename = "tipoItem")]
    pub item_type: Option<String>,
    /// Registered unit value
    #[serde(rename = "valorUnitario")]
    pub unit_value: Option<serde_json::Value>,
    /// Registered total value
    #[serde(rename = "valorTotal")]
    pub total_value: Option<serde_json::Value>,
    /// Registered quantity
    #[serde(rename = "quantidade")]
    pub quantity: Option<serde_json::Value>,
    /// Unit of measurement
    #[serde(rename = "unidadeMedida")]
    pub unit: Option<String>,
    /// Brand
    #[serde(rename = "marca")]
    pub brand: Option<String>,
    /// Model
    #[serde(rename = "modelo")]
    pub model: Option<String>,
    /// Supplier tax id (CNPJ)
    #[serde(rename = "niFornecedor")]
    pub supplier_tax_id: Option<serde_json::Value>,
    /// Supplier name
    #[serde(rename = "nomeRazaoSocialFornecedor")]
    pub supplier_name: Option<String>,
    /// Quantity already committed
    #[serde(rename = "quantidadeEmpenhada")]
    pub committed_quantity: Option<serde_json::Value>,
    /// Maximum adhesion quantity for non-participants
    #[serde(rename = "quantidadeMaximaAdesao")]
    pub max_adhesion: Option<serde_json::Value>,
    /// Soft-delete flag from the source
    #[serde(rename = "excluido")]
    pub deleted: Option<bool>,
}

/// Query parameters identifying one ARP's items.
#[derive(Debug, Clone)]
pub struct ItemQuery {
    /// Row id of the parent ARP, carried through for result keying
    pub arp_id: String,
    /// Purchase number of the parent ARP
    pub purchase_number: String,
    /// Managing-unit code of the parent ARP
    pub managing_unit: String,
    /// Validity start of the parent ARP, required by the item endpoint
    pub valid_from: NaiveDate,
}

/// Result of walking the pages of one query.
///
/// A page-level failure does not discard work already done: `records` holds
/// the accumulated prefix and `error` the failure that stopped the walk.
#[derive(Debug)]
pub struct PageOutcome<T> {
    /// Records accumulated before any failure
    pub records: Vec<T>,
    /// Pages successfully fetched
    pub pages_fetched: u32,
    /// Total pages reported by the first page, if any was fetched
    pub total_pages: Option<u32>,
    /// The failure that stopped the walk, if any
    pub error: Option<ApiError>,
}

impl<T> PageOutcome<T> {
    /// Whether the walk completed without error.
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

/// Abstraction over the upstream data source.
///
/// The orchestrator depends on this trait rather than the HTTP client so
/// tests can substitute scripted fakes.
#[async_trait]
pub trait ArpSource: Send + Sync {
    /// Fetch all ARP header pages whose validity starts inside `window`.
    async fn fetch_arps(&self, window: &FetchWindow, max_pages: Option<u32>)
        -> PageOutcome<ApiArp>;

    /// Fetch all item pages of one ARP.
    async fn fetch_items(&self, query: &ItemQuery) -> PageOutcome<ApiArpItem>;
}
