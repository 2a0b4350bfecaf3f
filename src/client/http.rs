//! HTTP client for the ARP open-data API.
//!
//! Composes the rate limiter, retrier, and page walker into the
//! [`ArpSource`] implementation used in production. A rate-limit token is
//! acquired per attempt, inside the retried operation, so retries pay the
//! same budget as first tries.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::client::pagination::fetch_all_pages;
use crate::client::rate_limit::RateLimiter;
use crate::client::retry::Retrier;
use crate::client::{
    ApiArp, ApiArpItem, ApiError, ApiResult, ArpSource, ItemQuery, PageEnvelope, PageOutcome,
};
use crate::config::IngestConfig;
use crate::shutdown::SharedShutdown;
use crate::windows::FetchWindow;

/// How much of an error response body to keep in error messages.
const BODY_SNIPPET_LEN: usize = 200;

/// Date format expected by the API's query parameters.
const API_DATE_FORMAT: &str = "%Y-%m-%d";

/// Production API client.
pub struct ArpApiClient {
    client: reqwest::Client,
    base_url: String,
    arp_endpoint: String,
    item_endpoint: String,
    page_size: u32,
    rate_limiter: Arc<RateLimiter>,
    retrier: Retrier,
}

impl ArpApiClient {
    /// Build a client from configuration.
    pub fn new(config: &IngestConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ApiError::non_retryable(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            arp_endpoint: config.arp_endpoint.clone(),
            item_endpoint: config.item_endpoint.clone(),
            page_size: config.page_size,
            rate_limiter: Arc::new(RateLimiter::new(config.requests_per_second)),
            retrier: Retrier::new(config.max_retries, config.backoff_factor),
        })
    }

    /// Attach a shutdown handle; retry backoffs will race against it.
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.retrier = self.retrier.with_shutdown(shutdown);
        self
    }

    /// Fetch one page of `endpoint` with `params`, retrying transient
    /// failures.
    async fn get_page<T>(
        &self,
        label: &str,
        endpoint: &str,
        params: &[(String, String)],
    ) -> ApiResult<PageEnvelope<T>>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, endpoint);
        let url = url.as_str();

        self.retrier
            .run(label, || async move {
                self.rate_limiter.acquire().await;
                debug!(label, url, "requesting page");

                let response = self
                    .client
                    .get(url)
                    .query(params)
                    .send()
                    .await
                    .map_err(classify_transport_error)?;

                classify_response(response).await
            })
            .await
    }
}

/// Transport-level failures (connect, timeout) are worth retrying.
fn classify_transport_error(error: reqwest::Error) -> ApiError {
    if error.is_timeout() {
        ApiError::retryable(format!("request timed out: {error}"))
    } else {
        ApiError::retryable(format!("transport error: {error}"))
    }
}

/// Classify a response by status and parse the envelope on success.
async fn classify_response<T>(response: reqwest::Response) -> ApiResult<PageEnvelope<T>>
where
    T: DeserializeOwned,
{
    let status = response.status();

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);
        return Err(ApiError::Retryable {
            message: "rate limited by server (429)".to_string(),
            retry_after,
        });
    }

    if status.is_server_error() {
        return Err(ApiError::retryable(format!("server error {status}")));
    }

    if status.is_client_error() {
        let body = response.text().await.unwrap_or_default();
        let snippet: String = body.chars().take(BODY_SNIPPET_LEN).collect();
        return Err(ApiError::NonRetryable {
            message: format!("client error {status}: {snippet}"),
            status: Some(status.as_u16()),
        });
    }

    let body = response
        .text()
        .await
        .map_err(|e| ApiError::retryable(format!("cannot read response body: {e}")))?;

    // A 2xx body that is not the expected envelope will not improve on
    // retry.
    serde_json::from_str(&body).map_err(|e| {
        let snippet: String = body.chars().take(BODY_SNIPPET_LEN).collect();
        ApiError::non_retryable(format!("cannot parse response: {e}; body: {snippet}"))
    })
}

#[async_trait::async_trait]
impl ArpSource for ArpApiClient {
    async fn fetch_arps(
        &self,
        window: &FetchWindow,
        max_pages: Option<u32>,
    ) -> PageOutcome<ApiArp> {
        let label = format!("arps {window}");
        let base_params = vec![
            (
                "dataVigenciaInicialMin".to_string(),
                window.start.format(API_DATE_FORMAT).to_string(),
            ),
            (
                "dataVigenciaInicialMax".to_string(),
                window.end.format(API_DATE_FORMAT).to_string(),
            ),
            ("tamanhoPagina".to_string(), self.page_size.to_string()),
        ];

        fetch_all_pages(&label, max_pages, |page| {
            let mut params = base_params.clone();
            params.push(("pagina".to_string(), page.to_string()));
            let label = label.clone();
            async move {
                self.get_page::<ApiArp>(&label, &self.arp_endpoint, &params)
                    .await
            }
        })
        .await
    }

    async fn fetch_items(&self, query: &ItemQuery) -> PageOutcome<ApiArpItem> {
        let label = format!("items {}/{}", query.managing_unit, query.purchase_number);
        let base_params = vec![
            ("numeroCompra".to_string(), query.purchase_number.clone()),
            (
                "codigoUnidadeGerenciadora".to_string(),
                query.managing_unit.clone(),
            ),
            (
                "dataVigenciaInicialMin".to_string(),
                query.valid_from.format(API_DATE_FORMAT).to_string(),
            ),
            (
                "dataVigenciaInicialMax".to_string(),
                query.valid_from.format(API_DATE_FORMAT).to_string(),
            ),
            ("tamanhoPagina".to_string(), self.page_size.to_string()),
        ];

        fetch_all_pages(&label, None, |page| {
            let mut params = base_params.clone();
            params.push(("pagina".to_string(), page.to_string()));
            let label = label.clone();
            async move {
                self.get_page::<ApiArpItem>(&label, &self.item_endpoint, &params)
                    .await
            }
        })
        .await
    }
}
