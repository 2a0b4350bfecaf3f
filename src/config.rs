//! Ingestion configuration.
//!
//! An explicitly constructed [`IngestConfig`] that is validated once and then
//! passed by reference into each component; there is no global configuration
//! state. Every field can be overridden through an `ARP_*` environment
//! variable.

use chrono::NaiveDate;
use serde_json::json;

/// Default base URL of the open-data API.
pub const DEFAULT_BASE_URL: &str = "https://dadosabertos.compras.gov.br";

/// Endpoint for the paginated ARP listing.
pub const DEFAULT_ARP_ENDPOINT: &str = "/modulo-arp/1_consultarARP";

/// Endpoint for the paginated item listing of one ARP.
pub const DEFAULT_ITEM_ENDPOINT: &str = "/modulo-arp/2_consultarARPItem";

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A value failed validation
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// An environment variable could not be parsed
    #[error("cannot parse {var}: {message}")]
    Parse {
        /// Environment variable name
        var: String,
        /// Parse failure detail
        message: String,
    },
}

/// Ingestion engine configuration.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Base URL of the source API
    pub base_url: String,
    /// Path of the ARP listing endpoint
    pub arp_endpoint: String,
    /// Path of the item listing endpoint
    pub item_endpoint: String,
    /// Total timeout per HTTP request, in seconds
    pub timeout_secs: u64,
    /// Rate limit: maximum requests per second (token-bucket capacity)
    pub requests_per_second: f64,
    /// Maximum attempts per logical request
    pub max_retries: u32,
    /// Exponential backoff factor: wait = factor^attempt seconds, jittered
    pub backoff_factor: f64,
    /// Page size requested from the API (the API caps this at 500)
    pub page_size: u32,
    /// Optional page ceiling per query, for constrained test runs
    pub max_pages: Option<u32>,
    /// Maximum concurrent per-ARP item fetches (fan-out semaphore size)
    pub max_concurrent_item_fetches: usize,
    /// Days to look back on incremental runs, to catch late source updates
    pub incremental_lookback_days: u32,
    /// Start date for a full backfill when none is given
    pub initial_start_date: NaiveDate,
    /// End date for a full backfill when none is given (None = today)
    pub initial_end_date: Option<NaiveDate>,
    /// Whether to validate records before persistence
    pub validate_data: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            arp_endpoint: DEFAULT_ARP_ENDPOINT.to_string(),
            item_endpoint: DEFAULT_ITEM_ENDPOINT.to_string(),
            timeout_secs: 30,
            requests_per_second: 3.0,
            max_retries: 3,
            backoff_factor: 2.0,
            page_size: 500,
            max_pages: None,
            max_concurrent_item_fetches: 5,
            incremental_lookback_days: 7,
            // The module's data series starts in 2023.
            initial_start_date: NaiveDate::from_ymd_opt(2023, 1, 1)
                .expect("static date is valid"),
            initial_end_date: None,
            validate_data: true,
        }
    }
}

impl IngestConfig {
    /// Build configuration from the environment, starting from defaults.
    ///
    /// Recognized variables: `ARP_BASE_URL`, `ARP_TIMEOUT_SECS`,
    /// `ARP_REQUESTS_PER_SECOND`, `ARP_MAX_RETRIES`, `ARP_BACKOFF_FACTOR`,
    /// `ARP_PAGE_SIZE`, `ARP_MAX_PAGES`, `ARP_MAX_CONCURRENT_ITEM_FETCHES`,
    /// `ARP_INCREMENTAL_LOOKBACK_DAYS`, `ARP_INITIAL_START_DATE`,
    /// `ARP_INITIAL_END_DATE`, `ARP_VALIDATE_DATA`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(value) = std::env::var("ARP_BASE_URL") {
            config.base_url = value;
        }
        read_env("ARP_TIMEOUT_SECS", &mut config.timeout_secs)?;
        read_env("ARP_REQUESTS_PER_SECOND", &mut config.requests_per_second)?;
        read_env("ARP_MAX_RETRIES", &mut config.max_retries)?;
        read_env("ARP_BACKOFF_FACTOR", &mut config.backoff_factor)?;
        read_env("ARP_PAGE_SIZE", &mut config.page_size)?;
        read_env_opt("ARP_MAX_PAGES", &mut config.max_pages)?;
        read_env(
            "ARP_MAX_CONCURRENT_ITEM_FETCHES",
            &mut config.max_concurrent_item_fetches,
        )?;
        read_env(
            "ARP_INCREMENTAL_LOOKBACK_DAYS",
            &mut config.incremental_lookback_days,
        )?;
        read_env("ARP_INITIAL_START_DATE", &mut config.initial_start_date)?;
        read_env_opt("ARP_INITIAL_END_DATE", &mut config.initial_end_date)?;
        read_env("ARP_VALIDATE_DATA", &mut config.validate_data)?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.requests_per_second <= 0.0 {
            return Err(ConfigError::Invalid(
                "requests_per_second must be greater than 0".to_string(),
            ));
        }

        if self.page_size == 0 || self.page_size > 500 {
            return Err(ConfigError::Invalid(
                "page_size must be between 1 and 500".to_string(),
            ));
        }

        if self.max_retries == 0 {
            return Err(ConfigError::Invalid(
                "max_retries must be at least 1".to_string(),
            ));
        }

        if self.backoff_factor < 1.0 {
            return Err(ConfigError::Invalid(
                "backoff_factor must be at least 1.0".to_string(),
            ));
        }

        if self.max_concurrent_item_fetches == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_item_fetches must be at least 1".to_string(),
            ));
        }

        if let Some(end) = self.initial_end_date {
            if self.initial_start_date > end {
                return Err(ConfigError::Invalid(format!(
                    "initial start date {} is after end date {end}",
                    self.initial_start_date
                )));
            }
        }

        Ok(())
    }

    /// End date for a full backfill, defaulting to today.
    pub fn initial_end_date_or_today(&self) -> NaiveDate {
        self.initial_end_date
            .unwrap_or_else(|| chrono::Utc::now().date_naive())
    }

    /// Opaque snapshot of the effective configuration, stored with each
    /// execution record for later diagnosis.
    pub fn snapshot(&self) -> serde_json::Value {
        json!({
            "base_url": self.base_url,
            "rate_limit": format!("{} req/s", self.requests_per_second),
            "max_retries": self.max_retries,
            "backoff_factor": self.backoff_factor,
            "page_size": self.page_size,
            "max_pages": self.max_pages,
            "max_concurrent_item_fetches": self.max_concurrent_item_fetches,
            "incremental_lookback_days": self.incremental_lookback_days,
            "initial_date_range": format!(
                "{} to {}",
                self.initial_start_date,
                self.initial_end_date_or_today()
            ),
            "validate_data": self.validate_data,
        })
    }
}

fn read_env<T: std::str::FromStr>(var: &str, target: &mut T) -> Result<(), ConfigError>
where
    T::Err: std::fmt::Display,
{
    if let Ok(raw) = std::env::var(var) {
        *target = raw.parse().map_err(|e: T::Err| ConfigError::Parse {
            var: var.to_string(),
            message: e.to_string(),
        })?;
    }
    Ok(())
}

fn read_env_opt<T: std::str::FromStr>(var: &str, target: &mut Option<T>) -> Result<(), ConfigError>
where
    T::Err: std::fmt::Display,
{
    if let Ok(raw) = std::env::var(var) {
        if raw.is_empty() {
            *target = None;
        } else {
            *target = Some(raw.parse().map_err(|e: T::Err| ConfigError::Parse {
                var: var.to_string(),
                message: e.to_string(),
            })?);
        }
    }
    Ok(())
}
