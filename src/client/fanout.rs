//! Semaphore-bounded fan-out over independent work units.
//!
//! Used for per-ARP item fetches: many parents, at most K fetches in flight.
//! One parent's failure never cancels its siblings; every unit resolves and
//! is reported under its parent's key.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::client::{ApiError, ApiResult};
use crate::shutdown::SharedShutdown;

/// Run one future per `(key, input)` pair with at most `limit` in flight.
///
/// Returns a map from key to each unit's result: exactly one entry per
/// input unit. Keys stay with the caller, so even a unit whose task
/// crashes still reports an error under its key. When shutdown fires,
/// units that have not yet acquired a permit resolve to a retryable
/// cancellation error instead of running.
pub async fn fan_out<Q, R, F, Fut>(
    units: Vec<(String, Q)>,
    limit: usize,
    shutdown: Option<SharedShutdown>,
    fetch: F,
) -> HashMap<String, ApiResult<R>>
where
    Q: Send + 'static,
    R: Send + 'static,
    F: Fn(Q) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ApiResult<R>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(limit.max(1)));
    let fetch = Arc::new(fetch);
    let mut handles = Vec::with_capacity(units.len());

    debug!(units = units.len(), limit, "starting fan-out");

    for (key, input) in units {
        let semaphore = semaphore.clone();
        let fetch = fetch.clone();
        let shutdown = shutdown.clone();

        let handle = tokio::spawn(async move {
            let permit = match &shutdown {
                Some(shutdown) => {
                    tokio::select! {
                        permit = semaphore.acquire_owned() => permit,
                        _ = shutdown.wait_for_shutdown() => {
                            return Err(ApiError::cancelled());
                        }
                    }
                }
                None => semaphore.acquire_owned().await,
            };

            let _permit = match permit {
                Ok(permit) => permit,
                // The semaphore is never closed while tasks run.
                Err(_) => return Err(ApiError::cancelled()),
            };

            if let Some(shutdown) = &shutdown {
                if shutdown.is_shutdown_requested() {
                    return Err(ApiError::cancelled());
                }
            }

            fetch(input).await
        });
        handles.push((key, handle));
    }

    let mut results = HashMap::with_capacity(handles.len());
    for (key, handle) in handles {
        let result = match handle.await {
            Ok(result) => result,
            Err(error) => {
                warn!(key = %key, %error, "fan-out unit crashed");
                Err(ApiError::non_retryable(format!(
                    "item fetch task crashed: {error}"
                )))
            }
        };
        results.insert(key, result);
    }

    results
}
