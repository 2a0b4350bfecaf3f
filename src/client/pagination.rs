//! Generic page walker for the upstream pagination envelope.

use std::future::Future;

use tracing::{debug, warn};

use crate::client::{ApiResult, PageEnvelope, PageOutcome};

/// Walk every page of one query, accumulating records.
///
/// Pages are 1-indexed. The walk stops on an empty page or once
/// `totalPaginas` pages have been fetched, whichever comes first;
/// `max_pages`, when set, caps the walk for constrained runs. A page-level
/// failure stops the walk and returns the accumulated prefix together with
/// the error, so callers can persist partial progress.
///
/// The walker holds no state between calls; repeating the same query
/// restarts at page 1.
pub async fn fetch_all_pages<T, F, Fut>(
    label: &str,
    max_pages: Option<u32>,
    mut fetch: F,
) -> PageOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = ApiResult<PageEnvelope<T>>>,
{
    let mut records = Vec::new();
    let mut pages_fetched = 0u32;
    let mut total_pages = None;
    let mut page = 1u32;

    loop {
        if let Some(cap) = max_pages {
            if pages_fetched >= cap {
                debug!(label, cap, "page ceiling reached");
                break;
            }
        }

        let envelope = match fetch(page).await {
            Ok(envelope) => envelope,
            Err(error) => {
                warn!(label, page, %error, "page fetch failed, keeping prefix");
                return PageOutcome {
                    records,
                    pages_fetched,
                    total_pages,
                    error: Some(error),
                };
            }
        };

        if total_pages.is_none() {
            total_pages = Some(envelope.total_pages);
            debug!(
                label,
                total_pages = envelope.total_pages,
                total_records = envelope.total_records,
                "pagination started"
            );
        }

        if envelope.records.is_empty() {
            break;
        }

        records.extend(envelope.records);
        pages_fetched += 1;

        if page >= envelope.total_pages {
            break;
        }
        page += 1;
    }

    debug!(label, pages_fetched, records = records.len(), "pagination finished");
    PageOutcome {
        records,
        pages_fetched,
        total_pages,
        error: None,
    }
}
