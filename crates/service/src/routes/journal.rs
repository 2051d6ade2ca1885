//! Standard journal routes.
//!
//! `GET /v1/journal?clock=C&limit=L` tails the change journal from an
//! inclusive clock cursor; `GET /v1/journalMaxClock` reports the newest
//! clock. Consumers poll the tail with their last-seen clock + 1, or re-fetch
//! an exact entry by passing its clock with `limit=1`.

use std::sync::Arc;

use axum::extract::Query;
use axum::response::Response;
use axum::routing::MethodFilter;
use serde::Deserialize;

use siftd_core::ServiceError;
use siftd_security::AuthModel;
use siftd_store::{JournalMaxClock, JournalStore};

use crate::host::ServiceHost;
use crate::respond::{error_response, json_ok};

/// Query parameters arrive as raw strings so a malformed value maps to the
/// documented 400 with a JSON content type.
#[derive(Debug, Deserialize)]
struct JournalQuery {
    clock: Option<String>,
    limit: Option<String>,
}

/// Mount `GET /v1/journal` and `GET /v1/journalMaxClock` gated by `auth_model`.
pub fn register_journal_routes(
    host: &mut ServiceHost,
    auth_model: &AuthModel,
    store: Arc<dyn JournalStore>,
) {
    let changes_store = Arc::clone(&store);
    host.register_route(
        MethodFilter::GET,
        "/v1/journal",
        auth_model,
        move |Query(query): Query<JournalQuery>| {
            let store = Arc::clone(&changes_store);
            async move { get_journal_changes(store, query).await }
        },
    );

    host.register_route(MethodFilter::GET, "/v1/journalMaxClock", auth_model, move || {
        let store = Arc::clone(&store);
        async move { get_journal_max_clock(store).await }
    });
}

async fn get_journal_changes(store: Arc<dyn JournalStore>, query: JournalQuery) -> Response {
    let Some(clock) = parse_positive(query.clock.as_deref()) else {
        tracing::info!("journal route - invalid 'clock' parameter");
        return error_response(&ServiceError::bad_request(
            "the 'clock' parameter must be a positive integer",
        ));
    };
    let Some(limit) = parse_positive(query.limit.as_deref()) else {
        tracing::info!("journal route - invalid 'limit' parameter");
        return error_response(&ServiceError::bad_request(
            "the 'limit' parameter must be a positive integer",
        ));
    };

    match store.journal_changes(clock, limit).await {
        Ok(entries) => json_ok(&entries),
        Err(err) => {
            tracing::info!(%err, "journal route - failed to read journal changes");
            error_response(&err)
        }
    }
}

async fn get_journal_max_clock(store: Arc<dyn JournalStore>) -> Response {
    match store.journal_max_clock().await {
        Ok(max_clock) => json_ok(&JournalMaxClock { max_clock }),
        Err(err) => {
            tracing::info!(%err, "journal route - failed to read journal max clock");
            error_response(&err)
        }
    }
}

/// `Some(n)` only for an integer >= 1.
fn parse_positive(raw: Option<&str>) -> Option<u64> {
    raw?.parse::<i64>().ok().filter(|n| *n >= 1).map(|n| n as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_integers_only() {
        assert_eq!(parse_positive(Some("1")), Some(1));
        assert_eq!(parse_positive(Some("42")), Some(42));
        assert_eq!(parse_positive(Some("0")), None);
        assert_eq!(parse_positive(Some("-3")), None);
        assert_eq!(parse_positive(Some("bogus-number")), None);
        assert_eq!(parse_positive(None), None);
    }
}
