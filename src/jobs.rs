use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::post;
use axum::Router;
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::store::LibsqlStore;
use crate::sync::{self, SyncRunResult};

/// Shared state for the job-invoker router: the store and config needed
/// to run a sync, nothing more. No authentication/authorization lives
/// here beyond the shared-secret header check - the engine assumes the
/// caller is already authorized (spec §1 out-of-scope).
#[derive(Clone)]
pub struct JobsState {
    pub store: LibsqlStore,
    pub config: Arc<AppConfig>,
}

pub fn router(state: JobsState) -> Router {
    Router::new()
        .route("/api/jobs/nvr/sync-all", post(sync_all_handler))
        .route("/api/jobs/nvr/sync-site/:site_id", post(sync_site_handler))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

fn secret_matches(headers: &HeaderMap, expected: &str) -> bool {
    headers
        .get("x-job-secret")
        .and_then(|v| v.to_str().ok())
        .map(|got| got == expected)
        .unwrap_or(false)
}

#[derive(Serialize)]
struct SyncAllResponse {
    ok: bool,
    sites_synced: usize,
    results: Vec<SyncRunResult>,
    total_elapsed_ms: u128,
}

async fn sync_all_handler(
    State(state): State<JobsState>,
    headers: HeaderMap,
) -> axum::response::Response {
    let Some(secret) = state.config.job_secret.as_deref() else {
        warn!("JOB_SECRET is not configured; rejecting all job requests");
        return StatusCode::FORBIDDEN.into_response();
    };
    if !secret_matches(&headers, secret) {
        return StatusCode::FORBIDDEN.into_response();
    }

    info!("fleet-wide nvr sync triggered");
    let start = Instant::now();
    let results = sync::sync_all_sites(&state.store, &state.config).await;
    let ok = results.iter().all(|r| r.ok);

    Json(SyncAllResponse {
        ok,
        sites_synced: results.len(),
        results,
        total_elapsed_ms: start.elapsed().as_millis(),
    })
    .into_response()
}

async fn sync_site_handler(
    State(state): State<JobsState>,
    Path(site_id): Path<i64>,
    headers: HeaderMap,
) -> axum::response::Response {
    let Some(secret) = state.config.job_secret.as_deref() else {
        warn!("JOB_SECRET is not configured; rejecting all job requests");
        return StatusCode::FORBIDDEN.into_response();
    };
    if !secret_matches(&headers, secret) {
        return StatusCode::FORBIDDEN.into_response();
    }

    info!(site_id, "single-site nvr sync triggered");
    let result = sync::sync_site(&state.store, &state.config, site_id).await;
    Json(result).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_matches_checks_header_value() {
        let mut headers = HeaderMap::new();
        headers.insert("x-job-secret", "correct".parse().unwrap());
        assert!(secret_matches(&headers, "correct"));
        assert!(!secret_matches(&headers, "wrong"));
    }

    #[test]
    fn secret_matches_rejects_missing_header() {
        let headers = HeaderMap::new();
        assert!(!secret_matches(&headers, "correct"));
    }
}
