//! Liveness and readiness probes
//!
//! `/health` (and `/healthz`) answers 200 whenever the process can serve HTTP.
//! `/ready` (and `/readyz`) answers 503 in distributed mode while the NATS
//! connection is down, since commands could not be queued. Embedded mode is
//! always ready. Both return the same JSON report.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;

use super::json_response;
use crate::server::AppState;
use crate::worker::ProcessorStats;

#[derive(Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub ready: bool,
    /// "online" or "degraded"
    pub status: &'static str,
    pub version: &'static str,
    pub commit: &'static str,
    pub built_at: &'static str,
    pub uptime_secs: u64,
    pub timestamp: String,
    pub mode: String,
    pub node_id: String,
    pub nats_connected: bool,
    pub cache: CacheReport,
    /// Only present when the processor runs in this process
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processor: Option<ProcessorStats>,
}

#[derive(Serialize)]
pub struct CacheReport {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_rate_pct: f64,
    pub ttl_secs: u64,
}

impl HealthReport {
    fn collect(state: &AppState) -> Self {
        let ready = state.is_ready();
        let cache = state.cache_store.stats();

        Self {
            healthy: true,
            ready,
            status: if ready { "online" } else { "degraded" },
            version: env!("CARGO_PKG_VERSION"),
            commit: option_env!("GIT_COMMIT_SHORT").unwrap_or("unknown"),
            built_at: option_env!("BUILD_TIMESTAMP").unwrap_or("unknown"),
            uptime_secs: state.started_at.elapsed().as_secs(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            mode: state.mode.to_string(),
            node_id: state.args.node_id.to_string(),
            nats_connected: state.nats.as_ref().is_some_and(|n| n.is_connected()),
            cache: CacheReport {
                entries: cache.entries,
                hits: cache.hits,
                misses: cache.misses,
                evictions: cache.evictions,
                hit_rate_pct: cache.hit_rate(),
                ttl_secs: state.cache_store.config().ttl.as_secs(),
            },
            processor: state.processor.as_ref().map(|p| p.stats()),
        }
    }

    fn respond(&self, status: StatusCode) -> Response<Full<Bytes>> {
        match serde_json::to_string(self) {
            Ok(body) => json_response(status, body),
            Err(e) => json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({ "healthy": false, "error": e.to_string() }).to_string(),
            ),
        }
    }
}

/// GET /health, /healthz
pub fn health_check(state: Arc<AppState>) -> Response<Full<Bytes>> {
    HealthReport::collect(&state).respond(StatusCode::OK)
}

/// GET /ready, /readyz
pub fn readiness_check(state: Arc<AppState>) -> Response<Full<Bytes>> {
    let report = HealthReport::collect(&state);
    let status = if report.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    report.respond(status)
}
