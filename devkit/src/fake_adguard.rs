/*!
Fake AdGuard Home control API

Serves the endpoints the relay reads (`status`, `stats`, `stats_info`,
`filtering/status`) with configurable values, records the requests it
received and can be switched into failing or credential-checking modes.
*/

use anyhow::Result;
use axum::extract::State;
use axum::http::{header::AUTHORIZATION, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;

/// Counters returned by `GET /control/stats`
#[derive(Debug, Clone, Serialize)]
pub struct AdGuardStats {
    pub num_dns_queries: u64,
    pub num_blocked_filtering: u64,
    pub num_replaced_safebrowsing: u64,
    pub num_replaced_parental: u64,
    pub num_replaced_safesearch: u64,
    /// Seconds
    pub avg_processing_time: f64,
}

impl Default for AdGuardStats {
    fn default() -> Self {
        Self {
            num_dns_queries: 2000,
            num_blocked_filtering: 250,
            num_replaced_safebrowsing: 3,
            num_replaced_parental: 2,
            num_replaced_safesearch: 1,
            avg_processing_time: 0.01234,
        }
    }
}

struct AdGuardState {
    version: String,
    stats: AdGuardStats,
    stats_interval: u64,
    filters: Vec<u64>,
    allowlist_filters: Vec<u64>,
    failing: bool,
    required_authorization: Option<String>,
    last_authorization: Option<String>,
    requests: Vec<String>,
}

type Shared = Arc<Mutex<AdGuardState>>;

/// Running fake AdGuard Home bound to a loopback port
#[derive(Clone)]
pub struct FakeAdGuard {
    addr: SocketAddr,
    state: Shared,
}

impl FakeAdGuard {
    /// Bind an ephemeral port and serve in the background
    pub async fn start() -> Result<Self> {
        let state: Shared = Arc::new(Mutex::new(AdGuardState {
            version: "v0.107.43".to_string(),
            stats: AdGuardStats::default(),
            stats_interval: 1,
            filters: vec![50_000, 10_000],
            allowlist_filters: vec![15],
            failing: false,
            required_authorization: None,
            last_authorization: None,
            requests: Vec::new(),
        }));

        let app = Router::new()
            .route("/control/status", get(status))
            .route("/control/stats", get(stats))
            .route("/control/stats_info", get(stats_info))
            .route("/control/filtering/status", get(filtering_status))
            .with_state(state.clone());

        let addr = crate::serve(app).await?;
        log::info!("🛡️ [FAKE] AdGuard Home listening on {}", addr);
        Ok(Self { addr, state })
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn set_stats(&self, stats: AdGuardStats) {
        self.state.lock().stats = stats;
    }

    pub fn set_version(&self, version: &str) {
        self.state.lock().version = version.to_string();
    }

    /// Answer every request with HTTP 500
    pub fn set_failing(&self, failing: bool) {
        self.state.lock().failing = failing;
    }

    /// Reject requests whose `Authorization` header differs from `value`
    pub fn require_authorization(&self, value: &str) {
        self.state.lock().required_authorization = Some(value.to_string());
    }

    pub fn last_authorization(&self) -> Option<String> {
        self.state.lock().last_authorization.clone()
    }

    /// Endpoints hit so far, in order
    pub fn requests(&self) -> Vec<String> {
        self.state.lock().requests.clone()
    }
}

fn respond(
    state: &Shared,
    endpoint: &str,
    headers: &HeaderMap,
    body: impl FnOnce(&AdGuardState) -> Value,
) -> Response {
    let mut s = state.lock();
    s.requests.push(endpoint.to_string());
    s.last_authorization = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    if let Some(expected) = &s.required_authorization {
        if s.last_authorization.as_ref() != Some(expected) {
            return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
        }
    }
    if s.failing {
        return (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response();
    }
    Json(body(&*s)).into_response()
}

async fn status(State(state): State<Shared>, headers: HeaderMap) -> Response {
    respond(&state, "status", &headers, |s| {
        json!({
            "version": s.version,
            "running": true,
            "protection_enabled": true,
            "dns_port": 53,
        })
    })
}

async fn stats(State(state): State<Shared>, headers: HeaderMap) -> Response {
    respond(&state, "stats", &headers, |s| {
        let mut body = serde_json::to_value(&s.stats).unwrap_or_default();
        body["time_units"] = json!("hours");
        body
    })
}

async fn stats_info(State(state): State<Shared>, headers: HeaderMap) -> Response {
    respond(&state, "stats_info", &headers, |s| json!({ "interval": s.stats_interval }))
}

async fn filtering_status(State(state): State<Shared>, headers: HeaderMap) -> Response {
    respond(&state, "filtering/status", &headers, |s| {
        let list = |counts: &[u64]| -> Vec<Value> {
            counts
                .iter()
                .enumerate()
                .map(|(i, n)| {
                    json!({
                        "id": i + 1,
                        "enabled": true,
                        "name": format!("list {}", i + 1),
                        "rules_count": n,
                    })
                })
                .collect()
        };
        json!({
            "enabled": true,
            "interval": 24,
            "filters": list(&s.filters),
            "whitelist_filters": list(&s.allowlist_filters),
            "user_rules": [],
        })
    })
}
