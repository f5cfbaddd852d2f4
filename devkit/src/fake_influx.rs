/*!
Fake InfluxDB 1.x HTTP API

Understands `SHOW DATABASES` and `CREATE DATABASE` on `/query`, and keeps
every `/write` body so tests can assert on the Line Protocol received.
*/

use anyhow::Result;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;

/// One accepted `/write` call
#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub database: String,
    pub precision: String,
    pub username: Option<String>,
    pub body: String,
}

#[derive(Default)]
struct InfluxState {
    databases: BTreeSet<String>,
    created: Vec<String>,
    writes: Vec<WriteRequest>,
    failing: bool,
}

type Shared = Arc<Mutex<InfluxState>>;
type Params = Query<HashMap<String, String>>;

/// Running fake InfluxDB bound to a loopback port
#[derive(Clone)]
pub struct FakeInflux {
    addr: SocketAddr,
    state: Shared,
}

impl FakeInflux {
    /// Bind an ephemeral port and serve in the background
    pub async fn start() -> Result<Self> {
        let state: Shared = Arc::new(Mutex::new(InfluxState::default()));

        let app = Router::new()
            .route("/query", get(query).post(query))
            .route("/write", post(write))
            .with_state(state.clone());

        let addr = crate::serve(app).await?;
        log::info!("📈 [FAKE] InfluxDB listening on {}", addr);
        Ok(Self { addr, state })
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn add_database(&self, name: &str) {
        self.state.lock().databases.insert(name.to_string());
    }

    /// Answer every request with HTTP 500
    pub fn set_failing(&self, failing: bool) {
        self.state.lock().failing = failing;
    }

    /// Databases created through `CREATE DATABASE`, in order
    pub fn created_databases(&self) -> Vec<String> {
        self.state.lock().created.clone()
    }

    pub fn writes(&self) -> Vec<WriteRequest> {
        self.state.lock().writes.clone()
    }
}

fn unavailable() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "database unavailable" })),
    )
        .into_response()
}

async fn query(State(state): State<Shared>, Query(params): Params) -> Response {
    let mut s = state.lock();
    if s.failing {
        return unavailable();
    }

    let q = params.get("q").map(|q| q.trim()).unwrap_or_default();
    if q.eq_ignore_ascii_case("SHOW DATABASES") {
        let values: Vec<_> = s.databases.iter().map(|name| json!([name])).collect();
        return Json(json!({
            "results": [{
                "statement_id": 0,
                "series": [{ "name": "databases", "columns": ["name"], "values": values }]
            }]
        }))
        .into_response();
    }

    if let Some(name) = parse_create_database(q) {
        log::info!("🗄️ [FAKE] CREATE DATABASE {}", name);
        s.databases.insert(name.clone());
        s.created.push(name);
        return Json(json!({ "results": [{ "statement_id": 0 }] })).into_response();
    }

    Json(json!({
        "results": [{ "statement_id": 0, "error": format!("unsupported query: {q}") }]
    }))
    .into_response()
}

async fn write(State(state): State<Shared>, Query(params): Params, body: String) -> Response {
    let mut s = state.lock();
    if s.failing {
        return unavailable();
    }

    let database = params.get("db").cloned().unwrap_or_default();
    if !s.databases.contains(&database) {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("database not found: \"{database}\"") })),
        )
            .into_response();
    }

    s.writes.push(WriteRequest {
        database,
        precision: params.get("precision").cloned().unwrap_or_else(|| "ns".to_string()),
        username: params.get("u").cloned(),
        body,
    });
    StatusCode::NO_CONTENT.into_response()
}

fn parse_create_database(q: &str) -> Option<String> {
    let rest = q.strip_prefix("CREATE DATABASE")?.trim();
    let name = match rest.strip_prefix('"').and_then(|r| r.strip_suffix('"')) {
        Some(quoted) => quoted.replace("\\\"", "\"").replace("\\\\", "\\"),
        None => rest.to_string(),
    };
    (!name.is_empty()).then_some(name)
}
