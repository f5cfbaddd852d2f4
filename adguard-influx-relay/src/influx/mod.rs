//! InfluxDB 1.x storage client
//!
//! Provides:
//! - [`Record`]: one snapshot stamped with a measurement name and UTC second
//! - [`MetricStore`]: the destination capability (list/create databases, write)
//! - [`InfluxClient`]: the HTTP implementation over `/query` and `/write`

pub mod line_protocol;

use crate::config::{InfluxConfig, Precision};
use crate::metrics::Snapshot;
use chrono::{DateTime, SubsecRound, Utc};
use line_protocol::{FieldValue, LineProtocolWriter};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::{debug, trace};

/// Timestamp layout of a [`Record`]
pub const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

#[derive(Debug, Error)]
pub enum InfluxError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("query error: {0}")]
    Query(String),
    #[error("invalid response: {0}")]
    Decode(#[source] reqwest::Error),
    #[error("record for `{0}` has no fields")]
    EmptyRecord(String),
}

/// One timestamped point ready for storage
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub measurement: String,
    pub time: DateTime<Utc>,
    pub fields: Snapshot,
}

impl Record {
    /// Stamp `fields` with `now`, truncated to the second
    pub fn new(measurement: impl Into<String>, fields: Snapshot, now: DateTime<Utc>) -> Self {
        Self {
            measurement: measurement.into(),
            time: now.trunc_subsecs(0),
            fields,
        }
    }

    /// `YYYY-MM-DDTHH:MM:SSZ`
    pub fn timestamp(&self) -> String {
        self.time.format(TIME_FORMAT).to_string()
    }

    fn timestamp_in(&self, precision: Precision) -> i64 {
        match precision {
            Precision::Seconds => self.time.timestamp(),
            Precision::Milliseconds => self.time.timestamp_millis(),
        }
    }
}

/// Destination capability
#[allow(async_fn_in_trait)]
pub trait MetricStore {
    /// Host the store talks to, for diagnostics
    fn host(&self) -> &str;
    async fn list_databases(&self) -> Result<BTreeSet<String>, InfluxError>;
    async fn create_database(&self, name: &str) -> Result<(), InfluxError>;
    async fn write_points(&self, records: &[Record], precision: Precision) -> Result<(), InfluxError>;
    fn close(self);
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatementResult {
    #[serde(default)]
    series: Vec<Series>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Series {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

/// HTTP client for one InfluxDB 1.x server and database
pub struct InfluxClient {
    client: reqwest::Client,
    base_url: String,
    host: String,
    database: String,
    username: Option<String>,
    password: Option<String>,
}

impl InfluxClient {
    pub fn connect(config: &InfluxConfig) -> Result<Self, InfluxError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .danger_accept_invalid_certs(config.ssl && !config.verify_ssl)
            .build()
            .map_err(InfluxError::Client)?;

        let base_url = config.base_url();
        debug!("Opened InfluxDB client for {}", base_url);

        Ok(Self {
            client,
            base_url,
            host: config.host.clone(),
            database: config.database.clone(),
            username: config.username.clone().filter(|u| !u.is_empty()),
            password: config.password.clone(),
        })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let mut request = self.client.request(method, format!("{}{}", self.base_url, path));
        if let Some(username) = &self.username {
            request = request.query(&[
                ("u", username.as_str()),
                ("p", self.password.as_deref().unwrap_or_default()),
            ]);
        }
        request
    }

    async fn query(&self, method: Method, q: &str) -> Result<QueryResponse, InfluxError> {
        trace!("{} /query q={}", method, q);
        let response = self
            .request(method, "/query")
            .query(&[("q", q)])
            .send()
            .await
            .map_err(InfluxError::Request)?;

        let response = check_status(response).await?;
        let body: QueryResponse = response.json().await.map_err(InfluxError::Decode)?;

        if let Some(error) = body.error {
            return Err(InfluxError::Query(error));
        }
        if let Some(error) = body.results.iter().find_map(|r| r.error.clone()) {
            return Err(InfluxError::Query(error));
        }
        Ok(body)
    }
}

impl MetricStore for InfluxClient {
    fn host(&self) -> &str {
        &self.host
    }

    async fn list_databases(&self) -> Result<BTreeSet<String>, InfluxError> {
        let body = self.query(Method::GET, "SHOW DATABASES").await?;
        let names = body
            .results
            .iter()
            .flat_map(|r| r.series.iter())
            .flat_map(|s| s.values.iter())
            .filter_map(|row| row.first().and_then(|v| v.as_str()).map(str::to_string))
            .collect();
        Ok(names)
    }

    async fn create_database(&self, name: &str) -> Result<(), InfluxError> {
        let statement = format!("CREATE DATABASE {}", quote_ident(name));
        self.query(Method::POST, &statement).await?;
        Ok(())
    }

    async fn write_points(&self, records: &[Record], precision: Precision) -> Result<(), InfluxError> {
        let mut writer = LineProtocolWriter::new();
        for record in records {
            if record.fields.is_empty() {
                return Err(InfluxError::EmptyRecord(record.measurement.clone()));
            }
            let fields: Vec<(&str, FieldValue)> = record
                .fields
                .iter()
                .map(|(k, v)| (k.as_str(), FieldValue::from(v)))
                .collect();
            writer.write_point(&record.measurement, &fields, record.timestamp_in(precision));
        }

        debug!("Writing {} point(s) to {}", writer.len(), self.database);
        let response = self
            .request(Method::POST, "/write")
            .query(&[("db", self.database.as_str()), ("precision", precision.as_str())])
            .body(writer.finish())
            .send()
            .await
            .map_err(InfluxError::Request)?;

        check_status(response).await?;
        Ok(())
    }

    fn close(self) {
        debug!("Closed InfluxDB client for {}", self.base_url);
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, InfluxError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&text)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or(text);
    Err(InfluxError::Status {
        status: status.as_u16(),
        message,
    })
}

/// Quote an identifier for InfluxQL
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('\\', "\\\\").replace('"', "\\\""))
}
