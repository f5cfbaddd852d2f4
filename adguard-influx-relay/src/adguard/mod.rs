//! AdGuard Home control API client
//!
//! Exposes the statistics the relay reads through the [`StatsSource`]
//! trait, and implements it over HTTP with [`AdGuardHome`]. A session is
//! one `AdGuardHome` value; dropping it releases its connection pool.

use crate::config::AdGuardConfig;
use crate::metrics::MetricValue;
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, trace};

const USER_AGENT: &str = concat!("adguard-influx-relay/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum AdGuardError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("request to {endpoint} failed: {source}")]
    Request {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{endpoint} answered with HTTP {status}")]
    Status { endpoint: String, status: u16 },
    #[error("authentication rejected by {endpoint}")]
    Unauthorized { endpoint: String },
    #[error("invalid JSON from {endpoint}: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{endpoint} response has no usable `{field}`")]
    MissingField { endpoint: String, field: String },
}

/// Named read operations of an AdGuard Home instance
#[allow(async_fn_in_trait)]
pub trait StatsSource {
    async fn version(&self) -> Result<String, AdGuardError>;
    /// Statistics retention period, as reported
    async fn period(&self) -> Result<MetricValue, AdGuardError>;
    /// Average processing time per query in milliseconds
    async fn avg_processing_time(&self) -> Result<f64, AdGuardError>;
    async fn dns_queries(&self) -> Result<f64, AdGuardError>;
    async fn blocked_filtering(&self) -> Result<f64, AdGuardError>;
    async fn blocked_percentage(&self) -> Result<f64, AdGuardError>;
    async fn replaced_safebrowsing(&self) -> Result<f64, AdGuardError>;
    async fn replaced_parental(&self) -> Result<f64, AdGuardError>;
    async fn replaced_safesearch(&self) -> Result<f64, AdGuardError>;
    /// Active rules over all enabled lists, allow lists when `allowlist`
    async fn rules_count(&self, allowlist: bool) -> Result<f64, AdGuardError>;
}

/// HTTP session against one AdGuard Home instance
pub struct AdGuardHome {
    client: reqwest::Client,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
}

impl AdGuardHome {
    pub fn connect(config: &AdGuardConfig) -> Result<Self, AdGuardError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(USER_AGENT)
            .danger_accept_invalid_certs(config.tls && !config.verify_ssl)
            .build()
            .map_err(AdGuardError::Client)?;

        let base_url = config.base_url();
        debug!("Opened AdGuard Home session to {}", base_url);

        Ok(Self {
            client,
            base_url,
            username: config.username.clone().filter(|u| !u.is_empty()),
            password: config.password.clone(),
        })
    }

    async fn request(&self, endpoint: &str) -> Result<Value, AdGuardError> {
        let url = format!("{}/{}", self.base_url, endpoint);
        trace!("GET {}", url);

        let mut request = self.client.get(&url).header(ACCEPT, "application/json");
        if let Some(username) = &self.username {
            request = request.basic_auth(username, self.password.as_ref());
        }

        let response = request.send().await.map_err(|source| AdGuardError::Request {
            endpoint: endpoint.to_string(),
            source,
        })?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(AdGuardError::Unauthorized {
                    endpoint: endpoint.to_string(),
                })
            }
            status if !status.is_success() => {
                return Err(AdGuardError::Status {
                    endpoint: endpoint.to_string(),
                    status: status.as_u16(),
                })
            }
            _ => {}
        }

        response.json().await.map_err(|source| AdGuardError::Decode {
            endpoint: endpoint.to_string(),
            source,
        })
    }

    async fn stats_number(&self, field: &str) -> Result<f64, AdGuardError> {
        let stats = self.request("stats").await?;
        number_field(&stats, "stats", field)
    }
}

impl Drop for AdGuardHome {
    fn drop(&mut self) {
        debug!("Closed AdGuard Home session to {}", self.base_url);
    }
}

impl StatsSource for AdGuardHome {
    async fn version(&self) -> Result<String, AdGuardError> {
        let status = self.request("status").await?;
        status
            .get("version")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| missing("status", "version"))
    }

    async fn period(&self) -> Result<MetricValue, AdGuardError> {
        let info = self.request("stats_info").await?;
        info.get("interval")
            .cloned()
            .map(MetricValue::from)
            .ok_or_else(|| missing("stats_info", "interval"))
    }

    async fn avg_processing_time(&self) -> Result<f64, AdGuardError> {
        // Reported in seconds
        let seconds = self.stats_number("avg_processing_time").await?;
        Ok(round2(seconds * 1000.0))
    }

    async fn dns_queries(&self) -> Result<f64, AdGuardError> {
        self.stats_number("num_dns_queries").await
    }

    async fn blocked_filtering(&self) -> Result<f64, AdGuardError> {
        self.stats_number("num_blocked_filtering").await
    }

    async fn blocked_percentage(&self) -> Result<f64, AdGuardError> {
        let stats = self.request("stats").await?;
        let queries = number_field(&stats, "stats", "num_dns_queries")?;
        if queries == 0.0 {
            return Ok(0.0);
        }
        let blocked = number_field(&stats, "stats", "num_blocked_filtering")?;
        Ok(round2(blocked / queries * 100.0))
    }

    async fn replaced_safebrowsing(&self) -> Result<f64, AdGuardError> {
        self.stats_number("num_replaced_safebrowsing").await
    }

    async fn replaced_parental(&self) -> Result<f64, AdGuardError> {
        self.stats_number("num_replaced_parental").await
    }

    async fn replaced_safesearch(&self) -> Result<f64, AdGuardError> {
        self.stats_number("num_replaced_safesearch").await
    }

    async fn rules_count(&self, allowlist: bool) -> Result<f64, AdGuardError> {
        let status = self.request("filtering/status").await?;
        let list = if allowlist { "whitelist_filters" } else { "filters" };

        let total = status
            .get(list)
            .and_then(Value::as_array)
            .map(|filters| {
                filters
                    .iter()
                    .filter_map(|f| f.get("rules_count").and_then(Value::as_f64))
                    .sum::<f64>()
            })
            .unwrap_or(0.0);
        Ok(total)
    }
}

fn number_field(value: &Value, endpoint: &str, field: &str) -> Result<f64, AdGuardError> {
    value
        .get(field)
        .and_then(Value::as_f64)
        .ok_or_else(|| missing(endpoint, field))
}

fn missing(endpoint: &str, field: &str) -> AdGuardError {
    AdGuardError::MissingField {
        endpoint: endpoint.to_string(),
        field: field.to_string(),
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
