//! AdGuard Home statistics snapshot
//!
//! Provides:
//! - The fixed set of metric keys written to InfluxDB
//! - Collection of one snapshot from a [`StatsSource`]
//! - Sanitization of raw values into numbers (or text when not numeric)

use crate::adguard::{AdGuardError, StatsSource};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

pub const VERSION: &str = "version";
pub const STATS_PERIOD: &str = "stats_period";
pub const AVG_PROCESSING_TIME: &str = "avg_processing_time";
pub const DNS_QUERIES: &str = "dns_queries";
pub const BLOCKED_FILTERING: &str = "blocked_filtering";
pub const BLOCKED_PERCENTAGE: &str = "blocked_percentage";
pub const REPLACED_SAFEBROWSING: &str = "replaced_safebrowsing";
pub const REPLACED_PARENTAL: &str = "replaced_parental";
pub const REPLACED_SAFESEARCH: &str = "replaced_safesearch";
pub const RULES_COUNT: &str = "rules_count";

/// Every key a complete snapshot carries, in collection order
pub const METRIC_KEYS: [&str; 10] = [
    VERSION,
    STATS_PERIOD,
    AVG_PROCESSING_TIME,
    DNS_QUERIES,
    BLOCKED_FILTERING,
    BLOCKED_PERCENTAGE,
    REPLACED_SAFEBROWSING,
    REPLACED_PARENTAL,
    REPLACED_SAFESEARCH,
    RULES_COUNT,
];

/// A single metric value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricValue {
    Null,
    Number(f64),
    Text(String),
}

/// Metric name to value, one per cycle
pub type Snapshot = BTreeMap<String, MetricValue>;

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        MetricValue::Number(value)
    }
}

impl From<String> for MetricValue {
    fn from(value: String) -> Self {
        MetricValue::Text(value)
    }
}

impl From<&str> for MetricValue {
    fn from(value: &str) -> Self {
        MetricValue::Text(value.to_string())
    }
}

impl From<serde_json::Value> for MetricValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => MetricValue::Null,
            serde_json::Value::Number(n) => n.as_f64().map_or(MetricValue::Null, MetricValue::Number),
            serde_json::Value::String(s) => MetricValue::Text(s),
            serde_json::Value::Bool(b) => MetricValue::Number(if b { 1.0 } else { 0.0 }),
            other => MetricValue::Text(other.to_string()),
        }
    }
}

/// Read every statistic from an open source session.
///
/// All-or-nothing: the first failing read aborts the whole snapshot.
pub async fn collect<S: StatsSource>(source: &S) -> Result<Snapshot, AdGuardError> {
    debug!("Collecting AdGuard Home statistics...");

    let mut snapshot = Snapshot::new();
    snapshot.insert(VERSION.into(), source.version().await?.into());
    snapshot.insert(STATS_PERIOD.into(), source.period().await?);
    snapshot.insert(AVG_PROCESSING_TIME.into(), source.avg_processing_time().await?.into());
    snapshot.insert(DNS_QUERIES.into(), source.dns_queries().await?.into());
    snapshot.insert(BLOCKED_FILTERING.into(), source.blocked_filtering().await?.into());
    snapshot.insert(BLOCKED_PERCENTAGE.into(), source.blocked_percentage().await?.into());
    snapshot.insert(
        REPLACED_SAFEBROWSING.into(),
        source.replaced_safebrowsing().await?.into(),
    );
    snapshot.insert(REPLACED_PARENTAL.into(), source.replaced_parental().await?.into());
    snapshot.insert(REPLACED_SAFESEARCH.into(), source.replaced_safesearch().await?.into());
    snapshot.insert(RULES_COUNT.into(), source.rules_count(false).await?.into());

    debug!("Collected {}/{} statistics", snapshot.len(), METRIC_KEYS.len());
    Ok(snapshot)
}

/// Coerce every value to a number where possible.
///
/// - `Null`, blank text and non-finite numbers become `0`
/// - text holding a finite float becomes that number
/// - any other text is kept as is
pub fn sanitize(raw: &Snapshot) -> Snapshot {
    raw.iter()
        .map(|(key, value)| (key.clone(), sanitize_value(value)))
        .collect()
}

fn sanitize_value(value: &MetricValue) -> MetricValue {
    match value {
        MetricValue::Null => MetricValue::Number(0.0),
        MetricValue::Number(n) if n.is_finite() => MetricValue::Number(*n),
        MetricValue::Number(_) => MetricValue::Number(0.0),
        MetricValue::Text(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return MetricValue::Number(0.0);
            }
            // InfluxDB rejects NaN and infinities
            match trimmed.parse::<f64>() {
                Ok(n) if n.is_finite() => MetricValue::Number(n),
                _ => MetricValue::Text(text.clone()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeSource;

    fn snapshot(entries: &[(&str, MetricValue)]) -> Snapshot {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_sanitize_coerces_values() {
        let raw = snapshot(&[
            ("null", MetricValue::Null),
            ("numeric_text", "42".into()),
            ("float_text", " 3.5 ".into()),
            ("word", "abc".into()),
            ("number", 7.25.into()),
            ("empty", "".into()),
        ]);

        let clean = sanitize(&raw);
        assert_eq!(clean["null"], MetricValue::Number(0.0));
        assert_eq!(clean["numeric_text"], MetricValue::Number(42.0));
        assert_eq!(clean["float_text"], MetricValue::Number(3.5));
        assert_eq!(clean["word"], MetricValue::Text("abc".to_string()));
        assert_eq!(clean["number"], MetricValue::Number(7.25));
        assert_eq!(clean["empty"], MetricValue::Number(0.0));
    }

    #[test]
    fn test_sanitize_keeps_key_set_and_input() {
        let raw = snapshot(&[
            ("a", MetricValue::Null),
            ("b", "v0.107.43".into()),
            ("c", "12".into()),
        ]);
        let before = raw.clone();

        let clean = sanitize(&raw);
        assert_eq!(raw, before);
        assert!(clean.keys().eq(raw.keys()));
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        let raw = snapshot(&[
            ("a", MetricValue::Null),
            ("b", "v0.107.43".into()),
            ("c", "1e3".into()),
            ("d", 0.5.into()),
        ]);

        let once = sanitize(&raw);
        assert_eq!(sanitize(&once), once);
    }

    #[test]
    fn test_sanitize_keeps_non_finite_text() {
        let clean = sanitize(&snapshot(&[("x", "NaN".into()), ("y", "inf".into())]));
        assert_eq!(clean["x"], MetricValue::Text("NaN".to_string()));
        assert_eq!(clean["y"], MetricValue::Text("inf".to_string()));
    }

    #[test]
    fn test_sanitize_zeroes_overflowed_numbers() {
        let raw = snapshot(&[
            (AVG_PROCESSING_TIME, (1e306_f64 * 1000.0).into()),
            (BLOCKED_PERCENTAGE, f64::NEG_INFINITY.into()),
            (STATS_PERIOD, f64::NAN.into()),
        ]);

        let clean = sanitize(&raw);
        assert!(clean.values().all(|v| *v == MetricValue::Number(0.0)));
        assert_eq!(sanitize(&clean), clean);
    }

    #[test]
    fn test_json_conversion() {
        assert_eq!(MetricValue::from(serde_json::json!(null)), MetricValue::Null);
        assert_eq!(MetricValue::from(serde_json::json!(90)), MetricValue::Number(90.0));
        assert_eq!(
            MetricValue::from(serde_json::json!("24h")),
            MetricValue::Text("24h".to_string())
        );
    }

    #[tokio::test]
    async fn test_collect_reads_all_ten_statistics() {
        let source = FakeSource::canned();
        let snapshot = collect(&source).await.unwrap();

        assert_eq!(snapshot.len(), METRIC_KEYS.len());
        for key in METRIC_KEYS {
            assert!(snapshot.contains_key(key), "missing {key}");
        }
        assert_eq!(snapshot[VERSION], MetricValue::Text("v0.107.43".to_string()));
        assert_eq!(snapshot[DNS_QUERIES], MetricValue::Number(1200.0));
        assert_eq!(snapshot[RULES_COUNT], MetricValue::Number(51234.0));
    }

    #[tokio::test]
    async fn test_collect_is_all_or_nothing() {
        let source = FakeSource::canned().failing_at(BLOCKED_PERCENTAGE);
        let err = collect(&source).await.unwrap_err();
        assert!(matches!(err, AdGuardError::Status { .. }));
    }
}
