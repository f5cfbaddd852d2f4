//! Storage-side steps of a cycle
//!
//! Both steps contain their own failures: a storage outage is logged and
//! reported through the returned outcome, never raised.

use crate::config::Precision;
use crate::influx::{MetricStore, Record};
use crate::metrics::Snapshot;
use chrono::Utc;
use tracing::{error, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    Exists,
    Created,
    Failed,
}

/// Make sure `database` exists, creating it when missing.
pub async fn ensure_database<S: MetricStore>(store: &S, database: &str) -> BootstrapOutcome {
    let databases = match store.list_databases().await {
        Ok(databases) => databases,
        Err(e) => {
            error!("Cannot list databases on {}: {}", store.host(), e);
            return BootstrapOutcome::Failed;
        }
    };

    if databases.contains(database) {
        info!("Database {} found", database);
        return BootstrapOutcome::Exists;
    }

    warn!("Database {} not found on {}, creating it", database, store.host());
    match store.create_database(database).await {
        Ok(()) => {
            info!("Database {} created", database);
            BootstrapOutcome::Created
        }
        Err(e) => {
            error!("Cannot create database {} on {}: {}", database, store.host(), e);
            BootstrapOutcome::Failed
        }
    }
}

/// Wrap `snapshot` into a record stamped now and write it once.
///
/// Returns whether the write was accepted.
pub async fn write_snapshot<S: MetricStore>(
    store: &S,
    measurement: &str,
    snapshot: Snapshot,
    precision: Precision,
) -> bool {
    let record = Record::new(measurement, snapshot, Utc::now());
    let timestamp = record.timestamp();
    trace!("Record: {}", serde_json::to_string(&record).unwrap_or_default());

    match store.write_points(std::slice::from_ref(&record), precision).await {
        Ok(()) => {
            info!("Wrote {} statistics to {} at {}", record.fields.len(), measurement, timestamp);
            true
        }
        Err(e) => {
            error!("Failed to write to InfluxDB at {}: {}", store.host(), e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::influx::TIME_FORMAT;
    use crate::metrics::MetricValue;
    use crate::testing::FakeStore;
    use chrono::NaiveDateTime;

    #[tokio::test]
    async fn test_existing_database_not_created() {
        let store = FakeStore::with_databases(&["adguard"]);
        assert_eq!(ensure_database(&store, "adguard").await, BootstrapOutcome::Exists);
        assert!(store.created().is_empty());
    }

    #[tokio::test]
    async fn test_missing_database_created_once() {
        let store = FakeStore::with_databases(&["_internal"]);
        assert_eq!(ensure_database(&store, "adguard").await, BootstrapOutcome::Created);
        assert_eq!(store.created(), vec!["adguard".to_string()]);
    }

    #[tokio::test]
    async fn test_list_failure_skips_creation() {
        let store = FakeStore::default();
        store.fail_list(true);
        assert_eq!(ensure_database(&store, "adguard").await, BootstrapOutcome::Failed);
        assert!(store.created().is_empty());
    }

    #[tokio::test]
    async fn test_create_failure_contained() {
        let store = FakeStore::default();
        store.fail_create(true);
        assert_eq!(ensure_database(&store, "adguard").await, BootstrapOutcome::Failed);
    }

    #[tokio::test]
    async fn test_write_wraps_snapshot() {
        let store = FakeStore::default();
        let snapshot: Snapshot = [
            ("a".to_string(), MetricValue::Number(1.0)),
            ("b".to_string(), MetricValue::Text("x".to_string())),
        ]
        .into_iter()
        .collect();

        assert!(write_snapshot(&store, "stats", snapshot.clone(), Precision::Milliseconds).await);

        let written = store.written();
        assert_eq!(written.len(), 1);
        let (record, precision) = &written[0];
        assert_eq!(record.measurement, "stats");
        assert_eq!(record.fields, snapshot);
        assert_eq!(*precision, Precision::Milliseconds);

        let timestamp = record.timestamp();
        assert_eq!(timestamp.len(), 20);
        assert!(timestamp.ends_with('Z'));
        assert!(NaiveDateTime::parse_from_str(&timestamp, TIME_FORMAT).is_ok());
    }

    #[tokio::test]
    async fn test_write_failure_contained() {
        let store = FakeStore::default();
        store.fail_write(true);
        let snapshot: Snapshot = [("a".to_string(), MetricValue::Number(1.0))]
            .into_iter()
            .collect();

        assert!(!write_snapshot(&store, "stats", snapshot, Precision::Milliseconds).await);
    }
}
