//! In-memory capability fakes shared by unit tests

use crate::adguard::{AdGuardError, StatsSource};
use crate::config::{AdGuardConfig, InfluxConfig, Precision};
use crate::influx::{InfluxError, MetricStore, Record};
use crate::metrics::{self, MetricValue};
use crate::poller::Connector;
use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Source returning fixed values, optionally failing on one read
#[derive(Clone, Default)]
pub struct FakeSource {
    failing_at: Option<&'static str>,
}

impl FakeSource {
    pub fn canned() -> Self {
        Self::default()
    }

    pub fn failing_at(mut self, key: &'static str) -> Self {
        self.failing_at = Some(key);
        self
    }

    fn read(&self, key: &'static str) -> Result<(), AdGuardError> {
        if self.failing_at == Some(key) {
            return Err(AdGuardError::Status {
                endpoint: key.to_string(),
                status: 503,
            });
        }
        Ok(())
    }
}

impl StatsSource for FakeSource {
    async fn version(&self) -> Result<String, AdGuardError> {
        self.read(metrics::VERSION)?;
        Ok("v0.107.43".to_string())
    }

    async fn period(&self) -> Result<MetricValue, AdGuardError> {
        self.read(metrics::STATS_PERIOD)?;
        Ok(MetricValue::Text("90".to_string()))
    }

    async fn avg_processing_time(&self) -> Result<f64, AdGuardError> {
        self.read(metrics::AVG_PROCESSING_TIME)?;
        Ok(4.2)
    }

    async fn dns_queries(&self) -> Result<f64, AdGuardError> {
        self.read(metrics::DNS_QUERIES)?;
        Ok(1200.0)
    }

    async fn blocked_filtering(&self) -> Result<f64, AdGuardError> {
        self.read(metrics::BLOCKED_FILTERING)?;
        Ok(300.0)
    }

    async fn blocked_percentage(&self) -> Result<f64, AdGuardError> {
        self.read(metrics::BLOCKED_PERCENTAGE)?;
        Ok(25.0)
    }

    async fn replaced_safebrowsing(&self) -> Result<f64, AdGuardError> {
        self.read(metrics::REPLACED_SAFEBROWSING)?;
        Ok(7.0)
    }

    async fn replaced_parental(&self) -> Result<f64, AdGuardError> {
        self.read(metrics::REPLACED_PARENTAL)?;
        Ok(0.0)
    }

    async fn replaced_safesearch(&self) -> Result<f64, AdGuardError> {
        self.read(metrics::REPLACED_SAFESEARCH)?;
        Ok(3.0)
    }

    async fn rules_count(&self, _allowlist: bool) -> Result<f64, AdGuardError> {
        self.read(metrics::RULES_COUNT)?;
        Ok(51234.0)
    }
}

#[derive(Default)]
struct StoreState {
    databases: BTreeSet<String>,
    created: Vec<String>,
    written: Vec<(Record, Precision)>,
    write_times: Vec<tokio::time::Instant>,
    closed: usize,
}

/// Store recording every call; clones share state
#[derive(Clone, Default)]
pub struct FakeStore {
    state: Arc<Mutex<StoreState>>,
    fail_list: Arc<AtomicBool>,
    fail_create: Arc<AtomicBool>,
    fail_write: Arc<AtomicBool>,
}

impl FakeStore {
    pub fn with_databases(names: &[&str]) -> Self {
        let store = Self::default();
        store.state.lock().unwrap().databases = names.iter().map(|n| n.to_string()).collect();
        store
    }

    pub fn fail_list(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn fail_write(&self, fail: bool) {
        self.fail_write.store(fail, Ordering::SeqCst);
    }

    pub fn created(&self) -> Vec<String> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn written(&self) -> Vec<(Record, Precision)> {
        self.state.lock().unwrap().written.clone()
    }

    pub fn write_times(&self) -> Vec<tokio::time::Instant> {
        self.state.lock().unwrap().write_times.clone()
    }

    pub fn closed(&self) -> usize {
        self.state.lock().unwrap().closed
    }

    fn unavailable() -> InfluxError {
        InfluxError::Status {
            status: 503,
            message: "unavailable".to_string(),
        }
    }
}

impl MetricStore for FakeStore {
    fn host(&self) -> &str {
        "fake-influx"
    }

    async fn list_databases(&self) -> Result<BTreeSet<String>, InfluxError> {
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        Ok(self.state.lock().unwrap().databases.clone())
    }

    async fn create_database(&self, name: &str) -> Result<(), InfluxError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        let mut state = self.state.lock().unwrap();
        state.created.push(name.to_string());
        state.databases.insert(name.to_string());
        Ok(())
    }

    async fn write_points(&self, records: &[Record], precision: Precision) -> Result<(), InfluxError> {
        if self.fail_write.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        let mut state = self.state.lock().unwrap();
        for record in records {
            state.written.push((record.clone(), precision));
            state.write_times.push(tokio::time::Instant::now());
        }
        Ok(())
    }

    fn close(self) {
        self.state.lock().unwrap().closed += 1;
    }
}

/// Connector handing out fakes and counting connections
#[derive(Clone, Default)]
pub struct FakeConnector {
    pub store: FakeStore,
    /// Per-attempt source behavior, consumed front to back; empty means canned
    sources: Arc<Mutex<VecDeque<FakeSource>>>,
    pub sources_opened: Arc<AtomicUsize>,
    pub stores_opened: Arc<AtomicUsize>,
}

impl FakeConnector {
    pub fn new(store: FakeStore) -> Self {
        Self {
            store,
            ..Self::default()
        }
    }

    pub fn queue_source(&self, source: FakeSource) {
        self.sources.lock().unwrap().push_back(source);
    }

    pub fn sources_opened(&self) -> usize {
        self.sources_opened.load(Ordering::SeqCst)
    }

    pub fn stores_opened(&self) -> usize {
        self.stores_opened.load(Ordering::SeqCst)
    }
}

impl Connector for FakeConnector {
    type Source = FakeSource;
    type Store = FakeStore;

    fn open_source(&self, _config: &AdGuardConfig) -> Result<FakeSource, AdGuardError> {
        self.sources_opened.fetch_add(1, Ordering::SeqCst);
        Ok(self.sources.lock().unwrap().pop_front().unwrap_or_default())
    }

    fn open_store(&self, _config: &InfluxConfig) -> Result<FakeStore, InfluxError> {
        self.stores_opened.fetch_add(1, Ordering::SeqCst);
        Ok(self.store.clone())
    }
}
