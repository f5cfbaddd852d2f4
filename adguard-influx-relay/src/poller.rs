//! Poll loop
//!
//! Drives the relay cycle:
//! `LoadingConfig -> ConnectingStorage -> Bootstrapping -> Collecting -> Writing -> Sleeping`
//! until the cancellation token fires, then `Stopped`.
//!
//! - The configuration file is re-read every cycle; a bad edit keeps the last good one
//! - The InfluxDB handle outlives cycles and is reopened only when its settings
//!   change or after a storage failure
//! - Every collection attempt opens its own AdGuard Home session; failed attempts
//!   are retried with exponential backoff, then the cycle is skipped
//! - Cancellation is checked between stages and interrupts every wait

use crate::adguard::{AdGuardError, AdGuardHome, StatsSource};
use crate::config::{AdGuardConfig, Config, InfluxConfig};
use crate::influx::{InfluxClient, InfluxError, MetricStore};
use crate::metrics::{self, Snapshot};
use crate::relay::{self, BootstrapOutcome};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Upper bound for the collection backoff
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Opens the two external capabilities
pub trait Connector {
    type Source: StatsSource;
    type Store: MetricStore;

    fn open_source(&self, config: &AdGuardConfig) -> Result<Self::Source, AdGuardError>;
    fn open_store(&self, config: &InfluxConfig) -> Result<Self::Store, InfluxError>;
}

/// Real HTTP clients
pub struct HttpConnector;

impl Connector for HttpConnector {
    type Source = AdGuardHome;
    type Store = InfluxClient;

    fn open_source(&self, config: &AdGuardConfig) -> Result<AdGuardHome, AdGuardError> {
        AdGuardHome::connect(config)
    }

    fn open_store(&self, config: &InfluxConfig) -> Result<InfluxClient, InfluxError> {
        InfluxClient::connect(config)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    LoadingConfig,
    ConnectingStorage,
    Bootstrapping,
    Collecting,
    Writing,
    Sleeping,
    Stopped,
}

/// How a single cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Written,
    WriteFailed,
    CollectionFailed,
    StorageUnavailable,
    Cancelled,
}

struct OpenStore<S> {
    config: InfluxConfig,
    store: S,
}

pub struct Poller<C: Connector> {
    connector: C,
    config_path: PathBuf,
    config: Config,
    store: Option<OpenStore<C::Store>>,
    state: CycleState,
    cycles: u64,
}

impl<C: Connector> Poller<C> {
    /// `config` is the configuration already validated at startup
    pub fn new(connector: C, config_path: PathBuf, config: Config) -> Self {
        Self {
            connector,
            config_path,
            config,
            store: None,
            state: CycleState::Sleeping,
            cycles: 0,
        }
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    /// Run cycles until `cancel` fires
    pub async fn run(&mut self, cancel: &CancellationToken) {
        info!("Starting poll loop (config: {})", self.config_path.display());

        while !cancel.is_cancelled() {
            let outcome = self.run_cycle(cancel).await;
            debug!("Cycle {} ended: {:?}", self.cycles, outcome);
            if cancel.is_cancelled() {
                break;
            }

            self.transition(CycleState::Sleeping);
            let interval = self.config.adguard.interval();
            if interval.is_zero() {
                tokio::task::yield_now().await;
            } else {
                debug!("Next cycle in {}s", interval.as_secs());
                if !sleep_or_cancel(interval, cancel).await {
                    break;
                }
            }
        }

        self.shutdown();
    }

    /// One full cycle. Storage and collection failures are contained here.
    pub async fn run_cycle(&mut self, cancel: &CancellationToken) -> CycleOutcome {
        self.cycles += 1;

        self.transition(CycleState::LoadingConfig);
        self.reload_config().await;
        let config = self.config.clone();
        if cancel.is_cancelled() {
            return CycleOutcome::Cancelled;
        }

        self.transition(CycleState::ConnectingStorage);
        if !self.ensure_store(&config.influxdb) {
            return CycleOutcome::StorageUnavailable;
        }
        if cancel.is_cancelled() {
            return CycleOutcome::Cancelled;
        }

        self.transition(CycleState::Bootstrapping);
        let mut storage_healthy = match &self.store {
            Some(open) => {
                relay::ensure_database(&open.store, &config.influxdb.database).await
                    != BootstrapOutcome::Failed
            }
            None => false,
        };
        if cancel.is_cancelled() {
            return self.end_cycle(storage_healthy, CycleOutcome::Cancelled);
        }

        self.transition(CycleState::Collecting);
        let Some(raw) = self.collect_with_retry(&config.adguard, cancel).await else {
            let outcome = if cancel.is_cancelled() {
                CycleOutcome::Cancelled
            } else {
                CycleOutcome::CollectionFailed
            };
            return self.end_cycle(storage_healthy, outcome);
        };
        let snapshot = metrics::sanitize(&raw);
        if cancel.is_cancelled() {
            return self.end_cycle(storage_healthy, CycleOutcome::Cancelled);
        }

        self.transition(CycleState::Writing);
        let written = match &self.store {
            Some(open) => {
                relay::write_snapshot(
                    &open.store,
                    &config.influxdb.measurement_name,
                    snapshot,
                    config.influxdb.time_precision,
                )
                .await
            }
            None => false,
        };
        storage_healthy &= written;

        let outcome = if written {
            CycleOutcome::Written
        } else {
            CycleOutcome::WriteFailed
        };
        self.end_cycle(storage_healthy, outcome)
    }

    /// Drop a store that failed this cycle so the next one reconnects
    fn end_cycle(&mut self, storage_healthy: bool, outcome: CycleOutcome) -> CycleOutcome {
        if !storage_healthy {
            self.close_store();
        }
        outcome
    }

    fn transition(&mut self, next: CycleState) {
        debug!("{:?} -> {:?}", self.state, next);
        self.state = next;
    }

    async fn reload_config(&mut self) {
        match Config::load(&self.config_path).await {
            Ok(config) => {
                if config != self.config {
                    info!("Configuration changed, applying new settings");
                    self.config = config;
                }
            }
            Err(e) => warn!(
                "Cannot reload {}: {}; keeping previous configuration",
                self.config_path.display(),
                e
            ),
        }
    }

    /// Reuse the open handle when its settings still match
    fn ensure_store(&mut self, wanted: &InfluxConfig) -> bool {
        if let Some(open) = &self.store {
            if open.config == *wanted {
                return true;
            }
            info!("InfluxDB settings changed, reconnecting");
            self.close_store();
        }

        match self.connector.open_store(wanted) {
            Ok(store) => {
                info!("Connected to InfluxDB at {}", wanted.base_url());
                self.store = Some(OpenStore {
                    config: wanted.clone(),
                    store,
                });
                true
            }
            Err(e) => {
                error!("Cannot connect to InfluxDB at {}: {}", wanted.host, e);
                false
            }
        }
    }

    fn close_store(&mut self) {
        if let Some(open) = self.store.take() {
            open.store.close();
        }
    }

    async fn collect_with_retry(
        &self,
        config: &AdGuardConfig,
        cancel: &CancellationToken,
    ) -> Option<Snapshot> {
        let mut delay = config.retry_delay();

        for attempt in 1..=config.retries {
            match self.collect_once(config).await {
                Ok(snapshot) => {
                    info!("Collected {} statistics from {}", snapshot.len(), config.host);
                    return Some(snapshot);
                }
                Err(e) if attempt < config.retries => {
                    warn!(
                        "Collection attempt {}/{} failed: {}; retrying in {}s",
                        attempt,
                        config.retries,
                        e,
                        delay.as_secs()
                    );
                    if !sleep_or_cancel(delay, cancel).await {
                        return None;
                    }
                    delay = (delay * 2).min(MAX_BACKOFF);
                }
                Err(e) => {
                    error!(
                        "Collection from {} failed after {} attempt(s): {}; skipping this cycle",
                        config.host, config.retries, e
                    );
                }
            }
        }
        None
    }

    /// The session is dropped on every return path
    async fn collect_once(&self, config: &AdGuardConfig) -> Result<Snapshot, AdGuardError> {
        let session = self.connector.open_source(config)?;
        metrics::collect(&session).await
    }

    fn shutdown(&mut self) {
        self.close_store();
        self.transition(CycleState::Stopped);
        info!("Poll loop stopped after {} cycle(s)", self.cycles);
    }
}

/// Wait for `duration`; false when cancelled first
async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
