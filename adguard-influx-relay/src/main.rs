//! AdGuard InfluxDB Relay - unattended statistics relay
//!
//! Polls an AdGuard Home instance at a fixed interval and stores each
//! snapshot of its statistics as one InfluxDB point:
//! - Configuration re-read every cycle (TOML, `[adguard]` + `[influxdb]`)
//! - Database created on first use
//! - Per-cycle failures are logged and retried, never fatal
//! - Clean shutdown on Ctrl-C / SIGTERM

mod adguard;
mod config;
mod influx;
mod metrics;
mod poller;
mod relay;

#[cfg(test)]
mod testing;

use anyhow::Result;
use config::Config;
use poller::{HttpConnector, Poller};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    info!("AdGuard InfluxDB relay v{} starting...", env!("CARGO_PKG_VERSION"));

    let config_path = Config::path_from_env();
    let config = match Config::load(&config_path).await {
        Ok(config) => config,
        Err(e) => {
            error!("Cannot start with {}: {}", config_path.display(), e);
            return Ok(());
        }
    };
    info!(
        "Relaying {} -> {}/{} every {}s",
        config.adguard.base_url(),
        config.influxdb.base_url(),
        config.influxdb.database,
        config.adguard.interval().as_secs()
    );

    let cancel = CancellationToken::new();
    if let Err(e) = spawn_shutdown_listener(cancel.clone()) {
        // Without a way to stop it cleanly the relay does not start
        error!("Failed to install signal handlers: {:#}", e);
        return Ok(());
    }

    let mut poller = Poller::new(HttpConnector, config_path, config);
    poller.run(&cancel).await;

    info!("Relay terminated ({:?})", poller.state());
    Ok(())
}

/// Cancel `token` on Ctrl-C (and SIGTERM on Unix)
fn spawn_shutdown_listener(token: CancellationToken) -> Result<()> {
    #[cfg(unix)]
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::spawn(async move {
        #[cfg(unix)]
        let signalled = tokio::select! {
            result = tokio::signal::ctrl_c() => result.is_ok(),
            _ = terminate.recv() => true,
        };
        #[cfg(not(unix))]
        let signalled = tokio::signal::ctrl_c().await.is_ok();

        if signalled {
            info!("Shutdown signal received, stopping after the current stage");
            token.cancel();
        } else {
            error!("Failed to listen for shutdown signals");
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_listener_installs_without_cancelling() {
        let token = CancellationToken::new();
        spawn_shutdown_listener(token.clone()).unwrap();
        tokio::task::yield_now().await;
        assert!(!token.is_cancelled());
    }
}
