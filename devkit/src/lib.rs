/*!
# Relay DevKit - Fake services for development and tests

Library used by the relay's tests and for local runs without real services:
- Fake AdGuard Home control API (canned statistics, auth and failure modes)
- Fake InfluxDB 1.x HTTP API (database listing/creation, recorded writes)
- Test harness starting both on loopback ports
*/

pub mod fake_adguard;
pub mod fake_influx;
pub mod test_utils;

pub use fake_adguard::{AdGuardStats, FakeAdGuard};
pub use fake_influx::{FakeInflux, WriteRequest};
pub use test_utils::TestHarness;

use std::net::SocketAddr;

/// Serve `app` on an ephemeral loopback port in a background task
pub(crate) async fn serve(app: axum::Router) -> anyhow::Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            log::error!("❌ [FAKE] server on {} stopped: {}", addr, e);
        }
    });
    Ok(addr)
}
