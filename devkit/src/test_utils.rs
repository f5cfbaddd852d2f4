/*!
Test Harness for the relay

Starts a fake AdGuard Home and a fake InfluxDB side by side so a whole
collection cycle can run over real HTTP.
*/

use crate::fake_adguard::FakeAdGuard;
use crate::fake_influx::FakeInflux;
use anyhow::Result;

/// Both fake services, ready to receive traffic
pub struct TestHarness {
    pub adguard: FakeAdGuard,
    pub influx: FakeInflux,
}

impl TestHarness {
    /// Start both services
    pub async fn start() -> Result<Self> {
        env_logger::try_init().ok(); // Init logging for tests

        let adguard = FakeAdGuard::start().await?;
        let influx = FakeInflux::start().await?;
        log::info!(
            "🧪 Harness ready (adguard: {}, influx: {})",
            adguard.port(),
            influx.port()
        );

        Ok(Self { adguard, influx })
    }

    /// Print a summary of the traffic both fakes received
    pub fn print_stats(&self) {
        println!("📊 Test Statistics:");
        println!("  AdGuard requests: {}", self.adguard.requests().len());
        println!("  Databases created: {:?}", self.influx.created_databases());
        println!("  Writes: {}", self.influx.writes().len());
    }
}
