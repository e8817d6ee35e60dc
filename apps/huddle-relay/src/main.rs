use anyhow::Result;
use clap::Parser;
use tracing::info;

use huddle_relay::config::{Cli, RelayConfig};
use huddle_relay::server;
use huddle_relay::telemetry::Telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry = Telemetry::init()?;

    let config = RelayConfig::try_from(Cli::parse())?;
    info!(
        listen_addr = %config.listen_addr,
        shutdown_grace_secs = config.shutdown_grace.as_secs(),
        "starting huddle relay"
    );

    server::run(config, Some(telemetry.metrics_handle())).await
}
