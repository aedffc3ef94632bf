//! Botfleet control service binary.
//!
//! Runs the HTTP API and worker pool that deploy and tear down bots.

use tracing::info;
use tracing_subscriber::EnvFilter;

use botfleet_control::{ControlConfig, ControlService};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("botfleet_control=info".parse()?),
        )
        .init();

    info!("botfleet control service starting");

    let config = ControlConfig::load()?;

    info!(
        listen_addr = %config.server.listen,
        provider = ?config.cloud.provider,
        region = %config.cloud.region,
        workers = config.worker.count,
        "configuration loaded"
    );

    ControlService::new(config).run().await?;

    Ok(())
}
