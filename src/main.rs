use clap::Parser;
use grid_meter_bridge::{logging, BridgeConfig, GridMeterBridge};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let config = BridgeConfig::parse();
    logging::init();

    tracing::info!("Starting grid meter bridge");
    // Runs until the MQTT connection drops; every way out is a failure.
    if let Err(e) = run(&config).await {
        tracing::error!("{e:#}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

async fn run(config: &BridgeConfig) -> anyhow::Result<()> {
    let bridge = GridMeterBridge::start(config).await?;
    bridge.run().await
}
