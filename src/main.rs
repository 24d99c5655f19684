use anyhow::Result;
use clap::Parser;

use module_registry::cli::{run, Cli};
use module_registry::config::RegistryConfig;
use module_registry::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = RegistryConfig::load()?;
    init_telemetry(
        &config.observability.log_level,
        config.observability.json_logs,
    )?;
    run(cli, config).await
}
