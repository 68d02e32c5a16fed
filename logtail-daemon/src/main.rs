use anyhow::Result;
use clap::Parser;

use logtail_core::config::LogtailConfig;
use logtail_daemon::cli::DaemonCli;
use logtail_daemon::logging;
use logtail_daemon::runner::Runner;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();

    let mut config = LogtailConfig::load(&cli.config)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load config {}: {}", cli.config.display(), e))?;
    cli.apply_overrides(&mut config);
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

    if cli.validate {
        println!("configuration OK: {}", cli.config.display());
        return Ok(());
    }

    logging::init_tracing(&config.general)?;
    tracing::info!(config = %cli.config.display(), "logtail-daemon starting");

    let mut runner = Runner::build_from_config(config)?;
    runner.run().await?;

    tracing::info!("logtail-daemon shut down");
    Ok(())
}
