use anyhow::Result;
use clap::Parser;

use flowguard_core::config::FlowguardConfig;
use flowguard_daemon::cli::DaemonCli;
use flowguard_daemon::logging;
use flowguard_daemon::orchestrator::Orchestrator;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();

    let mut config = FlowguardConfig::load(&cli.config)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load {}: {}", cli.config.display(), e))?;
    cli.apply_overrides(&mut config);
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

    if cli.validate {
        println!("configuration OK: {}", cli.config.display());
        return Ok(());
    }

    logging::init_tracing(&config.general)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "flowguard-daemon starting"
    );

    let mut orchestrator = Orchestrator::build_from_config(config).await?;
    orchestrator.run().await?;

    tracing::info!("flowguard-daemon shut down");
    Ok(())
}
