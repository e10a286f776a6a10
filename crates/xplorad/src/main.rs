use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use xplorad::coordinator::LogAlertSink;
use xplorad::remote::HttpWatchService;
use xplorad::Config;
use xplorad::Coordinator;
use xplorad::EntityRegistry;
use xplorad::HaversineGeocoder;

/// Smartwatch state synchronization daemon
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "xplorad.toml")]
    config: PathBuf,

    /// Validate the configuration, print the configured watches and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::from_file(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;

    if cli.check {
        println!("{}: ok", cli.config.display());
        for watch in &config.account.watches {
            println!("  {} ({})", watch, config.account.display_name(watch));
        }
        return Ok(());
    }

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| config.logging.env_filter());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("xplorad starting");
    tracing::info!("Loaded config from: {}", cli.config.display());
    tracing::info!(
        "Home at {}, {} (radius {}m)",
        config.home.latitude,
        config.home.longitude,
        config.home.radius_m
    );

    let settings = config.coordinator_settings();
    let service = HttpWatchService::from_config(&config.account, settings.request_timeout)?;
    let coordinator = Coordinator::new(
        settings,
        Arc::new(service),
        Arc::new(HaversineGeocoder),
        Arc::new(LogAlertSink),
    );
    for watch in &config.account.watches {
        coordinator.register(watch.clone());
    }

    let entities = Arc::new(EntityRegistry::build(&coordinator, &config.account).await?);
    coordinator.start()?;

    let mut api = None;
    if let Some(api_config) = config.api.clone() {
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        let handle = tokio::spawn(xplorad::api::serve(
            api_config.listen,
            api_config.port,
            coordinator.clone(),
            entities.clone(),
            shutdown_rx,
        ));
        api = Some((shutdown_tx, handle));
    }

    tracing::info!("Press Ctrl+C to exit");
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received shutdown signal");
        }
        Err(e) => {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
        }
    }

    coordinator.stop();

    if let Some((shutdown_tx, handle)) = api {
        let _ = shutdown_tx.send(());
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("HTTP API server failed: {:#}", e),
            Err(e) => tracing::error!("HTTP API task panicked: {}", e),
        }
    }

    tracing::info!("xplorad shutdown complete");

    Ok(())
}
