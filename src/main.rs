//! Plexus runtime server.
//!
//! Loads configuration, registers the built-in plugins and shared services,
//! boots the plugin runtime and runs until SIGINT or SIGTERM.

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt};

use plexus_core::config::AppConfig;
use plexus_core::error::AppError;
use plexus_plugin::{PluginCatalog, PluginRuntime, ServiceRegistryBuilder};
use plugin_billing_recon::{InMemoryLedger, LEDGER_SERVICE, PLUGIN_NAME, ReconPlugin, ledger_service};

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(name = "plexus-server", version, about = "Plexus plugin runtime")]
struct Args {
    /// Configuration overlay to load on top of `config/default.toml`.
    #[arg(long, env = "PLEXUS_ENV", default_value = "development")]
    env: String,

    /// Override `plugins.directory`.
    #[arg(long)]
    plugin_dir: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match load_configuration(&args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = run(config).await {
        tracing::error!(error = %e, "Runtime error");
        std::process::exit(1);
    }
}

/// Load configuration for the selected environment.
fn load_configuration(args: &Args) -> Result<AppConfig, AppError> {
    let mut config = AppConfig::load(&args.env)?;
    if let Some(dir) = &args.plugin_dir {
        config.plugins.directory = dir.clone();
    }
    Ok(config)
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

async fn run(config: AppConfig) -> Result<(), AppError> {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        namespace = %config.runtime.namespace_root,
        plugin_dir = %config.plugins.directory,
        "Starting Plexus runtime"
    );

    let catalog = PluginCatalog::new();
    catalog.register_fn(PLUGIN_NAME, ReconPlugin::factory);

    let mut services = ServiceRegistryBuilder::new();
    services.register_instance(LEDGER_SERVICE, ledger_service(Arc::new(InMemoryLedger::new())))?;

    let runtime = PluginRuntime::bootstrap(config, catalog, services).await?;

    let report = match runtime.start().await {
        Ok(report) => report,
        Err(e) => {
            runtime.shutdown().await;
            return Err(e);
        }
    };
    tracing::info!(
        loaded = report.loaded.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        "Plugin runtime started"
    );
    if !report.failed.is_empty() {
        tracing::warn!(plugins = ?report.failed, "Some plugins failed to load");
    }

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown...");

    runtime.shutdown().await;
    tracing::info!("Plexus runtime shut down gracefully");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
