//! # scheme-host
//!
//! Loads every attestation scheme plugin from the configured directory and
//! keeps them running until interrupted.
//!
//! ## Configuration
//!
//! The host reads configuration from `$XDG_CONFIG_HOME/scheme-host/config.toml`.
//!
//! ## Running
//!
//! ```bash
//! cargo run --bin scheme-host
//!
//! # With debug logging
//! RUST_LOG=debug cargo run --bin scheme-host
//! ```

use anyhow::{Context, Result};
use scheme_host::config::Config;
use scheme_plugin_api::{Bootstrapper, PluginRegistry, SchemeLoader};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load_default();

    let log_level = config
        .as_ref()
        .map(|c| c.host.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!("Starting scheme-host v{}", env!("CARGO_PKG_VERSION"));

    let config = match config {
        Ok(cfg) => {
            info!("Loaded configuration from default path");
            cfg
        }
        Err(e) => {
            warn!("Failed to load config, using defaults: {:#}", e);
            Config::default()
        }
    };

    let plugins_dir = config.plugins_dir()?;
    let bootstrapper = Bootstrapper::new(
        Arc::new(PluginRegistry::default()),
        config.bootstrap_options(),
    );
    let mut loader = SchemeLoader::new(bootstrapper);

    let report = loader
        .load_dir(&plugins_dir)
        .await
        .with_context(|| format!("Failed to load plugins from {}", plugins_dir.display()))?;

    info!(
        loaded = report.loaded.len(),
        failed = report.failed.len(),
        "Plugin loading complete"
    );
    for (path, reason) in &report.failed {
        warn!(plugin = %path.display(), "Skipped: {}", reason);
    }
    for name in loader.scheme_names() {
        if let Some(plugin) = loader.by_name(name) {
            info!(
                scheme = name,
                pid = ?plugin.pid(),
                media_types = ?plugin.supported_media_types(),
                "Scheme available"
            );
        }
    }

    info!("Press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down...");
    loader.shutdown_all().await;

    info!("Host stopped");
    Ok(())
}
