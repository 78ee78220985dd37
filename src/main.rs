//! Telemetry agent (v1)
//!
//! Runs the measurement engine, the task queue and remote log reporting
//! inside one process and harvests them on a fixed period.
//!
//! # Architecture Overview
//!
//! ```text
//!   instrumentation ──▶ TaskQueue ──▶ Measurements ──▶ consumers ──▶ HarvestData
//!          │                         (engine + pools)
//!          │
//!          └─────────▶ Logger ──▶ RemoteLogger ──▶ LogReporter ──▶ LogForwarder ──▶ collector
//!                                 (writer pool)    (file store)     (POST /mobile/logs)
//!
//!   Harvester (every harvest.period_secs): drain queue → harvest → upload logs
//!   Cross-cutting: config (TOML + hot reload), observability, lifecycle
//! ```
//!
//! Usage: `telemetry-agent [config.toml]`. Without a path the defaults are used.

use std::path::PathBuf;

use telemetry_agent::config::watcher::ConfigWatcher;
use telemetry_agent::config::{load_config, AgentConfig};
use telemetry_agent::lifecycle::{wait_for_signal, AgentContext};
use telemetry_agent::observability::{init_tracing, metrics::init_metrics};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = match &config_path {
        Some(path) => load_config(path)?,
        None => AgentConfig::default(),
    };

    init_tracing(&config.observability);
    tracing::info!("telemetry-agent v{} starting", env!("CARGO_PKG_VERSION"));

    tracing::info!(
        config = ?config_path,
        harvest_period_secs = config.harvest.period_secs,
        log_reporting = config.log_reporting.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let context = AgentContext::start(config).await?;
    let harvest_task = context.spawn_harvester();

    // The watcher stops when dropped, so it lives as long as main.
    let (_watcher, mut config_updates) = match &config_path {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            match watcher.run() {
                Ok(handle) => (Some(handle), Some(updates)),
                Err(e) => {
                    tracing::warn!(error = %e, "Config hot reload unavailable");
                    (None, None)
                }
            }
        }
        None => (None, None),
    };

    let signal = wait_for_signal();
    tokio::pin!(signal);
    let signal = loop {
        tokio::select! {
            signal = &mut signal => break signal,
            new_config = next_config(config_updates.as_mut()) => {
                if let Err(e) = context.reload_config(new_config) {
                    tracing::error!(error = %e, "Rejected reloaded configuration");
                }
            }
        }
    };
    tracing::info!(signal = %signal, "Stopping agent");

    context.shutdown().await;
    if let Err(e) = harvest_task.await {
        tracing::warn!(error = %e, "Harvest task ended abnormally");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Next reloaded configuration; never resolves when hot reload is off.
async fn next_config(updates: Option<&mut mpsc::UnboundedReceiver<AgentConfig>>) -> AgentConfig {
    if let Some(updates) = updates {
        if let Some(config) = updates.recv().await {
            return config;
        }
    }
    std::future::pending().await
}
