//! Startup orchestration: the agent context.
//!
//! # Responsibilities
//! - Validate configuration
//! - Build every subsystem in dependency order and wire harvest listeners
//! - Apply reloaded configuration
//! - Tear everything down in reverse order
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - One context owns all agent state; tests build as many as they need
//! - Harvest listener order is fixed: task queue, metric consumers, remote
//!   logger, log reporter
//! - Log reporting disabled at start is built on the first reload that
//!   enables it; once built it is only toggled, never torn down

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use arc_swap::ArcSwap;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::config::validation::{validate_config, ValidationError};
use crate::config::AgentConfig;
use crate::dispatch::TaskQueue;
use crate::harvest::{HarvestData, Harvester};
use crate::lifecycle::shutdown::Shutdown;
use crate::logging::{LogReportError, LogReporting, Logger};
use crate::measurement::Measurements;
use crate::observability::SupportabilityStats;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid configuration: {}", format_errors(.0))]
    Config(Vec<ValidationError>),

    #[error("log reporting failed to start: {0}")]
    LogReporting(#[from] LogReportError),
}

fn format_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub struct AgentContext {
    config: ArcSwap<AgentConfig>,
    stats: Arc<SupportabilityStats>,
    harvest_data: Arc<HarvestData>,
    measurements: Arc<Measurements>,
    task_queue: Arc<TaskQueue>,
    log_reporting: OnceLock<LogReporting>,
    harvester: Arc<Harvester>,
    shutdown: Shutdown,
}

impl AgentContext {
    /// Build and start every subsystem. Must run inside a tokio runtime.
    pub async fn start(config: AgentConfig) -> Result<Self, StartupError> {
        validate_config(&config).map_err(StartupError::Config)?;

        let shutdown = Shutdown::new();
        let stats = Arc::new(SupportabilityStats::new());
        let harvest_data = Arc::new(HarvestData::new(stats.clone()));

        let measurements = Arc::new(Measurements::new(harvest_data.clone()));
        measurements.set_enabled(config.measurement.enabled);
        measurements.initialize();

        let task_queue = Arc::new(TaskQueue::new(
            measurements.clone(),
            harvest_data.clone(),
            stats.clone(),
            Duration::from_millis(config.task_queue.dequeue_period_ms),
            shutdown.subscribe(),
        ));
        task_queue.start();

        let harvester = Arc::new(Harvester::new());
        harvester.add_harvest_listener(task_queue.clone());
        for listener in measurements.harvest_listeners() {
            harvester.add_harvest_listener(listener);
        }

        let context = Self {
            config: ArcSwap::from_pointee(config),
            stats,
            harvest_data,
            measurements,
            task_queue,
            log_reporting: OnceLock::new(),
            harvester,
            shutdown,
        };
        let config = context.config();
        if config.log_reporting.enabled {
            context.start_log_reporting(&config)?;
        } else {
            tracing::info!("Remote log reporting disabled");
        }

        tracing::info!(
            listeners = context.harvester.listener_count(),
            log_reporting = context.log_reporting.get().is_some(),
            "Agent context started"
        );
        Ok(context)
    }

    /// Build log reporting, start it and join its listeners to the harvest.
    fn start_log_reporting(&self, config: &AgentConfig) -> Result<(), StartupError> {
        let reporting = LogReporting::initialize(config, self.stats.clone())?;
        if self.log_reporting.set(reporting).is_err() {
            return Ok(());
        }
        let Some(reporting) = self.log_reporting.get() else {
            return Ok(());
        };
        reporting.start()?;
        for listener in reporting.harvest_listeners() {
            self.harvester.add_harvest_listener(listener);
        }
        Ok(())
    }

    pub fn config(&self) -> Arc<AgentConfig> {
        self.config.load_full()
    }

    pub fn stats(&self) -> &Arc<SupportabilityStats> {
        &self.stats
    }

    pub fn harvest_data(&self) -> &Arc<HarvestData> {
        &self.harvest_data
    }

    pub fn measurements(&self) -> &Arc<Measurements> {
        &self.measurements
    }

    pub fn task_queue(&self) -> &Arc<TaskQueue> {
        &self.task_queue
    }

    pub fn harvester(&self) -> &Arc<Harvester> {
        &self.harvester
    }

    pub fn log_reporting(&self) -> Option<&LogReporting> {
        self.log_reporting.get()
    }

    /// Remote logger handle; `Uninitialized` when log reporting is off.
    pub fn logger(&self) -> Logger {
        self.log_reporting
            .get()
            .map(LogReporting::logger)
            .unwrap_or_default()
    }

    pub fn shutdown_signal(&self) -> &Shutdown {
        &self.shutdown
    }

    /// Run the periodic harvest until shutdown.
    pub fn spawn_harvester(&self) -> JoinHandle<()> {
        let period = Duration::from_secs(self.config().harvest.period_secs);
        tokio::spawn(self.harvester.clone().run(period, self.shutdown.subscribe()))
    }

    /// Swap in a reloaded configuration and notify harvest listeners.
    /// Invalid configurations are rejected and the current one is kept.
    pub fn reload_config(&self, config: AgentConfig) -> Result<(), StartupError> {
        validate_config(&config).map_err(StartupError::Config)?;
        if config.log_reporting.enabled && self.log_reporting.get().is_none() {
            self.start_log_reporting(&config)?;
            tracing::info!("Remote log reporting enabled by reload");
        }
        self.measurements.set_enabled(config.measurement.enabled);
        self.harvester.configuration_changed(&config);
        self.config.store(Arc::new(config));
        tracing::info!("Configuration reloaded");
        Ok(())
    }

    /// Final harvest, then stop every subsystem in reverse start order.
    pub async fn shutdown(&self) {
        tracing::info!("Agent context shutting down");

        self.harvester.harvest_now().await;
        self.harvester.stop().await;
        self.shutdown.trigger();

        self.task_queue.shutdown().await;
        if let Some(reporting) = self.log_reporting.get() {
            reporting.shutdown().await;
        }
        self.measurements.shutdown();

        let timeout = Duration::from_millis(self.config().log_reporting.shutdown_timeout_ms);
        if !self.shutdown.wait_for_receivers(timeout).await {
            tracing::warn!(
                remaining = self.shutdown.receiver_count(),
                "Background tasks still running after shutdown"
            );
        }
        tracing::info!("Agent context shut down");
    }
}
