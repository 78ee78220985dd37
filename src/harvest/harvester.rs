//! Harvest cycle driver.
//!
//! # Responsibilities
//! - Keep the registry of harvest listeners
//! - Fire the lifecycle hooks in order on every tick
//! - Run the periodic tick loop until shutdown

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tokio::time::{self, Instant};

use crate::config::AgentConfig;
use crate::harvest::lifecycle::HarvestLifecycleAware;
use crate::measurement::pool::same_instance;

pub struct Harvester {
    listeners: RwLock<Vec<Arc<dyn HarvestLifecycleAware>>>,
    started: AtomicBool,
    ticks: AtomicU64,
    /// Serializes ticks, start and stop.
    cycle: Mutex<()>,
}

impl Harvester {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            started: AtomicBool::new(false),
            ticks: AtomicU64::new(0),
            cycle: Mutex::new(()),
        }
    }

    /// Register a listener. Registering the same instance twice is a no-op.
    pub fn add_harvest_listener(&self, listener: Arc<dyn HarvestLifecycleAware>) {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        if listeners.iter().any(|l| same_instance(l, &listener)) {
            tracing::debug!("Harvest listener already registered");
            return;
        }
        listeners.push(listener);
    }

    pub fn remove_harvest_listener(&self, listener: &Arc<dyn HarvestLifecycleAware>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|l| !same_instance(l, listener));
    }

    pub fn is_listening<T: ?Sized>(&self, listener: &Arc<T>) -> bool {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|l| same_instance(l, listener))
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Number of completed harvest ticks.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    fn snapshot(&self) -> Vec<Arc<dyn HarvestLifecycleAware>> {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Fire `on_harvest_start` once.
    pub async fn start(&self) {
        let _cycle = self.cycle.lock().await;
        self.start_locked().await;
    }

    async fn start_locked(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!("Harvest starting");
        for listener in self.snapshot() {
            listener.on_harvest_start().await;
        }
    }

    /// Run one harvest tick now, starting the harvest first if needed.
    pub async fn harvest_now(&self) {
        let _cycle = self.cycle.lock().await;
        self.start_locked().await;

        let listeners = self.snapshot();
        for listener in &listeners {
            listener.on_harvest_before().await;
        }
        for listener in &listeners {
            listener.on_harvest().await;
        }
        for listener in &listeners {
            listener.on_harvest_complete().await;
        }

        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(tick, listeners = listeners.len(), "Harvest complete");
    }

    /// Fire `on_harvest_stop` if the harvest was started.
    pub async fn stop(&self) {
        let _cycle = self.cycle.lock().await;
        if !self.started.swap(false, Ordering::AcqRel) {
            return;
        }
        tracing::debug!("Harvest stopping");
        for listener in self.snapshot() {
            listener.on_harvest_stop().await;
        }
    }

    /// Forward a reloaded configuration to every listener.
    pub fn configuration_changed(&self, config: &AgentConfig) {
        for listener in self.snapshot() {
            listener.on_configuration_changed(config);
        }
    }

    /// Tick every `period` until the shutdown signal fires.
    pub async fn run(self: Arc<Self>, period: Duration, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(period_secs = period.as_secs(), "Harvester starting");
        self.start().await;

        let mut ticker = time::interval_at(Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.harvest_now().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Harvester received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

impl Default for Harvester {
    fn default() -> Self {
        Self::new()
    }
}
