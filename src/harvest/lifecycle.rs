//! Harvest lifecycle contract.

use futures_util::future::{BoxFuture, FutureExt};

use crate::config::AgentConfig;

/// Components that react to the periodic harvest cycle.
///
/// Every hook defaults to a no-op. Hooks are awaited sequentially by the
/// [`Harvester`](super::Harvester), so an implementation may rely on all
/// `on_harvest_before` hooks having finished before any `on_harvest` runs.
pub trait HarvestLifecycleAware: Send + Sync {
    /// Harvesting is starting (once, before the first tick).
    fn on_harvest_start(&self) -> BoxFuture<'_, ()> {
        async {}.boxed()
    }

    /// A tick is about to gather data. Flush anything queued.
    fn on_harvest_before(&self) -> BoxFuture<'_, ()> {
        async {}.boxed()
    }

    /// Gather and ship data for this tick.
    fn on_harvest(&self) -> BoxFuture<'_, ()> {
        async {}.boxed()
    }

    /// The tick finished; reset per-cycle state.
    fn on_harvest_complete(&self) -> BoxFuture<'_, ()> {
        async {}.boxed()
    }

    /// Harvesting is stopping. Last chance to flush.
    fn on_harvest_stop(&self) -> BoxFuture<'_, ()> {
        async {}.boxed()
    }

    /// A new configuration was loaded.
    fn on_configuration_changed(&self, _config: &AgentConfig) {}
}
