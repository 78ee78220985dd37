//! Measurement engine: the root pool plus one child pool per activity.
//!
//! # Responsibilities
//! - Own the root pool all producers and consumers register with
//! - Start, rename and end named activities
//! - Attach new activity pools off the calling thread
//!
//! # Design Decisions
//! - `start_activity` returns immediately; attachment completes later and
//!   is observable through [`MeasuredActivity::wait_attached`]
//! - Attach and end serialize on the activity, so an activity ended before
//!   its attach task runs is never attached
//! - A broadcast racing with `end_activity` may or may not reach the ended
//!   activity's pool (best effort for the final flush)

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::runtime::Handle;

use crate::measurement::activity::MeasuredActivity;
use crate::measurement::pool::{MeasurementConsumer, MeasurementPool, MeasurementProducer};
use crate::measurement::types::{MeasurementError, MeasurementResult};

pub struct MeasurementEngine {
    root: Arc<MeasurementPool>,
    activities: DashMap<String, Arc<MeasuredActivity>>,
    runtime: Option<Handle>,
}

impl MeasurementEngine {
    /// Create an engine. Inside a tokio runtime, attach tasks run on its
    /// blocking pool; otherwise on a short-lived thread.
    pub fn new() -> Self {
        Self {
            root: Arc::new(MeasurementPool::new()),
            activities: DashMap::new(),
            runtime: Handle::try_current().ok(),
        }
    }

    pub fn root_pool(&self) -> &Arc<MeasurementPool> {
        &self.root
    }

    /// Start a named activity.
    ///
    /// Fails with [`MeasurementError::DuplicateActivity`] if an activity with
    /// this name is running.
    pub fn start_activity(
        &self,
        name: &str,
        auto_instrumented: bool,
    ) -> MeasurementResult<Arc<MeasuredActivity>> {
        let activity = match self.activities.entry(name.to_string()) {
            Entry::Occupied(_) => {
                return Err(MeasurementError::DuplicateActivity(name.to_string()))
            }
            Entry::Vacant(slot) => {
                let activity = Arc::new(MeasuredActivity::new(name, auto_instrumented));
                slot.insert(activity.clone());
                activity
            }
        };

        self.attach_in_background(activity.clone());
        tracing::debug!(activity = %name, "Activity started");
        Ok(activity)
    }

    fn attach_in_background(&self, activity: Arc<MeasuredActivity>) {
        let root = self.root.clone();
        let attach = move || activity.attach_to(&root);

        match &self.runtime {
            Some(handle) => {
                handle.spawn_blocking(attach);
            }
            None => {
                if let Err(e) = std::thread::Builder::new()
                    .name("measurement-engine".into())
                    .spawn(attach)
                {
                    tracing::warn!(error = %e, "Failed to spawn activity attach thread");
                }
            }
        }
    }

    /// Rename a running activity.
    pub fn rename_activity(&self, old_name: &str, new_name: &str) -> MeasurementResult<()> {
        if self.activities.contains_key(new_name) {
            return Err(MeasurementError::DuplicateActivity(new_name.to_string()));
        }
        let (_, activity) = self
            .activities
            .remove(old_name)
            .ok_or_else(|| MeasurementError::ActivityNotStarted(old_name.to_string()))?;

        match self.activities.entry(new_name.to_string()) {
            Entry::Vacant(slot) => {
                activity.set_name(new_name);
                slot.insert(activity);
                Ok(())
            }
            Entry::Occupied(_) => {
                self.restore(old_name, activity);
                Err(MeasurementError::DuplicateActivity(new_name.to_string()))
            }
        }
    }

    /// Put back an activity whose rename lost a race. If its old name was
    /// taken in the meantime it can no longer be ended by name, so it is
    /// ended here and its pool leaves the root.
    fn restore(&self, name: &str, activity: Arc<MeasuredActivity>) {
        match self.activities.entry(name.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(activity);
            }
            Entry::Occupied(_) => {
                tracing::warn!(activity = %name, "Activity replaced during rename, ending it");
                if let Err(e) = activity.finish(&self.root) {
                    tracing::debug!(activity = %name, error = %e, "Replaced activity already ended");
                }
            }
        }
    }

    /// End the activity registered under `name`.
    pub fn end_activity(&self, name: &str) -> MeasurementResult<Arc<MeasuredActivity>> {
        let (_, activity) = self
            .activities
            .remove(name)
            .ok_or_else(|| MeasurementError::ActivityNotStarted(name.to_string()))?;
        activity.finish(&self.root)?;
        tracing::debug!(activity = %name, "Activity ended");
        Ok(activity)
    }

    /// End a specific activity instance.
    pub fn end_measured_activity(&self, activity: &Arc<MeasuredActivity>) -> MeasurementResult<()> {
        self.activities
            .remove_if(&activity.name(), |_, registered| Arc::ptr_eq(registered, activity));
        activity.finish(&self.root)
    }

    pub fn activity(&self, name: &str) -> Option<Arc<MeasuredActivity>> {
        self.activities.get(name).map(|a| a.clone())
    }

    pub fn activity_count(&self) -> usize {
        self.activities.len()
    }

    /// End every running activity, detaching its pool from the root.
    pub fn clear(&self) {
        let running: Vec<Arc<MeasuredActivity>> =
            self.activities.iter().map(|a| a.value().clone()).collect();
        self.activities.clear();
        for activity in running {
            if let Err(e) = activity.finish(&self.root) {
                tracing::debug!(error = %e, "Activity already ended");
            }
        }
    }

    pub fn add_measurement_producer(&self, producer: Arc<dyn MeasurementProducer>) {
        self.root.add_measurement_producer(producer);
    }

    pub fn remove_measurement_producer(&self, producer: &Arc<dyn MeasurementProducer>) {
        self.root.remove_measurement_producer(producer);
    }

    pub fn add_measurement_consumer(&self, consumer: Arc<dyn MeasurementConsumer>) {
        self.root.add_measurement_consumer(consumer);
    }

    pub fn remove_measurement_consumer(&self, consumer: &Arc<dyn MeasurementConsumer>) {
        self.root.remove_measurement_consumer(consumer);
    }

    /// Broadcast the root pool. May block on registry lock contention.
    pub fn broadcast_measurements(&self) -> usize {
        self.root.broadcast_measurements()
    }
}

impl Default for MeasurementEngine {
    fn default() -> Self {
        Self::new()
    }
}
