//! The `Measurements` facade: typed producers and consumers wired into one
//! engine, plus the production API instrumentation calls.
//!
//! # Responsibilities
//! - Register the built-in producers and consumers on initialize
//! - Convert production calls into measurements and broadcast them
//! - Suspend per-call broadcasting while the task queue drains
//!
//! # Design Decisions
//! - Production calls never fail; misuse calls (activities) return errors
//! - One facade per agent context; nothing here is process-global

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::harvest::{HarvestLifecycleAware, HarvestSink};
use crate::measurement::activity::MeasuredActivity;
use crate::measurement::consumer::{HttpTransactionHarvester, MetricMeasurementConsumer};
use crate::measurement::engine::MeasurementEngine;
use crate::measurement::pool::{MeasurementConsumer, MeasurementProducer};
use crate::measurement::producer::{
    ActivityMeasurementProducer, CustomMetricProducer, MethodMeasurementProducer,
    NetworkMeasurementProducer,
};
use crate::measurement::types::{
    HttpTransaction, Measurement, MeasurementError, MeasurementResult, MetricUnit, Trace,
};

pub struct Measurements {
    engine: MeasurementEngine,

    network_producer: Arc<NetworkMeasurementProducer>,
    activity_producer: Arc<ActivityMeasurementProducer>,
    method_producer: Arc<MethodMeasurementProducer>,
    custom_producer: Arc<CustomMetricProducer>,

    http_transaction_harvester: Arc<HttpTransactionHarvester>,
    activity_consumer: Arc<MetricMeasurementConsumer>,
    method_consumer: Arc<MetricMeasurementConsumer>,
    summary_consumer: Arc<MetricMeasurementConsumer>,
    custom_consumer: Arc<MetricMeasurementConsumer>,

    broadcast_new_measurements: AtomicBool,
    enabled: AtomicBool,
}

impl Measurements {
    /// Build the facade. Consumers deliver harvested data to `sink`.
    pub fn new(sink: Arc<dyn HarvestSink>) -> Self {
        Self {
            engine: MeasurementEngine::new(),
            network_producer: Arc::new(NetworkMeasurementProducer::new()),
            activity_producer: Arc::new(ActivityMeasurementProducer::new()),
            method_producer: Arc::new(MethodMeasurementProducer::new()),
            custom_producer: Arc::new(CustomMetricProducer::new()),
            http_transaction_harvester: Arc::new(HttpTransactionHarvester::new(sink.clone())),
            activity_consumer: Arc::new(MetricMeasurementConsumer::activity(sink.clone())),
            method_consumer: Arc::new(MetricMeasurementConsumer::method(sink.clone())),
            summary_consumer: Arc::new(MetricMeasurementConsumer::summary(sink.clone())),
            custom_consumer: Arc::new(MetricMeasurementConsumer::custom(sink)),
            broadcast_new_measurements: AtomicBool::new(true),
            enabled: AtomicBool::new(true),
        }
    }

    fn producers(&self) -> [Arc<dyn MeasurementProducer>; 4] {
        [
            self.network_producer.clone(),
            self.activity_producer.clone(),
            self.method_producer.clone(),
            self.custom_producer.clone(),
        ]
    }

    fn consumers(&self) -> [Arc<dyn MeasurementConsumer>; 5] {
        [
            self.http_transaction_harvester.clone(),
            self.activity_consumer.clone(),
            self.method_consumer.clone(),
            self.summary_consumer.clone(),
            self.custom_consumer.clone(),
        ]
    }

    /// Consumers that take part in the harvest cycle.
    pub fn harvest_listeners(&self) -> Vec<Arc<dyn HarvestLifecycleAware>> {
        vec![
            self.activity_consumer.clone(),
            self.method_consumer.clone(),
            self.summary_consumer.clone(),
            self.custom_consumer.clone(),
        ]
    }

    /// Register the built-in producers and consumers.
    pub fn initialize(&self) {
        for producer in self.producers() {
            self.engine.add_measurement_producer(producer);
        }
        for consumer in self.consumers() {
            self.engine.add_measurement_consumer(consumer);
        }
        tracing::info!("Measurement engine initialized");
    }

    /// End running activities and unregister everything.
    pub fn shutdown(&self) {
        self.engine.clear();
        for producer in self.producers() {
            producer.drain_measurements();
            self.engine.remove_measurement_producer(&producer);
        }
        for consumer in self.consumers() {
            self.engine.remove_measurement_consumer(&consumer);
        }
        tracing::info!("Measurement engine shut down");
    }

    pub fn engine(&self) -> &MeasurementEngine {
        &self.engine
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_broadcast_new_measurements(&self, broadcast: bool) {
        self.broadcast_new_measurements
            .store(broadcast, Ordering::Release);
    }

    pub fn broadcast_new_measurements(&self) -> bool {
        self.broadcast_new_measurements.load(Ordering::Acquire)
    }

    fn new_measurement_broadcast(&self) {
        if self.broadcast_new_measurements() {
            self.broadcast();
        }
    }

    /// Broadcast now. May block on registry lock contention.
    pub fn broadcast(&self) -> usize {
        self.engine.broadcast_measurements()
    }

    /// Process everything pending; alias of [`broadcast`](Self::broadcast).
    pub fn process(&self) -> usize {
        self.broadcast()
    }

    /// Hand an externally built measurement to the engine.
    pub fn produce_measurement(&self, measurement: Measurement) {
        if !self.is_enabled() {
            return;
        }
        self.engine.root_pool().produce_measurement(measurement);
        self.new_measurement_broadcast();
    }

    pub fn add_http_transaction(&self, transaction: HttpTransaction) {
        if !self.is_enabled() {
            return;
        }
        self.network_producer.produce_transaction(transaction, None);
        self.new_measurement_broadcast();
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_custom_metric(
        &self,
        name: &str,
        category: &str,
        count: u64,
        total_value: f64,
        exclusive_value: f64,
        count_unit: Option<MetricUnit>,
        value_unit: Option<MetricUnit>,
    ) {
        if !self.is_enabled() {
            return;
        }
        self.custom_producer.produce_metric(
            name,
            category,
            count,
            total_value,
            exclusive_value,
            count_unit,
            value_unit,
        );
        self.new_measurement_broadcast();
    }

    pub fn add_traced_method(&self, trace: &Trace) {
        if !self.is_enabled() {
            return;
        }
        self.method_producer.produce_trace(trace);
        self.new_measurement_broadcast();
    }

    pub fn start_activity(&self, name: &str) -> MeasurementResult<Arc<MeasuredActivity>> {
        if !self.is_enabled() {
            return Err(MeasurementError::Disabled);
        }
        self.engine.start_activity(name, false)
    }

    pub fn rename_activity(&self, old_name: &str, new_name: &str) -> MeasurementResult<()> {
        self.engine.rename_activity(old_name, new_name)
    }

    /// End the named activity and produce its activity measurement.
    pub fn end_activity(&self, name: &str) -> MeasurementResult<Arc<MeasuredActivity>> {
        if !self.is_enabled() {
            return Err(MeasurementError::Disabled);
        }
        let activity = self.engine.end_activity(name)?;
        self.produce_activity(&activity);
        Ok(activity)
    }

    /// End a specific activity and produce its activity measurement.
    pub fn end_measured_activity(&self, activity: &Arc<MeasuredActivity>) -> MeasurementResult<()> {
        if !self.is_enabled() {
            return Err(MeasurementError::Disabled);
        }
        self.engine.end_measured_activity(activity)?;
        self.produce_activity(activity);
        Ok(())
    }

    pub fn end_activity_without_measurement(
        &self,
        activity: &Arc<MeasuredActivity>,
    ) -> MeasurementResult<()> {
        if !self.is_enabled() {
            return Err(MeasurementError::Disabled);
        }
        self.engine.end_measured_activity(activity)
    }

    fn produce_activity(&self, activity: &MeasuredActivity) {
        self.activity_producer.produce_activity(
            &activity.name(),
            activity.start_time(),
            activity.end_time(),
            activity.start_thread().clone(),
            activity.is_auto_instrumented(),
        );
        self.new_measurement_broadcast();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::HarvestData;
    use crate::observability::SupportabilityStats;

    fn facade() -> (Measurements, Arc<HarvestData>) {
        let data = Arc::new(HarvestData::new(Arc::new(SupportabilityStats::new())));
        let measurements = Measurements::new(data.clone());
        measurements.initialize();
        (measurements, data)
    }

    #[tokio::test]
    async fn test_traced_method_becomes_metric() {
        let (measurements, data) = facade();
        measurements.add_traced_method(&Trace::new("doWork", 1_000, 1_250));

        for listener in measurements.harvest_listeners() {
            listener.on_harvest().await;
        }
        let metric = data.metric("Method/doWork", None).unwrap();
        assert_eq!(metric.count, 1);
        assert_eq!(metric.total, 0.25);
    }

    #[test]
    fn test_suspended_broadcast_defers_delivery() {
        let (measurements, data) = facade();
        measurements.set_broadcast_new_measurements(false);
        let tx = HttpTransaction::new("https://example.com", "GET", 200, 0, 0, 0.5, 0, 0, None);
        measurements.add_http_transaction(tx);
        assert_eq!(data.transaction_count(), 0);

        assert_eq!(measurements.broadcast(), 1);
        assert_eq!(data.transaction_count(), 1);
    }

    #[test]
    fn test_disabled_drops_production() {
        let (measurements, data) = facade();
        measurements.set_enabled(false);
        measurements.add_custom_metric("a", "b", 1, 1.0, 1.0, None, None);
        assert_eq!(measurements.broadcast(), 0);
        assert_eq!(measurements.start_activity("Main").unwrap_err(), MeasurementError::Disabled);
        assert_eq!(data.metric_count(), 0);
    }

    #[test]
    fn test_shutdown_unregisters() {
        let (measurements, _) = facade();
        assert_eq!(measurements.engine().root_pool().producers().len(), 4);
        measurements.shutdown();
        assert!(measurements.engine().root_pool().producers().is_empty());
        assert!(measurements.engine().root_pool().consumers().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_ends_running_activities() {
        let (measurements, _) = facade();
        let activity = measurements.start_activity("Main").unwrap();
        assert!(activity.wait_attached().await);
        let root = measurements.engine().root_pool().clone();
        assert!(root.has_consumer(activity.measurement_pool()));

        measurements.shutdown();

        assert!(activity.is_finished());
        assert!(!root.has_consumer(activity.measurement_pool()));
        assert_eq!(measurements.engine().activity_count(), 0);
    }
}
