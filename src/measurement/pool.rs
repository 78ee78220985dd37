//! Measurement pool: producer/consumer registry and fan-out.
//!
//! # Responsibilities
//! - Track registered producers and consumers (each at most once)
//! - Drain every producer and deliver the combined batch to every consumer
//! - Act as a consumer itself, so pools can be chained (root → activity)
//!
//! # Design Decisions
//! - Registries are snapshotted before a broadcast; registration changes
//!   during a broadcast never affect the batch in flight
//! - Identity is pointer identity of the shared instance
//! - Duplicate registration is a no-op for producers and consumers alike

use std::sync::{Arc, PoisonError, RwLock};

use crate::measurement::producer::BufferedProducer;
use crate::measurement::types::{Measurement, MeasurementType};

/// Source of measurements.
pub trait MeasurementProducer: Send + Sync {
    fn measurement_type(&self) -> MeasurementType;

    /// Take everything buffered since the last drain.
    fn drain_measurements(&self) -> Vec<Arc<Measurement>>;
}

/// Sink for measurements.
pub trait MeasurementConsumer: Send + Sync {
    /// Kind this consumer wants; `Any` receives everything.
    fn measurement_type(&self) -> MeasurementType;

    /// Receive one broadcast batch, already filtered by type.
    fn consume_measurements(&self, measurements: &[Arc<Measurement>]);
}

/// Pointer identity for shared trait objects, ignoring vtables.
pub(crate) fn same_instance<T: ?Sized, U: ?Sized>(a: &Arc<T>, b: &Arc<U>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// Thread-safe registry of producers and consumers.
pub struct MeasurementPool {
    buffer: BufferedProducer,
    producers: RwLock<Vec<Arc<dyn MeasurementProducer>>>,
    consumers: RwLock<Vec<Arc<dyn MeasurementConsumer>>>,
}

impl MeasurementPool {
    pub fn new() -> Self {
        Self {
            buffer: BufferedProducer::new(MeasurementType::Any),
            producers: RwLock::new(Vec::new()),
            consumers: RwLock::new(Vec::new()),
        }
    }

    /// Register a producer. Registering the same instance twice is a no-op.
    pub fn add_measurement_producer(&self, producer: Arc<dyn MeasurementProducer>) {
        let mut producers = self.producers.write().unwrap_or_else(PoisonError::into_inner);
        if producers.iter().any(|p| same_instance(p, &producer)) {
            tracing::debug!("Attempted to add the same measurement producer multiple times");
            return;
        }
        producers.push(producer);
    }

    pub fn remove_measurement_producer(&self, producer: &Arc<dyn MeasurementProducer>) {
        let mut producers = self.producers.write().unwrap_or_else(PoisonError::into_inner);
        let before = producers.len();
        producers.retain(|p| !same_instance(p, producer));
        if producers.len() == before {
            tracing::debug!("Attempted to remove a measurement producer which is not registered");
        }
    }

    /// Register a consumer. Registering the same instance twice is a no-op.
    pub fn add_measurement_consumer(&self, consumer: Arc<dyn MeasurementConsumer>) {
        let mut consumers = self.consumers.write().unwrap_or_else(PoisonError::into_inner);
        if consumers.iter().any(|c| same_instance(c, &consumer)) {
            tracing::debug!("Attempted to add the same measurement consumer multiple times");
            return;
        }
        consumers.push(consumer);
    }

    pub fn remove_measurement_consumer(&self, consumer: &Arc<dyn MeasurementConsumer>) {
        let mut consumers = self.consumers.write().unwrap_or_else(PoisonError::into_inner);
        let before = consumers.len();
        consumers.retain(|c| !same_instance(c, consumer));
        if consumers.len() == before {
            tracing::debug!("Attempted to remove a measurement consumer which is not registered");
        }
    }

    pub fn producers(&self) -> Vec<Arc<dyn MeasurementProducer>> {
        self.producers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn consumers(&self) -> Vec<Arc<dyn MeasurementConsumer>> {
        self.consumers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn has_consumer<T: ?Sized>(&self, consumer: &Arc<T>) -> bool {
        self.consumers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|c| same_instance(c, consumer))
    }

    pub fn has_producer<T: ?Sized>(&self, producer: &Arc<T>) -> bool {
        self.producers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|p| same_instance(p, producer))
    }

    /// Buffer a measurement in the pool itself.
    pub fn produce_measurement(&self, measurement: Measurement) {
        self.buffer.produce_measurement(measurement);
    }

    /// Measurements waiting in the pool's own buffer.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Drain all producers (and the pool's own buffer) and deliver the
    /// combined batch to every consumer. Returns the batch size.
    pub fn broadcast_measurements(&self) -> usize {
        let producers = self.producers();

        let mut batch = self.buffer.drain_measurements();
        for producer in &producers {
            batch.extend(producer.drain_measurements());
        }

        if batch.is_empty() {
            return 0;
        }

        let consumers = self.consumers();
        let mut filtered = Vec::with_capacity(batch.len());
        for consumer in &consumers {
            let wanted = consumer.measurement_type();
            filtered.clear();
            filtered.extend(batch.iter().filter(|m| wanted.accepts(m.kind())).cloned());
            if !filtered.is_empty() {
                consumer.consume_measurements(&filtered);
            }
        }

        tracing::trace!(
            measurements = batch.len(),
            consumers = consumers.len(),
            "Broadcast measurements"
        );
        batch.len()
    }
}

impl Default for MeasurementPool {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MeasurementPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeasurementPool")
            .field("pending", &self.pending())
            .field("producers", &self.producers().len())
            .field("consumers", &self.consumers().len())
            .finish()
    }
}

impl MeasurementConsumer for MeasurementPool {
    fn measurement_type(&self) -> MeasurementType {
        MeasurementType::Any
    }

    fn consume_measurements(&self, measurements: &[Arc<Measurement>]) {
        self.buffer.produce_shared_batch(measurements);
    }
}

impl MeasurementProducer for MeasurementPool {
    fn measurement_type(&self) -> MeasurementType {
        MeasurementType::Any
    }

    fn drain_measurements(&self) -> Vec<Arc<Measurement>> {
        self.buffer.drain_measurements()
    }
}
