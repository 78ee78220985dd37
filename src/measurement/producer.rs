//! Measurement producers.
//!
//! # Responsibilities
//! - Buffer measurements produced at instrumented call sites
//! - Hand the buffered batch to the pool on broadcast (drain)
//! - Convert domain objects (transactions, traces, activities) to measurements
//!
//! # Design Decisions
//! - Producing never blocks beyond a short buffer lock
//! - Measurements are wrapped in `Arc` once, so fan-out to many consumers
//!   never clones the payload

use std::sync::{Arc, Mutex, PoisonError};

use crate::measurement::pool::MeasurementProducer;
use crate::measurement::types::{
    HttpTransaction, Measurement, MeasurementType, MetricUnit, ThreadInfo, Trace,
};

/// A producer that buffers measurements until the next drain.
#[derive(Debug)]
pub struct BufferedProducer {
    kind: MeasurementType,
    buffer: Mutex<Vec<Arc<Measurement>>>,
}

impl BufferedProducer {
    pub fn new(kind: MeasurementType) -> Self {
        Self {
            kind,
            buffer: Mutex::new(Vec::new()),
        }
    }

    /// Buffer a measurement. Measurements whose kind does not match a typed
    /// producer are dropped with a debug event.
    pub fn produce_measurement(&self, measurement: Measurement) {
        self.produce_shared(Arc::new(measurement));
    }

    pub fn produce_measurements(&self, measurements: impl IntoIterator<Item = Measurement>) {
        for m in measurements {
            self.produce_measurement(m);
        }
    }

    pub(crate) fn produce_shared(&self, measurement: Arc<Measurement>) {
        if !self.kind.accepts(measurement.kind()) {
            tracing::debug!(
                producer = ?self.kind,
                measurement = ?measurement.kind(),
                "Dropping measurement of the wrong type"
            );
            return;
        }
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(measurement);
    }

    pub(crate) fn produce_shared_batch(&self, measurements: &[Arc<Measurement>]) {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        buffer.extend(
            measurements
                .iter()
                .filter(|m| self.kind.accepts(m.kind()))
                .cloned(),
        );
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MeasurementProducer for BufferedProducer {
    fn measurement_type(&self) -> MeasurementType {
        self.kind
    }

    fn drain_measurements(&self) -> Vec<Arc<Measurement>> {
        std::mem::take(&mut *self.buffer.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Produces network measurements from HTTP transactions.
#[derive(Debug)]
pub struct NetworkMeasurementProducer {
    inner: BufferedProducer,
}

impl NetworkMeasurementProducer {
    pub fn new() -> Self {
        Self {
            inner: BufferedProducer::new(MeasurementType::Network),
        }
    }

    pub fn produce_transaction(&self, transaction: HttpTransaction, scope: Option<String>) {
        self.inner
            .produce_measurement(Measurement::from_http_transaction(transaction, scope));
    }
}

/// Produces activity measurements when activities end.
#[derive(Debug)]
pub struct ActivityMeasurementProducer {
    inner: BufferedProducer,
}

impl ActivityMeasurementProducer {
    pub fn new() -> Self {
        Self {
            inner: BufferedProducer::new(MeasurementType::Activity),
        }
    }

    pub fn produce_activity(
        &self,
        name: &str,
        start_time: u64,
        end_time: u64,
        thread_info: ThreadInfo,
        auto_instrumented: bool,
    ) {
        self.inner.produce_measurement(Measurement::from_activity(
            name,
            start_time,
            end_time,
            thread_info,
            auto_instrumented,
        ));
    }
}

/// Produces method measurements from traces.
#[derive(Debug)]
pub struct MethodMeasurementProducer {
    inner: BufferedProducer,
}

impl MethodMeasurementProducer {
    pub fn new() -> Self {
        Self {
            inner: BufferedProducer::new(MeasurementType::Method),
        }
    }

    pub fn produce_trace(&self, trace: &Trace) {
        self.inner.produce_measurement(Measurement::from_trace(trace));
    }
}

/// Produces custom metric measurements.
#[derive(Debug)]
pub struct CustomMetricProducer {
    inner: BufferedProducer,
}

impl CustomMetricProducer {
    pub fn new() -> Self {
        Self {
            inner: BufferedProducer::new(MeasurementType::Custom),
        }
    }

    /// Names are `<category>/<name>` with an optional `[valueUnit|countUnit]`
    /// suffix when units are given.
    #[allow(clippy::too_many_arguments)]
    pub fn produce_metric(
        &self,
        name: &str,
        category: &str,
        count: u64,
        total_value: f64,
        exclusive_value: f64,
        count_unit: Option<MetricUnit>,
        value_unit: Option<MetricUnit>,
    ) {
        let mut metric_name = format!("{}/{}", category, name);
        if count_unit.is_some() || value_unit.is_some() {
            metric_name.push('[');
            if let Some(unit) = value_unit {
                metric_name.push_str(unit.label());
            }
            if let Some(unit) = count_unit {
                metric_name.push('|');
                metric_name.push_str(unit.label());
            }
            metric_name.push(']');
        }
        self.inner.produce_measurement(Measurement::custom_metric(
            &metric_name,
            category,
            count,
            total_value,
            exclusive_value,
            count_unit,
            value_unit,
        ));
    }
}

macro_rules! delegate_producer {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Default for $ty {
                fn default() -> Self {
                    Self::new()
                }
            }

            impl MeasurementProducer for $ty {
                fn measurement_type(&self) -> MeasurementType {
                    self.inner.measurement_type()
                }

                fn drain_measurements(&self) -> Vec<Arc<Measurement>> {
                    self.inner.drain_measurements()
                }
            }
        )*
    };
}

delegate_producer!(
    NetworkMeasurementProducer,
    ActivityMeasurementProducer,
    MethodMeasurementProducer,
    CustomMetricProducer,
);
