//! Measurement engine under concurrent producers, consumers and activities.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use telemetry_agent::harvest::HarvestData;
use telemetry_agent::measurement::{
    Attachment, BufferedProducer, Measurement, MeasurementConsumer, MeasurementEngine,
    MeasurementError, MeasurementType, Measurements, Trace,
};
use telemetry_agent::observability::SupportabilityStats;

struct CountingConsumer {
    kind: MeasurementType,
    seen: AtomicUsize,
}

impl CountingConsumer {
    fn new(kind: MeasurementType) -> Arc<Self> {
        Arc::new(Self {
            kind,
            seen: AtomicUsize::new(0),
        })
    }

    fn seen(&self) -> usize {
        self.seen.load(Ordering::SeqCst)
    }
}

impl MeasurementConsumer for CountingConsumer {
    fn measurement_type(&self) -> MeasurementType {
        self.kind
    }

    fn consume_measurements(&self, measurements: &[Arc<Measurement>]) {
        self.seen.fetch_add(measurements.len(), Ordering::SeqCst);
    }
}

#[test]
fn test_concurrent_producers_deliver_every_measurement_once() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 500;

    let engine = Arc::new(MeasurementEngine::new());
    let producer = Arc::new(BufferedProducer::new(MeasurementType::Custom));
    let consumer = CountingConsumer::new(MeasurementType::Any);
    engine.add_measurement_producer(producer.clone());
    engine.add_measurement_consumer(consumer.clone());

    let done = Arc::new(AtomicBool::new(false));
    let broadcaster = {
        let engine = engine.clone();
        let done = done.clone();
        thread::spawn(move || {
            let mut delivered = 0;
            while !done.load(Ordering::SeqCst) {
                delivered += engine.broadcast_measurements();
            }
            delivered
        })
    };

    let producers: Vec<_> = (0..THREADS)
        .map(|_| {
            let producer = producer.clone();
            thread::spawn(move || {
                for _ in 0..PER_THREAD {
                    producer.produce_measurement(Measurement::new(MeasurementType::Custom));
                }
            })
        })
        .collect();
    for handle in producers {
        handle.join().unwrap();
    }
    done.store(true, Ordering::SeqCst);
    let mut delivered = broadcaster.join().unwrap();
    delivered += engine.broadcast_measurements();

    assert_eq!(delivered, THREADS * PER_THREAD);
    assert_eq!(consumer.seen(), THREADS * PER_THREAD);
    assert!(producer.is_empty());
}

#[test]
fn test_registration_during_broadcast_is_safe() {
    const ROUNDS: usize = 200;

    let engine = Arc::new(MeasurementEngine::new());
    let producer = Arc::new(BufferedProducer::new(MeasurementType::Method));
    let witness = CountingConsumer::new(MeasurementType::Method);
    engine.add_measurement_producer(producer.clone());
    engine.add_measurement_consumer(witness.clone());

    let registrar = {
        let engine = engine.clone();
        thread::spawn(move || {
            let mut late = Vec::new();
            for _ in 0..ROUNDS {
                let consumer = CountingConsumer::new(MeasurementType::Any);
                engine.add_measurement_consumer(consumer.clone());
                late.push(consumer);
            }
            late
        })
    };

    for _ in 0..ROUNDS {
        producer.produce_measurement(Measurement::new(MeasurementType::Method));
        engine.broadcast_measurements();
    }
    let late = registrar.join().unwrap();

    assert_eq!(witness.seen(), ROUNDS);
    for consumer in &late {
        assert!(consumer.seen() <= ROUNDS);
    }

    // Every consumer is registered now, so the next batch reaches all of them.
    let before: Vec<usize> = late.iter().map(|c| c.seen()).collect();
    producer.produce_measurement(Measurement::new(MeasurementType::Method));
    assert_eq!(engine.broadcast_measurements(), 1);
    for (consumer, before) in late.iter().zip(before) {
        assert_eq!(consumer.seen(), before + 1);
    }
    assert_eq!(witness.seen(), ROUNDS + 1);
}

fn measurements() -> Measurements {
    let sink = Arc::new(HarvestData::new(Arc::new(SupportabilityStats::new())));
    let measurements = Measurements::new(sink);
    measurements.initialize();
    measurements
}

#[tokio::test]
async fn test_activity_pool_sees_measurements_while_running() {
    let measurements = measurements();

    let activity = measurements.start_activity("Checkout").unwrap();
    assert!(activity.wait_attached().await);
    assert_eq!(activity.attachment(), Attachment::Attached);

    measurements.add_traced_method(&Trace::new("loadCart", 10, 30));
    measurements.add_traced_method(&Trace::new("applyCoupon", 30, 35));
    assert_eq!(activity.measurement_pool().pending(), 2);

    let ended = measurements.end_activity("Checkout").unwrap();
    assert!(Arc::ptr_eq(&ended, &activity));
    assert!(activity.is_finished());

    // Detached: later work no longer reaches the activity's pool.
    measurements.add_traced_method(&Trace::new("afterwards", 40, 50));
    assert_eq!(activity.measurement_pool().pending(), 2);

    assert!(matches!(
        measurements.end_activity("Checkout"),
        Err(MeasurementError::ActivityNotStarted(_))
    ));
}

#[tokio::test]
async fn test_activity_names_are_unique_while_running() {
    let measurements = measurements();

    let first = measurements.start_activity("Main").unwrap();
    assert!(matches!(
        measurements.start_activity("Main"),
        Err(MeasurementError::DuplicateActivity(_))
    ));

    measurements.rename_activity("Main", "Home").unwrap();
    assert_eq!(first.name(), "Home");
    let second = measurements.start_activity("Main").unwrap();

    measurements.end_measured_activity(&first).unwrap();
    measurements.end_measured_activity(&second).unwrap();
    assert_eq!(measurements.engine().activity_count(), 0);
}

#[tokio::test]
async fn test_disabled_engine_rejects_activities() {
    let measurements = measurements();
    measurements.set_enabled(false);

    assert!(matches!(
        measurements.start_activity("Main"),
        Err(MeasurementError::Disabled)
    ));
    measurements.add_traced_method(&Trace::new("ignored", 0, 1));
    assert_eq!(measurements.broadcast(), 0);
}
