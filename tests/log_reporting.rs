//! Log reporting against a mock collector over real HTTP.

mod common;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::{reporting_config, start_mock_backend, temp_data_dir, transport_config};
use serde_json::{json, Value};
use telemetry_agent::harvest::Harvester;
use telemetry_agent::logging::store::{self, LogFileState};
use telemetry_agent::logging::{LogForwarder, LogLevel, LogReporting, UploadOutcome};
use telemetry_agent::measurement::types::now_millis;
use telemetry_agent::observability::metrics::{
    LOGS_UPLOAD_FAILED, LOGS_UPLOAD_REJECTED, LOGS_UPLOAD_SIZE, LOGS_UPLOAD_THROTTLED,
    LOGS_UPLOAD_TIME, LOGS_UPLOAD_TIMEOUT,
};
use telemetry_agent::observability::SupportabilityStats;

struct Harness {
    root: PathBuf,
    stats: Arc<SupportabilityStats>,
    reporting: LogReporting,
}

impl Drop for Harness {
    fn drop(&mut self) {
        for path in walk(&self.root) {
            let _ = store::set_writable(&path);
        }
        let _ = fs::remove_dir_all(&self.root);
    }
}

fn walk(root: &Path) -> Vec<PathBuf> {
    let dir = root.join(store::LOG_REPORTS_DIR);
    fs::read_dir(dir)
        .map(|entries| entries.flatten().map(|e| e.path()).collect())
        .unwrap_or_default()
}

fn harness(addr: std::net::SocketAddr) -> Harness {
    let root = temp_data_dir("log-reporting");
    let stats = Arc::new(SupportabilityStats::new());
    let transport = Arc::new(LogForwarder::new(&transport_config(addr)).unwrap());
    let reporting =
        LogReporting::with_transport(&reporting_config(root.clone()), stats.clone(), transport)
            .unwrap();
    Harness {
        root,
        stats,
        reporting,
    }
}

/// Write `files` CLOSED files of `records` records each through the logger.
async fn seed_through_logger(h: &Harness, files: usize, records: usize) {
    let logger = h.reporting.logger();
    for file in 0..files {
        for record in 0..records {
            logger.error(&format!("file {file} record {record}"));
        }
        h.reporting.remote_logger().flush_pending_requests().await;
        assert!(h.reporting.reporter().roll_working_file().unwrap().is_some());
    }
}

async fn rollup_and_upload(h: &Harness) -> (PathBuf, UploadOutcome) {
    seed_through_logger(h, 1, 3).await;
    let reporter = h.reporting.reporter();
    let rollup = reporter.rollup().unwrap().unwrap();
    let outcome = reporter.upload(&rollup).await.unwrap();
    (rollup, outcome)
}

#[tokio::test]
async fn test_rollup_of_closed_files_is_uploaded_as_one_payload() {
    let (addr, captured) = start_mock_backend(202).await;
    let h = harness(addr);
    seed_through_logger(&h, 4, 4).await;

    let reporter = h.reporting.reporter();
    assert_eq!(store::list(reporter.store_dir(), LogFileState::Closed).unwrap().len(), 4);

    let rollup = reporter.rollup().unwrap().unwrap();
    assert!(store::list(reporter.store_dir(), LogFileState::Closed).unwrap().is_empty());
    assert_eq!(store::list(reporter.store_dir(), LogFileState::Expired).unwrap().len(), 4);

    let outcome = reporter.upload(&rollup).await.unwrap();
    assert_eq!(outcome, UploadOutcome::Delivered);
    assert!(!rollup.exists());

    let requests = captured.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert!(request.request_line.starts_with("POST /mobile/logs"));
    assert_eq!(request.header("content-type"), Some("application/json"));
    assert_eq!(request.header("x-app-license-key"), Some("test-token"));

    let payload = request.json();
    let records = payload.as_array().unwrap();
    assert_eq!(records.len(), 16);
    for record in records {
        assert_eq!(record["level"], json!("ERROR"));
        assert_eq!(record["session.id"], json!(h.reporting.session_id()));
        assert_eq!(record["instrumentation.name"], json!("rust"));
    }

    assert_eq!(h.stats.count(LOGS_UPLOAD_SIZE), 1);
    assert_eq!(h.stats.count(LOGS_UPLOAD_TIME), 1);
    assert_eq!(h.stats.count(LOGS_UPLOAD_FAILED), 0);
}

#[tokio::test]
async fn test_throttled_upload_keeps_rollup() {
    let (addr, _captured) = start_mock_backend(429).await;
    let h = harness(addr);

    let (rollup, outcome) = rollup_and_upload(&h).await;
    assert_eq!(outcome, UploadOutcome::Throttled);
    assert!(rollup.exists());
    assert_eq!(h.stats.count(LOGS_UPLOAD_THROTTLED), 1);
    assert_eq!(h.stats.count(LOGS_UPLOAD_FAILED), 1);
}

#[tokio::test]
async fn test_request_timeout_status_keeps_rollup() {
    let (addr, _captured) = start_mock_backend(408).await;
    let h = harness(addr);

    let (rollup, outcome) = rollup_and_upload(&h).await;
    assert_eq!(outcome, UploadOutcome::Throttled);
    assert!(rollup.exists());
    assert_eq!(h.stats.count(LOGS_UPLOAD_TIMEOUT), 1);
}

#[tokio::test]
async fn test_server_error_keeps_rollup_for_retry() {
    let (addr, captured) = start_mock_backend(500).await;
    let h = harness(addr);

    let (rollup, outcome) = rollup_and_upload(&h).await;
    assert_eq!(outcome, UploadOutcome::Failed);
    assert!(rollup.exists());
    assert_eq!(h.stats.count(LOGS_UPLOAD_FAILED), 1);

    // Same file goes out again on the next pass.
    h.reporting.reporter().upload_pending().await;
    assert!(rollup.exists());
    assert_eq!(captured.lock().unwrap().len(), 2);
    assert_eq!(h.stats.count(LOGS_UPLOAD_FAILED), 2);
}

#[tokio::test]
async fn test_oversized_payload_is_rejected_and_discarded() {
    let (addr, _captured) = start_mock_backend(413).await;
    let h = harness(addr);

    let (rollup, outcome) = rollup_and_upload(&h).await;
    assert_eq!(outcome, UploadOutcome::Rejected);
    assert!(!rollup.exists());
    assert_eq!(h.stats.count(LOGS_UPLOAD_REJECTED), 1);
    assert_eq!(h.stats.count(LOGS_UPLOAD_FAILED), 1);
}

#[tokio::test]
async fn test_unreachable_collector_keeps_rollup() {
    let h = harness("127.0.0.1:1".parse().unwrap());

    let (rollup, outcome) = rollup_and_upload(&h).await;
    assert_eq!(outcome, UploadOutcome::Failed);
    assert!(rollup.exists());
    assert_eq!(h.stats.count(LOGS_UPLOAD_FAILED), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_lose_no_records() {
    const THREADS: usize = 8;
    const MESSAGES: usize = 100;

    let (addr, _captured) = start_mock_backend(202).await;
    let h = harness(addr);
    let started = now_millis();

    let handles: Vec<_> = (0..THREADS)
        .map(|thread| {
            let logger = h.reporting.logger();
            std::thread::spawn(move || {
                for message in 0..MESSAGES {
                    logger.warn(&format!("thread {thread} message {message}"));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let remote = h.reporting.remote_logger();
    remote.flush_pending_requests().await;
    assert_eq!(remote.pending_requests(), 0);

    let closed = h.reporting.reporter().roll_working_file().unwrap().unwrap();
    let lines: Vec<Value> = fs::read_to_string(&closed)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(lines.len(), THREADS * MESSAGES);
    for line in &lines {
        assert!(line["timestamp"].as_u64().unwrap() >= started);
    }

    let mut messages: Vec<String> = lines
        .iter()
        .map(|line| line["message"].as_str().unwrap().to_string())
        .collect();
    messages.sort();
    messages.dedup();
    assert_eq!(messages.len(), THREADS * MESSAGES);
}

#[tokio::test]
async fn test_records_below_threshold_are_not_stored() {
    let (addr, _captured) = start_mock_backend(202).await;
    let h = harness(addr);
    let logger = h.reporting.logger();

    logger.debug("too chatty");
    logger.info("still too chatty");
    h.reporting.remote_logger().flush_pending_requests().await;
    assert!(h.reporting.reporter().roll_working_file().unwrap().is_none());

    h.reporting.remote_logger().set_level(LogLevel::Debug);
    logger.debug("now accepted");
    h.reporting.remote_logger().flush_pending_requests().await;
    assert!(h.reporting.reporter().roll_working_file().unwrap().is_some());
}

#[tokio::test]
async fn test_harvest_cycle_delivers_logged_records() {
    let (addr, captured) = start_mock_backend(202).await;
    let h = harness(addr);
    h.reporting.start().unwrap();

    let harvester = Harvester::new();
    for listener in h.reporting.harvest_listeners() {
        harvester.add_harvest_listener(listener);
    }

    let logger = h.reporting.logger();
    let mut attributes = serde_json::Map::new();
    attributes.insert("level".into(), json!("error"));
    attributes.insert("message".into(), json!("checkout failed"));
    attributes.insert("cart.items".into(), json!(3));
    logger.log_attributes(attributes);
    logger.error("second record");

    harvester.harvest_now().await;

    let requests = captured.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    let payload = requests[0].json();
    let records = payload.as_array().unwrap();
    assert_eq!(records.len(), 2);
    let attributed = records
        .iter()
        .find(|r| r["message"] == json!("checkout failed"))
        .unwrap();
    assert_eq!(attributed["level"], json!("ERROR"));
    assert_eq!(attributed["attributes"]["cart.items"], json!(3));

    let store_dir = h.reporting.reporter().store_dir();
    assert!(store::list(store_dir, LogFileState::Rollup).unwrap().is_empty());
    assert!(store::list(store_dir, LogFileState::Closed).unwrap().is_empty());

    harvester.stop().await;
    assert!(!h.reporting.reporter().is_attached());
}

#[tokio::test]
async fn test_shutdown_drains_and_keeps_data_for_next_session() {
    let (addr, captured) = start_mock_backend(202).await;
    let h = harness(addr);
    h.reporting.start().unwrap();

    let logger = h.reporting.logger();
    for n in 0..20 {
        logger.error(&format!("pending {n}"));
    }
    h.reporting.shutdown().await;

    assert_eq!(h.reporting.remote_logger().pending_requests(), 0);
    assert!(!h.reporting.reporter().is_attached());
    assert!(captured.lock().unwrap().is_empty());

    let working = h.reporting.reporter().working_file_path();
    let stored = fs::read_to_string(working).unwrap();
    assert_eq!(stored.lines().count(), 20);
}
