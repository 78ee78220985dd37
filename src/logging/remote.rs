//! Remote logger: validates log calls and writes records off the caller's
//! thread.
//!
//! # Responsibilities
//! - Filter by level, sampling and reporter enablement
//! - Shape and validate records on the calling thread
//! - Append records through a bounded pool of blocking writers
//! - Let the harvest wait until every accepted record is on disk
//!
//! # Design Decisions
//! - A semaphore bounds concurrent writers; excess writes wait for a permit
//! - A failed append resets the writer and retries once before the record
//!   is counted as dropped
//! - Once shutdown begins, log calls write inline on the caller's thread

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::{Notify, Semaphore};

use crate::config::{AgentConfig, LogReportingConfig};
use crate::harvest::HarvestLifecycleAware;
use crate::logging::level::LogLevel;
use crate::logging::record::{
    Attributes, CommonAttributes, LogRecord, MessageValidator, ThrowableInfo, LEVEL_ATTRIBUTE,
    MESSAGE_ATTRIBUTE,
};
use crate::logging::reporter::LogReporter;
use crate::observability::metrics::{SupportabilityStats, LOGS_DROPPED};

/// Writer pool size: `max(2, parallelism / 4)` unless configured.
pub fn default_pool_size() -> usize {
    let parallelism = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (parallelism / 4).max(2)
}

#[derive(Default)]
struct Pending {
    count: AtomicUsize,
    idle: Notify,
}

impl Pending {
    fn begin(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    fn end(&self) {
        if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

pub struct RemoteLogger {
    reporter: Arc<LogReporter>,
    stats: Arc<SupportabilityStats>,
    validator: MessageValidator,
    common: CommonAttributes,
    level: AtomicU8,
    permits: Arc<Semaphore>,
    pool_size: usize,
    pending: Arc<Pending>,
    shutting_down: AtomicBool,
    shutdown_timeout: Duration,
    runtime: Handle,
}

impl RemoteLogger {
    /// Must be called from within a tokio runtime; writes are spawned on it.
    pub fn new(
        reporter: Arc<LogReporter>,
        config: &LogReportingConfig,
        common: CommonAttributes,
        stats: Arc<SupportabilityStats>,
    ) -> Self {
        let pool_size = match config.worker_threads {
            0 => default_pool_size(),
            n => n,
        };
        Self {
            reporter,
            stats,
            validator: MessageValidator::default(),
            common,
            level: AtomicU8::new(config.level.value()),
            permits: Arc::new(Semaphore::new(pool_size)),
            pool_size,
            pending: Arc::new(Pending::default()),
            shutting_down: AtomicBool::new(false),
            shutdown_timeout: Duration::from_millis(config.shutdown_timeout_ms),
            runtime: Handle::current(),
        }
    }

    pub fn level(&self) -> LogLevel {
        LogLevel::from_value(self.level.load(Ordering::Acquire))
    }

    pub fn set_level(&self, level: LogLevel) {
        self.level.store(level.value(), Ordering::Release);
    }

    pub fn is_level_enabled(&self, level: LogLevel) -> bool {
        self.level().is_level_enabled(level)
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Records accepted but not yet written.
    pub fn pending_requests(&self) -> usize {
        self.pending.count.load(Ordering::Acquire)
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        if self.is_level_enabled(level) {
            let message = self.validator.validate_message(message);
            self.append(level, Some(message), None, None);
        }
    }

    pub fn log_throwable(&self, level: LogLevel, message: &str, throwable: ThrowableInfo) {
        if self.is_level_enabled(level) {
            let message = self.validator.validate_message(message);
            let throwable = self.validator.validate_throwable(throwable);
            self.append(level, Some(message), Some(throwable), None);
        }
    }

    /// Log an attribute map. `level` and `message` entries, when present,
    /// set the record's level (default INFO) and message.
    pub fn log_attributes(&self, attributes: Attributes) {
        self.log_all(None, attributes);
    }

    pub fn log_all(&self, throwable: Option<ThrowableInfo>, attributes: Attributes) {
        let attributes = self.validator.validate_attributes(attributes);
        let level = attributes
            .get(LEVEL_ATTRIBUTE)
            .and_then(Value::as_str)
            .and_then(|level| level.parse().ok())
            .unwrap_or(LogLevel::Info);
        if !self.is_level_enabled(level) {
            return;
        }
        let message = attributes
            .get(MESSAGE_ATTRIBUTE)
            .and_then(Value::as_str)
            .map(|message| self.validator.validate_message(message));
        let throwable = throwable.map(|t| self.validator.validate_throwable(t));
        self.append(level, message, throwable, Some(attributes));
    }

    fn append(
        &self,
        level: LogLevel,
        message: Option<String>,
        throwable: Option<ThrowableInfo>,
        attributes: Option<Attributes>,
    ) {
        if !(self.reporter.is_enabled() && self.is_level_enabled(level)) {
            return;
        }
        if !self.reporter.is_sampled() {
            return;
        }
        let Some(record) = LogRecord::new(level, message, throwable, attributes, &self.common)
        else {
            return;
        };

        if self.shutting_down.load(Ordering::Acquire) {
            write_record(&self.reporter, &self.stats, &record);
            return;
        }

        self.pending.begin();
        let reporter = self.reporter.clone();
        let stats = self.stats.clone();
        let permits = self.permits.clone();
        let pending = self.pending.clone();

        self.runtime.spawn(async move {
            let permit = permits.acquire_owned().await.ok();
            let written = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                write_record(&reporter, &stats, &record);
            })
            .await;
            if let Err(e) = written {
                tracing::error!(error = %e, "Log record writer failed");
            }
            pending.end();
        });
    }

    /// Wait until every accepted record has been written. Once shutdown has
    /// begun the wait is bounded by the shutdown timeout, since writes
    /// spawned on a runtime that is going away may never finish.
    pub async fn flush_pending_requests(&self) {
        if !self.shutting_down.load(Ordering::Acquire) {
            return self.wait_idle().await;
        }
        if tokio::time::timeout(self.shutdown_timeout, self.wait_idle())
            .await
            .is_err()
        {
            tracing::warn!(
                pending = self.pending_requests(),
                timeout_ms = self.shutdown_timeout.as_millis() as u64,
                "Timed out waiting for log writes"
            );
        }
    }

    async fn wait_idle(&self) {
        loop {
            let idle = self.pending.idle.notified();
            if self.pending_requests() == 0 {
                return;
            }
            idle.await;
        }
    }

    /// Drain in-flight writes (bounded by the shutdown timeout) and close the
    /// pool. Later log calls write inline.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
        self.flush_pending_requests().await;
        self.permits.close();
        if let Err(e) = self.reporter.flush() {
            tracing::warn!(error = %e, "Failed to flush working log file");
        }
        tracing::info!("Remote logger shut down");
    }
}

fn write_record(reporter: &LogReporter, stats: &SupportabilityStats, record: &LogRecord) {
    let Err(first) = reporter.append_to_working_file(record) else {
        return;
    };
    tracing::warn!(error = %first, "Log append failed, reopening the working file");
    reporter.reset_writer();
    if let Err(e) = reporter.append_to_working_file(record) {
        tracing::error!(error = %e, "Error recording log message");
        stats.inc(LOGS_DROPPED);
    }
}

impl HarvestLifecycleAware for RemoteLogger {
    fn on_harvest(&self) -> BoxFuture<'_, ()> {
        self.flush_pending_requests().boxed()
    }

    fn on_harvest_stop(&self) -> BoxFuture<'_, ()> {
        self.flush_pending_requests().boxed()
    }

    fn on_configuration_changed(&self, config: &AgentConfig) {
        self.set_level(config.log_reporting.level);
    }
}
