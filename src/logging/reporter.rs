//! Log reporter: working file rotation, rollup and upload.
//!
//! # Responsibilities
//! - Append serialized records to the working file under one lock
//! - Roll the working file into CLOSED files when the payload budget runs out
//! - Merge CLOSED files into upload-ready ROLLUP files
//! - Upload rollups and soft-delete them when the collector is done with them
//! - Expire old files and physically remove expired ones
//!
//! # Design Decisions
//! - The working file lock is never held across an await point
//! - Deletes are two-phase (rename to `.bak`, remove later) so data can be
//!   recovered until the next cleanup
//! - A roll happens after the record that overdrew the budget is written, so
//!   a CLOSED file can exceed the limit by one record. The oldest CLOSED file
//!   is always merged, even alone over the limit, so rollup never stalls

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime};

use futures_util::future::{BoxFuture, FutureExt};
use serde_json::Value;
use thiserror::Error;

use crate::config::validation::MIN_EXPIRATION_SECS;
use crate::config::{AgentConfig, LogReportingConfig};
use crate::harvest::HarvestLifecycleAware;
use crate::logging::forwarder::{LogTransport, TransportError, UploadOutcome};
use crate::logging::record::LogRecord;
use crate::logging::store::{self, LogFileState, LOG_REPORTS_DIR};
use crate::measurement::types::now_millis;
use crate::observability::metrics::{
    SupportabilityStats, LOGS_EXPIRED, LOGS_UPLOAD_FAILED, LOGS_UPLOAD_REJECTED,
    LOGS_UPLOAD_SIZE, LOGS_UPLOAD_THROTTLED, LOGS_UPLOAD_TIME, LOGS_UPLOAD_TIMEOUT,
};

pub const MIN_EXPIRATION_PERIOD: Duration = Duration::from_secs(MIN_EXPIRATION_SECS);

#[derive(Debug, Error)]
pub enum LogReportError {
    #[error("log store {} is not usable: {reason}", .path.display())]
    InvalidStore { path: PathBuf, reason: String },

    #[error("log store i/o failed: {0}")]
    Io(#[from] io::Error),

    #[error("log record serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("log reporting is disabled")]
    Disabled,

    #[error("not a rollup file: {}", .0.display())]
    NotRollup(PathBuf),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub type LogReportResult<T> = Result<T, LogReportError>;

struct WorkingFile {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    budget: i64,
    last_timestamp: u64,
}

pub struct LogReporter {
    dir: PathBuf,
    working: Mutex<WorkingFile>,
    transport: Arc<dyn LogTransport>,
    stats: Arc<SupportabilityStats>,
    payload_limit: i64,
    min_payload: i64,
    sample_rate: f64,
    enabled: AtomicBool,
    attached: AtomicBool,
    sampled: AtomicBool,
    ttl_ms: AtomicU64,
}

fn open_writer(path: &Path) -> io::Result<BufWriter<File>> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(BufWriter::new(file))
}

fn is_older_than(path: &Path, ttl: Duration, now: SystemTime) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .map(|modified| modified.checked_add(ttl).is_some_and(|deadline| deadline < now))
        .unwrap_or(false)
}

fn read_records(path: &Path, records: &mut Vec<Value>) -> io::Result<()> {
    let reader = BufReader::new(File::open(path)?);
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(&line) {
            Ok(record) if record.is_object() => records.push(record),
            _ => tracing::warn!(path = %path.display(), "Invalid log record dropped"),
        }
    }
    Ok(())
}

impl LogReporter {
    /// Open the store under `config.data_dir`. The data dir must already
    /// exist; the `logreporting` subdirectory is created on demand.
    pub fn new(
        config: &LogReportingConfig,
        stats: Arc<SupportabilityStats>,
        transport: Arc<dyn LogTransport>,
    ) -> LogReportResult<Self> {
        let root = &config.data_dir;
        if !root.is_dir() {
            return Err(LogReportError::InvalidStore {
                path: root.clone(),
                reason: "must be an existing directory".to_string(),
            });
        }

        let dir = root.join(LOG_REPORTS_DIR);
        fs::create_dir_all(&dir).map_err(|e| LogReportError::InvalidStore {
            path: dir.clone(),
            reason: e.to_string(),
        })?;
        let readonly = fs::metadata(&dir)
            .map(|m| m.permissions().readonly())
            .unwrap_or(true);
        if readonly {
            return Err(LogReportError::InvalidStore {
                path: dir,
                reason: "must be writable".to_string(),
            });
        }

        let path = dir.join(store::working_file_name());
        let writer = open_writer(&path)?;
        let payload_limit = i64::try_from(config.payload_limit_bytes).unwrap_or(i64::MAX);
        let ttl = Duration::from_secs(config.expiration_period_secs).max(MIN_EXPIRATION_PERIOD);

        tracing::debug!(dir = %dir.display(), "Saving log reports");

        Ok(Self {
            dir,
            working: Mutex::new(WorkingFile {
                path,
                writer: Some(writer),
                budget: payload_limit,
                last_timestamp: 0,
            }),
            transport,
            stats,
            payload_limit,
            min_payload: config.min_payload_bytes,
            sample_rate: config.sample_rate,
            enabled: AtomicBool::new(config.enabled),
            attached: AtomicBool::new(false),
            sampled: AtomicBool::new(true),
            ttl_ms: AtomicU64::new(ttl.as_millis() as u64),
        })
    }

    fn lock_working(&self) -> MutexGuard<'_, WorkingFile> {
        self.working.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn store_dir(&self) -> &Path {
        &self.dir
    }

    pub fn working_file_path(&self) -> PathBuf {
        self.lock_working().path.clone()
    }

    pub fn payload_limit(&self) -> i64 {
        self.payload_limit
    }

    /// Bytes left before the working file must roll.
    pub fn payload_budget(&self) -> i64 {
        self.lock_working().budget
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    pub fn is_sampled(&self) -> bool {
        self.sampled.load(Ordering::Acquire)
    }

    /// Roll the sampling dice for this session.
    pub fn reseed(&self) -> bool {
        let sampled = fastrand::f64() * 100.0 < self.sample_rate;
        self.sampled.store(sampled, Ordering::Release);
        sampled
    }

    pub fn expiration_period(&self) -> Duration {
        Duration::from_millis(self.ttl_ms.load(Ordering::Acquire))
    }

    /// Set the file TTL, clamped to [`MIN_EXPIRATION_PERIOD`].
    pub fn set_expiration_period(&self, ttl: Duration) {
        let ttl = ttl.max(MIN_EXPIRATION_PERIOD);
        self.ttl_ms.store(ttl.as_millis() as u64, Ordering::Release);
    }

    /// Attach to the harvest cycle and reseed sampling.
    pub fn start(&self) -> LogReportResult<()> {
        if !self.is_enabled() {
            tracing::error!("Attempted to start the log reporter while disabled");
            return Err(LogReportError::Disabled);
        }
        let sampled = self.reseed();
        self.attached.store(true, Ordering::Release);
        tracing::info!(dir = %self.dir.display(), sampled, "Log reporter started");
        Ok(())
    }

    /// Detach from the harvest cycle. Records are still accepted and stay in
    /// the store for the next session.
    pub fn stop(&self) {
        self.attached.store(false, Ordering::Release);
        if let Err(e) = self.flush() {
            tracing::warn!(error = %e, "Failed to flush working log file");
        }
        tracing::info!("Log reporter stopped");
    }

    pub fn apply_config(&self, config: &LogReportingConfig) {
        self.set_enabled(config.enabled);
        let ttl = Duration::from_secs(config.expiration_period_secs);
        if ttl.max(MIN_EXPIRATION_PERIOD) != self.expiration_period() {
            self.set_expiration_period(ttl);
            tracing::debug!(
                enabled = config.enabled,
                expiration_secs = self.expiration_period().as_secs(),
                "Log reporting configuration changed"
            );
        }
    }

    /// Append one record as a JSON line and charge it to the payload budget.
    /// When the budget goes negative the working file is rolled before
    /// returning, leaving a full budget.
    pub fn append_to_working_file(&self, record: &LogRecord) -> LogReportResult<()> {
        let line = serde_json::to_string(record)?;
        let cost = line.len() as i64 + 1;

        let mut working = self.lock_working();
        let writer = Self::writer_locked(&mut working)?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;

        working.budget -= cost;
        if working.budget < 0 {
            self.roll_locked(&mut working)?;
        }
        Ok(())
    }

    fn writer_locked(working: &mut WorkingFile) -> io::Result<&mut BufWriter<File>> {
        let writer = match working.writer.take() {
            Some(writer) => writer,
            None => open_writer(&working.path)?,
        };
        Ok(working.writer.insert(writer))
    }

    /// Drop the writer handle; the next append reopens the working file.
    pub fn reset_writer(&self) {
        let mut working = self.lock_working();
        if let Some(mut writer) = working.writer.take() {
            if let Err(e) = writer.flush() {
                tracing::debug!(error = %e, "Discarding working log writer after flush failure");
            }
        }
    }

    /// Swap in an unbuffered read-only handle so the next append fails.
    #[cfg(test)]
    pub(crate) fn break_writer(&self) -> io::Result<()> {
        let mut working = self.lock_working();
        drop(open_writer(&working.path)?);
        let file = File::open(&working.path)?;
        working.writer = Some(BufWriter::with_capacity(0, file));
        Ok(())
    }

    pub fn flush(&self) -> LogReportResult<()> {
        let mut working = self.lock_working();
        if let Some(writer) = working.writer.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }

    /// Close the working file into a CLOSED file. Returns `None` when there
    /// was nothing to roll or the session is not sampled.
    pub fn roll_working_file(&self) -> LogReportResult<Option<PathBuf>> {
        let mut working = self.lock_working();
        self.roll_locked(&mut working)
    }

    fn roll_locked(&self, working: &mut WorkingFile) -> LogReportResult<Option<PathBuf>> {
        working.budget = self.payload_limit;
        if let Some(mut writer) = working.writer.take() {
            writer.flush()?;
        }

        let length = match fs::metadata(&working.path) {
            Ok(metadata) => metadata.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };
        if length == 0 {
            return Ok(None);
        }

        let closed = self.unique_path_locked(working, LogFileState::Closed);
        fs::rename(&working.path, &closed)?;

        if !self.is_sampled() {
            fs::remove_file(&closed)?;
            tracing::debug!("Session not sampled, discarded rolled log data");
            return Ok(None);
        }

        store::set_readonly(&closed)?;
        tracing::debug!(path = %closed.display(), bytes = length, "Rolled working log file");
        Ok(Some(closed))
    }

    fn unique_path_locked(&self, working: &mut WorkingFile, state: LogFileState) -> PathBuf {
        let mut timestamp = now_millis().max(working.last_timestamp + 1);
        loop {
            let path = self.dir.join(store::file_name(timestamp, state));
            if !path.exists() {
                working.last_timestamp = timestamp;
                return path;
            }
            timestamp += 1;
        }
    }

    /// Merge CLOSED files, oldest first, into one read-only ROLLUP file of at
    /// most the payload limit. Files that do not fit stay for the next rollup;
    /// the oldest file is taken even when it alone exceeds the limit.
    pub fn rollup(&self) -> LogReportResult<Option<PathBuf>> {
        let closed = store::list(&self.dir, LogFileState::Closed)?;

        if self.min_payload >= 0 {
            let total: u64 = closed
                .iter()
                .filter_map(|path| fs::metadata(path).ok())
                .map(|m| m.len())
                .sum();
            if (total as i64) < self.min_payload {
                if !closed.is_empty() {
                    tracing::debug!(
                        total,
                        threshold = self.min_payload,
                        "Buffering log data until the minimum payload size"
                    );
                }
                return Ok(None);
            }
        }

        let mut working = self.lock_working();
        let mut budget = self.payload_limit;
        let mut records = Vec::new();
        let mut merged = Vec::new();

        for path in closed {
            let length = match fs::metadata(&path) {
                Ok(metadata) => metadata.len() as i64,
                Err(_) => continue,
            };
            if length == 0 {
                continue;
            }
            if length > budget {
                if !merged.is_empty() {
                    break;
                }
                tracing::warn!(
                    path = %path.display(),
                    bytes = length,
                    limit = self.payload_limit,
                    "Log data file exceeds the payload limit, uploading it alone"
                );
                budget = 0;
            } else {
                budget -= length;
            }
            read_records(&path, &mut records)?;
            merged.push(path);
        }

        if merged.is_empty() {
            return Ok(None);
        }

        let rollup = if records.is_empty() {
            None
        } else {
            let path = self.unique_path_locked(&mut working, LogFileState::Rollup);
            let mut writer = BufWriter::new(File::create(&path)?);
            serde_json::to_writer(&mut writer, &records)?;
            writer.flush()?;
            drop(writer);
            store::set_readonly(&path)?;
            Some(path)
        };

        for path in &merged {
            if let Err(e) = store::soft_delete(path) {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove merged log file");
            }
        }

        tracing::debug!(files = merged.len(), records = records.len(), "Rolled up closed log files");
        Ok(rollup)
    }

    /// Upload a ROLLUP file. Delivered and rejected payloads are soft-deleted;
    /// anything else stays for the next harvest.
    pub async fn upload(&self, rollup: &Path) -> LogReportResult<UploadOutcome> {
        if store::state_of(rollup) != Some(LogFileState::Rollup) {
            return Err(LogReportError::NotRollup(rollup.to_path_buf()));
        }

        let payload = match tokio::fs::read(rollup).await {
            Ok(payload) => payload,
            Err(e) => {
                if e.kind() == io::ErrorKind::NotFound {
                    tracing::warn!(path = %rollup.display(), "Log file vanished before it could be uploaded");
                }
                return Err(e.into());
            }
        };

        let size = payload.len();
        let started = Instant::now();
        let outcome = match self.transport.upload(payload).await {
            Ok(status) => {
                let outcome = UploadOutcome::from_status(status);
                self.record_response(status, outcome, started.elapsed(), size);
                outcome
            }
            Err(e) => {
                if matches!(e, TransportError::Timeout) {
                    self.stats.inc(LOGS_UPLOAD_TIMEOUT);
                }
                self.stats.inc(LOGS_UPLOAD_FAILED);
                tracing::warn!(path = %rollup.display(), error = %e, "Log upload failed, will retry");
                UploadOutcome::Failed
            }
        };

        if outcome.is_final() {
            store::soft_delete(rollup)?;
        }
        Ok(outcome)
    }

    fn record_response(&self, status: u16, outcome: UploadOutcome, elapsed: Duration, size: usize) {
        if outcome == UploadOutcome::Delivered {
            self.stats
                .sample(LOGS_UPLOAD_TIME, elapsed.as_secs_f64() * 1000.0);
            self.stats.sample(LOGS_UPLOAD_SIZE, size as f64);
            tracing::info!(bytes = size, status, "Log data uploaded");
            return;
        }

        match status {
            408 => self.stats.inc(LOGS_UPLOAD_TIMEOUT),
            429 => self.stats.inc(LOGS_UPLOAD_THROTTLED),
            _ if outcome == UploadOutcome::Rejected => self.stats.inc(LOGS_UPLOAD_REJECTED),
            _ => {}
        }
        self.stats.inc(LOGS_UPLOAD_FAILED);
        tracing::warn!(status, outcome = ?outcome, "Log upload not accepted");
    }

    /// Soft-delete every non-expired file older than `ttl`, including the
    /// working file.
    pub fn expire(&self, ttl: Duration) -> LogReportResult<Vec<PathBuf>> {
        let now = SystemTime::now();
        let mut expired = Vec::new();

        for (path, state) in store::list_all(&self.dir)? {
            if matches!(state, LogFileState::Expired | LogFileState::Working) {
                continue;
            }
            if !is_older_than(&path, ttl, now) {
                continue;
            }
            match store::soft_delete(&path) {
                Ok(soft_deleted) => {
                    self.stats.inc(LOGS_EXPIRED);
                    tracing::debug!(path = %path.display(), "Log data expired");
                    expired.push(soft_deleted);
                }
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to expire log data"),
            }
        }

        let mut working = self.lock_working();
        if let Some(writer) = working.writer.as_mut() {
            writer.flush()?;
        }
        if is_older_than(&working.path, ttl, now) {
            if let Some(closed) = self.roll_locked(&mut working)? {
                expired.push(store::soft_delete(&closed)?);
                self.stats.inc(LOGS_EXPIRED);
                tracing::debug!("Working log data expired");
            }
        }

        Ok(expired)
    }

    /// Physically remove expired files. Returns the files removed.
    pub fn cleanup(&self) -> LogReportResult<Vec<PathBuf>> {
        let mut removed = Vec::new();
        for path in store::list(&self.dir, LogFileState::Expired)? {
            match store::remove_expired(&path) {
                Ok(()) => {
                    tracing::debug!(path = %path.display(), "Log data removed");
                    removed.push(path);
                }
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Log data not removed"),
            }
        }
        Ok(removed)
    }

    /// Restore expired files to their prior state. Returns the restored paths.
    pub fn recover(&self) -> LogReportResult<Vec<PathBuf>> {
        let mut recovered = Vec::new();
        for path in store::list(&self.dir, LogFileState::Expired)? {
            match store::restore(&path) {
                Ok(restored) => recovered.push(restored),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Log data not recovered"),
            }
        }
        Ok(recovered)
    }

    /// Roll, merge and upload.
    pub async fn harvest(&self) {
        if let Err(e) = self.roll_working_file() {
            tracing::error!(error = %e, "Failed to roll working log file");
        }
        if !self.is_enabled() {
            return;
        }
        match self.rollup() {
            Ok(Some(rollup)) => self.upload_logged(&rollup).await,
            Ok(None) => {}
            Err(e) => tracing::error!(error = %e, "Log file rollup failed"),
        }
    }

    /// Retry every ROLLUP file still in the store.
    pub async fn upload_pending(&self) {
        let rollups = match store::list(&self.dir, LogFileState::Rollup) {
            Ok(rollups) => rollups,
            Err(e) => {
                tracing::error!(error = %e, "Can't query cached log reports");
                return;
            }
        };
        for rollup in rollups {
            self.upload_logged(&rollup).await;
        }
    }

    async fn upload_logged(&self, rollup: &Path) {
        match self.upload(rollup).await {
            Ok(outcome) => {
                tracing::debug!(path = %rollup.display(), outcome = ?outcome, "Log upload attempted")
            }
            Err(e) => tracing::error!(path = %rollup.display(), error = %e, "Log upload failed"),
        }
    }

    fn expire_and_cleanup(&self) {
        if let Err(e) = self.expire(self.expiration_period()) {
            tracing::warn!(error = %e, "Log expiration sweep failed");
        }
        if let Err(e) = self.cleanup() {
            tracing::warn!(error = %e, "Log cleanup sweep failed");
        }
    }
}

impl HarvestLifecycleAware for LogReporter {
    fn on_harvest_start(&self) -> BoxFuture<'_, ()> {
        async move {
            if self.is_attached() {
                self.expire_and_cleanup();
            }
        }
        .boxed()
    }

    fn on_harvest(&self) -> BoxFuture<'_, ()> {
        async move {
            if self.is_attached() {
                self.harvest().await;
            }
        }
        .boxed()
    }

    fn on_harvest_complete(&self) -> BoxFuture<'_, ()> {
        async move {
            if !self.is_attached() {
                return;
            }
            if self.is_enabled() {
                self.upload_pending().await;
            }
            if let Err(e) = self.expire(self.expiration_period()) {
                tracing::warn!(error = %e, "Log expiration sweep failed");
            }
        }
        .boxed()
    }

    fn on_harvest_stop(&self) -> BoxFuture<'_, ()> {
        async move {
            if self.is_attached() {
                self.harvest().await;
                self.attached.store(false, Ordering::Release);
                tracing::debug!("Log reporter detached from harvest");
            }
        }
        .boxed()
    }

    fn on_configuration_changed(&self, config: &AgentConfig) {
        self.apply_config(&config.log_reporting);
    }
}
