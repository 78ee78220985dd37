//! Measurement data model and the domain objects instrumentation hands us.

use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Misuse errors raised by the measurement layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MeasurementError {
    #[error("measurement is finished and can no longer be modified")]
    Finished,

    #[error("measurement is already finished")]
    AlreadyFinished,

    #[error("end time {end} is before start time {start}")]
    EndBeforeStart { start: u64, end: u64 },

    #[error("an activity named '{0}' is already active")]
    DuplicateActivity(String),

    #[error("activity '{0}' has not been started")]
    ActivityNotStarted(String),

    #[error("measurement collection is disabled")]
    Disabled,
}

pub type MeasurementResult<T> = Result<T, MeasurementError>;

/// Kind of a measurement. Consumers registered for `Any` see every kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MeasurementType {
    Network,
    Activity,
    Method,
    Custom,
    Machine,
    Any,
}

impl MeasurementType {
    /// Whether a consumer of `self` wants a measurement of `kind`.
    pub fn accepts(self, kind: MeasurementType) -> bool {
        self == MeasurementType::Any || self == kind
    }
}

/// Current wall clock time in epoch milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_ID: Cell<u64> = const { Cell::new(0) };
}

/// Identity of the thread a measurement was taken on.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ThreadInfo {
    pub id: u64,
    pub name: String,
}

impl ThreadInfo {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    /// Info for the calling thread. Ids are process-unique and stable per thread.
    pub fn current() -> Self {
        let id = THREAD_ID.with(|cell| {
            if cell.get() == 0 {
                cell.set(NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed));
            }
            cell.get()
        });
        let name = std::thread::current()
            .name()
            .unwrap_or("unnamed")
            .to_string();
        Self { id, name }
    }
}

/// Units attached to custom metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricUnit {
    Percent,
    Bytes,
    Seconds,
    BytesPerSecond,
    Operations,
}

impl MetricUnit {
    pub fn label(self) -> &'static str {
        match self {
            MetricUnit::Percent => "%",
            MetricUnit::Bytes => "bytes",
            MetricUnit::Seconds => "sec",
            MetricUnit::BytesPerSecond => "bytes/second",
            MetricUnit::Operations => "op",
        }
    }
}

/// A completed HTTP exchange observed by network instrumentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpTransaction {
    pub url: String,
    pub http_method: String,
    pub status_code: u16,
    pub error_code: i32,
    /// Request start, epoch ms.
    pub start_time: u64,
    /// Total duration in seconds.
    pub total_time: f64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub app_data: Option<String>,
}

impl HttpTransaction {
    /// Build a transaction, stripping query and fragment from the url.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        url: &str,
        http_method: impl Into<String>,
        status_code: u16,
        error_code: i32,
        start_time: u64,
        total_time: f64,
        bytes_sent: u64,
        bytes_received: u64,
        app_data: Option<String>,
    ) -> Self {
        Self {
            url: sanitize_url(url),
            http_method: http_method.into(),
            status_code,
            error_code,
            start_time,
            total_time,
            bytes_sent,
            bytes_received,
            app_data,
        }
    }
}

/// Drop query string and fragment; they may carry user data.
pub fn sanitize_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => raw
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    }
}

/// A traced method call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    pub metric_name: String,
    pub scope: Option<String>,
    pub entry_timestamp: u64,
    pub exit_timestamp: u64,
    pub exclusive_time: u64,
    pub thread: ThreadInfo,
    pub category: Option<String>,
}

impl Trace {
    pub fn new(metric_name: impl Into<String>, entry_timestamp: u64, exit_timestamp: u64) -> Self {
        Self {
            metric_name: metric_name.into(),
            scope: None,
            entry_timestamp,
            exit_timestamp,
            exclusive_time: exit_timestamp.saturating_sub(entry_timestamp),
            thread: ThreadInfo::current(),
            category: None,
        }
    }

    pub fn duration_ms(&self) -> u64 {
        self.exit_timestamp.saturating_sub(self.entry_timestamp)
    }
}

/// A completed activity trace: an activity name and its root trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityTrace {
    pub activity_name: String,
    pub root_trace: Trace,
}

/// Typed payload carried alongside the common measurement fields.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum MeasurementDetail {
    #[default]
    None,
    Network(HttpTransaction),
    Method {
        category: Option<String>,
    },
    Custom {
        category: String,
        count: u64,
        total_value: f64,
        exclusive_value: f64,
        count_unit: Option<MetricUnit>,
        value_unit: Option<MetricUnit>,
    },
    Activity {
        auto_instrumented: bool,
    },
}

/// A single timed or counted observation.
///
/// Mutable until [`finish`](Measurement::finish) is called; afterwards every
/// setter fails with [`MeasurementError::Finished`].
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    kind: MeasurementType,
    name: String,
    scope: Option<String>,
    start_time: u64,
    end_time: u64,
    exclusive_time: u64,
    thread_info: ThreadInfo,
    finished: bool,
    detail: MeasurementDetail,
}

impl Measurement {
    pub fn new(kind: MeasurementType) -> Self {
        Self {
            kind,
            name: String::new(),
            scope: None,
            start_time: 0,
            end_time: 0,
            exclusive_time: 0,
            thread_info: ThreadInfo::current(),
            finished: false,
            detail: MeasurementDetail::None,
        }
    }

    /// Network measurement for a completed HTTP transaction.
    pub fn from_http_transaction(transaction: HttpTransaction, scope: Option<String>) -> Self {
        let elapsed_ms = (transaction.total_time * 1000.0).max(0.0) as u64;
        let mut m = Self::new(MeasurementType::Network);
        m.name = transaction.url.clone();
        m.scope = scope;
        m.start_time = transaction.start_time;
        m.end_time = transaction.start_time.saturating_add(elapsed_ms);
        m.exclusive_time = elapsed_ms;
        m.detail = MeasurementDetail::Network(transaction);
        m.finished = true;
        m
    }

    /// Method measurement for a traced call.
    pub fn from_trace(trace: &Trace) -> Self {
        let mut m = Self::new(MeasurementType::Method);
        m.name = trace.metric_name.clone();
        m.scope = trace.scope.clone();
        m.start_time = trace.entry_timestamp;
        m.end_time = trace.exit_timestamp.max(trace.entry_timestamp);
        m.exclusive_time = trace.exclusive_time;
        m.thread_info = trace.thread.clone();
        m.detail = MeasurementDetail::Method {
            category: trace.category.clone(),
        };
        m.finished = true;
        m
    }

    /// Instantaneous custom metric measurement.
    #[allow(clippy::too_many_arguments)]
    pub fn custom_metric(
        name: &str,
        category: &str,
        count: u64,
        total_value: f64,
        exclusive_value: f64,
        count_unit: Option<MetricUnit>,
        value_unit: Option<MetricUnit>,
    ) -> Self {
        let mut m = Self::new(MeasurementType::Custom);
        m.name = name.to_string();
        m.start_time = now_millis();
        m.detail = MeasurementDetail::Custom {
            category: category.to_string(),
            count,
            total_value,
            exclusive_value,
            count_unit,
            value_unit,
        };
        m.finished = true;
        m
    }

    /// Activity measurement spanning a finished activity.
    pub fn from_activity(
        name: &str,
        start_time: u64,
        end_time: u64,
        thread_info: ThreadInfo,
        auto_instrumented: bool,
    ) -> Self {
        let mut m = Self::new(MeasurementType::Activity);
        m.name = name.to_string();
        m.start_time = start_time;
        m.end_time = end_time.max(start_time);
        m.exclusive_time = m.end_time - m.start_time;
        m.thread_info = thread_info;
        m.detail = MeasurementDetail::Activity { auto_instrumented };
        m.finished = true;
        m
    }

    fn ensure_mutable(&self) -> MeasurementResult<()> {
        if self.finished {
            Err(MeasurementError::Finished)
        } else {
            Ok(())
        }
    }

    pub fn set_name(&mut self, name: impl Into<String>) -> MeasurementResult<()> {
        self.ensure_mutable()?;
        self.name = name.into();
        Ok(())
    }

    pub fn set_scope(&mut self, scope: Option<String>) -> MeasurementResult<()> {
        self.ensure_mutable()?;
        self.scope = scope;
        Ok(())
    }

    pub fn set_start_time(&mut self, start_time: u64) -> MeasurementResult<()> {
        self.ensure_mutable()?;
        self.start_time = start_time;
        Ok(())
    }

    pub fn set_end_time(&mut self, end_time: u64) -> MeasurementResult<()> {
        self.ensure_mutable()?;
        if end_time != 0 && end_time < self.start_time {
            return Err(MeasurementError::EndBeforeStart {
                start: self.start_time,
                end: end_time,
            });
        }
        self.end_time = end_time;
        Ok(())
    }

    pub fn set_exclusive_time(&mut self, exclusive_time: u64) -> MeasurementResult<()> {
        self.ensure_mutable()?;
        self.exclusive_time = exclusive_time;
        Ok(())
    }

    pub fn set_thread_info(&mut self, thread_info: ThreadInfo) -> MeasurementResult<()> {
        self.ensure_mutable()?;
        self.thread_info = thread_info;
        Ok(())
    }

    pub fn set_detail(&mut self, detail: MeasurementDetail) -> MeasurementResult<()> {
        self.ensure_mutable()?;
        self.detail = detail;
        Ok(())
    }

    /// Seal the measurement.
    pub fn finish(&mut self) -> MeasurementResult<()> {
        if self.finished {
            return Err(MeasurementError::AlreadyFinished);
        }
        self.finished = true;
        Ok(())
    }

    pub fn kind(&self) -> MeasurementType {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    pub fn start_time(&self) -> u64 {
        self.start_time
    }

    pub fn start_time_secs(&self) -> f64 {
        self.start_time as f64 / 1000.0
    }

    pub fn end_time(&self) -> u64 {
        self.end_time
    }

    pub fn end_time_secs(&self) -> f64 {
        self.end_time as f64 / 1000.0
    }

    pub fn exclusive_time(&self) -> u64 {
        self.exclusive_time
    }

    pub fn exclusive_time_secs(&self) -> f64 {
        self.exclusive_time as f64 / 1000.0
    }

    /// Elapsed time in seconds, zero for instantaneous measurements.
    pub fn duration_secs(&self) -> f64 {
        if self.is_instantaneous() {
            0.0
        } else {
            self.end_time_secs() - self.start_time_secs()
        }
    }

    pub fn thread_info(&self) -> &ThreadInfo {
        &self.thread_info
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_instantaneous(&self) -> bool {
        self.end_time == 0
    }

    pub fn detail(&self) -> &MeasurementDetail {
        &self.detail
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} '{}' [{} - {}]",
            self.kind, self.name, self.start_time, self.end_time
        )
    }
}
