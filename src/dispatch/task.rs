//! Queued task kinds and their dispatch table.

use thiserror::Error;

use crate::harvest::{AgentHealthException, HarvestError, HarvestSink};
use crate::measurement::{ActivityTrace, HttpTransaction, Measurements, Metric, Trace};

/// Failure to dispatch one queued task.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("harvest sink rejected {kind}: {source}")]
    Rejected {
        kind: &'static str,
        #[source]
        source: HarvestError,
    },
}

pub type DispatchResult<T> = Result<T, DispatchError>;

/// A domain object waiting for the queue worker.
#[derive(Debug, Clone, PartialEq)]
pub enum QueuedTask {
    ActivityTrace(ActivityTrace),
    Metric(Metric),
    HealthException(AgentHealthException),
    Trace(Trace),
    HttpTransaction(HttpTransaction),
}

impl QueuedTask {
    pub fn kind(&self) -> &'static str {
        match self {
            QueuedTask::ActivityTrace(_) => "activity trace",
            QueuedTask::Metric(_) => "metric",
            QueuedTask::HealthException(_) => "health exception",
            QueuedTask::Trace(_) => "trace",
            QueuedTask::HttpTransaction(_) => "http transaction",
        }
    }

    /// Route the task to its typed sink.
    pub fn dispatch(self, measurements: &Measurements, sink: &dyn HarvestSink) -> DispatchResult<()> {
        let kind = self.kind();
        let rejected = |source| DispatchError::Rejected { kind, source };
        match self {
            QueuedTask::ActivityTrace(trace) => sink.add_activity_trace(trace).map_err(rejected),
            QueuedTask::Metric(metric) => sink.add_metric(metric).map_err(rejected),
            QueuedTask::HealthException(exception) => {
                sink.add_health_exception(exception);
                Ok(())
            }
            QueuedTask::Trace(trace) => {
                measurements.add_traced_method(&trace);
                Ok(())
            }
            QueuedTask::HttpTransaction(transaction) => {
                measurements.add_http_transaction(transaction);
                Ok(())
            }
        }
    }
}

impl From<ActivityTrace> for QueuedTask {
    fn from(value: ActivityTrace) -> Self {
        QueuedTask::ActivityTrace(value)
    }
}

impl From<Metric> for QueuedTask {
    fn from(value: Metric) -> Self {
        QueuedTask::Metric(value)
    }
}

impl From<AgentHealthException> for QueuedTask {
    fn from(value: AgentHealthException) -> Self {
        QueuedTask::HealthException(value)
    }
}

impl From<Trace> for QueuedTask {
    fn from(value: Trace) -> Self {
        QueuedTask::Trace(value)
    }
}

impl From<HttpTransaction> for QueuedTask {
    fn from(value: HttpTransaction) -> Self {
        QueuedTask::HttpTransaction(value)
    }
}
