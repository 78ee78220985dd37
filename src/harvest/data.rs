//! Harvest payload accumulation.

use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;

use crate::harvest::health::{AgentHealth, AgentHealthException};
use crate::measurement::metric::{Metric, MetricStore};
use crate::measurement::types::{ActivityTrace, HttpTransaction};
use crate::observability::SupportabilityStats;

/// Errors raised by a harvest sink.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HarvestError {
    #[error("harvest limit of {limit} reached for {kind}")]
    LimitReached { kind: &'static str, limit: usize },
}

pub type HarvestResult<T> = Result<T, HarvestError>;

/// Destination for data gathered during a harvest cycle.
pub trait HarvestSink: Send + Sync {
    fn add_metric(&self, metric: Metric) -> HarvestResult<()>;

    fn add_activity_trace(&self, trace: ActivityTrace) -> HarvestResult<()>;

    fn add_http_transaction(&self, transaction: HttpTransaction) -> HarvestResult<()>;

    fn add_health_exception(&self, exception: AgentHealthException);
}

/// Per-cycle caps on retained objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HarvestLimits {
    pub max_transactions: usize,
    pub max_activity_traces: usize,
}

impl Default for HarvestLimits {
    fn default() -> Self {
        Self {
            max_transactions: 1000,
            max_activity_traces: 1,
        }
    }
}

/// Everything gathered since the last [`HarvestData::take`].
#[derive(Debug, Default, Clone)]
pub struct HarvestSnapshot {
    pub metrics: Vec<Metric>,
    pub activity_traces: Vec<ActivityTrace>,
    pub http_transactions: Vec<HttpTransaction>,
    pub health_exceptions: Vec<AgentHealthException>,
}

/// In-memory harvest sink.
#[derive(Debug)]
pub struct HarvestData {
    limits: HarvestLimits,
    metrics: MetricStore,
    activity_traces: Mutex<Vec<ActivityTrace>>,
    http_transactions: Mutex<Vec<HttpTransaction>>,
    health: AgentHealth,
}

impl HarvestData {
    pub fn new(stats: Arc<SupportabilityStats>) -> Self {
        Self::with_limits(stats, HarvestLimits::default())
    }

    pub fn with_limits(stats: Arc<SupportabilityStats>, limits: HarvestLimits) -> Self {
        Self {
            limits,
            metrics: MetricStore::new(),
            activity_traces: Mutex::new(Vec::new()),
            http_transactions: Mutex::new(Vec::new()),
            health: AgentHealth::new(stats),
        }
    }

    pub fn health(&self) -> &AgentHealth {
        &self.health
    }

    pub fn metric(&self, name: &str, scope: Option<&str>) -> Option<Metric> {
        self.metrics.get(name, scope)
    }

    pub fn metric_count(&self) -> usize {
        self.metrics.len()
    }

    pub fn transaction_count(&self) -> usize {
        self.http_transactions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn activity_trace_count(&self) -> usize {
        self.activity_traces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Drain everything accumulated so far.
    pub fn take(&self) -> HarvestSnapshot {
        let metrics = self.metrics.get_all();
        self.metrics.clear();
        HarvestSnapshot {
            metrics,
            activity_traces: std::mem::take(
                &mut *self
                    .activity_traces
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner),
            ),
            http_transactions: std::mem::take(
                &mut *self
                    .http_transactions
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner),
            ),
            health_exceptions: self.health.take(),
        }
    }
}

impl HarvestSink for HarvestData {
    fn add_metric(&self, metric: Metric) -> HarvestResult<()> {
        self.metrics.add(metric);
        Ok(())
    }

    fn add_activity_trace(&self, trace: ActivityTrace) -> HarvestResult<()> {
        let mut traces = self
            .activity_traces
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if traces.len() >= self.limits.max_activity_traces {
            return Err(HarvestError::LimitReached {
                kind: "activity traces",
                limit: self.limits.max_activity_traces,
            });
        }
        traces.push(trace);
        Ok(())
    }

    fn add_http_transaction(&self, transaction: HttpTransaction) -> HarvestResult<()> {
        let mut transactions = self
            .http_transactions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if transactions.len() >= self.limits.max_transactions {
            return Err(HarvestError::LimitReached {
                kind: "http transactions",
                limit: self.limits.max_transactions,
            });
        }
        transactions.push(transaction);
        Ok(())
    }

    fn add_health_exception(&self, exception: AgentHealthException) {
        self.health.add_exception(exception);
    }
}
