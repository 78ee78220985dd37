//! Agent health: exceptions the agent raised against itself.
//!
//! # Responsibilities
//! - Aggregate identical exceptions (same kind and message) into one entry
//! - Count each occurrence under `Supportability/AgentHealth/<kind>`
//!
//! # Design Decisions
//! - Kept apart from user data so a faulty item never poisons a harvest

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::measurement::types::now_millis;
use crate::observability::metrics::{SupportabilityStats, AGENT_HEALTH_PREFIX};

/// A failure the agent observed in its own processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentHealthException {
    pub exception_class: String,
    pub message: String,
    pub thread_name: String,
    pub count: u64,
    pub first_seen: u64,
    pub last_seen: u64,
}

impl AgentHealthException {
    pub fn new(exception_class: impl Into<String>, message: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            exception_class: exception_class.into(),
            message: message.into(),
            thread_name: std::thread::current()
                .name()
                .unwrap_or("unnamed")
                .to_string(),
            count: 1,
            first_seen: now,
            last_seen: now,
        }
    }

    /// Build from any error, classed by its Rust type name.
    pub fn from_error<E: std::error::Error>(error: &E) -> Self {
        let class = std::any::type_name::<E>()
            .rsplit("::")
            .next()
            .unwrap_or("Error");
        Self::new(class, error.to_string())
    }
}

/// Exception aggregator scoped to one agent context.
#[derive(Debug)]
pub struct AgentHealth {
    exceptions: DashMap<(String, String), AgentHealthException>,
    stats: Arc<SupportabilityStats>,
}

impl AgentHealth {
    pub fn new(stats: Arc<SupportabilityStats>) -> Self {
        Self {
            exceptions: DashMap::new(),
            stats,
        }
    }

    pub fn add_exception(&self, exception: AgentHealthException) {
        let metric = format!("{}{}", AGENT_HEALTH_PREFIX, exception.exception_class);
        let increment = exception.count.max(1);
        self.exceptions
            .entry((exception.exception_class.clone(), exception.message.clone()))
            .and_modify(|existing| {
                existing.count += increment;
                existing.last_seen = existing.last_seen.max(exception.last_seen);
            })
            .or_insert(exception);
        self.stats.inc_by(&metric, increment);
    }

    /// Record an error raised inside the agent.
    pub fn notice_error<E: std::error::Error>(&self, error: &E) {
        tracing::warn!(error = %error, "Agent health exception");
        self.add_exception(AgentHealthException::from_error(error));
    }

    pub fn len(&self) -> usize {
        self.exceptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exceptions.is_empty()
    }

    /// Remove and return every aggregated exception.
    pub fn take(&self) -> Vec<AgentHealthException> {
        let keys: Vec<_> = self.exceptions.iter().map(|e| e.key().clone()).collect();
        keys.into_iter()
            .filter_map(|k| self.exceptions.remove(&k).map(|(_, v)| v))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("boom")]
    struct Boom;

    #[test]
    fn test_identical_exceptions_aggregate() {
        let stats = Arc::new(SupportabilityStats::new());
        let health = AgentHealth::new(stats.clone());

        health.notice_error(&Boom);
        health.notice_error(&Boom);
        health.add_exception(AgentHealthException::new("Boom", "different"));

        assert_eq!(health.len(), 2);
        assert_eq!(stats.count("Supportability/AgentHealth/Boom"), 3);

        let taken = health.take();
        let boom = taken.iter().find(|e| e.message == "boom").unwrap();
        assert_eq!(boom.count, 2);
        assert!(health.is_empty());
    }
}
