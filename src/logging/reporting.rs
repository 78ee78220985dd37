//! Log reporting assembly: one reporter, one remote logger, one session.

use std::sync::Arc;

use uuid::Uuid;

use crate::config::{AgentConfig, LogReportingConfig};
use crate::harvest::HarvestLifecycleAware;
use crate::logging::forwarder::{LogForwarder, LogTransport};
use crate::logging::logger::Logger;
use crate::logging::record::CommonAttributes;
use crate::logging::remote::RemoteLogger;
use crate::logging::reporter::{LogReportResult, LogReporter};
use crate::observability::metrics::{SupportabilityStats, LOGS_INIT};

pub struct LogReporting {
    reporter: Arc<LogReporter>,
    remote: Arc<RemoteLogger>,
    session_id: String,
}

impl LogReporting {
    /// Open the log store and build the collector transport from `config`.
    /// Must be called from within a tokio runtime.
    pub fn initialize(config: &AgentConfig, stats: Arc<SupportabilityStats>) -> LogReportResult<Self> {
        let transport = Arc::new(LogForwarder::new(&config.transport)?);
        Self::with_transport(&config.log_reporting, stats, transport)
    }

    pub fn with_transport(
        config: &LogReportingConfig,
        stats: Arc<SupportabilityStats>,
        transport: Arc<dyn LogTransport>,
    ) -> LogReportResult<Self> {
        let reporter = Arc::new(LogReporter::new(config, stats.clone(), transport)?);
        let session_id = Uuid::new_v4().to_string();
        let common = CommonAttributes::new(&config.entity_guid, &session_id);
        let remote = Arc::new(RemoteLogger::new(reporter.clone(), config, common, stats.clone()));

        stats.inc(LOGS_INIT);
        tracing::debug!(
            session_id = %session_id,
            pool_size = remote.pool_size(),
            level = %remote.level(),
            "Log reporting initialized"
        );

        Ok(Self {
            reporter,
            remote,
            session_id,
        })
    }

    /// Attach the reporter to the harvest cycle.
    pub fn start(&self) -> LogReportResult<()> {
        self.reporter.start()
    }

    pub fn reporter(&self) -> &Arc<LogReporter> {
        &self.reporter
    }

    pub fn remote_logger(&self) -> &Arc<RemoteLogger> {
        &self.remote
    }

    pub fn logger(&self) -> Logger {
        Logger::Remote(self.remote.clone())
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Listeners in harvest order: the logger flushes before the reporter rolls.
    pub fn harvest_listeners(&self) -> Vec<Arc<dyn HarvestLifecycleAware>> {
        vec![self.remote.clone(), self.reporter.clone()]
    }

    pub async fn shutdown(&self) {
        self.remote.shutdown().await;
        self.reporter.stop();
        tracing::info!("Log reporting shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::level::LogLevel;
    use crate::logging::store::{self, LogFileState};
    use std::fs;

    #[tokio::test]
    async fn test_initialize_and_harvest_pass() {
        let root = std::env::temp_dir().join(format!("reporting-{}", Uuid::new_v4()));
        fs::create_dir_all(&root).unwrap();

        let mut config = AgentConfig::default();
        config.log_reporting.enabled = true;
        config.log_reporting.level = LogLevel::Info;
        config.log_reporting.data_dir = root.clone();
        config.log_reporting.entity_guid = "entity-1".into();
        config.transport.collector_host = "127.0.0.1:1".into();
        config.transport.use_ssl = false;
        config.transport.timeout_secs = 1;

        let stats = Arc::new(SupportabilityStats::new());
        let reporting = LogReporting::initialize(&config, stats.clone()).unwrap();
        reporting.start().unwrap();
        assert_eq!(stats.count(LOGS_INIT), 1);
        assert!(reporting.logger().is_initialized());

        reporting.logger().info("hello");
        for listener in reporting.harvest_listeners() {
            listener.on_harvest().await;
        }

        let dir = reporting.reporter().store_dir().to_path_buf();
        let rollups = store::list(&dir, LogFileState::Rollup).unwrap();
        assert_eq!(rollups.len(), 1);
        let records: Vec<serde_json::Value> =
            serde_json::from_slice(&fs::read(&rollups[0]).unwrap()).unwrap();
        assert_eq!(records[0]["entity.guid"], "entity-1");
        assert_eq!(records[0]["session.id"], reporting.session_id());

        reporting.shutdown().await;
        assert!(!reporting.reporter().is_attached());
        fs::remove_dir_all(&root).unwrap();
    }
}
