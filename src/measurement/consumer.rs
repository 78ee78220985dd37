//! Measurement consumers: metric aggregators and the transaction harvester.
//!
//! # Responsibilities
//! - Turn broadcast measurements into named metrics
//! - Push aggregated metrics to the harvest sink on every harvest
//! - Forward completed HTTP transactions to the harvest sink
//!
//! # Metric names
//! - Activity: `Mobile/Activity/Name/<activity>`
//! - Method: `Method/<name>`
//! - Custom: `Custom/<category>/<name>[units]`
//! - Summary: `Mobile/Summary/<category>` (scoped only, `#` becomes `/`)

use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};

use crate::harvest::{HarvestLifecycleAware, HarvestSink};
use crate::measurement::metric::{Metric, MetricStore};
use crate::measurement::pool::MeasurementConsumer;
use crate::measurement::types::{Measurement, MeasurementDetail, MeasurementType};

pub const ACTIVITY_METRIC_PREFIX: &str = "Mobile/Activity/Name/";
pub const METHOD_METRIC_PREFIX: &str = "Method/";
pub const CUSTOM_METRIC_PREFIX: &str = "Custom/";
pub const SUMMARY_METRIC_PREFIX: &str = "Mobile/Summary/";

/// Category name used for network measurements in summary metrics.
pub const NETWORK_CATEGORY: &str = "Network";

/// How a metric consumer names and aggregates what it receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricFlavor {
    Activity,
    Method,
    Custom,
    Summary,
}

impl MetricFlavor {
    fn measurement_type(self) -> MeasurementType {
        match self {
            MetricFlavor::Activity => MeasurementType::Activity,
            MetricFlavor::Method => MeasurementType::Method,
            MetricFlavor::Custom => MeasurementType::Custom,
            MetricFlavor::Summary => MeasurementType::Any,
        }
    }

    fn records_unscoped(self) -> bool {
        !matches!(self, MetricFlavor::Summary)
    }
}

/// Aggregates measurements into metrics until the next harvest.
pub struct MetricMeasurementConsumer {
    flavor: MetricFlavor,
    metrics: MetricStore,
    sink: Arc<dyn HarvestSink>,
}

impl MetricMeasurementConsumer {
    pub fn new(flavor: MetricFlavor, sink: Arc<dyn HarvestSink>) -> Self {
        Self {
            flavor,
            metrics: MetricStore::new(),
            sink,
        }
    }

    pub fn activity(sink: Arc<dyn HarvestSink>) -> Self {
        Self::new(MetricFlavor::Activity, sink)
    }

    pub fn method(sink: Arc<dyn HarvestSink>) -> Self {
        Self::new(MetricFlavor::Method, sink)
    }

    pub fn custom(sink: Arc<dyn HarvestSink>) -> Self {
        Self::new(MetricFlavor::Custom, sink)
    }

    pub fn summary(sink: Arc<dyn HarvestSink>) -> Self {
        Self::new(MetricFlavor::Summary, sink)
    }

    pub fn flavor(&self) -> MetricFlavor {
        self.flavor
    }

    pub fn metrics(&self) -> &MetricStore {
        &self.metrics
    }

    fn consume_one(&self, measurement: &Measurement) {
        match self.flavor {
            MetricFlavor::Activity => {
                let name = format!("{}{}", ACTIVITY_METRIC_PREFIX, measurement.name());
                self.sample_timed(&name, measurement);
            }
            MetricFlavor::Method => {
                let name = format!("{}{}", METHOD_METRIC_PREFIX, measurement.name());
                self.sample_timed(&name, measurement);
            }
            MetricFlavor::Custom => self.consume_custom(measurement),
            MetricFlavor::Summary => self.consume_summary(measurement),
        }
    }

    /// Record elapsed and exclusive time, scoped and (optionally) unscoped.
    fn sample_timed(&self, name: &str, measurement: &Measurement) {
        let delta = measurement.duration_secs();
        let exclusive = measurement.exclusive_time_secs();

        if let Some(scope) = measurement.scope() {
            self.metrics.update(name, Some(scope), |m| {
                m.sample(delta).add_exclusive(exclusive);
            });
        }

        if self.flavor.records_unscoped() {
            self.metrics.update(name, None, |m| {
                m.sample(delta).add_exclusive(exclusive);
            });
        }
    }

    fn consume_custom(&self, measurement: &Measurement) {
        if let MeasurementDetail::Custom {
            count,
            total_value,
            exclusive_value,
            ..
        } = measurement.detail()
        {
            let name = format!("{}{}", CUSTOM_METRIC_PREFIX, measurement.name());
            self.metrics.add(Metric::with_values(
                name,
                measurement.scope().map(str::to_string),
                *count,
                *total_value,
                *exclusive_value,
            ));
        }
    }

    fn consume_summary(&self, measurement: &Measurement) {
        let category = match (measurement.kind(), measurement.detail()) {
            (MeasurementType::Network, _) => NETWORK_CATEGORY,
            (MeasurementType::Method, MeasurementDetail::Method { category: Some(c) }) => c.as_str(),
            (MeasurementType::Custom, MeasurementDetail::Custom { category, .. })
                if !category.is_empty() =>
            {
                category.as_str()
            }
            _ => return,
        };
        let name = format!("{}{}", SUMMARY_METRIC_PREFIX, category.replace('#', "/"));
        self.sample_timed(&name, measurement);
    }
}

impl MeasurementConsumer for MetricMeasurementConsumer {
    fn measurement_type(&self) -> MeasurementType {
        self.flavor.measurement_type()
    }

    fn consume_measurements(&self, measurements: &[Arc<Measurement>]) {
        for measurement in measurements {
            self.consume_one(measurement);
        }
    }
}

impl HarvestLifecycleAware for MetricMeasurementConsumer {
    fn on_harvest(&self) -> BoxFuture<'_, ()> {
        async move {
            for metric in self.metrics.get_all() {
                if let Err(e) = self.sink.add_metric(metric) {
                    tracing::debug!(error = %e, flavor = ?self.flavor, "Metric not harvested");
                }
            }
        }
        .boxed()
    }

    fn on_harvest_complete(&self) -> BoxFuture<'_, ()> {
        async move { self.metrics.clear() }.boxed()
    }

    fn on_harvest_stop(&self) -> BoxFuture<'_, ()> {
        async move { self.metrics.clear() }.boxed()
    }
}

/// Forwards completed HTTP transactions to the harvest sink.
pub struct HttpTransactionHarvester {
    sink: Arc<dyn HarvestSink>,
}

impl HttpTransactionHarvester {
    pub fn new(sink: Arc<dyn HarvestSink>) -> Self {
        Self { sink }
    }
}

impl MeasurementConsumer for HttpTransactionHarvester {
    fn measurement_type(&self) -> MeasurementType {
        MeasurementType::Network
    }

    fn consume_measurements(&self, measurements: &[Arc<Measurement>]) {
        for measurement in measurements {
            if let MeasurementDetail::Network(transaction) = measurement.detail() {
                if let Err(e) = self.sink.add_http_transaction(transaction.clone()) {
                    tracing::debug!(url = %transaction.url, error = %e, "Transaction not harvested");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::HarvestData;
    use crate::measurement::types::{HttpTransaction, Trace};
    use crate::observability::SupportabilityStats;

    fn sink() -> Arc<HarvestData> {
        Arc::new(HarvestData::new(Arc::new(SupportabilityStats::new())))
    }

    fn traced(name: &str, scope: Option<&str>, category: Option<&str>) -> Arc<Measurement> {
        let mut trace = Trace::new(name, 1_000, 3_000);
        trace.scope = scope.map(str::to_string);
        trace.exclusive_time = 500;
        trace.category = category.map(str::to_string);
        Arc::new(Measurement::from_trace(&trace))
    }

    #[test]
    fn test_method_consumer_records_scoped_and_unscoped() {
        let consumer = MetricMeasurementConsumer::method(sink());
        consumer.consume_measurements(&[traced("doWork", Some("Mobile/Activity/Name/Main"), None)]);

        let unscoped = consumer.metrics().get("Method/doWork", None).unwrap();
        assert_eq!(unscoped.count, 1);
        assert_eq!(unscoped.total, 2.0);
        assert_eq!(unscoped.exclusive, 0.5);
        assert!(consumer
            .metrics()
            .get("Method/doWork", Some("Mobile/Activity/Name/Main"))
            .is_some());
    }

    #[test]
    fn test_summary_consumer_is_scoped_only() {
        let consumer = MetricMeasurementConsumer::summary(sink());
        consumer.consume_measurements(&[
            traced("a", Some("Mobile/Activity/Name/Main"), Some("Database#Query")),
            traced("b", None, Some("Database#Query")),
            traced("c", Some("Mobile/Activity/Name/Main"), None),
        ]);

        assert_eq!(consumer.metrics().len(), 1);
        let m = consumer
            .metrics()
            .get("Mobile/Summary/Database/Query", Some("Mobile/Activity/Name/Main"))
            .unwrap();
        assert_eq!(m.count, 1);
    }

    #[test]
    fn test_custom_consumer_aggregates_values() {
        let consumer = MetricMeasurementConsumer::custom(sink());
        let m = Arc::new(Measurement::custom_metric("Assets/Download", "Assets", 2, 10.0, 4.0, None, None));
        consumer.consume_measurements(&[m.clone(), m]);

        let metric = consumer.metrics().get("Custom/Assets/Download", None).unwrap();
        assert_eq!(metric.count, 4);
        assert_eq!(metric.total, 20.0);
        assert_eq!(metric.exclusive, 8.0);
    }

    #[tokio::test]
    async fn test_harvest_pushes_then_clears() {
        let data = sink();
        let consumer = MetricMeasurementConsumer::method(data.clone());
        consumer.consume_measurements(&[traced("doWork", None, None)]);

        consumer.on_harvest().await;
        assert_eq!(data.metric_count(), 1);

        consumer.on_harvest_complete().await;
        assert!(consumer.metrics().is_empty());
    }

    #[test]
    fn test_transaction_harvester_forwards() {
        let data = sink();
        let harvester = HttpTransactionHarvester::new(data.clone());
        let tx = HttpTransaction::new("https://example.com/a", "GET", 200, 0, 0, 0.1, 1, 2, None);
        harvester.consume_measurements(&[Arc::new(Measurement::from_http_transaction(tx, None))]);
        assert_eq!(data.transaction_count(), 1);
    }
}
