//! Metric aggregates and the per-consumer metric store.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Aggregated timing/count metric.
///
/// `min`/`max` are `None` until the first sample. Count-only metrics (built
/// by [`Metric::increment`] alone) ignore value fields when aggregated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    pub scope: Option<String>,
    pub count: u64,
    pub total: f64,
    pub exclusive: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub sum_of_squares: f64,
    count_only: bool,
}

impl Metric {
    pub fn new(name: impl Into<String>) -> Self {
        Self::scoped(name, None)
    }

    pub fn scoped(name: impl Into<String>, scope: Option<String>) -> Self {
        Self {
            name: name.into(),
            scope,
            count: 0,
            total: 0.0,
            exclusive: 0.0,
            min: None,
            max: None,
            sum_of_squares: 0.0,
            count_only: true,
        }
    }

    /// Pre-aggregated metric, as reported by custom metric calls.
    pub fn with_values(
        name: impl Into<String>,
        scope: Option<String>,
        count: u64,
        total: f64,
        exclusive: f64,
    ) -> Self {
        let mut m = Self::scoped(name, scope);
        m.count = count;
        m.total = total;
        m.exclusive = exclusive;
        m.min = Some(total);
        m.max = Some(total);
        m.sum_of_squares = total * total;
        m.count_only = false;
        m
    }

    /// Record one value.
    pub fn sample(&mut self, value: f64) -> &mut Self {
        self.count += 1;
        self.total += value;
        self.count_only = false;
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
        self.sum_of_squares += value * value;
        self
    }

    pub fn add_exclusive(&mut self, value: f64) -> &mut Self {
        self.exclusive += value;
        self
    }

    pub fn increment(&mut self, n: u64) -> &mut Self {
        self.count += n;
        self
    }

    /// Fold another metric into this one.
    pub fn aggregate(&mut self, other: &Metric) -> &mut Self {
        self.count += other.count;
        if !other.count_only {
            self.count_only = false;
            self.total += other.total;
            self.exclusive += other.exclusive;
            self.sum_of_squares += other.sum_of_squares;
            if let Some(v) = other.min {
                self.min = Some(self.min.map_or(v, |m| m.min(v)));
            }
            if let Some(v) = other.max {
                self.max = Some(self.max.map_or(v, |m| m.max(v)));
            }
        }
        self
    }

    pub fn is_count_only(&self) -> bool {
        self.count_only
    }

    pub fn is_scoped(&self) -> bool {
        self.scope.is_some()
    }
}

type MetricKey = (String, String);

fn key(name: &str, scope: Option<&str>) -> MetricKey {
    (scope.unwrap_or_default().to_string(), name.to_string())
}

/// Concurrent store of metrics keyed by (scope, name).
#[derive(Debug, Default)]
pub struct MetricStore {
    metrics: DashMap<MetricKey, Metric>,
}

impl MetricStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert, aggregating into an existing metric with the same key.
    pub fn add(&self, metric: Metric) {
        self.metrics
            .entry(key(&metric.name, metric.scope.as_deref()))
            .and_modify(|existing| {
                existing.aggregate(&metric);
            })
            .or_insert(metric);
    }

    /// Update the metric for (name, scope) in place, creating it if absent.
    pub fn update<F>(&self, name: &str, scope: Option<&str>, f: F)
    where
        F: FnOnce(&mut Metric),
    {
        let mut entry = self
            .metrics
            .entry(key(name, scope))
            .or_insert_with(|| Metric::scoped(name, scope.map(str::to_string)));
        f(entry.value_mut());
    }

    pub fn get(&self, name: &str, scope: Option<&str>) -> Option<Metric> {
        self.metrics.get(&key(name, scope)).map(|m| m.clone())
    }

    pub fn get_all(&self) -> Vec<Metric> {
        self.metrics.iter().map(|m| m.value().clone()).collect()
    }

    /// Remove and return every metric with the given scope.
    pub fn remove_all_with_scope(&self, scope: &str) -> Vec<Metric> {
        let keys: Vec<MetricKey> = self
            .metrics
            .iter()
            .filter(|entry| entry.key().0 == scope)
            .map(|entry| entry.key().clone())
            .collect();
        keys.into_iter()
            .filter_map(|k| self.metrics.remove(&k).map(|(_, m)| m))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn clear(&self) {
        self.metrics.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_updates_statistics() {
        let mut m = Metric::new("Method/doWork");
        m.sample(2.0).sample(4.0).add_exclusive(1.5);

        assert_eq!(m.count, 2);
        assert_eq!(m.total, 6.0);
        assert_eq!(m.min, Some(2.0));
        assert_eq!(m.max, Some(4.0));
        assert_eq!(m.sum_of_squares, 20.0);
        assert_eq!(m.exclusive, 1.5);
        assert!(!m.is_count_only());
    }

    #[test]
    fn test_aggregate_count_only_ignores_values() {
        let mut sampled = Metric::new("a");
        sampled.sample(3.0);

        let mut counter = Metric::new("a");
        counter.increment(5);
        counter.total = 100.0;

        sampled.aggregate(&counter);
        assert_eq!(sampled.count, 6);
        assert_eq!(sampled.total, 3.0);
    }

    #[test]
    fn test_store_aggregates_by_key() {
        let store = MetricStore::new();
        let mut a = Metric::new("x");
        a.sample(1.0);
        let mut b = Metric::new("x");
        b.sample(3.0);
        let mut scoped = Metric::scoped("x", Some("Mobile/Activity/Name/Main".into()));
        scoped.sample(5.0);

        store.add(a);
        store.add(b);
        store.add(scoped);

        assert_eq!(store.len(), 2);
        let unscoped = store.get("x", None).unwrap();
        assert_eq!(unscoped.count, 2);
        assert_eq!(unscoped.max, Some(3.0));

        let removed = store.remove_all_with_scope("Mobile/Activity/Name/Main");
        assert_eq!(removed.len(), 1);
        assert_eq!(store.len(), 1);
    }
}
