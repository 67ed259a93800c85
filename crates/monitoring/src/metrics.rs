//! Per-endpoint request metrics

use dashmap::DashMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

static ORIGIN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://[^/]+").expect("ORIGIN_REGEX is a valid regex pattern")
});

static NUMERIC_SEGMENT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/\d+(/|$)").expect("NUMERIC_SEGMENT_REGEX is a valid regex pattern")
});

/// Aggregated statistics for one `<METHOD> <endpoint>` key
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointMetrics {
    pub count: u64,
    pub errors: u64,
    pub total_ms: u64,
    pub min_ms: u64,
    pub max_ms: u64,
    pub avg_ms: f64,
}

impl EndpointMetrics {
    fn record(&mut self, duration_ms: u64, success: bool) {
        if self.count == 0 || duration_ms < self.min_ms {
            self.min_ms = duration_ms;
        }
        self.max_ms = self.max_ms.max(duration_ms);
        self.count += 1;
        self.total_ms += duration_ms;
        self.avg_ms = self.total_ms as f64 / self.count as f64;
        if !success {
            self.errors += 1;
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.errors as f64 / self.count as f64
        }
    }
}

/// Point-in-time copy of all collected metrics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub endpoints: BTreeMap<String, EndpointMetrics>,
    pub total_requests: u64,
    pub total_errors: u64,
}

/// Collapse numeric ids and strip origin/query so that
/// `https://host/people/v2/people/123?x=1` and `/people/456` share a key shape.
pub fn normalize_endpoint(endpoint: &str) -> String {
    let path = ORIGIN_REGEX.replace(endpoint, "");
    let path = path.split('?').next().unwrap_or_default();
    // Applied twice: adjacent ids share the separating slash.
    let once = NUMERIC_SEGMENT_REGEX.replace_all(path, "/:id$1");
    let twice = NUMERIC_SEGMENT_REGEX.replace_all(&once, "/:id$1");
    if twice.is_empty() {
        "/".to_string()
    } else {
        twice.into_owned()
    }
}

/// Thread-safe collector shared by every request of a client
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector {
    endpoints: Arc<DashMap<String, EndpointMetrics>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(method: &str, endpoint: &str) -> String {
        format!("{} {}", method.to_ascii_uppercase(), normalize_endpoint(endpoint))
    }

    /// Record one finished request
    pub fn record(&self, method: &str, endpoint: &str, duration: Duration, success: bool) {
        let key = Self::key(method, endpoint);
        self.endpoints
            .entry(key)
            .or_default()
            .record(duration.as_millis() as u64, success);
    }

    pub fn get(&self, method: &str, endpoint: &str) -> Option<EndpointMetrics> {
        self.endpoints
            .get(&Self::key(method, endpoint))
            .map(|entry| entry.value().clone())
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let endpoints: BTreeMap<String, EndpointMetrics> = self
            .endpoints
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        let total_requests = endpoints.values().map(|m| m.count).sum();
        let total_errors = endpoints.values().map(|m| m.errors).sum();

        MetricsSnapshot {
            endpoints,
            total_requests,
            total_errors,
        }
    }

    pub fn reset(&self) {
        self.endpoints.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_endpoint() {
        assert_eq!(normalize_endpoint("/people/123"), "/people/:id");
        assert_eq!(normalize_endpoint("/people/1/emails/22"), "/people/:id/emails/:id");
        assert_eq!(normalize_endpoint("/people?per_page=100"), "/people");
        assert_eq!(
            normalize_endpoint("https://api.example.test/people/v2/people/9"),
            "/people/v2/people/:id"
        );
        assert_eq!(normalize_endpoint("/lists/7/rules"), "/lists/:id/rules");
    }

    #[test]
    fn test_record_aggregates_per_key() {
        let metrics = MetricsCollector::new();
        metrics.record("get", "/people/1", Duration::from_millis(40), true);
        metrics.record("GET", "/people/2", Duration::from_millis(10), true);
        metrics.record("GET", "/people/3", Duration::from_millis(70), false);

        let entry = metrics.get("GET", "/people/5").unwrap();
        assert_eq!(entry.count, 3);
        assert_eq!(entry.errors, 1);
        assert_eq!(entry.min_ms, 10);
        assert_eq!(entry.max_ms, 70);
        assert_eq!(entry.total_ms, 120);
        assert!((entry.avg_ms - 40.0).abs() < f64::EPSILON);
        assert!((entry.error_rate() - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_snapshot_totals_and_reset() {
        let metrics = MetricsCollector::new();
        metrics.record("GET", "/people", Duration::from_millis(5), true);
        metrics.record("POST", "/people", Duration::from_millis(5), false);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_requests, 2);
        assert_eq!(snapshot.total_errors, 1);
        assert!(snapshot.endpoints.contains_key("POST /people"));

        metrics.reset();
        assert_eq!(metrics.snapshot().total_requests, 0);
    }
}
