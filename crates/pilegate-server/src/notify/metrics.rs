//! Delivery metrics.
//!
//! Per-endpoint counters plus a global aggregate, exposed through snapshot
//! copies. The mutex is never held across an await point.

use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard},
};

use serde::Serialize;

/// Counters for one endpoint (or the aggregate).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EndpointMetrics {
    /// Delivery attempts.
    pub sent: u64,
    /// 2xx responses.
    pub success: u64,
    /// Timeouts, transport failures, and non-2xx responses.
    pub failed: u64,
    /// Events dropped after exhausting retries or aging out.
    pub dropped: u64,
    /// Unix seconds of the last success.
    pub last_success_ts: Option<u64>,
    /// Unix seconds of the last failure.
    pub last_failure_ts: Option<u64>,
    /// Running mean response time of successful deliveries, milliseconds.
    pub avg_response_time_ms: f64,
}

#[derive(Debug, Default)]
struct Inner {
    endpoints: BTreeMap<String, EndpointMetrics>,
    total: EndpointMetrics,
}

/// Shared delivery metrics.
#[derive(Debug, Default)]
pub struct NotifyMetrics {
    inner: Mutex<Inner>,
}

impl NotifyMetrics {
    /// New empty metrics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Record a successful delivery.
    pub fn record_success(&self, endpoint: &str, now_secs: u64, elapsed_ms: f64) {
        let mut guard = self.lock();
        let inner = &mut *guard;
        for m in [inner.endpoints.entry(endpoint.to_string()).or_default(), &mut inner.total] {
            m.sent += 1;
            m.success += 1;
            m.last_success_ts = Some(now_secs);
            m.avg_response_time_ms += (elapsed_ms - m.avg_response_time_ms) / m.success as f64;
        }
    }

    /// Record a failed delivery attempt.
    pub fn record_failure(&self, endpoint: &str, now_secs: u64) {
        let mut guard = self.lock();
        let inner = &mut *guard;
        for m in [inner.endpoints.entry(endpoint.to_string()).or_default(), &mut inner.total] {
            m.sent += 1;
            m.failed += 1;
            m.last_failure_ts = Some(now_secs);
        }
    }

    /// Record an event dropped from the retry pipeline.
    pub fn record_dropped(&self, endpoint: &str) {
        let mut guard = self.lock();
        let inner = &mut *guard;
        for m in [inner.endpoints.entry(endpoint.to_string()).or_default(), &mut inner.total] {
            m.dropped += 1;
        }
    }

    /// Copy of every counter.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.lock();
        MetricsSnapshot { endpoints: inner.endpoints.clone(), total: inner.total.clone() }
    }
}

/// Immutable metrics copy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Per-endpoint counters, keyed by endpoint name.
    pub endpoints: BTreeMap<String, EndpointMetrics>,
    /// Aggregate across all endpoints.
    pub total: EndpointMetrics,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_updates_endpoint_and_total() {
        let metrics = NotifyMetrics::new();
        metrics.record_success("ops", 1_700_000_000, 40.0);
        metrics.record_success("ops", 1_700_000_010, 60.0);

        let snap = metrics.snapshot();
        let ops = &snap.endpoints["ops"];
        assert_eq!(ops.sent, 2);
        assert_eq!(ops.success, 2);
        assert_eq!(ops.last_success_ts, Some(1_700_000_010));
        assert!((ops.avg_response_time_ms - 50.0).abs() < 1e-9);

        assert_eq!(snap.total.success, 2);
    }

    #[test]
    fn failures_and_drops_are_separate() {
        let metrics = NotifyMetrics::new();
        metrics.record_failure("ops", 1_700_000_000);
        metrics.record_dropped("ops");

        let snap = metrics.snapshot();
        assert_eq!(snap.endpoints["ops"].failed, 1);
        assert_eq!(snap.endpoints["ops"].dropped, 1);
        assert_eq!(snap.endpoints["ops"].success, 0);
        assert_eq!(snap.total.sent, 1);
    }

    #[test]
    fn endpoints_are_isolated() {
        let metrics = NotifyMetrics::new();
        metrics.record_success("a", 1, 10.0);
        metrics.record_failure("b", 2);

        let snap = metrics.snapshot();
        assert_eq!(snap.endpoints["a"].success, 1);
        assert_eq!(snap.endpoints["a"].failed, 0);
        assert_eq!(snap.endpoints["b"].failed, 1);
        assert_eq!(snap.total.sent, 2);
    }
}
