//! Reconnect statistics.
//!
//! Reconnection is unconditional: a device may reconnect at any rate. This
//! tracker exists purely for observability; it never throttles or
//! blacklists. Quality is recomputed over a rolling window as
//! `1 - recent_reconnects / max_reconnects`, where `max_reconnects` is the
//! window divided by the stability threshold.

use std::{
    collections::{HashMap, VecDeque},
    time::Duration,
};

use serde::Serialize;

/// Reconnect observation window configuration.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Rolling window for the quality computation.
    pub window: Duration,
    /// A connection shorter than this counts against stability.
    pub stability_threshold: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self { window: Duration::from_secs(600), stability_threshold: Duration::from_secs(30) }
    }
}

#[derive(Debug, Clone)]
struct DeviceReconnects<I> {
    recent: VecDeque<I>,
    total: u64,
    consecutive_failures: u32,
}

/// Per-device reconnect history for the whole gateway.
#[derive(Debug)]
pub struct ReconnectTracker<I>
where
    I: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>,
{
    config: ReconnectConfig,
    devices: HashMap<String, DeviceReconnects<I>>,
}

impl<I> ReconnectTracker<I>
where
    I: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>,
{
    /// New tracker with the given window configuration.
    #[must_use]
    pub fn new(config: ReconnectConfig) -> Self {
        Self { config, devices: HashMap::new() }
    }

    /// Record a successful (re)connection of a device.
    pub fn record_connect(&mut self, device_id: &str, now: I) {
        let entry = self.devices.entry(device_id.to_string()).or_insert_with(|| {
            DeviceReconnects { recent: VecDeque::new(), total: 0, consecutive_failures: 0 }
        });
        entry.total += 1;
        entry.consecutive_failures = 0;
        entry.recent.push_back(now);
        Self::prune(&mut entry.recent, now, self.config.window);
    }

    /// Record a failed registration or abnormal drop.
    ///
    /// Counts against devices that have never connected successfully too;
    /// the streak resets on the next successful connect.
    pub fn record_failure(&mut self, device_id: &str) {
        let entry = self.devices.entry(device_id.to_string()).or_insert_with(|| {
            DeviceReconnects { recent: VecDeque::new(), total: 0, consecutive_failures: 0 }
        });
        entry.consecutive_failures += 1;
    }

    /// Connection quality in `[0, 1]`; `1.0` for unknown devices.
    #[must_use]
    pub fn quality(&self, device_id: &str, now: I) -> f64 {
        let Some(entry) = self.devices.get(device_id) else {
            return 1.0;
        };

        let recent = entry
            .recent
            .iter()
            .filter(|&&at| now - at <= self.config.window)
            .count();
        let max_reconnects =
            (self.config.window.as_secs() / self.config.stability_threshold.as_secs()).max(1);

        (1.0 - recent as f64 / max_reconnects as f64).clamp(0.0, 1.0)
    }

    /// Observability snapshot for one device.
    #[must_use]
    pub fn snapshot(&self, device_id: &str, now: I) -> ReconnectSnapshot {
        let quality = self.quality(device_id, now);
        let Some(entry) = self.devices.get(device_id) else {
            return ReconnectSnapshot {
                total: 0,
                recent: 0,
                consecutive_failures: 0,
                quality,
            };
        };

        ReconnectSnapshot {
            total: entry.total,
            recent: entry
                .recent
                .iter()
                .filter(|&&at| now - at <= self.config.window)
                .count() as u64,
            consecutive_failures: entry.consecutive_failures,
            quality,
        }
    }

    /// Forget a device entirely (after its session leaves the registry).
    pub fn forget(&mut self, device_id: &str) {
        self.devices.remove(device_id);
    }

    fn prune(recent: &mut VecDeque<I>, now: I, window: Duration) {
        while let Some(&front) = recent.front() {
            if now - front > window {
                recent.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Immutable reconnect statistics for one device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconnectSnapshot {
    /// Lifetime reconnect count.
    pub total: u64,
    /// Reconnects inside the rolling window.
    pub recent: u64,
    /// Failures since the last successful connect.
    pub consecutive_failures: u32,
    /// Rolling stability quality in `[0, 1]`.
    pub quality: f64,
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    #[test]
    fn unknown_device_is_pristine() {
        let t: ReconnectTracker<Instant> = ReconnectTracker::new(ReconnectConfig::default());
        assert!((t.quality("04A26CF3", Instant::now()) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn single_connect_barely_moves_quality() {
        let mut t = ReconnectTracker::new(ReconnectConfig::default());
        let now = Instant::now();
        t.record_connect("04A26CF3", now);

        // max_reconnects = 600 / 30 = 20, so one connect costs 0.05.
        let q = t.quality("04A26CF3", now);
        assert!((q - 0.95).abs() < 1e-9);
    }

    #[test]
    fn flapping_device_hits_zero() {
        let mut t = ReconnectTracker::new(ReconnectConfig::default());
        let now = Instant::now();
        for _ in 0..40 {
            t.record_connect("04A26CF3", now);
        }

        assert!((t.quality("04A26CF3", now) - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn old_reconnects_age_out() {
        let mut t = ReconnectTracker::new(ReconnectConfig::default());
        let start = Instant::now();
        for _ in 0..10 {
            t.record_connect("04A26CF3", start);
        }

        let later = start + Duration::from_secs(601);
        assert!((t.quality("04A26CF3", later) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn failures_count_before_first_connect() {
        let mut t: ReconnectTracker<Instant> = ReconnectTracker::new(ReconnectConfig::default());
        let now = Instant::now();

        t.record_failure("04A26CF3");
        t.record_failure("04A26CF3");

        let snap = t.snapshot("04A26CF3", now);
        assert_eq!(snap.consecutive_failures, 2);
        assert_eq!(snap.total, 0);
    }

    #[test]
    fn forget_removes_all_state() {
        let mut t = ReconnectTracker::new(ReconnectConfig::default());
        let now = Instant::now();

        t.record_connect("04A26CF3", now);
        t.record_failure("04A26CF3");
        t.forget("04A26CF3");

        let snap = t.snapshot("04A26CF3", now);
        assert_eq!(snap.total, 0);
        assert_eq!(snap.consecutive_failures, 0);
        assert!((snap.quality - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn failures_reset_on_connect() {
        let mut t = ReconnectTracker::new(ReconnectConfig::default());
        let now = Instant::now();
        t.record_connect("04A26CF3", now);
        t.record_failure("04A26CF3");
        t.record_failure("04A26CF3");

        assert_eq!(t.snapshot("04A26CF3", now).consecutive_failures, 2);

        t.record_connect("04A26CF3", now);
        assert_eq!(t.snapshot("04A26CF3", now).consecutive_failures, 0);
        assert_eq!(t.snapshot("04A26CF3", now).total, 2);
    }
}
