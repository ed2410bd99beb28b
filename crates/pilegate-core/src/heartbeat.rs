//! Adaptive per-device heartbeat tracking.
//!
//! Each device keeps an expected heartbeat interval that widens while the
//! link is clean and narrows when beats arrive late or go missing. The
//! adjusted interval never pushes configuration back to the device; it only
//! governs the supervisor's timeout budget.

use std::time::Duration;

use serde::Serialize;

/// Heartbeat cadence configuration.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Initial expected interval.
    pub standard_interval: Duration,
    /// Lower clamp for the adapted interval.
    pub min_interval: Duration,
    /// Upper clamp for the adapted interval.
    pub max_interval: Duration,
    /// Latency considered "on time".
    pub latency_threshold: Duration,
    /// Base supervisor timeout before a device is considered offline.
    pub timeout: Duration,
    /// Whether the expected interval adapts at all.
    pub adaptive: bool,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            standard_interval: Duration::from_secs(20),
            min_interval: Duration::from_secs(15),
            max_interval: Duration::from_secs(60),
            latency_threshold: Duration::from_millis(500),
            timeout: Duration::from_secs(180),
            adaptive: true,
        }
    }
}

/// Per-device heartbeat statistics and adaptive interval.
#[derive(Debug, Clone)]
pub struct HeartbeatTracker<I>
where
    I: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>,
{
    config: HeartbeatConfig,
    expected_interval: Duration,
    average_latency_ms: f64,
    last_latency_ms: i64,
    heartbeat_count: u64,
    missed_count: u64,
    quality: f64,
    last_beat: Option<I>,
}

impl<I> HeartbeatTracker<I>
where
    I: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>,
{
    /// New tracker starting at the standard interval with perfect quality.
    #[must_use]
    pub fn new(config: HeartbeatConfig) -> Self {
        let expected_interval = config.standard_interval;
        Self {
            config,
            expected_interval,
            average_latency_ms: 0.0,
            last_latency_ms: 0,
            heartbeat_count: 0,
            missed_count: 0,
            quality: 1.0,
            last_beat: None,
        }
    }

    /// Current expected interval, always within `[min, max]`.
    #[must_use]
    pub fn expected_interval(&self) -> Duration {
        self.expected_interval
    }

    /// Network quality in `[0, 1]`.
    #[must_use]
    pub fn quality(&self) -> f64 {
        self.quality
    }

    /// Heartbeats observed.
    #[must_use]
    pub fn heartbeat_count(&self) -> u64 {
        self.heartbeat_count
    }

    /// Heartbeats the supervisor declared missed.
    #[must_use]
    pub fn missed_count(&self) -> u64 {
        self.missed_count
    }

    /// Supervisor timeout budget for this device.
    ///
    /// At least the configured timeout; a widened interval extends the
    /// budget proportionally so slow-but-steady devices are not flapped.
    #[must_use]
    pub fn timeout_budget(&self) -> Duration {
        self.config.timeout.max(self.expected_interval * 3)
    }

    /// Record a heartbeat arrival.
    pub fn record_beat(&mut self, now: I) {
        self.heartbeat_count += 1;

        if let Some(prev) = self.last_beat {
            let observed = now - prev;
            let observed_ms = observed.as_millis() as i64;
            let expected_ms = self.expected_interval.as_millis() as i64;

            self.last_latency_ms = observed_ms - expected_ms;
            self.average_latency_ms += (self.last_latency_ms as f64 - self.average_latency_ms)
                / self.heartbeat_count as f64;

            self.recompute_quality();
            if self.config.adaptive {
                self.adapt();
            }
        }

        self.last_beat = Some(now);
    }

    /// Record a missed heartbeat (supervisor timeout fired).
    pub fn record_missed(&mut self) {
        self.missed_count += 1;
        self.recompute_quality();
        if self.config.adaptive {
            self.adapt();
        }
    }

    fn recompute_quality(&mut self) {
        let threshold_ms = self.config.latency_threshold.as_millis() as i64;
        let latency_score = if self.last_latency_ms.abs() <= threshold_ms { 1.0 } else { 0.5 };

        let total = self.heartbeat_count + self.missed_count;
        let miss_score =
            if total == 0 { 1.0 } else { 1.0 - self.missed_count as f64 / total as f64 };

        self.quality = (latency_score + miss_score) / 2.0;
    }

    fn adapt(&mut self) {
        let adjusted = if self.quality >= 0.8 {
            self.expected_interval.mul_f64(1.1)
        } else {
            self.expected_interval.mul_f64(0.9)
        };

        self.expected_interval = adjusted.clamp(self.config.min_interval, self.config.max_interval);
    }

    /// Copy of the tracker state for the status surface.
    #[must_use]
    pub fn snapshot(&self) -> HeartbeatSnapshot {
        HeartbeatSnapshot {
            expected_interval_ms: self.expected_interval.as_millis() as u64,
            average_latency_ms: self.average_latency_ms,
            last_latency_ms: self.last_latency_ms,
            heartbeat_count: self.heartbeat_count,
            missed_count: self.missed_count,
            quality: self.quality,
        }
    }
}

/// Immutable heartbeat statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeartbeatSnapshot {
    /// Adapted expected interval, milliseconds.
    pub expected_interval_ms: u64,
    /// Running mean latency, milliseconds.
    pub average_latency_ms: f64,
    /// Latency of the most recent beat, milliseconds.
    pub last_latency_ms: i64,
    /// Heartbeats observed.
    pub heartbeat_count: u64,
    /// Heartbeats missed.
    pub missed_count: u64,
    /// Network quality in `[0, 1]`.
    pub quality: f64,
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn tracker() -> HeartbeatTracker<Instant> {
        HeartbeatTracker::new(HeartbeatConfig::default())
    }

    #[test]
    fn starts_at_standard_interval() {
        let t = tracker();
        assert_eq!(t.expected_interval(), Duration::from_secs(20));
        assert!((t.quality() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn clean_beats_widen_interval() {
        let mut t = tracker();
        let mut now = Instant::now();

        // Beats arriving exactly on expectation keep quality at 1.0.
        for _ in 0..10 {
            t.record_beat(now);
            now += t.expected_interval();
        }

        assert!(t.expected_interval() > Duration::from_secs(20));
        assert!(t.expected_interval() <= Duration::from_secs(60));
    }

    #[test]
    fn interval_never_exceeds_max() {
        let mut t = tracker();
        let mut now = Instant::now();

        for _ in 0..100 {
            t.record_beat(now);
            now += t.expected_interval();
        }

        assert!(t.expected_interval() <= Duration::from_secs(60));
    }

    #[test]
    fn misses_narrow_interval() {
        let mut t = tracker();
        let now = Instant::now();
        t.record_beat(now);

        for _ in 0..50 {
            t.record_missed();
        }

        assert!(t.quality() < 0.8);
        assert!(t.expected_interval() >= Duration::from_secs(15));
        assert_eq!(t.expected_interval(), Duration::from_secs(15));
    }

    #[test]
    fn late_beats_lower_quality() {
        let mut t = tracker();
        let now = Instant::now();
        t.record_beat(now);
        // 5 s late against a 20 s expectation.
        t.record_beat(now + Duration::from_secs(25));

        assert!((t.quality() - 0.75).abs() < 0.01);
    }

    #[test]
    fn interval_always_within_bounds() {
        let mut t = tracker();
        let mut now = Instant::now();

        for i in 0..200 {
            if i % 3 == 0 {
                t.record_missed();
            } else {
                t.record_beat(now);
                now += Duration::from_secs(7 * (i % 11) as u64);
            }
            assert!(t.expected_interval() >= Duration::from_secs(15));
            assert!(t.expected_interval() <= Duration::from_secs(60));
        }
    }

    #[test]
    fn non_adaptive_config_pins_interval() {
        let config = HeartbeatConfig { adaptive: false, ..HeartbeatConfig::default() };
        let mut t: HeartbeatTracker<Instant> = HeartbeatTracker::new(config);
        let mut now = Instant::now();

        for _ in 0..20 {
            t.record_beat(now);
            now += Duration::from_secs(20);
        }

        assert_eq!(t.expected_interval(), Duration::from_secs(20));
    }

    #[test]
    fn timeout_budget_floors_at_config() {
        let t = tracker();
        assert_eq!(t.timeout_budget(), Duration::from_secs(180));
    }
}
