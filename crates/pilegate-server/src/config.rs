//! Gateway configuration.
//!
//! Loaded from a YAML file; every key has a default so a missing file or a
//! partial file still produces a runnable gateway. CLI flags in `main.rs`
//! override the file.

use std::{collections::BTreeMap, path::Path, time::Duration};

use pilegate_core::{EventType, GatewayConfig};
use serde::Deserialize;

use crate::{
    error::GatewayServerError,
    notify::{Endpoint, NotifyConfig},
};

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GatewayFileConfig {
    /// TCP listener section.
    pub tcp: TcpSection,
    /// Heartbeat cadence section.
    pub heartbeat: HeartbeatSection,
    /// Session sweep section.
    pub session: SessionSection,
    /// Notification fan-out section.
    pub notification: NotificationSection,
}

/// `tcp.*` keys.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TcpSection {
    /// Interface to bind.
    pub bind: String,
    /// Listener port.
    pub port: u16,
    /// Per-connection read deadline, seconds.
    pub read_deadline_sec: u64,
    /// Per-send write timeout, seconds.
    pub write_timeout_sec: u64,
    /// Maximum concurrent connections.
    pub max_connections: usize,
}

impl Default for TcpSection {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8999,
            read_deadline_sec: 300,
            write_timeout_sec: 30,
            max_connections: 10_000,
        }
    }
}

/// `heartbeat.*` keys.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HeartbeatSection {
    /// Initial expected interval, seconds.
    pub standard_interval_sec: u64,
    /// Lower clamp for the adaptive interval, seconds.
    pub min_interval_sec: u64,
    /// Upper clamp for the adaptive interval, seconds.
    pub max_interval_sec: u64,
    /// Supervisor timeout before `Offline`, seconds.
    pub timeout_sec: u64,
    /// Whether the expected interval adapts.
    pub adaptive: bool,
}

impl Default for HeartbeatSection {
    fn default() -> Self {
        Self {
            standard_interval_sec: 20,
            min_interval_sec: 15,
            max_interval_sec: 60,
            timeout_sec: 180,
            adaptive: true,
        }
    }
}

/// `session.*` keys.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// Sweeper cadence, seconds.
    pub cleanup_interval_sec: u64,
    /// Idle budget for sessions that are not online, seconds.
    pub max_idle_sec: u64,
    /// How long an offline session is kept, seconds.
    pub offline_grace_sec: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self { cleanup_interval_sec: 60, max_idle_sec: 300, offline_grace_sec: 300 }
    }
}

/// `notification.*` keys.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationSection {
    /// Master switch for the fan-out.
    pub enabled: bool,
    /// In-memory queue capacity.
    pub queue_size: usize,
    /// Delivery worker count.
    pub workers: usize,
    /// Retry policy.
    pub retry: RetrySection,
    /// Path of the persistent retry queue; in-memory when unset.
    pub retry_db: Option<String>,
    /// Configured webhook endpoints.
    pub endpoints: Vec<EndpointSection>,
}

impl Default for NotificationSection {
    fn default() -> Self {
        Self {
            enabled: true,
            queue_size: 10_000,
            workers: 5,
            retry: RetrySection::default(),
            retry_db: None,
            endpoints: Vec::new(),
        }
    }
}

/// `notification.retry.*` keys.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    /// Delivery attempts before an event is dropped.
    pub max_attempts: u32,
    /// First retry delay, seconds.
    pub initial_interval_sec: u64,
    /// Retry delay cap, seconds.
    pub max_interval_sec: u64,
    /// Backoff multiplier.
    pub multiplier: f64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self { max_attempts: 3, initial_interval_sec: 1, max_interval_sec: 30, multiplier: 2.0 }
    }
}

/// One `notification.endpoints[]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointSection {
    /// Endpoint name, unique among endpoints.
    pub name: String,
    /// POST target URL.
    pub url: String,
    /// Extra request headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Request timeout, seconds.
    #[serde(default = "default_endpoint_timeout")]
    pub timeout_sec: u64,
    /// Subscribed event types.
    #[serde(default)]
    pub events: Vec<EventType>,
    /// Whether this endpoint receives deliveries.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_endpoint_timeout() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

impl GatewayFileConfig {
    /// Load from a YAML file.
    ///
    /// # Errors
    ///
    /// `Config` when the file is unreadable or not valid YAML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, GatewayServerError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            GatewayServerError::Config(format!("cannot read {}: {e}", path.display()))
        })?;

        serde_yaml::from_str(&text).map_err(|e| {
            GatewayServerError::Config(format!("cannot parse {}: {e}", path.display()))
        })
    }

    /// Listener address in `host:port` form.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.tcp.bind, self.tcp.port)
    }

    /// Driver configuration derived from the file.
    #[must_use]
    pub fn gateway_config(&self) -> GatewayConfig {
        let mut config = GatewayConfig {
            max_sessions: self.tcp.max_connections,
            read_deadline: Duration::from_secs(self.tcp.read_deadline_sec),
            write_timeout: Duration::from_secs(self.tcp.write_timeout_sec),
            cleanup_interval: Duration::from_secs(self.session.cleanup_interval_sec),
            max_idle: Duration::from_secs(self.session.max_idle_sec),
            offline_grace: Duration::from_secs(self.session.offline_grace_sec),
            ..GatewayConfig::default()
        };

        config.heartbeat.standard_interval = Duration::from_secs(self.heartbeat.standard_interval_sec);
        config.heartbeat.min_interval = Duration::from_secs(self.heartbeat.min_interval_sec);
        config.heartbeat.max_interval = Duration::from_secs(self.heartbeat.max_interval_sec);
        config.heartbeat.timeout = Duration::from_secs(self.heartbeat.timeout_sec);
        config.heartbeat.adaptive = self.heartbeat.adaptive;

        config
    }

    /// Fan-out configuration derived from the file.
    #[must_use]
    pub fn notify_config(&self) -> NotifyConfig {
        NotifyConfig {
            enabled: self.notification.enabled,
            queue_size: self.notification.queue_size,
            workers: self.notification.workers,
            max_attempts: self.notification.retry.max_attempts,
            initial_interval: Duration::from_secs(self.notification.retry.initial_interval_sec),
            max_interval: Duration::from_secs(self.notification.retry.max_interval_sec),
            multiplier: self.notification.retry.multiplier,
            ..NotifyConfig::default()
        }
    }

    /// Webhook endpoints derived from the file.
    #[must_use]
    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.notification
            .endpoints
            .iter()
            .map(|section| Endpoint {
                name: section.name.clone(),
                url: section.url.clone(),
                headers: section.headers.clone(),
                timeout: Duration::from_secs(section.timeout_sec),
                events: section.events.iter().copied().collect(),
                enabled: section.enabled,
            })
            .collect()
    }
}
