//! Notification fan-out: queue, worker pool, and retry loop.
//!
//! `Notifier::submit` is the only producer-facing call and never blocks:
//! it stamps the event and pushes it onto a bounded queue. Workers match
//! each event against endpoint subscriptions and POST the JSON body; a
//! failed delivery is parked in the retry store with exponential backoff
//! and aged out after 24 hours.

use std::{
    fmt,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use pilegate_core::Notification;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    endpoint::Endpoint,
    metrics::{MetricsSnapshot, NotifyMetrics},
    store::{RetryRecord, RetryStore},
};

/// Fan-out configuration.
#[derive(Debug, Clone)]
pub struct NotifyConfig {
    /// Master switch; a disabled notifier accepts and drops events.
    pub enabled: bool,
    /// Bounded queue capacity.
    pub queue_size: usize,
    /// Delivery worker count.
    pub workers: usize,
    /// Attempts per endpoint before an event is dropped.
    pub max_attempts: u32,
    /// First retry delay.
    pub initial_interval: Duration,
    /// Retry delay cap.
    pub max_interval: Duration,
    /// Backoff multiplier.
    pub multiplier: f64,
    /// How often the retry worker pulls due records.
    pub retry_poll_interval: Duration,
    /// Events older than this are discarded instead of retried.
    pub max_event_age: Duration,
    /// Drain budget on shutdown.
    pub drain_timeout: Duration,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            queue_size: 10_000,
            workers: 5,
            max_attempts: 3,
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(30),
            multiplier: 2.0,
            retry_poll_interval: Duration::from_secs(10),
            max_event_age: Duration::from_secs(24 * 3600),
            drain_timeout: Duration::from_secs(5),
        }
    }
}

/// Submission failures.
#[derive(Debug)]
pub enum NotifyError {
    /// The bounded queue is full; the event was dropped.
    QueueFull,
    /// The retry store failed.
    Persistence(String),
}

impl fmt::Display for NotifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueFull => write!(f, "notification queue full"),
            Self::Persistence(msg) => write!(f, "notification persistence error: {msg}"),
        }
    }
}

impl std::error::Error for NotifyError {}

/// Producer handle to the fan-out.
#[derive(Clone)]
pub struct Notifier {
    tx: Option<mpsc::Sender<Notification>>,
    metrics: Arc<NotifyMetrics>,
}

impl Notifier {
    /// Submit one event.
    ///
    /// Assigns `event_id` and stamps `timestamp` when the emitter left them
    /// empty. Never blocks; the read loop calls this.
    ///
    /// # Errors
    ///
    /// `QueueFull` when the bounded queue has no room. The caller logs and
    /// drops; delivery guarantees start at the queue.
    pub fn submit(&self, mut event: Notification) -> Result<(), NotifyError> {
        let Some(tx) = &self.tx else {
            // Fan-out disabled.
            return Ok(());
        };

        if event.event_id.is_empty() {
            event.event_id = uuid::Uuid::new_v4().to_string();
        }
        if event.timestamp == 0 {
            event.timestamp = unix_now();
        }

        tx.try_send(event).map_err(|_| NotifyError::QueueFull)
    }

    /// Delivery metrics snapshot.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier").field("enabled", &self.tx.is_some()).finish()
    }
}

/// Shared state of the running fan-out.
struct FanOut {
    config: NotifyConfig,
    endpoints: Vec<Endpoint>,
    store: Arc<dyn RetryStore>,
    metrics: Arc<NotifyMetrics>,
    client: reqwest::Client,
}

/// Start the fan-out: `workers` delivery tasks plus one retry task.
///
/// All tasks stop on `shutdown`; queued events are drained within the
/// configured drain budget and undeliverable ones are already parked in
/// the store by then.
pub fn spawn(
    config: NotifyConfig,
    endpoints: Vec<Endpoint>,
    store: Arc<dyn RetryStore>,
    shutdown: &CancellationToken,
) -> Notifier {
    let metrics = Arc::new(NotifyMetrics::new());

    if !config.enabled {
        info!("notification fan-out disabled");
        return Notifier { tx: None, metrics };
    }

    let (tx, rx) = mpsc::channel(config.queue_size.max(1));
    let rx = Arc::new(Mutex::new(rx));

    let fan_out = Arc::new(FanOut {
        config: config.clone(),
        endpoints,
        store,
        metrics: Arc::clone(&metrics),
        client: reqwest::Client::new(),
    });

    for worker in 0..config.workers.max(1) {
        let fan_out = Arc::clone(&fan_out);
        let rx = Arc::clone(&rx);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            delivery_worker(worker, fan_out, rx, shutdown).await;
        });
    }

    {
        let fan_out = Arc::clone(&fan_out);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            retry_worker(fan_out, shutdown).await;
        });
    }

    Notifier { tx: Some(tx), metrics }
}

async fn delivery_worker(
    worker: usize,
    fan_out: Arc<FanOut>,
    rx: Arc<Mutex<mpsc::Receiver<Notification>>>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = shutdown.cancelled() => break,
            event = async { rx.lock().await.recv().await } => event,
        };

        let Some(event) = event else { break };
        deliver_everywhere(&fan_out, &event).await;
    }

    // Drain what is already queued so accepted events are not lost on a
    // clean shutdown.
    let deadline = tokio::time::Instant::now() + fan_out.config.drain_timeout;
    loop {
        if tokio::time::Instant::now() >= deadline {
            warn!("notification drain budget exhausted");
            break;
        }

        let event = {
            let mut rx = rx.lock().await;
            match rx.try_recv() {
                Ok(event) => event,
                Err(_) => break,
            }
        };

        deliver_everywhere(&fan_out, &event).await;
    }

    debug!("notification worker {} stopped", worker);
}

/// Deliver one event to every subscribed-and-enabled endpoint; park
/// failures in the retry store.
async fn deliver_everywhere(fan_out: &FanOut, event: &Notification) {
    for endpoint in &fan_out.endpoints {
        if !endpoint.subscribes(event.event_type) {
            continue;
        }

        if deliver_once(fan_out, endpoint, event).await.is_ok() {
            continue;
        }

        let now = unix_now();
        let record = RetryRecord {
            notification: event.clone(),
            endpoint: endpoint.name.clone(),
            attempts: 1,
            next_attempt_secs: now + backoff_delay(&fan_out.config, 0).as_secs(),
            first_failed_secs: now,
        };

        if let Err(e) = fan_out.store.push(&record) {
            warn!("failed to park event {} for retry: {}", event.event_id, e);
        }
    }
}

/// Why a single delivery attempt failed.
#[derive(Debug)]
enum DeliveryError {
    /// The endpoint did not answer within its timeout.
    EndpointTimeout,
    /// The endpoint answered with a non-2xx status.
    EndpointHttp(u16),
    /// Transport-level failure (DNS, connect, TLS).
    Transport(String),
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EndpointTimeout => write!(f, "timed out"),
            Self::EndpointHttp(status) => write!(f, "HTTP {status}"),
            Self::Transport(msg) => write!(f, "{msg}"),
        }
    }
}

/// One POST attempt; metrics are recorded here.
async fn deliver_once(
    fan_out: &FanOut,
    endpoint: &Endpoint,
    event: &Notification,
) -> Result<(), DeliveryError> {
    let started = tokio::time::Instant::now();

    let mut request = fan_out
        .client
        .post(&endpoint.url)
        .timeout(endpoint.timeout)
        .json(event);
    for (name, value) in &endpoint.headers {
        request = request.header(name.as_str(), value.as_str());
    }

    let outcome = match request.send().await {
        Ok(response) if response.status().is_success() => Ok(()),
        Ok(response) => Err(DeliveryError::EndpointHttp(response.status().as_u16())),
        Err(e) if e.is_timeout() => Err(DeliveryError::EndpointTimeout),
        Err(e) => Err(DeliveryError::Transport(e.to_string())),
    };

    let now = unix_now();
    match &outcome {
        Ok(()) => {
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
            fan_out.metrics.record_success(&endpoint.name, now, elapsed_ms);
            debug!(
                "delivered {} ({}) to {}",
                event.event_id,
                event.event_type.as_str(),
                endpoint.name
            );
        },
        Err(e) => {
            fan_out.metrics.record_failure(&endpoint.name, now);
            warn!("delivery of {} to {} failed: {}", event.event_id, endpoint.name, e);
        },
    }

    outcome
}

/// Pull due retry records every poll interval and re-attempt them.
async fn retry_worker(fan_out: Arc<FanOut>, shutdown: CancellationToken) {
    let mut tick = tokio::time::interval(fan_out.config.retry_poll_interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = tick.tick() => {},
        }

        let now = unix_now();
        let due = match fan_out.store.pop_due(now, 64) {
            Ok(due) => due,
            Err(e) => {
                warn!("retry store pop failed: {}", e);
                continue;
            },
        };

        for mut record in due {
            // 24-hour age cap.
            if now.saturating_sub(record.first_failed_secs)
                > fan_out.config.max_event_age.as_secs()
            {
                fan_out.metrics.record_dropped(&record.endpoint);
                warn!(
                    "discarding event {} for {}: older than the retry age cap",
                    record.notification.event_id, record.endpoint
                );
                continue;
            }

            let Some(endpoint) =
                fan_out.endpoints.iter().find(|e| e.name == record.endpoint && e.enabled)
            else {
                fan_out.metrics.record_dropped(&record.endpoint);
                debug!(
                    "dropping event {}: endpoint {} no longer configured",
                    record.notification.event_id, record.endpoint
                );
                continue;
            };

            if deliver_once(&fan_out, endpoint, &record.notification).await.is_ok() {
                continue;
            }

            record.attempts += 1;
            if record.attempts >= fan_out.config.max_attempts {
                fan_out.metrics.record_dropped(&record.endpoint);
                warn!(
                    "giving up on event {} for {} after {} attempts",
                    record.notification.event_id, record.endpoint, record.attempts
                );
                continue;
            }

            // Delay schedule: initial * multiplier^k, so 1 s, 2 s, 4 s, ...
            record.next_attempt_secs =
                unix_now() + backoff_delay(&fan_out.config, record.attempts - 1).as_secs();
            if let Err(e) = fan_out.store.push(&record) {
                warn!("failed to re-park event {}: {}", record.notification.event_id, e);
            }
        }
    }

    debug!("notification retry worker stopped");
}

/// Exponential backoff: `min(max, initial * multiplier^attempt)`.
fn backoff_delay(config: &NotifyConfig, attempt: u32) -> Duration {
    let secs = config.initial_interval.as_secs_f64() * config.multiplier.powi(attempt as i32);
    Duration::from_secs_f64(secs.min(config.max_interval.as_secs_f64()))
}

fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs())
}
