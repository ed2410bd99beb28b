//! Webhook notification fan-out.
//!
//! Events emitted by the driver enter a bounded queue, a worker pool POSTs
//! them to subscribed endpoints, and failures retry with exponential
//! backoff from a restart-safe store.

mod endpoint;
mod metrics;
mod notifier;
mod store;

pub use endpoint::Endpoint;
pub use metrics::{EndpointMetrics, MetricsSnapshot, NotifyMetrics};
pub use notifier::{Notifier, NotifyConfig, NotifyError, spawn};
pub use store::{MemoryRetryStore, RedbRetryStore, RetryRecord, RetryStore, StoreError};
