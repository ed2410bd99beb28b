//! Webhook endpoint description.

use std::{
    collections::{BTreeMap, HashSet},
    time::Duration,
};

use pilegate_core::EventType;

/// One configured webhook destination.
#[derive(Debug, Clone)]
pub struct Endpoint {
    /// Unique endpoint name; retry records reference endpoints by name.
    pub name: String,
    /// POST target URL.
    pub url: String,
    /// Extra request headers.
    pub headers: BTreeMap<String, String>,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Subscribed event types.
    pub events: HashSet<EventType>,
    /// Disabled endpoints receive nothing but keep their retry backlog.
    pub enabled: bool,
}

impl Endpoint {
    /// True when this endpoint should receive the event type.
    #[must_use]
    pub fn subscribes(&self, event_type: EventType) -> bool {
        self.enabled && self.events.contains(&event_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(events: &[EventType], enabled: bool) -> Endpoint {
        Endpoint {
            name: "ops".to_string(),
            url: "http://hooks.internal/pile".to_string(),
            headers: BTreeMap::new(),
            timeout: Duration::from_secs(10),
            events: events.iter().copied().collect(),
            enabled,
        }
    }

    #[test]
    fn subscription_matching() {
        let ep = endpoint(&[EventType::DeviceOnline, EventType::Settlement], true);

        assert!(ep.subscribes(EventType::DeviceOnline));
        assert!(ep.subscribes(EventType::Settlement));
        assert!(!ep.subscribes(EventType::DeviceOffline));
    }

    #[test]
    fn disabled_endpoint_subscribes_to_nothing() {
        let ep = endpoint(&[EventType::DeviceOnline], false);
        assert!(!ep.subscribes(EventType::DeviceOnline));
    }
}
