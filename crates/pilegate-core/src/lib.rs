//! Sans-IO core of the charging-pile gateway.
//!
//! The [`driver::GatewayDriver`] is an event-driven orchestrator: the
//! runtime feeds it connection events and classified packets, it returns
//! actions (send frame, close connection, emit notification, log). All
//! state — sessions, the three-index registry, heartbeat and reconnect
//! tracking — lives behind the driver; time and randomness come from the
//! [`env::Environment`] trait so tests run on a virtual clock.

#![forbid(unsafe_code)]

pub mod device_id;
pub mod driver;
pub mod env;
pub mod error;
pub mod event;
mod handlers;
pub mod heartbeat;
pub mod reconnect;
pub mod registry;
pub mod session;

pub use driver::{
    ControlCommand, GatewayAction, GatewayConfig, GatewayCounters, GatewayDriver, GatewayEvent,
    GatewayStats, LogLevel,
};
pub use env::Environment;
pub use error::{DispatchError, SessionError};
pub use event::{EventType, Notification};
pub use session::{DeviceState, SessionSnapshot, StateChange};
