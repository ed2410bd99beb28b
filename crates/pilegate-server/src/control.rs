//! Control-plane adapter.
//!
//! Translates HTTP/JSON control-plane requests into dispatcher calls and
//! registry queries. The HTTP layer itself lives outside this crate; it
//! mounts these methods and maps [`ApiError`] onto status codes. Device ids
//! arrive in decimal or 8-hex form and are normalized here.

use std::sync::Arc;

use pilegate_core::{
    ControlCommand, DispatchError, GatewayStats, SessionSnapshot, device_id::canonical_device_id,
    heartbeat::HeartbeatSnapshot, reconnect::ReconnectSnapshot,
};
use serde::{Deserialize, Serialize};

use crate::{GatewayShared, notify::MetricsSnapshot};

/// Control-plane response envelope.
///
/// `code` is `0` on success and mirrors the HTTP status on failure.
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T> {
    /// 0 on success, HTTP status code on failure.
    pub code: u16,
    /// Human-readable outcome.
    pub message: String,
    /// Success flag.
    pub success: bool,
    /// Unix seconds when the response was built.
    pub time: u64,
    /// Response payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    /// Successful response.
    #[must_use]
    pub fn ok(data: T, time: u64) -> Self {
        Self { code: 0, message: "success".to_string(), success: true, time, data: Some(data) }
    }
}

impl ApiResponse<()> {
    /// Failure response for an error.
    #[must_use]
    pub fn from_error(error: &ApiError, time: u64) -> Self {
        Self {
            code: error.http_status(),
            message: error.to_string(),
            success: false,
            time,
            data: None,
        }
    }
}

/// Control-plane failure classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Malformed request (bad device id format, invalid parameters).
    BadRequest(String),
    /// Device unknown to the gateway.
    NotFound(String),
    /// Device known but not in a state that accepts the command.
    Conflict(String),
    /// Internal dispatch failure.
    Internal(String),
}

impl ApiError {
    /// HTTP status this error maps onto.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::BadRequest(_) => 400,
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            Self::Internal(_) => 500,
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadRequest(msg)
            | Self::NotFound(msg)
            | Self::Conflict(msg)
            | Self::Internal(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::BadRequest(msg) => Self::BadRequest(msg),
            DispatchError::DeviceNotFound(device_id) => {
                Self::NotFound(format!("device {device_id} not found"))
            },
            DispatchError::DeviceNotOnline { device_id, state } => {
                Self::Conflict(format!("device {device_id} not online (state {state:?})"))
            },
            DispatchError::Internal(msg) => Self::Internal(msg),
        }
    }
}

/// Start-charging request body.
#[derive(Debug, Clone, Deserialize)]
pub struct StartChargingRequest {
    /// Device id, decimal or 8-hex.
    pub device_id: String,
    /// Target port, 1-based.
    pub port: u8,
    /// Rate plan selector.
    #[serde(default)]
    pub mode: u8,
    /// Account balance shown on the device, vendor cents.
    #[serde(default)]
    pub balance: u32,
    /// Purchased minutes or watt-hours.
    pub value: u16,
    /// Order identifier (the control plane sends `orderNo`).
    #[serde(alias = "orderNo")]
    pub order_no: String,
    /// Hard session cap, minutes. 0 keeps the device default.
    #[serde(default)]
    pub max_duration: u16,
    /// Hard power cap, watts. 0 keeps the device default.
    #[serde(default)]
    pub max_power: u16,
    /// QR-lamp behavior flag.
    #[serde(default)]
    pub qr_light: u8,
}

/// Stop-charging request body.
#[derive(Debug, Clone, Deserialize)]
pub struct StopChargingRequest {
    /// Device id, decimal or 8-hex.
    pub device_id: String,
    /// Target port, 1-based.
    pub port: u8,
    /// Order being stopped.
    #[serde(alias = "orderNo")]
    pub order_no: String,
}

/// Modify-charge request body.
#[derive(Debug, Clone, Deserialize)]
pub struct ModifyChargeRequest {
    /// Device id, decimal or 8-hex.
    pub device_id: String,
    /// Target port, 1-based.
    pub port: u8,
    /// 1 = time, 2 = energy.
    pub modify_type: u8,
    /// New remaining quantity; non-zero.
    pub new_value: u32,
    /// Order being modified.
    #[serde(alias = "orderId")]
    pub order_id: String,
}

/// Locate request body.
#[derive(Debug, Clone, Deserialize)]
pub struct LocateRequest {
    /// Device id, decimal or 8-hex.
    pub device_id: String,
    /// Signal duration in seconds; 0 selects the 5 s default.
    #[serde(default)]
    pub seconds: u8,
}

/// Data returned by command dispatches.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchData {
    /// Canonical device id the command went to.
    pub device_id: String,
    /// Target port, when port-scoped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u8>,
    /// Order id, when order-scoped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_no: Option<String>,
}

/// Data returned by the device-status query.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatusData {
    /// Session snapshot.
    pub session: SessionSnapshot,
    /// Heartbeat statistics, when the device has a live tracker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat: Option<HeartbeatSnapshot>,
    /// Reconnect statistics.
    pub reconnect: ReconnectSnapshot,
}

/// Data returned by the gateway-status query.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayStatusData {
    /// Session and traffic statistics.
    pub gateway: GatewayStats,
    /// Webhook delivery statistics.
    pub notifications: MetricsSnapshot,
}

/// Cloneable handle the HTTP layer mounts.
#[derive(Clone)]
pub struct ControlApi {
    shared: Arc<GatewayShared>,
}

impl ControlApi {
    pub(crate) fn new(shared: Arc<GatewayShared>) -> Self {
        Self { shared }
    }

    fn now(&self) -> u64 {
        use pilegate_core::Environment as _;
        self.shared.env.wall_clock_secs()
    }

    async fn run_dispatch(&self, command: ControlCommand) -> Result<(), ApiError> {
        let actions = {
            let mut driver = self.shared.driver.lock().await;
            driver.dispatch(command).map_err(ApiError::from)?
        };
        crate::execute_actions(&self.shared, actions).await;
        Ok(())
    }

    /// Dispatch a start-charging command.
    ///
    /// # Errors
    ///
    /// [`ApiError`] per the §classification: bad id → `BadRequest`, unknown
    /// device → `NotFound`, device not online → `Conflict`.
    pub async fn start_charging(
        &self,
        req: StartChargingRequest,
    ) -> Result<ApiResponse<DispatchData>, ApiError> {
        let device_id =
            canonical_device_id(&req.device_id).map_err(|e| ApiError::BadRequest(e.to_string()))?;

        self.run_dispatch(ControlCommand::StartCharging {
            device_id: device_id.clone(),
            port: req.port,
            rate_mode: req.mode,
            balance: req.balance,
            value: req.value,
            order_no: req.order_no.clone(),
            max_duration: req.max_duration,
            max_power: req.max_power,
            qr_light: req.qr_light,
        })
        .await?;

        Ok(ApiResponse::ok(
            DispatchData { device_id, port: Some(req.port), order_no: Some(req.order_no) },
            self.now(),
        ))
    }

    /// Dispatch a stop-charging command.
    ///
    /// # Errors
    ///
    /// [`ApiError`], as for [`ControlApi::start_charging`].
    pub async fn stop_charging(
        &self,
        req: StopChargingRequest,
    ) -> Result<ApiResponse<DispatchData>, ApiError> {
        let device_id =
            canonical_device_id(&req.device_id).map_err(|e| ApiError::BadRequest(e.to_string()))?;

        self.run_dispatch(ControlCommand::StopCharging {
            device_id: device_id.clone(),
            port: req.port,
            order_no: req.order_no.clone(),
        })
        .await?;

        Ok(ApiResponse::ok(
            DispatchData { device_id, port: Some(req.port), order_no: Some(req.order_no) },
            self.now(),
        ))
    }

    /// Dispatch a modify-charge command.
    ///
    /// # Errors
    ///
    /// [`ApiError`], as for [`ControlApi::start_charging`].
    pub async fn modify_charge(
        &self,
        req: ModifyChargeRequest,
    ) -> Result<ApiResponse<DispatchData>, ApiError> {
        let device_id =
            canonical_device_id(&req.device_id).map_err(|e| ApiError::BadRequest(e.to_string()))?;

        self.run_dispatch(ControlCommand::ModifyCharge {
            device_id: device_id.clone(),
            port: req.port,
            modify_type: req.modify_type,
            new_value: req.new_value,
            order_id: req.order_id.clone(),
        })
        .await?;

        Ok(ApiResponse::ok(
            DispatchData { device_id, port: Some(req.port), order_no: Some(req.order_id) },
            self.now(),
        ))
    }

    /// Dispatch a locate command.
    ///
    /// # Errors
    ///
    /// [`ApiError`], as for [`ControlApi::start_charging`].
    pub async fn locate(&self, req: LocateRequest) -> Result<ApiResponse<DispatchData>, ApiError> {
        let device_id =
            canonical_device_id(&req.device_id).map_err(|e| ApiError::BadRequest(e.to_string()))?;

        self.run_dispatch(ControlCommand::Locate {
            device_id: device_id.clone(),
            seconds: req.seconds,
        })
        .await?;

        Ok(ApiResponse::ok(
            DispatchData { device_id, port: None, order_no: None },
            self.now(),
        ))
    }

    /// Live view of one device.
    ///
    /// # Errors
    ///
    /// `BadRequest` for a malformed id, `NotFound` when the device has no
    /// live session.
    pub async fn device_status(
        &self,
        device_id: &str,
    ) -> Result<ApiResponse<DeviceStatusData>, ApiError> {
        let device_id =
            canonical_device_id(device_id).map_err(|e| ApiError::BadRequest(e.to_string()))?;

        let driver = self.shared.driver.lock().await;
        let session = driver
            .session_by_device(&device_id)
            .ok_or_else(|| ApiError::NotFound(format!("device {device_id} not found")))?;
        let heartbeat = driver.heartbeat_stats(&device_id);
        let reconnect = driver.reconnect_stats(&device_id);
        drop(driver);

        Ok(ApiResponse::ok(DeviceStatusData { session, heartbeat, reconnect }, self.now()))
    }

    /// Whole-gateway statistics.
    pub async fn gateway_status(&self) -> ApiResponse<GatewayStatusData> {
        let gateway = self.shared.driver.lock().await.stats();
        let notifications = self.shared.notifier.metrics();

        ApiResponse::ok(GatewayStatusData { gateway, notifications }, self.now())
    }

    /// Snapshots of every live session.
    pub async fn list_sessions(&self) -> ApiResponse<Vec<SessionSnapshot>> {
        let sessions = self.shared.driver.lock().await.sessions();
        ApiResponse::ok(sessions, self.now())
    }
}
