//! Per-command frame handlers.
//!
//! Tagged dispatch: the command byte selects a handler; each handler decodes
//! its typed payload, mutates the session through its own methods, and
//! returns actions. Handlers never perform I/O; replies and notifications
//! come back as [`GatewayAction`]s.

use pilegate_proto::{
    Command, CommandInfo, DnyFrame,
    payloads::{charge, modify, register, settlement, status, time},
};
use serde_json::json;

use crate::{
    driver::{GatewayAction, GatewayDriver, LogLevel, PendingKind},
    env::Environment,
    error::SessionError,
    event::{EventType, Notification},
    session::DeviceState,
};

impl<E: Environment> GatewayDriver<E> {
    /// Route one decoded frame to its handler.
    pub(crate) fn handle_frame(
        &mut self,
        conn_id: u64,
        frame: &DnyFrame,
    ) -> Result<Vec<GatewayAction>, SessionError> {
        let now = self.env.now();
        let now_secs = self.env.wall_clock_secs();

        {
            let session = self
                .registry
                .get_mut(conn_id)
                .ok_or(SessionError::SessionNotFound { conn_id })?;
            session.touch(now, now_secs);
            session.count_command();
            session.reset_decode_failures();
        }
        self.counters.frames_in += 1;
        *self.counters.commands_in.entry(frame.command).or_insert(0) += 1;

        // Log sampling by registry priority: heartbeat-class traffic (4-5)
        // would flood the log at fleet scale and is only counted.
        let info = CommandInfo::lookup(frame.command);
        let sampled_log = (info.priority < 4).then(|| GatewayAction::Log {
            level: LogLevel::Debug,
            message: format!(
                "connection {conn_id}: {} ({:#04x}), {} payload bytes",
                info.name,
                frame.command,
                frame.payload.len()
            ),
        });

        let mut actions = match Command::from_u8(frame.command) {
            Some(Command::Register) => self.handle_register(conn_id, frame),
            Some(Command::HeartbeatLegacy | Command::Heartbeat) => {
                self.handle_dny_heartbeat(conn_id, frame)
            },
            Some(Command::MainStatus) => self.handle_main_status(conn_id, frame),
            Some(Command::TimeRequest | Command::TimeRequestAlt) => {
                Ok(self.handle_time_request(conn_id, frame))
            },
            Some(Command::Settlement) => self.handle_settlement(conn_id, frame),
            Some(Command::ChargeControl) => Ok(self.handle_charge_reply(conn_id, frame)),
            Some(Command::ModifyCharge) => Ok(self.handle_modify_reply(conn_id, frame)),
            Some(Command::Locate) => Ok(self.handle_locate_reply(conn_id, frame)),
            None => Ok(self.handle_unknown(conn_id, frame)),
        }?;

        if let Some(log) = sampled_log {
            actions.insert(0, log);
        }
        Ok(actions)
    }

    /// `0x20` register: assign the device identity and ACK.
    ///
    /// Idempotent: a repeated register refreshes activity and re-sends the
    /// ACK without duplicating the `device_registered` notification.
    fn handle_register(
        &mut self,
        conn_id: u64,
        frame: &DnyFrame,
    ) -> Result<Vec<GatewayAction>, SessionError> {
        let now = self.env.now();
        let now_secs = self.env.wall_clock_secs();
        let mut actions = Vec::new();

        let payload = match register::RegisterPayload::decode(&frame.payload) {
            Ok(payload) => payload,
            Err(e) => {
                // A rejected register is a failed reconnect attempt for the
                // device the frame header claims to be.
                self.reconnects.record_failure(&frame.device_id());
                return Ok(vec![GatewayAction::Log {
                    level: LogLevel::Warn,
                    message: format!("connection {conn_id} register rejected: {e}"),
                }]);
            },
        };

        let device_id = frame.device_id();

        let (first_register, iccid) = {
            let session = self
                .registry
                .get_mut(conn_id)
                .ok_or(SessionError::SessionNotFound { conn_id })?;

            let first_register = session.device_id().is_none();
            session.assign_identity(
                device_id.clone(),
                frame.physical_id,
                payload.device_type,
                payload.firmware_version.clone(),
                payload.direct_mode,
                now_secs,
            );

            // Register from Connected/IccidReceived enters Registered; a
            // re-register while Online/Offline leaves the state alone.
            if matches!(
                session.state(),
                DeviceState::Connected | DeviceState::IccidReceived
            ) {
                session.transition(DeviceState::Registered, now, now_secs, "register")?;
            }

            (first_register, payload.iccid.clone())
        };

        self.registry.bind_iccid(conn_id, &iccid);

        if let Some(displaced) = self.registry.bind_device(conn_id, &device_id) {
            actions.push(GatewayAction::CloseConnection {
                conn_id: displaced,
                reason: format!("device {device_id} reconnected on connection {conn_id}"),
            });
            actions.push(GatewayAction::Log {
                level: LogLevel::Info,
                message: format!(
                    "device {device_id} displaced connection {displaced} with {conn_id}"
                ),
            });
        }

        if first_register {
            self.reconnects.record_connect(&device_id, now);
            self.heartbeats
                .entry(device_id.clone())
                .or_insert_with(|| crate::heartbeat::HeartbeatTracker::new(self.config.heartbeat.clone()));

            self.push_notify(
                &mut actions,
                Notification::new(
                    EventType::DeviceRegistered,
                    device_id.clone(),
                    json!({
                        "iccid": iccid.clone(),
                        "device_type": payload.device_type,
                        "firmware_version": payload.firmware_version.clone(),
                        "direct_mode": payload.direct_mode,
                    }),
                ),
            );
            actions.push(GatewayAction::Log {
                level: LogLevel::Info,
                message: format!("device {device_id} registered (iccid {iccid})"),
            });
        }

        let ack = DnyFrame::new(
            frame.physical_id,
            frame.message_id,
            frame.command,
            vec![register::REGISTER_ACK],
        );
        self.push_send(&mut actions, conn_id, ack);

        Ok(actions)
    }

    /// `0x01`/`0x21` heartbeat: refresh online state and ACK.
    fn handle_dny_heartbeat(
        &mut self,
        conn_id: u64,
        frame: &DnyFrame,
    ) -> Result<Vec<GatewayAction>, SessionError> {
        let mut actions = self.heartbeat_received(conn_id, "heartbeat")?;

        let registered =
            self.registry.get(conn_id).is_some_and(|s| s.device_id().is_some());
        if registered {
            let ack =
                DnyFrame::new(frame.physical_id, frame.message_id, frame.command, vec![0x00]);
            self.push_send(&mut actions, conn_id, ack);
        }

        Ok(actions)
    }

    /// `0x11` main-status heartbeat: absorb telemetry, no reply.
    fn handle_main_status(
        &mut self,
        conn_id: u64,
        frame: &DnyFrame,
    ) -> Result<Vec<GatewayAction>, SessionError> {
        let mut actions = self.heartbeat_received(conn_id, "main-status heartbeat")?;

        let payload = match status::MainStatusPayload::decode(&frame.payload) {
            Ok(payload) => payload,
            Err(e) => {
                actions.push(GatewayAction::Log {
                    level: LogLevel::Warn,
                    message: format!("connection {conn_id} main-status undecodable: {e}"),
                });
                return Ok(actions);
            },
        };

        let device_id = {
            let Some(session) = self.registry.get_mut(conn_id) else {
                return Ok(actions);
            };

            session.set_property("firmware_version", payload.firmware_version.clone());
            session.set_property("imei", payload.imei.clone());
            session.set_property("module_type", payload.module_type.to_string());
            session.set_property("host_type", payload.host_type.to_string());
            session.set_property("signal_strength", payload.signal_strength.to_string());
            session.set_property("has_rtc", payload.has_rtc.to_string());
            session.set_property("device_time", payload.device_time.to_string());

            session.device_id().map(str::to_string)
        };

        if let Some(device_id) = device_id {
            self.push_notify(
                &mut actions,
                Notification::new(
                    EventType::DeviceHeartbeat,
                    device_id,
                    json!({
                        "firmware_version": payload.firmware_version,
                        "imei": payload.imei,
                        "signal_strength": payload.signal_strength,
                        "device_time": payload.device_time,
                    }),
                ),
            );
        }

        Ok(actions)
    }

    /// `0x12`/`0x22` server time: stateless reply with `Unix(now)`.
    fn handle_time_request(&mut self, conn_id: u64, frame: &DnyFrame) -> Vec<GatewayAction> {
        let now_secs = self.env.wall_clock_secs();
        let mut actions = Vec::new();

        let reply = DnyFrame::new(
            frame.physical_id,
            frame.message_id,
            frame.command,
            time::encode_server_time(now_secs as u32),
        );
        self.push_send(&mut actions, conn_id, reply);
        actions
    }

    /// `0x03` settlement: validate, emit, ACK.
    fn handle_settlement(
        &mut self,
        conn_id: u64,
        frame: &DnyFrame,
    ) -> Result<Vec<GatewayAction>, SessionError> {
        let mut actions = Vec::new();

        let decoded = settlement::SettlementPayload::decode(&frame.payload)
            .and_then(|payload| payload.validate().map(|()| payload));

        let payload = match decoded {
            Ok(payload) => payload,
            Err(e) => {
                actions.push(GatewayAction::Log {
                    level: LogLevel::Warn,
                    message: format!("connection {conn_id} settlement rejected: {e}"),
                });
                let nak =
                    DnyFrame::new(frame.physical_id, frame.message_id, frame.command, vec![0x01]);
                self.push_send(&mut actions, conn_id, nak);
                return Ok(actions);
            },
        };

        let device_id = {
            let session = self
                .registry
                .get_mut(conn_id)
                .ok_or(SessionError::SessionNotFound { conn_id })?;
            session.end_order(payload.gun_number);
            session.device_id().map(str::to_string).unwrap_or_else(|| frame.device_id())
        };

        let stop_desc = payload.stop_reason_desc();
        self.push_notify(
            &mut actions,
            Notification::new(
                EventType::Settlement,
                device_id.clone(),
                json!({
                    "order_id": payload.order_id.clone(),
                    "start_time": payload.start_time,
                    "end_time": payload.end_time,
                    "duration_secs": payload.duration_secs(),
                    "electric_energy_wh": payload.electric_energy,
                    "energy_consumed": payload.energy_kwh(),
                    "card_number": payload.card_number.clone(),
                    "stop_reason": payload.stop_reason,
                    "stop_reason_desc": stop_desc,
                    "charge_fee": payload.charge_fee,
                    "service_fee": payload.service_fee,
                    "total_fee": payload.total_fee,
                }),
            )
            .with_port(payload.gun_number),
        );
        self.push_notify(
            &mut actions,
            Notification::new(
                EventType::ChargingEnd,
                device_id.clone(),
                json!({
                    "order_id": payload.order_id.clone(),
                    "stop_reason": payload.stop_reason,
                    "stop_reason_desc": stop_desc,
                }),
            )
            .with_port(payload.gun_number),
        );
        self.push_notify(
            &mut actions,
            Notification::new(
                EventType::PortStatusChange,
                device_id.clone(),
                json!({ "status": "idle" }),
            )
            .with_port(payload.gun_number),
        );

        actions.push(GatewayAction::Log {
            level: LogLevel::Info,
            message: format!(
                "device {device_id} settled order {} on port {}: {} Wh, reason {}",
                payload.order_id, payload.gun_number, payload.electric_energy, payload.stop_reason
            ),
        });

        let ack = DnyFrame::new(
            frame.physical_id,
            frame.message_id,
            frame.command,
            vec![settlement::SETTLEMENT_ACK],
        );
        self.push_send(&mut actions, conn_id, ack);

        Ok(actions)
    }

    /// Device reply to a server `0x82` charge-control command.
    ///
    /// Distinguished from a (misdirected) server request by the payload
    /// length predicate.
    fn handle_charge_reply(&mut self, conn_id: u64, frame: &DnyFrame) -> Vec<GatewayAction> {
        let mut actions = Vec::new();

        if !charge::is_device_ack(&frame.payload) {
            actions.push(GatewayAction::Log {
                level: LogLevel::Warn,
                message: format!(
                    "connection {conn_id} sent a server-side charge command; ignoring"
                ),
            });
            return actions;
        }

        let Ok(ack) = charge::ChargeAck::decode(&frame.payload) else {
            actions.push(GatewayAction::Log {
                level: LogLevel::Warn,
                message: format!("connection {conn_id} charge reply with empty payload"),
            });
            return actions;
        };

        let device_id = frame.device_id();
        let Some(pending) = self.take_pending(conn_id, frame.message_id, frame.command) else {
            actions.push(GatewayAction::Log {
                level: LogLevel::Warn,
                message: format!(
                    "device {device_id} charge reply without a pending command (message {})",
                    frame.message_id
                ),
            });
            return actions;
        };

        if ack.is_success() {
            match pending.kind {
                PendingKind::Start => {
                    if let Some(session) = self.registry.get_mut(conn_id) {
                        session.start_order(pending.port, pending.order_no.clone());
                    }
                    self.push_notify(
                        &mut actions,
                        Notification::new(
                            EventType::ChargingCommandSuccess,
                            device_id.clone(),
                            json!({ "order_no": pending.order_no.clone(), "command": "start" }),
                        )
                        .with_port(pending.port),
                    );
                    self.push_notify(
                        &mut actions,
                        Notification::new(
                            EventType::ChargingStart,
                            device_id.clone(),
                            json!({ "order_no": pending.order_no.clone() }),
                        )
                        .with_port(pending.port),
                    );
                    self.push_notify(
                        &mut actions,
                        Notification::new(
                            EventType::PortStatusChange,
                            device_id.clone(),
                            json!({ "status": "charging" }),
                        )
                        .with_port(pending.port),
                    );
                },
                PendingKind::Stop => {
                    if let Some(session) = self.registry.get_mut(conn_id) {
                        session.end_order(pending.port);
                    }
                    self.push_notify(
                        &mut actions,
                        Notification::new(
                            EventType::ChargingCommandSuccess,
                            device_id.clone(),
                            json!({ "order_no": pending.order_no.clone(), "command": "stop" }),
                        )
                        .with_port(pending.port),
                    );
                    self.push_notify(
                        &mut actions,
                        Notification::new(
                            EventType::ChargingEnd,
                            device_id.clone(),
                            json!({ "order_no": pending.order_no.clone(), "stop_reason_desc": "远程停止" }),
                        )
                        .with_port(pending.port),
                    );
                    self.push_notify(
                        &mut actions,
                        Notification::new(
                            EventType::PortStatusChange,
                            device_id.clone(),
                            json!({ "status": "idle" }),
                        )
                        .with_port(pending.port),
                    );
                },
                PendingKind::Modify | PendingKind::Locate => {
                    actions.push(GatewayAction::Log {
                        level: LogLevel::Warn,
                        message: format!(
                            "device {device_id} answered {:#04x} with a charge reply",
                            pending.command
                        ),
                    });
                },
            }

            actions.push(GatewayAction::Log {
                level: LogLevel::Info,
                message: format!(
                    "device {device_id} accepted charge command for order {}",
                    pending.order_no
                ),
            });
        } else {
            let error = charge::charge_status_label(ack.status);

            if let Some(session) = self.registry.get_mut(conn_id) {
                session.set_property("last_error", error.to_string());
            }

            self.push_notify(
                &mut actions,
                Notification::new(
                    EventType::ChargingCommandFailed,
                    device_id.clone(),
                    json!({
                        "order_no": pending.order_no.clone(),
                        "status": ack.status,
                        "error": error,
                    }),
                )
                .with_port(pending.port),
            );
            actions.push(GatewayAction::Log {
                level: LogLevel::Warn,
                message: format!(
                    "device {device_id} rejected charge command for order {}: {error}",
                    pending.order_no
                ),
            });
        }

        actions
    }

    /// Device reply to a server `0x8A` modify-charge command.
    fn handle_modify_reply(&mut self, conn_id: u64, frame: &DnyFrame) -> Vec<GatewayAction> {
        let mut actions = Vec::new();

        if !charge::is_device_ack(&frame.payload) {
            actions.push(GatewayAction::Log {
                level: LogLevel::Warn,
                message: format!(
                    "connection {conn_id} sent a server-side modify command; ignoring"
                ),
            });
            return actions;
        }

        let status = frame.payload.first().copied().unwrap_or(modify::MODIFY_BAD_PORT);
        let device_id = frame.device_id();

        let Some(pending) = self.take_pending(conn_id, frame.message_id, frame.command) else {
            actions.push(GatewayAction::Log {
                level: LogLevel::Warn,
                message: format!(
                    "device {device_id} modify reply without a pending command"
                ),
            });
            return actions;
        };

        if status == modify::MODIFY_OK {
            self.push_notify(
                &mut actions,
                Notification::new(
                    EventType::ChargeModifySuccess,
                    device_id.clone(),
                    json!({ "order_id": pending.order_no.clone() }),
                )
                .with_port(pending.port),
            );
            self.push_notify(
                &mut actions,
                Notification::new(
                    EventType::ChargeModified,
                    device_id,
                    json!({ "order_id": pending.order_no.clone() }),
                )
                .with_port(pending.port),
            );
        } else {
            self.push_notify(
                &mut actions,
                Notification::new(
                    EventType::ChargeModifyFailed,
                    device_id,
                    json!({
                        "order_id": pending.order_no.clone(),
                        "status": status,
                        "error": modify::modify_status_label(status),
                    }),
                )
                .with_port(pending.port),
            );
        }

        actions
    }

    /// Device reply to a server `0x96` locate command.
    fn handle_locate_reply(&mut self, conn_id: u64, frame: &DnyFrame) -> Vec<GatewayAction> {
        let mut actions = Vec::new();

        if !charge::is_device_ack(&frame.payload) {
            actions.push(GatewayAction::Log {
                level: LogLevel::Warn,
                message: format!(
                    "connection {conn_id} sent a server-side locate command; ignoring"
                ),
            });
            return actions;
        }

        let device_id = frame.device_id();
        let _ = self.take_pending(conn_id, frame.message_id, frame.command);
        let status = frame.payload.first().copied().unwrap_or(0xFF);

        let event_type = if status == 0x00 {
            EventType::DeviceLocateSuccess
        } else {
            EventType::DeviceLocateFailed
        };
        self.push_notify(
            &mut actions,
            Notification::new(event_type, device_id, json!({ "status": status })),
        );

        actions
    }

    /// Frames with an unregistered command byte: log and count, no reply.
    fn handle_unknown(&mut self, conn_id: u64, frame: &DnyFrame) -> Vec<GatewayAction> {
        self.counters.unknown_commands += 1;
        let info = CommandInfo::lookup(frame.command);

        vec![GatewayAction::Log {
            level: LogLevel::Warn,
            message: format!(
                "connection {conn_id} sent unknown command {:#04x} ({}, {} payload bytes)",
                frame.command,
                info.name,
                frame.payload.len()
            ),
        }]
    }
}
