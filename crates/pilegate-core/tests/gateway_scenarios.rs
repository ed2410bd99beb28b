//! End-to-end driver scenarios on a virtual clock.
//!
//! Exercises the full inbound path (ICCID → register → heartbeat →
//! timeout) and the control-plane dispatch path against a driver with no
//! real I/O attached.

use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use pilegate_core::{
    ControlCommand, DeviceState, DispatchError, Environment, EventType, GatewayAction,
    GatewayConfig, GatewayDriver, GatewayEvent, Notification,
};
use pilegate_proto::{
    DnyFrame, Packet,
    payloads::{charge, register, settlement},
};

const PHYSICAL_ID: u32 = 0x04A2_6CF3;
const DEVICE_ID: &str = "04A26CF3";
const ICCID: &str = "89860429162390488290";

/// Virtual-clock environment shared by all scenario tests.
#[derive(Clone)]
struct TestEnv {
    start: Instant,
    offset: Arc<Mutex<Duration>>,
    seed: Arc<Mutex<u64>>,
}

impl TestEnv {
    fn new() -> Self {
        Self {
            start: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
            seed: Arc::new(Mutex::new(0x5EED)),
        }
    }

    fn advance(&self, d: Duration) {
        *self.offset.lock().unwrap() += d;
    }
}

impl Environment for TestEnv {
    type Instant = Instant;

    fn now(&self) -> Instant {
        self.start + *self.offset.lock().unwrap()
    }

    fn wall_clock_secs(&self) -> u64 {
        1_700_000_000 + self.offset.lock().unwrap().as_secs()
    }

    fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        async {}
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        let mut seed = self.seed.lock().unwrap();
        for byte in buffer.iter_mut() {
            *seed = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            *byte = (*seed >> 33) as u8;
        }
    }
}

fn notifications(actions: &[GatewayAction]) -> Vec<&Notification> {
    actions
        .iter()
        .filter_map(|a| match a {
            GatewayAction::Notify(n) => Some(n),
            _ => None,
        })
        .collect()
}

fn sent_frames(actions: &[GatewayAction]) -> Vec<&DnyFrame> {
    actions
        .iter()
        .filter_map(|a| match a {
            GatewayAction::SendFrame { frame, .. } => Some(frame),
            _ => None,
        })
        .collect()
}

fn register_frame(message_id: u16) -> DnyFrame {
    let payload = register::RegisterPayload {
        iccid: ICCID.to_string(),
        device_type: 5,
        direct_mode: false,
        firmware_version: "V2.1.7".to_string(),
    };
    DnyFrame::new(PHYSICAL_ID, message_id, 0x20, payload.encode())
}

fn heartbeat_frame(message_id: u16) -> DnyFrame {
    DnyFrame::new(PHYSICAL_ID, message_id, 0x21, vec![0x00])
}

fn packet(driver: &mut GatewayDriver<TestEnv>, conn_id: u64, p: Packet) -> Vec<GatewayAction> {
    driver.process_event(GatewayEvent::PacketReceived { conn_id, packet: p }).unwrap()
}

/// Accept a connection and walk it to `Online`.
fn bring_online(driver: &mut GatewayDriver<TestEnv>, conn_id: u64) {
    driver
        .process_event(GatewayEvent::ConnectionAccepted {
            conn_id,
            remote_addr: "192.168.1.50:40231".to_string(),
        })
        .unwrap();
    packet(driver, conn_id, Packet::Iccid(ICCID.to_string()));
    packet(driver, conn_id, Packet::Frame(register_frame(0x0101)));
    packet(driver, conn_id, Packet::Frame(heartbeat_frame(0x0102)));
}

#[test]
fn s1_register_then_heartbeat() {
    let env = TestEnv::new();
    let mut driver = GatewayDriver::new(env, GatewayConfig::default());

    driver
        .process_event(GatewayEvent::ConnectionAccepted {
            conn_id: 1,
            remote_addr: "192.168.1.50:40231".to_string(),
        })
        .unwrap();
    assert_eq!(driver.connection_count(), 1);

    // ICCID announcement: Connected -> IccidReceived.
    packet(&mut driver, 1, Packet::Iccid(ICCID.to_string()));
    assert_eq!(driver.sessions()[0].state, DeviceState::IccidReceived);

    // Register: -> Registered, ACK 0x20/0x00, device_registered emitted.
    let actions = packet(&mut driver, 1, Packet::Frame(register_frame(0x0101)));
    let frames = sent_frames(&actions);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].command, 0x20);
    assert_eq!(&frames[0].payload[..], &[0x00]);
    assert_eq!(frames[0].message_id, 0x0101);

    let events = notifications(&actions);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EventType::DeviceRegistered);
    assert_eq!(events[0].device_id, DEVICE_ID);

    let snapshot = driver.session_by_device(DEVICE_ID).unwrap();
    assert_eq!(snapshot.state, DeviceState::Registered);
    assert_eq!(snapshot.iccid.as_deref(), Some(ICCID));

    // Heartbeat: -> Online, ACK 0x21/0x00, device_online exactly once.
    let actions = packet(&mut driver, 1, Packet::Frame(heartbeat_frame(0x0102)));
    let frames = sent_frames(&actions);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].command, 0x21);
    assert_eq!(&frames[0].payload[..], &[0x00]);

    let events = notifications(&actions);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EventType::DeviceOnline);

    assert_eq!(driver.session_by_device(DEVICE_ID).unwrap().state, DeviceState::Online);
}

#[test]
fn repeated_register_does_not_duplicate_notification() {
    let env = TestEnv::new();
    let mut driver = GatewayDriver::new(env, GatewayConfig::default());
    bring_online(&mut driver, 1);

    let actions = packet(&mut driver, 1, Packet::Frame(register_frame(0x0103)));

    // ACK is re-sent, no second device_registered, state untouched.
    assert_eq!(sent_frames(&actions).len(), 1);
    assert!(notifications(&actions).is_empty());
    assert_eq!(driver.session_by_device(DEVICE_ID).unwrap().state, DeviceState::Online);
}

#[test]
fn repeated_heartbeats_emit_online_once() {
    let env = TestEnv::new();
    let mut driver = GatewayDriver::new(env, GatewayConfig::default());
    bring_online(&mut driver, 1);

    for message_id in [0x0110u16, 0x0111, 0x0112] {
        let actions = packet(&mut driver, 1, Packet::Frame(heartbeat_frame(message_id)));
        assert!(notifications(&actions).is_empty(), "already online, no event expected");
    }
}

#[test]
fn link_keepalive_counts_as_heartbeat() {
    let env = TestEnv::new();
    let mut driver = GatewayDriver::new(env.clone(), GatewayConfig::default());
    bring_online(&mut driver, 1);

    env.advance(Duration::from_secs(100));
    let actions = packet(&mut driver, 1, Packet::Link);

    // No reply for link, no event while already online.
    assert!(sent_frames(&actions).is_empty());
    assert!(notifications(&actions).is_empty());

    // The beat pushed the heartbeat deadline out.
    env.advance(Duration::from_secs(120));
    let actions = driver.process_event(GatewayEvent::Tick).unwrap();
    assert!(notifications(&actions).is_empty());
    assert_eq!(driver.session_by_device(DEVICE_ID).unwrap().state, DeviceState::Online);
}

#[test]
fn s2_heartbeat_timeout_goes_offline_with_grace() {
    let env = TestEnv::new();
    let mut driver = GatewayDriver::new(env.clone(), GatewayConfig::default());
    bring_online(&mut driver, 1);

    // Silence past the heartbeat timeout.
    env.advance(Duration::from_secs(181));
    let actions = driver.process_event(GatewayEvent::Tick).unwrap();

    let events = notifications(&actions);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EventType::DeviceOffline);
    assert_eq!(events[0].data["reason"], serde_json::json!("timeout"));

    // The session stays in the registry for the grace window.
    assert_eq!(driver.connection_count(), 1);
    assert_eq!(driver.session_by_device(DEVICE_ID).unwrap().state, DeviceState::Offline);

    // Within the grace window no close is requested.
    env.advance(Duration::from_secs(100));
    let actions = driver.process_event(GatewayEvent::Tick).unwrap();
    assert!(!actions.iter().any(|a| matches!(a, GatewayAction::CloseConnection { .. })));

    // Past the grace window the connection is closed.
    env.advance(Duration::from_secs(250));
    let actions = driver.process_event(GatewayEvent::Tick).unwrap();
    assert!(actions.iter().any(|a| matches!(a, GatewayAction::CloseConnection { conn_id: 1, .. })));
}

#[test]
fn offline_device_recovers_on_heartbeat() {
    let env = TestEnv::new();
    let mut driver = GatewayDriver::new(env.clone(), GatewayConfig::default());
    bring_online(&mut driver, 1);

    env.advance(Duration::from_secs(181));
    driver.process_event(GatewayEvent::Tick).unwrap();
    assert_eq!(driver.session_by_device(DEVICE_ID).unwrap().state, DeviceState::Offline);

    let actions = packet(&mut driver, 1, Packet::Frame(heartbeat_frame(0x0120)));
    let events = notifications(&actions);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EventType::DeviceOnline);
    assert_eq!(driver.session_by_device(DEVICE_ID).unwrap().state, DeviceState::Online);
}

#[test]
fn s3_start_charging_dispatch_and_replies() {
    let env = TestEnv::new();
    let mut driver = GatewayDriver::new(env, GatewayConfig::default());
    bring_online(&mut driver, 1);

    // Decimal id 10644723 normalizes to 04A26CF3.
    let actions = driver
        .dispatch(ControlCommand::StartCharging {
            device_id: "10644723".to_string(),
            port: 1,
            rate_mode: 0,
            balance: 1_010,
            value: 60,
            order_no: "ORDER_X".to_string(),
            max_duration: 600,
            max_power: 2_200,
            qr_light: 0,
        })
        .unwrap();

    let frames = sent_frames(&actions);
    assert_eq!(frames.len(), 1);
    let frame = frames[0];
    assert_eq!(frame.command, 0x82);
    assert_eq!(frame.physical_id, PHYSICAL_ID);

    let control = charge::ChargeControl::decode(&frame.payload).unwrap();
    assert_eq!(control.charge_cmd, charge::CHARGE_START);
    assert_eq!(control.port, 1);
    assert_eq!(control.balance, 1_010);
    assert_eq!(control.value, 60);
    assert_eq!(control.order_no, "ORDER_X");

    // Device accepts: charging_command_success + charging_start.
    let reply = DnyFrame::new(PHYSICAL_ID, frame.message_id, 0x82, vec![0x00]);
    let actions = packet(&mut driver, 1, Packet::Frame(reply));

    let events = notifications(&actions);
    let types: Vec<EventType> = events.iter().map(|n| n.event_type).collect();
    assert!(types.contains(&EventType::ChargingCommandSuccess));
    assert!(types.contains(&EventType::ChargingStart));

    let snapshot = driver.session_by_device(DEVICE_ID).unwrap();
    assert_eq!(snapshot.active_orders.get(&1).map(String::as_str), Some("ORDER_X"));

    // A second command rejected for balance: charging_command_failed with
    // the vendor label.
    let actions = driver
        .dispatch(ControlCommand::StartCharging {
            device_id: DEVICE_ID.to_string(),
            port: 2,
            rate_mode: 0,
            balance: 0,
            value: 60,
            order_no: "ORDER_Y".to_string(),
            max_duration: 600,
            max_power: 2_200,
            qr_light: 0,
        })
        .unwrap();
    let message_id = sent_frames(&actions)[0].message_id;

    let reply = DnyFrame::new(PHYSICAL_ID, message_id, 0x82, vec![0x02]);
    let actions = packet(&mut driver, 1, Packet::Frame(reply));

    let events = notifications(&actions);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EventType::ChargingCommandFailed);
    assert_eq!(events[0].data["error"], serde_json::json!("余额不足"));
}

#[test]
fn s4_dispatch_to_offline_device_is_refused() {
    let env = TestEnv::new();
    let mut driver = GatewayDriver::new(env.clone(), GatewayConfig::default());
    bring_online(&mut driver, 1);

    env.advance(Duration::from_secs(181));
    driver.process_event(GatewayEvent::Tick).unwrap();

    let err = driver
        .dispatch(ControlCommand::StartCharging {
            device_id: "10644723".to_string(),
            port: 1,
            rate_mode: 0,
            balance: 1_010,
            value: 60,
            order_no: "ORDER_X".to_string(),
            max_duration: 600,
            max_power: 2_200,
            qr_light: 0,
        })
        .unwrap_err();

    assert_eq!(
        err,
        DispatchError::DeviceNotOnline {
            device_id: DEVICE_ID.to_string(),
            state: DeviceState::Offline,
        }
    );
}

#[test]
fn s5_settlement_upload() {
    let env = TestEnv::new();
    let mut driver = GatewayDriver::new(env, GatewayConfig::default());
    bring_online(&mut driver, 1);

    let payload = settlement::SettlementPayload {
        order_id: "ORDER_X".to_string(),
        gun_number: 1,
        start_time: 1_700_000_000,
        end_time: 1_700_003_600,
        electric_energy: 12_000,
        card_number: String::new(),
        stop_reason: 5,
        charge_fee: 800,
        service_fee: 210,
        total_fee: 1_010,
    };
    let frame = DnyFrame::new(PHYSICAL_ID, 0x0150, 0x03, payload.encode());

    let actions = packet(&mut driver, 1, Packet::Frame(frame));

    let frames = sent_frames(&actions);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].command, 0x03);
    assert_eq!(&frames[0].payload[..], &[0x00]);

    let events = notifications(&actions);
    let settlement_event = events
        .iter()
        .find(|n| n.event_type == EventType::Settlement)
        .expect("settlement event");
    assert_eq!(settlement_event.data["stop_reason_desc"], serde_json::json!("用户拔出"));
    assert_eq!(settlement_event.data["energy_consumed"], serde_json::json!(12.0));
    assert_eq!(settlement_event.port_number, Some(1));
}

#[test]
fn settlement_with_bad_port_is_rejected() {
    let env = TestEnv::new();
    let mut driver = GatewayDriver::new(env, GatewayConfig::default());
    bring_online(&mut driver, 1);

    let payload = settlement::SettlementPayload {
        order_id: "ORDER_X".to_string(),
        gun_number: 17,
        start_time: 1_700_000_000,
        end_time: 1_700_003_600,
        electric_energy: 12_000,
        card_number: String::new(),
        stop_reason: 5,
        charge_fee: 0,
        service_fee: 0,
        total_fee: 0,
    };
    let frame = DnyFrame::new(PHYSICAL_ID, 0x0151, 0x03, payload.encode());

    let actions = packet(&mut driver, 1, Packet::Frame(frame));

    // NAK status, no events.
    let frames = sent_frames(&actions);
    assert_eq!(frames.len(), 1);
    assert_eq!(&frames[0].payload[..], &[0x01]);
    assert!(notifications(&actions).is_empty());
}

#[test]
fn reconnect_displaces_previous_connection() {
    let env = TestEnv::new();
    let mut driver = GatewayDriver::new(env, GatewayConfig::default());
    bring_online(&mut driver, 1);

    // Same device registers on a second connection.
    driver
        .process_event(GatewayEvent::ConnectionAccepted {
            conn_id: 2,
            remote_addr: "192.168.1.50:40999".to_string(),
        })
        .unwrap();
    let actions = packet(&mut driver, 2, Packet::Frame(register_frame(0x0201)));

    assert!(
        actions
            .iter()
            .any(|a| matches!(a, GatewayAction::CloseConnection { conn_id: 1, .. })),
        "old connection must be displaced"
    );
    assert_eq!(driver.session_by_device(DEVICE_ID).unwrap().conn_id, 2);

    // Runtime confirms the close; the device stays reachable via conn 2.
    driver
        .process_event(GatewayEvent::ConnectionClosed {
            conn_id: 1,
            reason: "displaced".to_string(),
        })
        .unwrap();
    assert_eq!(driver.session_by_device(DEVICE_ID).unwrap().conn_id, 2);
}

#[test]
fn unknown_command_is_logged_not_answered() {
    let env = TestEnv::new();
    let mut driver = GatewayDriver::new(env, GatewayConfig::default());
    bring_online(&mut driver, 1);

    let frame = DnyFrame::new(PHYSICAL_ID, 0x0160, 0x77, vec![1, 2, 3]);
    let actions = packet(&mut driver, 1, Packet::Frame(frame));

    assert!(sent_frames(&actions).is_empty());
    assert!(notifications(&actions).is_empty());
    assert!(actions.iter().any(|a| matches!(a, GatewayAction::Log { .. })));
    assert_eq!(driver.stats().counters.unknown_commands, 1);
}

#[test]
fn server_time_reply_is_current_clock() {
    let env = TestEnv::new();
    let mut driver = GatewayDriver::new(env.clone(), GatewayConfig::default());
    bring_online(&mut driver, 1);

    let frame = DnyFrame::new(PHYSICAL_ID, 0x0170, 0x12, Vec::new());
    let actions = packet(&mut driver, 1, Packet::Frame(frame));

    let frames = sent_frames(&actions);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].command, 0x12);

    let replied =
        pilegate_proto::payloads::time::decode_server_time(&frames[0].payload).unwrap();
    assert_eq!(u64::from(replied), env.wall_clock_secs());
}

#[test]
fn stats_reflect_traffic() {
    let env = TestEnv::new();
    let mut driver = GatewayDriver::new(env, GatewayConfig::default());
    bring_online(&mut driver, 1);

    let stats = driver.stats();
    assert_eq!(stats.sessions, 1);
    assert_eq!(stats.sessions_by_state.get("online"), Some(&1));
    // Register + heartbeat went in; two ACKs went out.
    assert_eq!(stats.counters.frames_in, 2);
    assert_eq!(stats.counters.frames_out, 2);
    assert!(stats.counters.bytes_in > 0);

    // Per-command breakdown mirrors the totals.
    assert_eq!(stats.counters.commands_in.get(&0x20), Some(&1));
    assert_eq!(stats.counters.commands_in.get(&0x21), Some(&1));
    assert_eq!(stats.counters.commands_out.get(&0x20), Some(&1));
    assert_eq!(stats.counters.commands_out.get(&0x21), Some(&1));
    assert_eq!(stats.counters.commands_in.values().sum::<u64>(), stats.counters.frames_in);
}

#[test]
fn rejected_register_counts_as_reconnect_failure() {
    let env = TestEnv::new();
    let mut driver = GatewayDriver::new(env, GatewayConfig::default());

    driver
        .process_event(GatewayEvent::ConnectionAccepted {
            conn_id: 1,
            remote_addr: "192.168.1.50:40231".to_string(),
        })
        .unwrap();

    // Register frame with a payload too short to carry an ICCID.
    let bad_register = DnyFrame::new(PHYSICAL_ID, 0x0101, 0x20, vec![0x31, 0x32]);
    let actions = packet(&mut driver, 1, Packet::Frame(bad_register));

    // No ACK, no event, and the failure is on the device's record.
    assert!(sent_frames(&actions).is_empty());
    assert!(notifications(&actions).is_empty());
    assert_eq!(driver.reconnect_stats(DEVICE_ID).consecutive_failures, 1);

    // A valid register clears the streak.
    packet(&mut driver, 1, Packet::Frame(register_frame(0x0102)));
    let stats = driver.reconnect_stats(DEVICE_ID);
    assert_eq!(stats.consecutive_failures, 0);
    assert_eq!(stats.total, 1);
}

#[test]
fn disconnect_forgets_reconnect_stats() {
    let env = TestEnv::new();
    let mut driver = GatewayDriver::new(env, GatewayConfig::default());
    bring_online(&mut driver, 1);

    assert_eq!(driver.reconnect_stats(DEVICE_ID).total, 1);

    driver
        .process_event(GatewayEvent::ConnectionClosed {
            conn_id: 1,
            reason: "peer closed".to_string(),
        })
        .unwrap();

    // The device's last session left the registry; its tracker entry went
    // with it.
    let stats = driver.reconnect_stats(DEVICE_ID);
    assert_eq!(stats.total, 0);
    assert!((stats.quality - 1.0).abs() < f64::EPSILON);
}
