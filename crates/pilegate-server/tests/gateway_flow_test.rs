//! End-to-end gateway flow over real TCP.
//!
//! A simulated device walks the full lifecycle against a bound gateway:
//! ICCID announcement, register, heartbeat, then a control-plane charge
//! command observed on the socket.

use std::{net::SocketAddr, time::Duration};

use pilegate_core::DeviceState;
use pilegate_server::{ApiError, ControlApi, Gateway, GatewayFileConfig, StartChargingRequest};
use pilegate_proto::{
    DnyFrame, Packet, PacketAssembler,
    payloads::{charge, register},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    task::JoinHandle,
    time::timeout,
};
use tokio_util::sync::CancellationToken;

const PHYSICAL_ID: u32 = 0x04A2_6CF3;
const ICCID: &str = "89860429162390488290";

async fn start_gateway() -> (ControlApi, SocketAddr, CancellationToken, JoinHandle<()>) {
    let mut config = GatewayFileConfig::default();
    config.tcp.bind = "127.0.0.1".to_string();
    config.tcp.port = 0;
    config.notification.enabled = false;

    let gateway = Gateway::bind(&config).await.expect("bind");
    let addr = gateway.local_addr().expect("local addr");
    let control = gateway.control();
    let token = gateway.shutdown_token();

    let handle = tokio::spawn(async move {
        gateway.run().await.expect("gateway run");
    });

    (control, addr, token, handle)
}

/// Read until the assembler yields one DNY frame.
async fn read_frame(stream: &mut TcpStream, asm: &mut PacketAssembler) -> DnyFrame {
    let mut buf = [0u8; 1024];
    loop {
        let n = timeout(Duration::from_secs(5), stream.read(&mut buf))
            .await
            .expect("read timed out")
            .expect("read failed");
        assert!(n > 0, "gateway closed the connection unexpectedly");

        for packet in asm.push(&buf[..n]) {
            if let Packet::Frame(frame) = packet.expect("decode") {
                return frame;
            }
        }
    }
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

async fn connect_and_register(addr: SocketAddr) -> (TcpStream, PacketAssembler) {
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    let mut asm = PacketAssembler::new();

    stream.write_all(ICCID.as_bytes()).await.expect("send iccid");
    stream.write_all(&register_frame(0x0101).encode_to_vec()).await.expect("send register");

    let ack = read_frame(&mut stream, &mut asm).await;
    assert_eq!(ack.command, 0x20);
    assert_eq!(&ack.payload[..], &[0x00]);
    assert_eq!(ack.message_id, 0x0101);

    (stream, asm)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn device_lifecycle_over_tcp() {
    let (control, addr, token, handle) = start_gateway().await;

    let (mut stream, mut asm) = connect_and_register(addr).await;

    // Heartbeat brings the device online and is ACKed.
    stream
        .write_all(&DnyFrame::new(PHYSICAL_ID, 0x0102, 0x21, vec![0x00]).encode_to_vec())
        .await
        .expect("send heartbeat");
    let ack = read_frame(&mut stream, &mut asm).await;
    assert_eq!(ack.command, 0x21);
    assert_eq!(&ack.payload[..], &[0x00]);

    // The control plane sees the session online, addressed in decimal.
    let status = control.device_status("10644723").await.expect("device status");
    let session = status.data.expect("status data").session;
    assert_eq!(session.state, DeviceState::Online);
    assert_eq!(session.iccid.as_deref(), Some(ICCID));
    assert_eq!(session.device_id.as_deref(), Some("04A26CF3"));

    // Start-charging dispatch lands on the socket as a 0x82 frame.
    let response = control
        .start_charging(StartChargingRequest {
            device_id: "10644723".to_string(),
            port: 1,
            mode: 0,
            balance: 1_010,
            value: 60,
            order_no: "ORDER_X".to_string(),
            max_duration: 600,
            max_power: 2_200,
            qr_light: 0,
        })
        .await
        .expect("start charging");
    assert!(response.success);
    assert_eq!(response.code, 0);

    let command = read_frame(&mut stream, &mut asm).await;
    assert_eq!(command.command, 0x82);
    assert_eq!(command.physical_id, PHYSICAL_ID);

    let decoded = charge::ChargeControl::decode(&command.payload).expect("decode 0x82");
    assert_eq!(decoded.charge_cmd, charge::CHARGE_START);
    assert_eq!(decoded.port, 1);
    assert_eq!(decoded.balance, 1_010);
    assert_eq!(decoded.value, 60);
    assert_eq!(decoded.order_no, "ORDER_X");

    // The device accepts; the gateway records the running order.
    stream
        .write_all(&DnyFrame::new(PHYSICAL_ID, command.message_id, 0x82, vec![0x00]).encode_to_vec())
        .await
        .expect("send charge ack");

    let mut order_recorded = false;
    for _ in 0..50 {
        let status = control.device_status("04A26CF3").await.expect("device status");
        let session = status.data.expect("status data").session;
        if session.active_orders.get(&1).map(String::as_str) == Some("ORDER_X") {
            order_recorded = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(order_recorded, "charge ack must record the active order");

    token.cancel();
    handle.await.expect("gateway task");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn control_plane_error_mapping() {
    let (control, _addr, token, handle) = start_gateway().await;

    // Unknown device: 404.
    let err = control
        .start_charging(StartChargingRequest {
            device_id: "10644723".to_string(),
            port: 1,
            mode: 0,
            balance: 0,
            value: 60,
            order_no: "ORDER_X".to_string(),
            max_duration: 0,
            max_power: 0,
            qr_light: 0,
        })
        .await
        .unwrap_err();
    assert_eq!(err.http_status(), 404);

    // Malformed device id: 400.
    let err = control.device_status("not-a-device").await.unwrap_err();
    assert!(matches!(err, ApiError::BadRequest(_)));
    assert_eq!(err.http_status(), 400);

    token.cancel();
    handle.await.expect("gateway task");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reconnect_displaces_old_socket() {
    let (control, addr, token, handle) = start_gateway().await;

    let (mut old_stream, mut old_asm) = connect_and_register(addr).await;
    let (_new_stream, _new_asm) = connect_and_register(addr).await;

    // The old socket is closed by the gateway.
    let mut closed = false;
    let mut buf = [0u8; 256];
    for _ in 0..50 {
        match timeout(Duration::from_millis(100), old_stream.read(&mut buf)).await {
            Ok(Ok(0)) => {
                closed = true;
                break;
            },
            Ok(Ok(n)) => {
                // Late ACK bytes from before the displacement.
                let _ = old_asm.push(&buf[..n]);
            },
            Ok(Err(_)) => {
                closed = true;
                break;
            },
            Err(_) => {},
        }
    }
    assert!(closed, "displaced connection must be closed");

    // The device stays reachable through the new connection.
    let status = control.device_status("04A26CF3").await.expect("device status");
    assert!(status.data.expect("status data").session.device_id.is_some());

    token.cancel();
    handle.await.expect("gateway task");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn capacity_limit_refuses_connections() {
    let mut config = GatewayFileConfig::default();
    config.tcp.bind = "127.0.0.1".to_string();
    config.tcp.port = 0;
    config.tcp.max_connections = 1;
    config.notification.enabled = false;

    let gateway = Gateway::bind(&config).await.expect("bind");
    let addr = gateway.local_addr().expect("local addr");
    let token = gateway.shutdown_token();
    let handle = tokio::spawn(async move {
        gateway.run().await.expect("gateway run");
    });

    let _first = connect_and_register(addr).await;

    // The second connection is accepted at the TCP level, then closed by
    // the capacity check.
    let mut second = TcpStream::connect(addr).await.expect("connect");
    let mut buf = [0u8; 64];
    let outcome = timeout(Duration::from_secs(5), second.read(&mut buf)).await;
    match outcome {
        Ok(Ok(0)) | Ok(Err(_)) => {},
        other => panic!("expected the over-capacity connection to close, got {other:?}"),
    }

    token.cancel();
    handle.await.expect("gateway task");
}
