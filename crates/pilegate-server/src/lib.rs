//! Production charging-pile gateway.
//!
//! Wraps [`pilegate_core`]'s action-based driver with real I/O: a TCP
//! accept loop, one read task and one writer task per connection, a
//! periodic sweeper, the webhook fan-out, and the control-plane adapter.
//!
//! # Architecture
//!
//! The driver is pure logic behind a lock; every I/O edge turns into a
//! [`GatewayEvent`] and every driver decision comes back as a
//! [`GatewayAction`] executed here. Per-connection writes are serialized
//! through an mpsc channel into a single writer task, which is the only
//! owner of the write half.

#![forbid(unsafe_code)]

mod config;
mod control;
mod error;
pub mod notify;
mod system_env;
mod transport;

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use bytes::{Bytes, BytesMut};
pub use config::{
    EndpointSection, GatewayFileConfig, HeartbeatSection, NotificationSection, RetrySection,
    SessionSection, TcpSection,
};
pub use control::{
    ApiError, ApiResponse, ControlApi, DeviceStatusData, DispatchData, GatewayStatusData,
    LocateRequest, ModifyChargeRequest, StartChargingRequest, StopChargingRequest,
};
pub use error::GatewayServerError;
use pilegate_core::{GatewayAction, GatewayDriver, GatewayEvent, LogLevel};
use pilegate_proto::PacketAssembler;
pub use system_env::SystemEnv;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::{Mutex, RwLock, mpsc},
    time::timeout,
};
use tokio_util::sync::CancellationToken;
pub use transport::TcpTransport;

use crate::notify::{MemoryRetryStore, Notifier, RedbRetryStore, RetryStore};

/// Write path of one connection.
struct ConnHandle {
    tx: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
}

/// State shared between the accept loop, connection tasks, the sweeper,
/// and the control adapter.
pub(crate) struct GatewayShared {
    pub(crate) driver: Mutex<GatewayDriver<SystemEnv>>,
    pub(crate) conns: RwLock<HashMap<u64, ConnHandle>>,
    pub(crate) notifier: Notifier,
    pub(crate) env: SystemEnv,
    write_timeout: Duration,
}

/// Production gateway server.
pub struct Gateway {
    shared: Arc<GatewayShared>,
    transport: TcpTransport,
    shutdown: CancellationToken,
    read_deadline: Duration,
    cleanup_interval: Duration,
    next_conn_id: AtomicU64,
}

impl Gateway {
    /// Create and bind a gateway.
    ///
    /// # Errors
    ///
    /// - `Config` for a bad bind address or unreadable retry database
    /// - `Transport` when the TCP bind fails
    pub async fn bind(config: &GatewayFileConfig) -> Result<Self, GatewayServerError> {
        let env = SystemEnv::new();
        let gateway_config = config.gateway_config();
        let read_deadline = gateway_config.read_deadline;
        let write_timeout = gateway_config.write_timeout;
        let cleanup_interval = gateway_config.cleanup_interval;

        let driver = GatewayDriver::new(env.clone(), gateway_config);
        let transport = TcpTransport::bind(&config.bind_addr()).await?;
        let shutdown = CancellationToken::new();

        let store: Arc<dyn RetryStore> = match &config.notification.retry_db {
            Some(path) => Arc::new(
                RedbRetryStore::open(path)
                    .map_err(|e| GatewayServerError::Config(e.to_string()))?,
            ),
            None => Arc::new(MemoryRetryStore::new()),
        };
        let notifier =
            notify::spawn(config.notify_config(), config.endpoints(), store, &shutdown);

        Ok(Self {
            shared: Arc::new(GatewayShared {
                driver: Mutex::new(driver),
                conns: RwLock::new(HashMap::new()),
                notifier,
                env,
                write_timeout,
            }),
            transport,
            shutdown,
            read_deadline,
            cleanup_interval,
            next_conn_id: AtomicU64::new(1),
        })
    }

    /// Local address the gateway is listening on.
    pub fn local_addr(&self) -> Result<SocketAddr, GatewayServerError> {
        self.transport.local_addr()
    }

    /// Handle for the control-plane HTTP layer.
    #[must_use]
    pub fn control(&self) -> ControlApi {
        ControlApi::new(Arc::clone(&self.shared))
    }

    /// Root cancellation token; cancel to initiate graceful shutdown.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run until the shutdown token fires.
    ///
    /// # Errors
    ///
    /// Currently only I/O errors at bind time surface; accept errors are
    /// logged and the loop continues.
    pub async fn run(self) -> Result<(), GatewayServerError> {
        tracing::info!(
            "gateway listening on {}",
            self.transport.local_addr().map(|a| a.to_string()).unwrap_or_default()
        );

        {
            let shared = Arc::clone(&self.shared);
            let shutdown = self.shutdown.clone();
            let interval = self.cleanup_interval;
            tokio::spawn(async move {
                sweeper(shared, interval, shutdown).await;
            });
        }

        loop {
            let accepted = tokio::select! {
                () = self.shutdown.cancelled() => break,
                accepted = self.transport.accept() => accepted,
            };

            match accepted {
                Ok((stream, addr)) => {
                    let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
                    let shared = Arc::clone(&self.shared);
                    let shutdown = self.shutdown.clone();
                    let read_deadline = self.read_deadline;

                    tokio::spawn(async move {
                        handle_connection(shared, conn_id, stream, addr, read_deadline, shutdown)
                            .await;
                    });
                },
                Err(e) => {
                    tracing::error!("accept error: {}", e);
                },
            }
        }

        tracing::info!("gateway shutting down");
        for (_, handle) in self.shared.conns.write().await.drain() {
            handle.cancel.cancel();
        }

        Ok(())
    }
}

/// Periodic driver tick for timeouts, the idle sweep, and the offline
/// grace window.
async fn sweeper(shared: Arc<GatewayShared>, interval: Duration, shutdown: CancellationToken) {
    let mut tick = tokio::time::interval(interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = tick.tick() => {},
        }

        let actions = {
            let mut driver = shared.driver.lock().await;
            driver.process_event(GatewayEvent::Tick)
        };

        match actions {
            Ok(actions) => execute_actions(&shared, actions).await,
            Err(e) => tracing::error!("sweeper tick failed: {}", e),
        }
    }
}

/// One connection: read loop plus a writer task owning the write half.
async fn handle_connection(
    shared: Arc<GatewayShared>,
    conn_id: u64,
    stream: TcpStream,
    addr: SocketAddr,
    read_deadline: Duration,
    shutdown: CancellationToken,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    let (tx, mut rx) = mpsc::channel::<Bytes>(64);
    let cancel = shutdown.child_token();

    let writer = {
        let cancel = cancel.clone();
        let write_timeout = shared.write_timeout;
        tokio::spawn(async move {
            loop {
                let item = tokio::select! {
                    () = cancel.cancelled() => break,
                    item = rx.recv() => item,
                };
                let Some(bytes) = item else { break };

                match timeout(write_timeout, write_half.write_all(&bytes)).await {
                    Ok(Ok(())) => {},
                    Ok(Err(e)) => {
                        tracing::debug!("connection {} write error: {}", conn_id, e);
                        cancel.cancel();
                        break;
                    },
                    Err(_) => {
                        tracing::warn!("connection {} write timeout", conn_id);
                        cancel.cancel();
                        break;
                    },
                }
            }
            let _ = write_half.shutdown().await;
        })
    };

    shared
        .conns
        .write()
        .await
        .insert(conn_id, ConnHandle { tx, cancel: cancel.clone() });

    let accepted = {
        let mut driver = shared.driver.lock().await;
        driver.process_event(GatewayEvent::ConnectionAccepted {
            conn_id,
            remote_addr: addr.to_string(),
        })
    };
    match accepted {
        Ok(actions) => execute_actions(&shared, actions).await,
        Err(e) => tracing::error!("connection {} setup failed: {}", conn_id, e),
    }

    let mut assembler = PacketAssembler::new();
    let mut buf = BytesMut::with_capacity(4096);

    // Every inbound byte resets the read deadline; frame errors are driver
    // events, never reasons to stop reading.
    let close_reason = loop {
        buf.clear();

        let read = tokio::select! {
            () = cancel.cancelled() => break "closed by supervisor".to_string(),
            read = timeout(read_deadline, read_half.read_buf(&mut buf)) => read,
        };

        let n = match read {
            Err(_) => break "read deadline exceeded".to_string(),
            Ok(Err(e)) => break format!("read error: {e}"),
            Ok(Ok(0)) => break "peer closed".to_string(),
            Ok(Ok(n)) => n,
        };

        for packet in assembler.push(&buf[..n]) {
            let event = match packet {
                Ok(packet) => GatewayEvent::PacketReceived { conn_id, packet },
                Err(error) => GatewayEvent::DecodeFailed { conn_id, error },
            };

            let actions = {
                let mut driver = shared.driver.lock().await;
                driver.process_event(event)
            };

            match actions {
                Ok(actions) => execute_actions(&shared, actions).await,
                Err(e) => tracing::warn!("connection {} event failed: {}", conn_id, e),
            }
        }
    };

    cancel.cancel();
    shared.conns.write().await.remove(&conn_id);

    let closed = {
        let mut driver = shared.driver.lock().await;
        driver.process_event(GatewayEvent::ConnectionClosed { conn_id, reason: close_reason })
    };
    if let Ok(actions) = closed {
        execute_actions(&shared, actions).await;
    }

    let _ = writer.await;
}

/// Execute driver actions against sockets, the notifier, and the log.
pub(crate) async fn execute_actions(shared: &GatewayShared, actions: Vec<GatewayAction>) {
    for action in actions {
        match action {
            GatewayAction::SendFrame { conn_id, frame } => {
                let bytes = Bytes::from(frame.encode_to_vec());

                let tx = shared.conns.read().await.get(&conn_id).map(|h| h.tx.clone());
                match tx {
                    Some(tx) => {
                        if tx.send(bytes).await.is_err() {
                            tracing::debug!("connection {} writer gone", conn_id);
                        }
                    },
                    None => tracing::debug!("send to unknown connection {}", conn_id),
                }
            },

            GatewayAction::CloseConnection { conn_id, reason } => {
                tracing::info!("closing connection {}: {}", conn_id, reason);
                if let Some(handle) = shared.conns.read().await.get(&conn_id) {
                    handle.cancel.cancel();
                }
            },

            GatewayAction::Notify(event) => {
                if let Err(e) = shared.notifier.submit(event) {
                    tracing::warn!("notification dropped: {}", e);
                }
            },

            GatewayAction::Log { level, message } => match level {
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
        }
    }
}
