//! TCP transport.
//!
//! Thin wrapper over `tokio::net::TcpListener` that maps I/O failures onto
//! typed server errors. Devices speak plain TCP; trust sits at the network
//! perimeter, so there is no TLS layer here.

use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};

use crate::error::GatewayServerError;

/// Listening TCP transport.
pub struct TcpTransport {
    listener: TcpListener,
}

impl TcpTransport {
    /// Bind to the given address.
    ///
    /// # Errors
    ///
    /// - `Config` for an unparseable address
    /// - `Transport` when the bind itself fails (port in use, permissions)
    pub async fn bind(address: &str) -> Result<Self, GatewayServerError> {
        let addr: SocketAddr = address.parse().map_err(|e| {
            GatewayServerError::Config(format!("invalid bind address '{address}': {e}"))
        })?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| GatewayServerError::Transport(format!("bind {addr} failed: {e}")))?;

        tracing::info!("TCP transport bound to {}", addr);

        Ok(Self { listener })
    }

    /// Accept one connection.
    ///
    /// # Errors
    ///
    /// `Transport` when the accept fails.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), GatewayServerError> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(|e| GatewayServerError::Transport(format!("accept failed: {e}")))?;

        stream.set_nodelay(true).ok();

        Ok((stream, addr))
    }

    /// Local address the transport is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, GatewayServerError> {
        self.listener
            .local_addr()
            .map_err(|e| GatewayServerError::Transport(format!("local address: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn binds_to_ephemeral_port() {
        let transport = TcpTransport::bind("127.0.0.1:0").await.unwrap();
        let addr = transport.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn rejects_invalid_address() {
        let result = TcpTransport::bind("not:an:address").await;
        assert!(matches!(result, Err(GatewayServerError::Config(_))));
    }

    #[tokio::test]
    async fn accepts_a_connection() {
        let transport = TcpTransport::bind("127.0.0.1:0").await.unwrap();
        let addr = transport.local_addr().unwrap();

        let client = tokio::spawn(async move { TcpStream::connect(addr).await });

        let (_stream, peer) = transport.accept().await.unwrap();
        assert!(client.await.unwrap().is_ok());
        assert_eq!(peer.ip(), addr.ip());
    }
}
