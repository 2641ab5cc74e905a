// ============================================
// File: crates/spatialpair-transport/src/tcp.rs
// ============================================
//! # TCP Transport
//!
//! ## Main Functionality
//! - `TcpPeerListener`: bound TCP listener yielding `Connection`s
//! - `TcpPeerConnector`: outbound TCP with a connect timeout
//!
//! ## ⚠️ Important Note for Next Developer
//! - `TCP_NODELAY` is set on every stream: interlock fragments are
//!   small and must not wait for Nagle coalescing
//!
//! ## Last Modified
//! v0.1.0 - Initial TCP transport

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

use crate::connection::{Connection, DEFAULT_MAX_LINE_LEN};
use crate::error::{Result, TransportError};
use crate::traits::{PeerConnector, PeerListener};

// ============================================
// TcpPeerListener
// ============================================

/// TCP listener for inbound pairing requests.
#[derive(Debug)]
pub struct TcpPeerListener {
    listener: TcpListener,
    max_line_len: usize,
}

impl TcpPeerListener {
    /// Binds to `addr`.
    ///
    /// # Errors
    /// `BindFailed` if the address is unavailable.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::bind_failed(addr, e.to_string()))?;
        info!(addr = ?listener.local_addr().ok(), "Pairing listener bound");
        Ok(Self {
            listener,
            max_line_len: DEFAULT_MAX_LINE_LEN,
        })
    }

    /// Sets the maximum line length for accepted connections.
    #[must_use]
    pub fn with_max_line_len(mut self, max_line_len: usize) -> Self {
        self.max_line_len = max_line_len;
        self
    }
}

#[async_trait]
impl PeerListener for TcpPeerListener {
    async fn accept(&self) -> Result<Connection> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(|e| TransportError::io("accepting", e))?;
        stream
            .set_nodelay(true)
            .map_err(|e| TransportError::io("setting nodelay", e))?;
        debug!(peer = %addr, "Accepted connection");
        Ok(Connection::new(stream, Some(addr)).with_max_line_len(self.max_line_len))
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }
}

// ============================================
// TcpPeerConnector
// ============================================

/// Outbound TCP connector.
#[derive(Debug, Clone)]
pub struct TcpPeerConnector {
    connect_timeout: Duration,
    max_line_len: usize,
}

impl TcpPeerConnector {
    /// Creates a connector with the given connect timeout.
    #[must_use]
    pub const fn new(connect_timeout: Duration, max_line_len: usize) -> Self {
        Self {
            connect_timeout,
            max_line_len,
        }
    }
}

impl Default for TcpPeerConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10), DEFAULT_MAX_LINE_LEN)
    }
}

#[async_trait]
impl PeerConnector for TcpPeerConnector {
    async fn connect(&self, addr: SocketAddr) -> Result<Connection> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::connect_failed(addr, "timed out"))?
            .map_err(|e| TransportError::connect_failed(addr, e.to_string()))?;
        stream
            .set_nodelay(true)
            .map_err(|e| TransportError::io("setting nodelay", e))?;
        debug!(peer = %addr, "Connected");
        Ok(Connection::new(stream, Some(addr)).with_max_line_len(self.max_line_len))
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_loopback_lines() {
        let listener = TcpPeerListener::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let mut conn = listener.accept().await.unwrap();
            conn.write_line("HELO loopback").await.unwrap();
            conn.read_line().await.unwrap()
        });

        let mut client = TcpPeerConnector::default().connect(addr).await.unwrap();
        assert_eq!(client.peer_addr(), Some(addr));
        assert_eq!(client.read_line().await.unwrap(), "HELO loopback");
        client.write_line("AUTHREQ 00").await.unwrap();
        assert_eq!(server.await.unwrap(), "AUTHREQ 00");
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpPeerListener::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = TcpPeerConnector::new(Duration::from_secs(2), 64)
            .connect(addr)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::ConnectFailed { .. }));
    }
}
