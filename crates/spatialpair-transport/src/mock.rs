// ============================================
// File: crates/spatialpair-transport/src/mock.rs
// ============================================
//! # In-Memory Transport
//!
//! ## Creation Reason
//! Runs the full handshake and interlock between two tasks without
//! sockets or privileges, for tests and for embedding both ends of a
//! pairing in one process.
//!
//! ## Main Functionality
//! - `MockConnection::pair`: two connected `Connection`s over
//!   `tokio::io::duplex`
//! - `MockListener` / `MockConnector`: listener queue and a connector
//!   that feeds it
//!
//! ## Usage in Tests
//! ```
//! use spatialpair_transport::mock::MockConnection;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let (mut a, mut b) = MockConnection::pair();
//! a.write_line("HELO test").await.unwrap();
//! assert_eq!(b.read_line().await.unwrap(), "HELO test");
//! # }
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - For testing and single-process demos only
//!
//! ## Last Modified
//! v0.1.0 - Initial in-memory transport

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::connection::Connection;
use crate::error::{Result, TransportError};
use crate::traits::{PeerConnector, PeerListener};

// ============================================
// Constants
// ============================================

/// Buffer size of each in-memory pipe direction.
const PIPE_CAPACITY: usize = 64 * 1024;

/// Maximum number of connections waiting in a `MockListener`.
const MAX_PENDING: usize = 128;

// ============================================
// MockConnection
// ============================================

/// Factory for in-memory connection pairs.
pub struct MockConnection;

impl MockConnection {
    /// Creates two connected ends.
    #[must_use]
    pub fn pair() -> (Connection, Connection) {
        let (a, b) = tokio::io::duplex(PIPE_CAPACITY);
        (Connection::new(a, None), Connection::new(b, None))
    }
}

// ============================================
// MockListener
// ============================================

/// Listener fed by [`MockConnector`].
#[derive(Default)]
pub struct MockListener {
    pending: Mutex<VecDeque<Connection>>,
    notify: Notify,
    closed: AtomicBool,
}

impl MockListener {
    /// Creates an empty listener.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queues an inbound connection.
    ///
    /// # Errors
    /// `ListenerClosed` after `close`, `Common` if too many are pending.
    pub fn inject(&self, conn: Connection) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::ListenerClosed);
        }
        let mut pending = self.pending.lock();
        if pending.len() >= MAX_PENDING {
            return Err(spatialpair_common::CommonError::out_of_range(
                pending.len() + 1,
                0,
                MAX_PENDING,
            )
            .into());
        }
        pending.push_back(conn);
        drop(pending);
        self.notify.notify_one();
        Ok(())
    }

    /// Stops the listener; pending and future `accept` calls fail.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Number of queued connections.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }
}

#[async_trait]
impl PeerListener for MockListener {
    async fn accept(&self) -> Result<Connection> {
        loop {
            let notified = self.notify.notified();
            let next = self.pending.lock().pop_front();
            if let Some(conn) = next {
                return Ok(conn);
            }
            if self.closed.load(Ordering::Acquire) {
                return Err(TransportError::ListenerClosed);
            }
            notified.await;
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }
}

// ============================================
// MockConnector
// ============================================

/// Connector that delivers the far end of each pair to a listener.
#[derive(Clone)]
pub struct MockConnector {
    listener: Arc<MockListener>,
}

impl MockConnector {
    /// Creates a connector targeting `listener`.
    #[must_use]
    pub fn new(listener: Arc<MockListener>) -> Self {
        Self { listener }
    }
}

#[async_trait]
impl PeerConnector for MockConnector {
    async fn connect(&self, addr: SocketAddr) -> Result<Connection> {
        let (local, remote) = tokio::io::duplex(PIPE_CAPACITY);
        self.listener
            .inject(Connection::new(remote, None))
            .map_err(|e| TransportError::connect_failed(addr, e.to_string()))?;
        Ok(Connection::new(local, Some(addr)))
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connector_reaches_listener() {
        let listener = MockListener::new();
        let connector = MockConnector::new(listener.clone());

        let accept = {
            let listener = listener.clone();
            tokio::spawn(async move {
                let mut conn = listener.accept().await.unwrap();
                conn.read_line().await.unwrap()
            })
        };

        let mut client = connector
            .connect("127.0.0.1:9".parse().unwrap())
            .await
            .unwrap();
        client.write_line("AUTHREQ 01").await.unwrap();
        assert_eq!(accept.await.unwrap(), "AUTHREQ 01");
    }

    #[tokio::test]
    async fn test_closed_listener() {
        let listener = MockListener::new();
        let waiter = {
            let listener = listener.clone();
            tokio::spawn(async move { listener.accept().await })
        };
        tokio::task::yield_now().await;
        listener.close();
        assert!(matches!(waiter.await.unwrap(), Err(TransportError::ListenerClosed)));

        let (a, _b) = MockConnection::pair();
        assert!(listener.inject(a).is_err());
        assert_eq!(listener.pending(), 0);
    }
}
