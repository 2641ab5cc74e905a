// ============================================
// File: crates/spatialpair-transport/src/traits.rs
// ============================================
//! # Transport Traits
//!
//! ## Creation Reason
//! The pairing node never talks to sockets directly. It accepts and
//! opens connections through these two traits so that the same
//! handshake and verification code runs over TCP in production and
//! over in-memory pipes in tests.
//!
//! ## Main Functionality
//! - `PeerListener`: accepts inbound connections
//! - `PeerConnector`: opens outbound connections
//!
//! ## ⚠️ Important Note for Next Developer
//! - Implementations must be Send + Sync, they are shared via `Arc`
//!
//! ## Last Modified
//! v0.1.0 - Initial trait definitions

use std::net::SocketAddr;

use async_trait::async_trait;

use crate::connection::Connection;
use crate::error::Result;

/// Source of inbound peer connections.
#[async_trait]
pub trait PeerListener: Send + Sync {
    /// Waits for the next inbound connection.
    ///
    /// # Errors
    /// `ListenerClosed` once the listener is shut, `Io` on accept failure.
    async fn accept(&self) -> Result<Connection>;

    /// Local address, if bound to one.
    fn local_addr(&self) -> Option<SocketAddr>;
}

/// Opens outbound peer connections.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Connects to `addr`.
    ///
    /// # Errors
    /// `ConnectFailed` if the peer cannot be reached.
    async fn connect(&self, addr: SocketAddr) -> Result<Connection>;
}
