// ============================================
// File: crates/spatialpair-transport/src/lib.rs
// ============================================
//! # SpatialPair Transport - Peer Connection Layer
//!
//! ## Creation Reason
//! Gives the pairing node a duplex byte stream per remote party and a
//! listener for inbound requests, without tying it to a socket type.
//!
//! ## Main Functionality
//! - [`connection`]: `Connection` with line and exact-length binary I/O
//! - [`traits`]: `PeerListener`, `PeerConnector`
//! - [`tcp`]: TCP implementations
//! - [`mock`]: in-memory implementations for tests
//!
//! ## Architecture Position
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                 spatialpair-node                         │
//! │        handshake  ·  interlock  ·  status lines          │
//! │                       │                                  │
//! │                       ▼                                  │
//! │  ┌────────────────────────────────────────────────────┐  │
//! │  │        spatialpair-transport  ◄── You are here     │  │
//! │  │   Connection ◄── TcpPeerListener / MockListener    │  │
//! │  └────────────────────────────────────────────────────┘  │
//! │                       │                                  │
//! │                       ▼                                  │
//! │                 TCP  /  tokio::io::duplex                │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Always go through the traits so tests can swap in the mock
//! - No transport encryption here: the pairing protocol provides its own
//!
//! ## Last Modified
//! v0.1.0 - Initial transport layer implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod connection;
pub mod error;
pub mod mock;
pub mod tcp;
pub mod traits;

pub use connection::{Connection, DEFAULT_MAX_LINE_LEN};
pub use error::{Result, TransportError};
pub use mock::{MockConnection, MockConnector, MockListener};
pub use tcp::{TcpPeerConnector, TcpPeerListener};
pub use traits::{PeerConnector, PeerListener};
