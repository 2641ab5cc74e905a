// ============================================
// File: crates/spatialpair-node/src/lib.rs
// ============================================
//! # SpatialPair Node Library
//!
//! ## Creation Reason
//! Pairs two devices that have never met over an untrusted network and
//! binds the resulting key to side information both devices observed,
//! so an active relay cannot sit in the middle unnoticed.
//!
//! ## Main Functionality
//!
//! ### Modules
//! - [`config`]: TOML configuration
//! - [`error`]: `PairingError` and its failure categories
//! - [`events`]: event sinks, registry and protocol hooks
//! - [`services`]: handshake, key manager, interlock, oracle, orchestrator
//! - [`server`]: `PairingNode` accept loop
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        SpatialPair Node                         │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌─────────────┐     ┌─────────────┐     ┌─────────────────┐    │
//! │  │   Config    │────►│ PairingNode │────►│  Orchestrator   │    │
//! │  └─────────────┘     └─────────────┘     └────────┬────────┘    │
//! │                                                   │             │
//! │         ┌──────────────────┬──────────────────────┼──────┐      │
//! │         ▼                  ▼                      ▼      ▼      │
//! │  ┌─────────────┐   ┌──────────────┐   ┌───────────┐ ┌────────┐  │
//! │  │  Handshake  │   │  KeyManager  │   │ Interlock │ │ Oracle │  │
//! │  └─────────────┘   └──────────────┘   └───────────┘ └────────┘  │
//! │                                                                 │
//! ├─────────────────────────────────────────────────────────────────┤
//! │   spatialpair-transport (Connection)  ·  spatialpair-core       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Pairing Flow
//! ```text
//! connect/accept → HELO / AUTHREQ / AUTHACK → Verifying
//!   → payload → interlock rounds → oracle → ACK/NACK → Verified | Failed
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Configuration is passed explicitly; nothing reads globals or env
//! - Every attempt raises exactly one terminal event
//! - Keys are wiped on every terminal transition
//!
//! ## Last Modified
//! v0.1.0 - Initial node library

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod events;
pub mod server;
pub mod services;

// Re-export primary types
pub use config::PairingConfig;
pub use error::{PairingError, Result};
pub use events::{
    ChannelSink, EventRegistry, EventSink, FailureReason, LoggingSink, PairingEvent,
    ProtocolHooks,
};
pub use server::PairingNode;
pub use services::{Orchestrator, VerificationOracle, VerificationOutcome};
