// ============================================
// File: crates/spatialpair-node/src/services/mod.rs
// ============================================
//! # Pairing Services
//!
//! ## Creation Reason
//! The pairing logic of a node, separated from the accept loop and the
//! CLI so every piece can be driven over in-memory connections.
//!
//! ### Submodules
//! - [`handshake`]: Diffie-Hellman handshake state machine
//! - [`key_manager`]: per-remote state and key custody
//! - [`payload`]: local payload slot shared with the sensor side
//! - [`interlock`]: interlock exchange over a connection
//! - [`group`]: per-round barrier for grouped verification
//! - [`oracle`]: match decision over two payloads
//! - [`orchestrator`]: one pairing attempt end to end
//!
//! ## Service Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Orchestrator                          │
//! │                                                             │
//! │  ┌────────────┐   ┌─────────────┐   ┌────────────────────┐  │
//! │  │ Handshake  │──►│ KeyManager  │──►│ InterlockExchange  │  │
//! │  │ (HELO/     │   │ (Verifying, │   │  ▲                 │  │
//! │  │  AUTHREQ/  │   │  keys)      │   │  │ InterlockGroup  │  │
//! │  │  AUTHACK)  │   └─────────────┘   └──┴─────────┬───────┘  │
//! │  └────────────┘                                 │          │
//! │        PayloadSlot ─── local payload ──────────►│          │
//! │                                                 ▼          │
//! │                                      VerificationOracle    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - KeyManager and InterlockGroup are the only state shared across runs
//! - All services are `Send + Sync`
//!
//! ## Last Modified
//! v0.1.0 - Initial services structure

pub mod group;
pub mod handshake;
pub mod interlock;
pub mod key_manager;
pub mod oracle;
pub mod orchestrator;
pub mod payload;

pub use group::{GroupMember, InterlockGroup};
pub use handshake::{HandshakeOutcome, HandshakeSettings, HandshakeState, HANDSHAKE_STEPS};
pub use interlock::{InterlockExchange, InterlockParams};
pub use key_manager::{AuthenticationKeyLease, KeyManager, PairingState};
pub use oracle::{ExactMatchOracle, FnOracle, SimilarityOracle, VerificationOracle};
pub use orchestrator::{
    GroupReport, Orchestrator, PairedRemote, PendingVerification, VerificationOutcome,
};
pub use payload::PayloadSlot;
