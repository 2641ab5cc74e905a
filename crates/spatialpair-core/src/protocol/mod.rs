// ============================================
// File: crates/spatialpair-core/src/protocol/mod.rs
// ============================================
//! # Protocol Module
//!
//! ## Main Functionality
//! - [`messages`]: handshake and status line types
//! - [`codec`]: line decoding with per-failure errors
//!
//! ## Protocol Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Handshake Phase (lines)                  │
//! │  Initiator ◄──────────── HELO <protocol> ────────── Responder│
//! │  Initiator ───── AUTHREQ <hex>[ PARAM <p>] ───────► Responder│
//! │  Initiator ◄──────────── AUTHACK <hex> ──────────── Responder│
//! ├─────────────────────────────────────────────────────────────┤
//! │                  Verification Phase (binary)                │
//! │  length preamble, then `rounds` interlocked fragments       │
//! ├─────────────────────────────────────────────────────────────┤
//! │                  Status Phase (lines, optional)             │
//! │  Initiator ◄──────── ACK <p> / NACK <p> ──────────► Responder│
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Any change to keywords breaks interop with deployed devices
//!
//! ## Last Modified
//! v0.1.0 - Initial protocol definitions

pub mod codec;
pub mod messages;

pub use codec::HandshakeCodec;
pub use messages::{HandshakeMessage, VerificationStatus, DEFAULT_PROTOCOL_NAME};
