// ============================================
// File: crates/spatialpair-core/src/lib.rs
// ============================================
//! # SpatialPair Core - Protocol & Cryptography Library
//!
//! ## Creation Reason
//! The I/O-free building blocks of device pairing: key agreement, key
//! derivation, the interlock cipher and fragment layout, and the
//! handshake line codec. Everything here is synchronous and testable
//! without a network.
//!
//! ## Main Functionality
//! - [`crypto`]: `KeyAgreement`, KDF, key types, `InterlockCipher`
//! - [`interlock`]: `InterlockEngine`, `FragmentLayout`, `Reassembler`
//! - [`protocol`]: `HandshakeMessage`, `HandshakeCodec`
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │               spatialpair-node                      │
//! │                    │                                │
//! │         ┌──────────┴──────────┐                     │
//! │         ▼                     ▼                     │
//! │  spatialpair-core  ◄──  spatialpair-transport       │
//! │  You are here                 │                     │
//! │         │                     │                     │
//! │         └──────────┬──────────┘                     │
//! │                    ▼                                │
//! │           spatialpair-common                        │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - No async, no I/O in this crate
//! - ALL keys MUST implement Zeroize
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod crypto;
pub mod error;
pub mod interlock;
pub mod protocol;

pub use crypto::{
    AuthenticationKey, AuthenticationKeyMaterial, DhGroup, InterlockCipher, KeyAgreement,
    SessionKey,
};
pub use error::{CoreError, Result};
pub use interlock::{FragmentLayout, InterlockEngine, MAX_ROUNDS, MIN_ROUNDS};
pub use protocol::{HandshakeCodec, HandshakeMessage, VerificationStatus, DEFAULT_PROTOCOL_NAME};
