// ============================================
// File: crates/spatialpair-core/src/crypto/mod.rs
// ============================================
//! # Cryptography Module
//!
//! ## Main Functionality
//! - [`key_agreement`]: finite-field Diffie-Hellman (SKIP 1024)
//! - [`kdf`]: double SHA-256 derivation of session/authentication keys
//! - [`keys`]: zeroizing key types
//! - [`cipher`]: AES-256-CBC for the interlock exchange
//!
//! ## Cryptographic Design
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  g^a mod p  ────── AUTHREQ ──────►                          │
//! │             ◄───── AUTHACK ──────  g^b mod p                │
//! │                                                             │
//! │  secret = g^ab mod p  (128 bytes, big-endian)               │
//! │     ├─► SessionKey        = dSHA256(secret)                 │
//! │     └─► AuthenticationKey = dSHA256(secret ‖ tag)           │
//! │                                  │                          │
//! │                                  ▼                          │
//! │                     AES-256-CBC (interlock)                 │
//! └─────────────────────────────────────────────────────────────┘
//! dSHA256(x) = SHA256(SHA256(x) ‖ x)
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Primitives come from RustCrypto and num-bigint; do not hand-roll
//! - ALL secret types zeroize on drop
//!
//! ## Last Modified
//! v0.1.0 - Initial crypto implementation

pub mod cipher;
pub mod kdf;
pub mod key_agreement;
pub mod keys;

pub use cipher::InterlockCipher;
pub use key_agreement::{AgreementState, DhGroup, KeyAgreement};
pub use keys::{AuthenticationKey, AuthenticationKeyMaterial, SessionKey};

// ============================================
// Constants
// ============================================

/// Size of derived keys in bytes.
pub const KEY_SIZE: usize = 32;

/// AES block size in bytes.
pub const BLOCK_SIZE: usize = 16;
