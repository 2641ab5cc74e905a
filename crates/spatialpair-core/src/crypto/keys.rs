// ============================================
// File: crates/spatialpair-core/src/crypto/keys.rs
// ============================================
//! # Cryptographic Key Types
//!
//! ## Creation Reason
//! Owned, move-only secret types for the two keys a pairing produces,
//! so that live key bytes are never aliased across tasks and the last
//! owner always wipes them.
//!
//! ## Main Functionality
//! - `SessionKey`: key for the channel established after pairing
//! - `AuthenticationKey`: key protecting the interlock verification only
//! - `AuthenticationKeyMaterial`: the pair, as produced by key agreement
//!
//! ## Key Lifecycle
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │  KeyAgreement::complete                                    │
//! │  └─► AuthenticationKeyMaterial  (owned by KeyManager)      │
//! │        ├─ AuthenticationKey ─► leased copy to ONE verifier │
//! │        │                       wiped on VERIFIED / FAILED  │
//! │        └─ SessionKey ─────────► moved to EventSink on      │
//! │                                 success, wiped on failure  │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - ALL key types MUST zeroize on drop
//! - No `Serialize`, no `Display`, `Debug` is redacted
//! - Equality is constant-time
//!
//! ## Last Modified
//! v0.1.0 - Initial key type definitions

use std::fmt;

use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::KEY_SIZE;

// ============================================
// SessionKey
// ============================================

/// Symmetric key for the secure channel that follows a successful pairing.
///
/// # Derivation
/// ```text
/// session_key = SHA256( SHA256(secret) || secret )
/// ```
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; KEY_SIZE]);

impl SessionKey {
    /// Creates a session key from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Returns the raw key bytes.
    ///
    /// # Security Warning
    /// Do not log or persist the returned bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Returns `true` if every byte is zero (after a wipe).
    #[must_use]
    pub fn is_zeroed(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionKey([REDACTED])")
    }
}

impl PartialEq for SessionKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for SessionKey {}

// ============================================
// AuthenticationKey
// ============================================

/// Key used only to encrypt the interlock exchange.
///
/// # Derivation
/// ```text
/// authentication_key = SHA256( SHA256(secret || tag) || secret || tag )
/// ```
///
/// Not `Clone`: the one live copy moves between the key manager and the
/// verification run that is using it.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct AuthenticationKey([u8; KEY_SIZE]);

impl AuthenticationKey {
    /// Creates an authentication key from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// An all-zero placeholder, never a usable key.
    #[must_use]
    pub fn zeroed() -> Self {
        Self([0u8; KEY_SIZE])
    }

    /// Returns the raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Returns `true` if every byte is zero (after a wipe).
    #[must_use]
    pub fn is_zeroed(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl fmt::Debug for AuthenticationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthenticationKey([REDACTED])")
    }
}

impl PartialEq for AuthenticationKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for AuthenticationKey {}

// ============================================
// AuthenticationKeyMaterial
// ============================================

/// Both keys derived from one completed key agreement.
///
/// Deliberately not `Clone`: exactly one owner exists at a time.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct AuthenticationKeyMaterial {
    session_key: SessionKey,
    authentication_key: AuthenticationKey,
}

impl AuthenticationKeyMaterial {
    /// Bundles two derived keys.
    #[must_use]
    pub fn new(session_key: SessionKey, authentication_key: AuthenticationKey) -> Self {
        Self {
            session_key,
            authentication_key,
        }
    }

    /// Returns the session key.
    #[must_use]
    pub fn session_key(&self) -> &SessionKey {
        &self.session_key
    }

    /// Returns the authentication key.
    #[must_use]
    pub fn authentication_key(&self) -> &AuthenticationKey {
        &self.authentication_key
    }

    /// Moves the authentication key out, leaving zeros in its place.
    #[must_use]
    pub fn take_authentication_key(&mut self) -> AuthenticationKey {
        std::mem::replace(&mut self.authentication_key, AuthenticationKey::zeroed())
    }

    /// Puts back a key taken with [`take_authentication_key`](Self::take_authentication_key).
    pub fn restore_authentication_key(&mut self, key: AuthenticationKey) {
        self.authentication_key = key;
    }

    /// Consumes the material, keeping only the session key.
    ///
    /// The authentication key is zeroized when `self` drops.
    #[must_use]
    pub fn into_session_key(self) -> SessionKey {
        self.session_key.clone()
    }

    /// Overwrites both keys with zeros in place.
    pub fn wipe(&mut self) {
        self.zeroize();
    }

    /// Returns `true` once both keys are zero.
    #[must_use]
    pub fn is_wiped(&self) -> bool {
        self.session_key.is_zeroed() && self.authentication_key.is_zeroed()
    }
}

impl fmt::Debug for AuthenticationKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticationKeyMaterial")
            .field("wiped", &self.is_wiped())
            .finish_non_exhaustive()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn material() -> AuthenticationKeyMaterial {
        AuthenticationKeyMaterial::new(
            SessionKey::from_bytes([0x11; KEY_SIZE]),
            AuthenticationKey::from_bytes([0x22; KEY_SIZE]),
        )
    }

    #[test]
    fn test_debug_is_redacted() {
        let key = SessionKey::from_bytes([0x42; KEY_SIZE]);
        let debug = format!("{key:?}");
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("42"));

        let auth = AuthenticationKey::from_bytes([0x42; KEY_SIZE]);
        assert!(format!("{auth:?}").contains("REDACTED"));
    }

    #[test]
    fn test_wipe_zeroes_both_keys() {
        let mut keys = material();
        assert!(!keys.is_wiped());
        keys.wipe();
        assert!(keys.is_wiped());
        assert!(keys.session_key().is_zeroed());
        assert!(keys.authentication_key().is_zeroed());
    }

    #[test]
    fn test_take_and_restore_authentication_key() {
        let mut keys = material();
        let taken = keys.take_authentication_key();
        assert_eq!(taken, AuthenticationKey::from_bytes([0x22; KEY_SIZE]));
        assert!(keys.authentication_key().is_zeroed());
        assert!(!keys.session_key().is_zeroed());

        keys.restore_authentication_key(taken);
        assert_eq!(
            keys.authentication_key(),
            &AuthenticationKey::from_bytes([0x22; KEY_SIZE])
        );
    }

    #[test]
    fn test_into_session_key() {
        let session = material().into_session_key();
        assert_eq!(session, SessionKey::from_bytes([0x11; KEY_SIZE]));
    }

    #[test]
    fn test_constant_time_equality() {
        let a = AuthenticationKey::from_bytes([1; KEY_SIZE]);
        let b = AuthenticationKey::from_bytes([1; KEY_SIZE]);
        let mut c_bytes = [1; KEY_SIZE];
        c_bytes[KEY_SIZE - 1] = 2;
        let c = AuthenticationKey::from_bytes(c_bytes);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
