// ============================================
// File: crates/spatialpair-core/src/crypto/key_agreement.rs
// ============================================
//! # Finite-Field Diffie-Hellman Key Agreement
//!
//! ## Creation Reason
//! Two devices that have never met need a shared secret before the
//! verification phase can bind it to the physical side channel. One
//! `KeyAgreement` performs exactly one exchange.
//!
//! ## Main Functionality
//! - `DhGroup`: safe-prime modulus and generator (SKIP 1024 by default)
//! - `KeyAgreement`: `generate()` then `complete(remote)`, with wiping
//!
//! ## State Machine
//! ```text
//!  Fresh ──generate()──► Generated ──complete(ok)──► Completed
//!    │                       │
//!    └──────── wipe() / complete(err) ──────────────► Wiped
//! ```
//!
//! ## Peer Value Validation
//! A remote public value is rejected (`InvalidPeerKey`) when it
//! - is 0 or 1
//! - is ≥ the group modulus
//! - equals our own public value (reflection)
//!
//! ## ⚠️ Important Note for Next Developer
//! - Public values are always exactly `public_value_size()` bytes,
//!   big-endian, left-padded with zeros
//! - The private exponent is wiped on success, failure, `wipe()` and drop
//! - No key material exists until `complete` succeeds
//!
//! ## Last Modified
//! v0.1.0 - SKIP 1024 Diffie-Hellman

use std::fmt;

use num_bigint_dig::BigUint;
use rand::RngCore;
use tracing::debug;
use zeroize::Zeroize;

use spatialpair_common::error::CommonError;

use super::kdf::derive_key_material;
use super::keys::AuthenticationKeyMaterial;
use crate::error::{CoreError, Result};

// ============================================
// Constants
// ============================================

/// Size of the private exponent in bytes (256 bits).
pub const PRIVATE_EXPONENT_SIZE: usize = 32;

/// Smallest accepted modulus, in bytes.
pub const MIN_MODULUS_SIZE: usize = 64;

/// The 1024-bit SKIP safe prime.
const SKIP_1024_MODULUS: [u8; 128] = [
    0xf4, 0x88, 0xfd, 0x58, 0x4e, 0x49, 0xdb, 0xcd, 0x20, 0xb4, 0x9d, 0xe4,
    0x91, 0x07, 0x36, 0x6b, 0x33, 0x6c, 0x38, 0x0d, 0x45, 0x1d, 0x0f, 0x7c,
    0x88, 0xb3, 0x1c, 0x7c, 0x5b, 0x2d, 0x8e, 0xf6, 0xf3, 0xc9, 0x23, 0xc0,
    0x43, 0xf0, 0xa5, 0x5b, 0x18, 0x8d, 0x8e, 0xbb, 0x55, 0x8c, 0xb8, 0x5d,
    0x38, 0xd3, 0x34, 0xfd, 0x7c, 0x17, 0x57, 0x43, 0xa3, 0x1d, 0x18, 0x6c,
    0xde, 0x33, 0x21, 0x2c, 0xb5, 0x2a, 0xff, 0x3c, 0xe1, 0xb1, 0x29, 0x40,
    0x18, 0x11, 0x8d, 0x7c, 0x84, 0xa7, 0x0a, 0x72, 0xd6, 0x86, 0xc4, 0x03,
    0x19, 0xc8, 0x07, 0x29, 0x7a, 0xca, 0x95, 0x0c, 0xd9, 0x96, 0x9f, 0xab,
    0xd0, 0x0a, 0x50, 0x9b, 0x02, 0x46, 0xd3, 0x08, 0x3d, 0x66, 0xa4, 0x5d,
    0x41, 0x9f, 0x9c, 0x7c, 0xbd, 0x89, 0x4b, 0x22, 0x19, 0x26, 0xba, 0xab,
    0xa2, 0x5e, 0xc3, 0x55, 0xe9, 0x2f, 0x78, 0xc7,
];

/// Generator used with the SKIP modulus.
const SKIP_1024_GENERATOR: u32 = 2;

// ============================================
// DhGroup
// ============================================

/// Diffie-Hellman group parameters.
#[derive(Clone, PartialEq, Eq)]
pub struct DhGroup {
    modulus: BigUint,
    generator: BigUint,
    size: usize,
}

impl DhGroup {
    /// The SKIP 1024-bit group with generator 2.
    #[must_use]
    pub fn skip_1024() -> Self {
        Self {
            modulus: BigUint::from_bytes_be(&SKIP_1024_MODULUS),
            generator: BigUint::from(SKIP_1024_GENERATOR),
            size: SKIP_1024_MODULUS.len(),
        }
    }

    /// Builds a group from a hex modulus and a generator.
    ///
    /// # Errors
    /// Fails if the modulus is not hex, is shorter than
    /// [`MIN_MODULUS_SIZE`] bytes, is even, or the generator is not in
    /// `[2, p-2]`.
    pub fn from_hex(modulus_hex: &str, generator: u32) -> Result<Self> {
        let bytes = hex::decode(modulus_hex.trim())
            .map_err(|e| group_error(format!("modulus is not hex: {e}")))?;
        let size = bytes.iter().skip_while(|b| **b == 0).count();
        if size < MIN_MODULUS_SIZE {
            return Err(group_error(format!(
                "modulus must be at least {MIN_MODULUS_SIZE} bytes, got {size}"
            )));
        }
        if bytes.last().map_or(true, |b| b & 1 == 0) {
            return Err(group_error("modulus must be odd"));
        }
        let modulus = BigUint::from_bytes_be(&bytes);
        let generator = BigUint::from(generator);
        if generator < BigUint::from(2u32)
            || generator.clone() + BigUint::from(2u32) > modulus
        {
            return Err(group_error("generator out of range"));
        }
        Ok(Self {
            modulus,
            generator,
            size,
        })
    }

    /// Size of an encoded public value in bytes.
    #[must_use]
    pub const fn public_value_size(&self) -> usize {
        self.size
    }

    fn encode(&self, value: &BigUint) -> Result<Vec<u8>> {
        let raw = value.to_bytes_be();
        if raw.len() > self.size {
            return Err(CoreError::invalid_state("encode public value", "value below modulus"));
        }
        let mut out = vec![0u8; self.size];
        out[self.size - raw.len()..].copy_from_slice(&raw);
        Ok(out)
    }
}

fn group_error(reason: impl Into<String>) -> CoreError {
    CommonError::invalid_input("dh_group", reason).into()
}

impl Default for DhGroup {
    fn default() -> Self {
        Self::skip_1024()
    }
}

impl fmt::Debug for DhGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DhGroup")
            .field("bits", &self.modulus.bits())
            .field("generator", &self.generator)
            .finish()
    }
}

// ============================================
// KeyAgreement
// ============================================

/// Lifecycle of a [`KeyAgreement`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgreementState {
    /// Nothing generated yet.
    Fresh,
    /// Local public value sent out, waiting for the peer's.
    Generated,
    /// Keys derived, private state wiped.
    Completed,
    /// Wiped after failure or on request.
    Wiped,
}

/// One Diffie-Hellman exchange.
///
/// # Example
/// ```
/// use spatialpair_core::crypto::KeyAgreement;
///
/// let mut alice = KeyAgreement::new();
/// let mut bob = KeyAgreement::new();
/// let a_pub = alice.generate().unwrap();
/// let b_pub = bob.generate().unwrap();
///
/// let a_keys = alice.complete(&b_pub).unwrap();
/// let b_keys = bob.complete(&a_pub).unwrap();
/// assert_eq!(a_keys.session_key(), b_keys.session_key());
/// ```
pub struct KeyAgreement {
    group: DhGroup,
    state: AgreementState,
    private_exponent: Option<BigUint>,
    local_public: Vec<u8>,
}

impl KeyAgreement {
    /// Creates a key agreement over the SKIP 1024 group.
    #[must_use]
    pub fn new() -> Self {
        Self::with_group(DhGroup::skip_1024())
    }

    /// Creates a key agreement over `group`.
    #[must_use]
    pub fn with_group(group: DhGroup) -> Self {
        Self {
            group,
            state: AgreementState::Fresh,
            private_exponent: None,
            local_public: Vec::new(),
        }
    }

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> AgreementState {
        self.state
    }

    /// Returns the group in use.
    #[must_use]
    pub const fn group(&self) -> &DhGroup {
        &self.group
    }

    /// Draws a private exponent and returns the local public value.
    ///
    /// # Errors
    /// `InvalidState` if called more than once.
    pub fn generate(&mut self) -> Result<Vec<u8>> {
        if self.state != AgreementState::Fresh {
            return Err(CoreError::invalid_state("generate", "fresh key agreement"));
        }

        let mut seed = [0u8; PRIVATE_EXPONENT_SIZE];
        let exponent = loop {
            rand::thread_rng().fill_bytes(&mut seed);
            let candidate = BigUint::from_bytes_be(&seed);
            if candidate > BigUint::from(1u32) {
                break candidate;
            }
        };
        seed.zeroize();

        let public = self.group.generator.modpow(&exponent, &self.group.modulus);
        self.local_public = self.group.encode(&public)?;
        self.private_exponent = Some(exponent);
        self.state = AgreementState::Generated;

        debug!(size = self.local_public.len(), "DH public value generated");
        Ok(self.local_public.clone())
    }

    /// Combines the remote public value with ours and derives the keys.
    ///
    /// On any failure all secret state is wiped and the agreement cannot
    /// be reused.
    ///
    /// # Errors
    /// - `InvalidState` unless `generate` ran and `complete` did not
    /// - `InvalidPeerKey` if the remote value fails validation
    pub fn complete(&mut self, remote_public: &[u8]) -> Result<AuthenticationKeyMaterial> {
        if self.state != AgreementState::Generated {
            return Err(CoreError::invalid_state("complete", "generated key agreement"));
        }

        let result = self.combine(remote_public);
        self.wipe_secret();
        self.state = match &result {
            Ok(_) => AgreementState::Completed,
            Err(_) => {
                self.local_public.zeroize();
                AgreementState::Wiped
            }
        };
        result
    }

    fn combine(&self, remote_public: &[u8]) -> Result<AuthenticationKeyMaterial> {
        if remote_public.len() != self.group.size {
            return Err(CoreError::invalid_peer_key(format!(
                "expected {} bytes, got {}",
                self.group.size,
                remote_public.len()
            )));
        }
        if remote_public == self.local_public.as_slice() {
            return Err(CoreError::invalid_peer_key("remote value reflects our own"));
        }

        let remote = BigUint::from_bytes_be(remote_public);
        if remote <= BigUint::from(1u32) {
            return Err(CoreError::invalid_peer_key("remote value is 0 or 1"));
        }
        if remote >= self.group.modulus {
            return Err(CoreError::invalid_peer_key("remote value not below modulus"));
        }

        let exponent = self
            .private_exponent
            .as_ref()
            .ok_or_else(|| CoreError::invalid_state("complete", "private exponent present"))?;

        let mut shared = remote.modpow(exponent, &self.group.modulus);
        let mut secret = self.group.encode(&shared)?;
        let keys = derive_key_material(&secret);
        secret.zeroize();
        shared.zeroize();
        Ok(keys)
    }

    fn wipe_secret(&mut self) {
        if let Some(mut exponent) = self.private_exponent.take() {
            exponent.zeroize();
        }
    }

    /// Overwrites all secret state; the agreement becomes unusable.
    pub fn wipe(&mut self) {
        self.wipe_secret();
        self.local_public.zeroize();
        self.state = AgreementState::Wiped;
    }
}

impl Default for KeyAgreement {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for KeyAgreement {
    fn drop(&mut self) {
        self.wipe_secret();
    }
}

impl fmt::Debug for KeyAgreement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyAgreement")
            .field("group", &self.group)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symmetry() {
        for _ in 0..3 {
            let mut a = KeyAgreement::new();
            let mut b = KeyAgreement::new();
            let a_pub = a.generate().unwrap();
            let b_pub = b.generate().unwrap();
            assert_eq!(a_pub.len(), 128);

            let a_keys = a.complete(&b_pub).unwrap();
            let b_keys = b.complete(&a_pub).unwrap();
            assert_eq!(a_keys.session_key(), b_keys.session_key());
            assert_eq!(a_keys.authentication_key(), b_keys.authentication_key());
            assert_ne!(
                a_keys.session_key().as_bytes(),
                a_keys.authentication_key().as_bytes()
            );
            assert_eq!(a.state(), AgreementState::Completed);
        }
    }

    #[test]
    fn test_generate_only_once() {
        let mut ka = KeyAgreement::new();
        ka.generate().unwrap();
        assert!(matches!(ka.generate(), Err(CoreError::InvalidState { .. })));
    }

    #[test]
    fn test_complete_requires_generate() {
        let mut ka = KeyAgreement::new();
        let err = ka.complete(&[2u8; 128]).unwrap_err();
        assert!(matches!(err, CoreError::InvalidState { .. }));
    }

    #[test]
    fn test_complete_only_once() {
        let mut a = KeyAgreement::new();
        let mut b = KeyAgreement::new();
        a.generate().unwrap();
        let b_pub = b.generate().unwrap();
        a.complete(&b_pub).unwrap();
        assert!(matches!(a.complete(&b_pub), Err(CoreError::InvalidState { .. })));
    }

    fn rejects(remote: &[u8]) {
        let mut ka = KeyAgreement::new();
        ka.generate().unwrap();
        let err = ka.complete(remote).unwrap_err();
        assert!(matches!(err, CoreError::InvalidPeerKey { .. }), "{err}");
        assert_eq!(ka.state(), AgreementState::Wiped);
    }

    #[test]
    fn test_rejects_zero_and_one() {
        rejects(&[0u8; 128]);
        let mut one = [0u8; 128];
        one[127] = 1;
        rejects(&one);
    }

    #[test]
    fn test_rejects_modulus_and_above() {
        rejects(&SKIP_1024_MODULUS);
        rejects(&[0xff; 128]);
    }

    #[test]
    fn test_rejects_wrong_length() {
        rejects(&[2u8; 64]);
    }

    #[test]
    fn test_rejects_reflected_value() {
        let mut ka = KeyAgreement::new();
        let own = ka.generate().unwrap();
        let err = ka.complete(&own).unwrap_err();
        assert!(matches!(err, CoreError::InvalidPeerKey { .. }));
        assert_eq!(ka.state(), AgreementState::Wiped);
    }

    #[test]
    fn test_wipe_blocks_completion() {
        let mut a = KeyAgreement::new();
        let mut b = KeyAgreement::new();
        a.generate().unwrap();
        let b_pub = b.generate().unwrap();
        a.wipe();
        assert!(a.complete(&b_pub).is_err());
    }

    #[test]
    fn test_wipe_clears_exponent_and_public_value() {
        let mut ka = KeyAgreement::new();
        ka.generate().unwrap();
        assert!(ka.private_exponent.is_some());

        ka.wipe();
        assert!(ka.private_exponent.is_none());
        assert!(ka.local_public.is_empty());
        assert_eq!(ka.state(), AgreementState::Wiped);
    }

    #[test]
    fn test_completion_drops_exponent() {
        let mut a = KeyAgreement::new();
        let mut b = KeyAgreement::new();
        a.generate().unwrap();
        let b_pub = b.generate().unwrap();
        a.complete(&b_pub).unwrap();
        assert!(a.private_exponent.is_none());
    }

    #[test]
    fn test_biguint_zeroize_clears_digits() {
        let mut value = BigUint::from_bytes_be(&[0xab; 32]);
        value.zeroize();
        assert!(value.to_bytes_be().iter().all(|b| *b == 0));
    }

    #[test]
    fn test_group_from_hex() {
        let hex_modulus = hex::encode(SKIP_1024_MODULUS);
        let group = DhGroup::from_hex(&hex_modulus, 2).unwrap();
        assert_eq!(group, DhGroup::skip_1024());
        assert_eq!(group.public_value_size(), 128);

        assert!(DhGroup::from_hex("zz", 2).is_err());
        assert!(DhGroup::from_hex("ff", 2).is_err());
        assert!(DhGroup::from_hex(&hex_modulus, 1).is_err());
    }
}
