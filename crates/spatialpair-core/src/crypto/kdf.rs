// ============================================
// File: crates/spatialpair-core/src/crypto/kdf.rs
// ============================================
//! # Key Derivation Functions
//!
//! ## Main Functionality
//! - `double_sha256`: `SHA256(SHA256(x) || x)`
//! - `derive_session_key`: session key from the raw DH secret
//! - `derive_authentication_key`: authentication key, domain-separated
//!   by [`AUTHENTICATION_KEY_TAG`]
//! - `derive_key_material`: both at once
//!
//! ## ⚠️ Important Note for Next Developer
//! - The tag is part of the wire contract: both devices must use the
//!   same constant or every verification fails
//! - Intermediate buffers are zeroized before returning
//!
//! ## Last Modified
//! v0.1.0 - Double SHA-256 derivation

use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use super::keys::{AuthenticationKey, AuthenticationKeyMaterial, SessionKey};
use super::KEY_SIZE;

/// Domain-separation tag appended to the secret for the authentication key.
pub const AUTHENTICATION_KEY_TAG: &[u8] = b"MAGIC COOKIE FOR SPATIALPAIR AUTHENTICATION";

// ============================================
// Key Derivation
// ============================================

/// Computes `SHA256(SHA256(input) || input)`.
#[must_use]
pub fn double_sha256(input: &[u8]) -> [u8; KEY_SIZE] {
    let inner = Sha256::digest(input);
    let mut outer = Sha256::new();
    outer.update(inner);
    outer.update(input);
    outer.finalize().into()
}

/// Derives the session key from the raw shared secret.
#[must_use]
pub fn derive_session_key(shared_secret: &[u8]) -> SessionKey {
    SessionKey::from_bytes(double_sha256(shared_secret))
}

/// Derives the authentication key from the raw shared secret.
#[must_use]
pub fn derive_authentication_key(shared_secret: &[u8]) -> AuthenticationKey {
    let mut tagged = Vec::with_capacity(shared_secret.len() + AUTHENTICATION_KEY_TAG.len());
    tagged.extend_from_slice(shared_secret);
    tagged.extend_from_slice(AUTHENTICATION_KEY_TAG);
    let key = AuthenticationKey::from_bytes(double_sha256(&tagged));
    tagged.zeroize();
    key
}

/// Derives both keys from the raw shared secret.
#[must_use]
pub fn derive_key_material(shared_secret: &[u8]) -> AuthenticationKeyMaterial {
    AuthenticationKeyMaterial::new(
        derive_session_key(shared_secret),
        derive_authentication_key(shared_secret),
    )
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_double_sha256_structure() {
        let input = b"secret";
        let mut manual = Sha256::new();
        manual.update(Sha256::digest(input));
        manual.update(input);
        let expected: [u8; KEY_SIZE] = manual.finalize().into();
        assert_eq!(double_sha256(input), expected);
        assert_ne!(double_sha256(input), <[u8; KEY_SIZE]>::from(Sha256::digest(input)));
    }

    #[test]
    fn test_domain_separation() {
        let secret = [0x5a; 128];
        let keys = derive_key_material(&secret);
        assert_ne!(
            keys.session_key().as_bytes(),
            keys.authentication_key().as_bytes()
        );
    }

    #[test]
    fn test_authentication_key_uses_tag() {
        let secret = [0x01; 128];
        let mut tagged = secret.to_vec();
        tagged.extend_from_slice(AUTHENTICATION_KEY_TAG);
        assert_eq!(
            derive_authentication_key(&secret).as_bytes(),
            &double_sha256(&tagged)
        );
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let secret = [0x77; 128];
        assert_eq!(derive_session_key(&secret), derive_session_key(&secret));
        assert_eq!(
            derive_authentication_key(&secret),
            derive_authentication_key(&secret)
        );
    }
}
