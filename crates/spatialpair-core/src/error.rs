// ============================================
// File: crates/spatialpair-core/src/error.rs
// ============================================
//! # Core Error Types
//!
//! ## Creation Reason
//! Errors raised by the pure protocol pieces: Diffie-Hellman, key
//! derivation, the interlock cipher and fragment layout, and the
//! handshake line codec.
//!
//! ## Error Categories
//! 1. **Key agreement**: rejected peer value, calls out of order
//! 2. **Handshake codec**: greeting, prefix, key encoding, line size
//! 3. **Interlock**: bad parameters, fragment size mismatch, incomplete
//!    reassembly, ciphertext shape
//!
//! ## ⚠️ Important Note for Next Developer
//! - NEVER include key material in error messages
//! - The handshake failure modes must stay distinguishable: greeting,
//!   prefix, key encoding and DH rejection each have their own variant
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use thiserror::Error;

use spatialpair_common::error::CommonError;

// ============================================
// Result Type Alias
// ============================================

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

// ============================================
// CoreError
// ============================================

/// Core error types for protocol and cryptographic operations.
#[derive(Error, Debug)]
pub enum CoreError {
    // ========================================
    // Key Agreement Errors
    // ========================================

    /// Remote public value failed domain validation or reflects ours.
    #[error("Invalid peer key: {reason}")]
    InvalidPeerKey {
        /// Which check failed
        reason: String,
    },

    /// Operation not valid in the current key agreement state.
    #[error("Invalid state for operation: {operation} requires {required_state}")]
    InvalidState {
        /// What operation was attempted
        operation: String,
        /// What state was required
        required_state: String,
    },

    // ========================================
    // Handshake Codec Errors
    // ========================================

    /// Greeting line missing or naming another protocol.
    #[error("Unexpected greeting: {reason}")]
    BadGreeting {
        /// What was wrong with the greeting
        reason: String,
    },

    /// Line did not start with the expected command.
    #[error("Unexpected message: expected '{expected}' command")]
    UnexpectedCommand {
        /// Command keyword that was expected
        expected: String,
    },

    /// Public value field not hex or not of the fixed length.
    #[error("Invalid public key encoding: {reason}")]
    KeyEncoding {
        /// Why decoding failed
        reason: String,
    },

    /// Message is malformed.
    #[error("Malformed message: {reason}")]
    MalformedMessage {
        /// What's wrong with the message
        reason: String,
    },

    /// Line exceeds maximum allowed size.
    #[error("Message too large: max {max} bytes, got {actual}")]
    MessageTooLarge {
        /// Maximum allowed size
        max: usize,
        /// Actual size received
        actual: usize,
    },

    // ========================================
    // Interlock Errors
    // ========================================

    /// Round count or plaintext size unusable for interlock.
    #[error("Invalid interlock parameters: {reason}")]
    InterlockParameters {
        /// What's wrong
        reason: String,
    },

    /// A received fragment has the wrong size for its round.
    #[error("Fragment {round} has {actual} bytes, expected {expected}")]
    FragmentSize {
        /// Zero-based round index
        round: usize,
        /// Expected length in bytes
        expected: usize,
        /// Actual length in bytes
        actual: usize,
    },

    /// Fragment round index already filled or out of range.
    #[error("Fragment {round} rejected: {reason}")]
    FragmentRejected {
        /// Zero-based round index
        round: usize,
        /// Why it was rejected
        reason: String,
    },

    /// Ciphertext has a length that is not a whole number of blocks.
    #[error("Ciphertext length {length} is not a positive multiple of {block_size}")]
    CiphertextShape {
        /// Ciphertext length in bytes
        length: usize,
        /// Cipher block size
        block_size: usize,
    },

    /// Peer echoed our own ciphertext or plaintext back.
    #[error("Mirror attack detected: {reason}")]
    MirrorDetected {
        /// Which comparison matched
        reason: String,
    },

    /// Decryption attempted before every round arrived.
    #[error("Interlock incomplete: {received} of {rounds} rounds received")]
    Incomplete {
        /// Rounds received
        received: usize,
        /// Rounds expected
        rounds: usize,
    },

    // ========================================
    // Wrapped Errors
    // ========================================

    /// Error from common crate.
    #[error(transparent)]
    Common(#[from] CommonError),
}

impl CoreError {
    // ========================================
    // Convenience Constructors
    // ========================================

    /// Creates an `InvalidPeerKey` error.
    pub fn invalid_peer_key(reason: impl Into<String>) -> Self {
        Self::InvalidPeerKey {
            reason: reason.into(),
        }
    }

    /// Creates an `InvalidState` error.
    pub fn invalid_state(
        operation: impl Into<String>,
        required_state: impl Into<String>,
    ) -> Self {
        Self::InvalidState {
            operation: operation.into(),
            required_state: required_state.into(),
        }
    }

    /// Creates a `BadGreeting` error.
    pub fn bad_greeting(reason: impl Into<String>) -> Self {
        Self::BadGreeting {
            reason: reason.into(),
        }
    }

    /// Creates an `UnexpectedCommand` error.
    pub fn unexpected_command(expected: impl Into<String>) -> Self {
        Self::UnexpectedCommand {
            expected: expected.into(),
        }
    }

    /// Creates a `KeyEncoding` error.
    pub fn key_encoding(reason: impl Into<String>) -> Self {
        Self::KeyEncoding {
            reason: reason.into(),
        }
    }

    /// Creates a `MalformedMessage` error.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedMessage {
            reason: reason.into(),
        }
    }

    /// Creates an `InterlockParameters` error.
    pub fn interlock_parameters(reason: impl Into<String>) -> Self {
        Self::InterlockParameters {
            reason: reason.into(),
        }
    }

    // ========================================
    // Error Classification
    // ========================================

    /// Returns `true` for malformed or unexpected peer input.
    ///
    /// These are always fatal to the current attempt.
    #[must_use]
    pub const fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidPeerKey { .. }
                | Self::BadGreeting { .. }
                | Self::UnexpectedCommand { .. }
                | Self::KeyEncoding { .. }
                | Self::MalformedMessage { .. }
                | Self::MessageTooLarge { .. }
        )
    }

    /// Returns `true` for errors raised while running the interlock.
    #[must_use]
    pub const fn is_interlock_error(&self) -> bool {
        matches!(
            self,
            Self::FragmentSize { .. }
                | Self::FragmentRejected { .. }
                | Self::CiphertextShape { .. }
                | Self::MirrorDetected { .. }
                | Self::Incomplete { .. }
        )
    }

    /// Returns `true` if a local call sequence was wrong (a bug, not a peer).
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::InvalidState { .. } | Self::InterlockParameters { .. })
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::FragmentSize {
            round: 1,
            expected: 40,
            actual: 12,
        };
        assert!(err.to_string().contains("40"));
        assert!(err.to_string().contains("12"));

        let err = CoreError::unexpected_command("AUTHACK");
        assert!(err.to_string().contains("AUTHACK"));
    }

    #[test]
    fn test_error_classification() {
        assert!(CoreError::invalid_peer_key("equals 1").is_protocol_error());
        assert!(CoreError::bad_greeting("empty").is_protocol_error());
        assert!(CoreError::key_encoding("odd length").is_protocol_error());
        assert!(!CoreError::invalid_state("complete", "generated").is_protocol_error());
        assert!(CoreError::invalid_state("complete", "generated").is_internal());

        let frag = CoreError::FragmentRejected {
            round: 3,
            reason: "duplicate".into(),
        };
        assert!(frag.is_interlock_error());
    }

    #[test]
    fn test_common_error_conversion() {
        let common = CommonError::invalid_input("rounds", "too small");
        let core: CoreError = common.into();
        assert!(matches!(core, CoreError::Common(_)));
    }
}
