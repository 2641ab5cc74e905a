// ============================================
// File: crates/spatialpair-core/src/interlock/mod.rs
// ============================================
//! # Interlock Engine
//!
//! ## Creation Reason
//! The I/O-free half of the interlock exchange: encrypt the local
//! payload, hand out one fragment per round, collect the peer's
//! fragments and decrypt once all are present. The async driver in
//! the node crate only moves bytes between this engine and the wire.
//!
//! ## Main Functionality
//! - [`fragments`]: bit-striped layout and reassembly
//! - `InterlockEngine`: per-exchange state, mirror checks
//!
//! ## Main Logical Flow
//! 1. `InterlockEngine::new(key, local_plaintext, rounds)`
//! 2. for each round r: send `outgoing(r)`, then `receive(r, peer_fragment)`
//! 3. `finish(mirror_guard)` → peer plaintext
//!
//! ## ⚠️ Important Note for Next Developer
//! - `finish` refuses to decrypt while any round is missing
//! - Mirror detection compares the IV block and the recovered plaintext
//!   in constant time
//!
//! ## Last Modified
//! v0.1.0 - Initial interlock engine

pub mod fragments;

pub use fragments::{FragmentLayout, Reassembler, MAX_ROUNDS, MIN_ROUNDS};

use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::crypto::cipher::InterlockCipher;
use crate::crypto::keys::AuthenticationKey;
use crate::crypto::BLOCK_SIZE;
use crate::error::{CoreError, Result};

/// State of one interlock exchange.
pub struct InterlockEngine {
    cipher: InterlockCipher,
    layout: FragmentLayout,
    local_plaintext: Zeroizing<Vec<u8>>,
    local_iv: [u8; BLOCK_SIZE],
    outgoing: Vec<Vec<u8>>,
    incoming: Reassembler,
}

impl InterlockEngine {
    /// Encrypts `local_plaintext` and prepares its fragments.
    ///
    /// # Errors
    /// `InterlockParameters` for an empty plaintext or a round count
    /// outside `[MIN_ROUNDS, MAX_ROUNDS]`.
    pub fn new(key: &AuthenticationKey, local_plaintext: &[u8], rounds: usize) -> Result<Self> {
        let layout = FragmentLayout::new(local_plaintext.len(), rounds)?;
        let cipher = InterlockCipher::new(key);
        let ciphertext = cipher.encrypt(local_plaintext);
        let outgoing = layout.split(&ciphertext)?;

        let mut local_iv = [0u8; BLOCK_SIZE];
        local_iv.copy_from_slice(&ciphertext[..BLOCK_SIZE]);

        Ok(Self {
            cipher,
            layout,
            local_plaintext: Zeroizing::new(local_plaintext.to_vec()),
            local_iv,
            outgoing,
            incoming: layout.reassembler(),
        })
    }

    /// The fragment layout shared with the peer.
    #[must_use]
    pub const fn layout(&self) -> &FragmentLayout {
        &self.layout
    }

    /// Our fragment for `round`.
    ///
    /// # Errors
    /// `FragmentRejected` if `round` is out of range.
    pub fn outgoing(&self, round: usize) -> Result<&[u8]> {
        self.outgoing
            .get(round)
            .map(Vec::as_slice)
            .ok_or_else(|| CoreError::FragmentRejected {
                round,
                reason: format!("only {} rounds", self.layout.rounds()),
            })
    }

    /// Records the peer's fragment for `round`.
    ///
    /// # Errors
    /// See [`Reassembler::add`].
    pub fn receive(&mut self, round: usize, fragment: &[u8]) -> Result<()> {
        self.incoming.add(round, fragment)
    }

    /// Number of peer rounds received.
    #[must_use]
    pub fn received_rounds(&self) -> usize {
        self.incoming.received_rounds() as usize
    }

    /// Decrypts the peer's payload.
    ///
    /// # Errors
    /// - `Incomplete` if any round is missing
    /// - `MirrorDetected` (guard on) if the peer's IV block or recovered
    ///   plaintext equals ours
    pub fn finish(&self, mirror_guard: bool) -> Result<Vec<u8>> {
        let ciphertext = self.incoming.ciphertext().ok_or(CoreError::Incomplete {
            received: self.received_rounds(),
            rounds: self.layout.rounds(),
        })?;

        if mirror_guard && bool::from(ciphertext[..BLOCK_SIZE].ct_eq(&self.local_iv)) {
            return Err(CoreError::MirrorDetected {
                reason: "peer IV block equals ours".into(),
            });
        }

        let plaintext = self.cipher.decrypt(ciphertext, self.layout.plaintext_len())?;

        if mirror_guard && bool::from(plaintext.as_slice().ct_eq(self.local_plaintext.as_slice())) {
            return Err(CoreError::MirrorDetected {
                reason: "recovered payload equals ours".into(),
            });
        }
        Ok(plaintext)
    }
}

// ============================================
// Tests
// ============================================
