// ============================================
// File: crates/spatialpair-core/src/interlock/fragments.rs
// ============================================
//! # Interlock Fragment Layout
//!
//! ## Creation Reason
//! Splits a CBC ciphertext into `rounds` fragments so that each fragment
//! carries a slice of bits from EVERY block. Holding any strict subset
//! of fragments leaves every block with missing bits, so nothing can be
//! decrypted until the final round arrives.
//!
//! ## Bit Striping
//! ```text
//! base  b = floor(128 / rounds),  extra  e = 128 mod rounds
//! round r carries b bits, plus one more when r < e
//! round r starts at bit r*b + min(r, e) of each 128-bit block
//!
//!   block 0: |r0 r0 r0|r1 r1 r1|r2 r2 ..|
//!   block 1: |r0 r0 r0|r1 r1 r1|r2 r2 ..|
//!              │
//!              ▼
//!   fragment r0 = block0[r0 bits] ‖ block1[r0 bits] ‖ ...
//! ```
//! Bits are numbered LSB-first within each byte. A fragment's length
//! is `ceil(bits_in_round(r) * blocks / 8)` bytes. Every round carries
//! at least one bit of every block, for any `rounds` up to 128.
//!
//! ## ⚠️ Important Note for Next Developer
//! - Both peers must agree on `rounds` and the plaintext length, the
//!   layout is derived from those two numbers only
//! - `Reassembler` never returns a partial ciphertext
//!
//! ## Last Modified
//! v0.1.0 - Bit-striped fragment layout

use crate::crypto::cipher::ciphertext_blocks;
use crate::crypto::BLOCK_SIZE;
use crate::error::{CoreError, Result};

// ============================================
// Constants
// ============================================

/// Fewest rounds that still interlock.
pub const MIN_ROUNDS: usize = 2;

/// Most rounds: one bit of each block per round.
pub const MAX_ROUNDS: usize = BLOCK_SIZE * 8;

const BLOCK_BITS: usize = BLOCK_SIZE * 8;

// ============================================
// Bit Helpers
// ============================================

fn get_bit(buf: &[u8], index: usize) -> bool {
    (buf[index / 8] >> (index % 8)) & 1 == 1
}

fn set_bit(buf: &mut [u8], index: usize, value: bool) {
    let mask = 1u8 << (index % 8);
    if value {
        buf[index / 8] |= mask;
    } else {
        buf[index / 8] &= !mask;
    }
}

/// Copies `count` bits from `src` starting at bit `src_offset` into
/// `dst` starting at bit `dst_offset`.
pub fn copy_bits(src: &[u8], src_offset: usize, dst: &mut [u8], dst_offset: usize, count: usize) {
    for i in 0..count {
        set_bit(dst, dst_offset + i, get_bit(src, src_offset + i));
    }
}

// ============================================
// FragmentLayout
// ============================================

/// How a ciphertext of a given plaintext length splits into rounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentLayout {
    rounds: usize,
    plaintext_len: usize,
    blocks: usize,
    base_bits: usize,
    extra_bits: usize,
}

impl FragmentLayout {
    /// Computes the layout for `rounds` rounds over a plaintext of
    /// `plaintext_len` bytes.
    ///
    /// # Errors
    /// `InterlockParameters` if `rounds` is outside
    /// `[MIN_ROUNDS, MAX_ROUNDS]` or the plaintext is empty.
    pub fn new(plaintext_len: usize, rounds: usize) -> Result<Self> {
        if !(MIN_ROUNDS..=MAX_ROUNDS).contains(&rounds) {
            return Err(CoreError::interlock_parameters(format!(
                "rounds must be in [{MIN_ROUNDS}, {MAX_ROUNDS}], got {rounds}"
            )));
        }
        if plaintext_len == 0 {
            return Err(CoreError::interlock_parameters("plaintext must not be empty"));
        }
        Ok(Self {
            rounds,
            plaintext_len,
            blocks: ciphertext_blocks(plaintext_len),
            base_bits: BLOCK_BITS / rounds,
            extra_bits: BLOCK_BITS % rounds,
        })
    }

    /// Number of rounds.
    #[must_use]
    pub const fn rounds(&self) -> usize {
        self.rounds
    }

    /// Plaintext length in bytes.
    #[must_use]
    pub const fn plaintext_len(&self) -> usize {
        self.plaintext_len
    }

    /// Ciphertext length in bytes (IV block included).
    #[must_use]
    pub const fn ciphertext_len(&self) -> usize {
        self.blocks * BLOCK_SIZE
    }

    /// Bits of each block carried by `round`.
    #[must_use]
    pub fn bits_in_round(&self, round: usize) -> usize {
        if round >= self.rounds {
            return 0;
        }
        self.base_bits + usize::from(round < self.extra_bits)
    }

    /// First bit of each block carried by `round`.
    #[must_use]
    pub fn round_offset(&self, round: usize) -> usize {
        round * self.base_bits + round.min(self.extra_bits)
    }

    /// Byte length of the fragment for `round`.
    #[must_use]
    pub fn fragment_len(&self, round: usize) -> usize {
        (self.bits_in_round(round) * self.blocks).div_ceil(8)
    }

    /// Splits a ciphertext into one fragment per round.
    ///
    /// # Errors
    /// `CiphertextShape` if `ciphertext` does not match this layout.
    pub fn split(&self, ciphertext: &[u8]) -> Result<Vec<Vec<u8>>> {
        if ciphertext.len() != self.ciphertext_len() {
            return Err(CoreError::CiphertextShape {
                length: ciphertext.len(),
                block_size: BLOCK_SIZE,
            });
        }

        let fragments = (0..self.rounds)
            .map(|round| {
                let bits = self.bits_in_round(round);
                let mut fragment = vec![0u8; self.fragment_len(round)];
                for block in 0..self.blocks {
                    copy_bits(
                        ciphertext,
                        block * BLOCK_BITS + self.round_offset(round),
                        &mut fragment,
                        block * bits,
                        bits,
                    );
                }
                fragment
            })
            .collect();
        Ok(fragments)
    }

    /// Starts reassembling a peer's ciphertext with this layout.
    #[must_use]
    pub fn reassembler(&self) -> Reassembler {
        Reassembler::new(*self)
    }
}

// ============================================
// Reassembler
// ============================================

/// Collects a peer's fragments and yields the ciphertext only once
/// every round has been received.
#[derive(Debug)]
pub struct Reassembler {
    layout: FragmentLayout,
    ciphertext: Vec<u8>,
    received: u128,
}

impl Reassembler {
    fn new(layout: FragmentLayout) -> Self {
        Self {
            layout,
            ciphertext: vec![0u8; layout.ciphertext_len()],
            received: 0,
        }
    }

    /// Adds the fragment for `round`.
    ///
    /// # Errors
    /// - `FragmentRejected` for an out-of-range or duplicate round
    /// - `FragmentSize` if the fragment length is wrong for the round
    pub fn add(&mut self, round: usize, fragment: &[u8]) -> Result<()> {
        if round >= self.layout.rounds {
            return Err(CoreError::FragmentRejected {
                round,
                reason: format!("only {} rounds", self.layout.rounds),
            });
        }
        let bit = 1u128 << round;
        if self.received & bit != 0 {
            return Err(CoreError::FragmentRejected {
                round,
                reason: "already received".into(),
            });
        }
        let expected = self.layout.fragment_len(round);
        if fragment.len() != expected {
            return Err(CoreError::FragmentSize {
                round,
                expected,
                actual: fragment.len(),
            });
        }

        let bits = self.layout.bits_in_round(round);
        for block in 0..self.layout.blocks {
            copy_bits(
                fragment,
                block * bits,
                &mut self.ciphertext,
                block * BLOCK_BITS + self.layout.round_offset(round),
                bits,
            );
        }
        self.received |= bit;
        Ok(())
    }

    /// Number of rounds received so far.
    #[must_use]
    pub const fn received_rounds(&self) -> u32 {
        self.received.count_ones()
    }

    /// Returns `true` once every round has been added.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.received_rounds() as usize == self.layout.rounds
    }

    /// Returns the complete ciphertext, or `None` while rounds are missing.
    #[must_use]
    pub fn ciphertext(&self) -> Option<&[u8]> {
        self.is_complete().then_some(self.ciphertext.as_slice())
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_ciphertext(layout: &FragmentLayout) -> Vec<u8> {
        (0..layout.ciphertext_len())
            .map(|i| u8::try_from((i * 37 + 11) % 256).unwrap())
            .collect()
    }

    #[test]
    fn test_rejects_bad_parameters() {
        assert!(FragmentLayout::new(64, 1).is_err());
        assert!(FragmentLayout::new(64, 129).is_err());
        assert!(FragmentLayout::new(0, 2).is_err());
        assert!(FragmentLayout::new(64, 128).is_ok());
    }

    #[test]
    fn test_two_round_sizes() {
        let layout = FragmentLayout::new(64, 2).unwrap();
        assert_eq!(layout.ciphertext_len(), 80);
        assert_eq!(layout.bits_in_round(0), 64);
        assert_eq!(layout.bits_in_round(1), 64);
        assert_eq!(layout.fragment_len(0), 40);
        assert_eq!(layout.fragment_len(1), 40);
    }

    #[test]
    fn test_no_round_is_empty() {
        for rounds in MIN_ROUNDS..=MAX_ROUNDS {
            let layout = FragmentLayout::new(16, rounds).unwrap();
            for round in 0..rounds {
                assert!(layout.bits_in_round(round) >= 1, "rounds = {rounds}, round = {round}");
                assert!(layout.fragment_len(round) >= 1);
            }
            let total: usize = (0..rounds).map(|r| layout.bits_in_round(r)).sum();
            assert_eq!(total, BLOCK_BITS, "rounds = {rounds}");
            let last = rounds - 1;
            assert_eq!(layout.round_offset(last) + layout.bits_in_round(last), BLOCK_BITS);
        }
    }

    #[test]
    fn test_uneven_rounds_spread_remainder() {
        // 128 = 100 * 1 + 28, so the first 28 rounds carry two bits
        let layout = FragmentLayout::new(16, 100).unwrap();
        assert_eq!(layout.bits_in_round(0), 2);
        assert_eq!(layout.bits_in_round(27), 2);
        assert_eq!(layout.bits_in_round(28), 1);
        assert_eq!(layout.bits_in_round(99), 1);
        assert_eq!(layout.round_offset(28), 56);
        assert_eq!(layout.round_offset(99), 127);
    }

    #[test]
    fn test_missing_last_round_keeps_ciphertext_hidden() {
        let layout = FragmentLayout::new(64, 100).unwrap();
        let ct = sample_ciphertext(&layout);
        let fragments = layout.split(&ct).unwrap();
        let mut re = layout.reassembler();
        for (round, fragment) in fragments.iter().enumerate().take(99) {
            re.add(round, fragment).unwrap();
        }
        assert!(re.ciphertext().is_none());
        // the withheld bits are real ciphertext bits, not padding
        assert!(!fragments[99].is_empty());
    }

    #[test]
    fn test_reassembly_in_any_order() {
        for rounds in [2, 3, 5, 7, 16, 100, 128] {
            let layout = FragmentLayout::new(45, rounds).unwrap();
            let ct = sample_ciphertext(&layout);
            let fragments = layout.split(&ct).unwrap();
            assert_eq!(fragments.len(), rounds);

            let mut re = layout.reassembler();
            for (round, fragment) in fragments.iter().enumerate().rev() {
                re.add(round, fragment).unwrap();
            }
            assert_eq!(re.ciphertext(), Some(ct.as_slice()), "rounds = {rounds}");
        }
    }

    #[test]
    fn test_every_fragment_touches_every_block() {
        let layout = FragmentLayout::new(64, 4).unwrap();
        let mut ct = vec![0u8; layout.ciphertext_len()];
        // set one bit in the region of round 2 of the last block only
        let last_block = (layout.ciphertext_len() / BLOCK_SIZE - 1) * BLOCK_BITS;
        set_bit(&mut ct, last_block + 2 * 32, true);
        let fragments = layout.split(&ct).unwrap();
        assert!(fragments[2].iter().any(|b| *b != 0));
        assert!(fragments[0].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_incomplete_yields_nothing() {
        let layout = FragmentLayout::new(64, 3).unwrap();
        let ct = sample_ciphertext(&layout);
        let fragments = layout.split(&ct).unwrap();
        let mut re = layout.reassembler();
        re.add(0, &fragments[0]).unwrap();
        re.add(1, &fragments[1]).unwrap();
        assert_eq!(re.received_rounds(), 2);
        assert!(!re.is_complete());
        assert!(re.ciphertext().is_none());
    }

    #[test]
    fn test_rejects_duplicate_and_wrong_size() {
        let layout = FragmentLayout::new(32, 2).unwrap();
        let fragments = layout.split(&sample_ciphertext(&layout)).unwrap();
        let mut re = layout.reassembler();
        re.add(0, &fragments[0]).unwrap();
        assert!(matches!(re.add(0, &fragments[0]), Err(CoreError::FragmentRejected { .. })));
        assert!(matches!(re.add(1, &[0u8; 3]), Err(CoreError::FragmentSize { .. })));
        assert!(matches!(re.add(2, &fragments[1]), Err(CoreError::FragmentRejected { .. })));
    }
}
