// ============================================
// File: crates/spatialpair-node/src/services/oracle.rs
// ============================================
//! # Verification Oracles
//!
//! ## Creation Reason
//! The match decision over two sensor payloads belongs to the sensor
//! modality (time-series coherence, quantized spectra, ...). The
//! orchestrator only sees this narrow interface.
//!
//! ## Main Functionality
//! - `VerificationOracle`: `decide(local, remote) -> bool`
//! - `ExactMatchOracle`: constant-time equality
//! - `SimilarityOracle`: fraction of equal bytes against a threshold
//! - `FnOracle`: closure adapter
//!
//! ## ⚠️ Important Note for Next Developer
//! - Oracles are called from a blocking worker thread and may be slow,
//!   but must not keep per-call state
//! - Threshold errors surface at construction, never during a run
//! - `ExactMatchOracle` needs `interlock.mirror_attack_guard = false`;
//!   with the guard on an identical payload never reaches the oracle
//!
//! ## Last Modified
//! v0.1.0 - Initial oracle implementations

use std::fmt;
use std::sync::Arc;

use subtle::ConstantTimeEq;

use crate::config::{OracleConfig, OracleKind};
use crate::error::{PairingError, Result};

/// Decides whether two payloads were observed together.
pub trait VerificationOracle: Send + Sync {
    /// `local` is our own payload, `remote` the one recovered from the peer.
    fn decide(&self, local: &[u8], remote: &[u8]) -> bool;

    /// Short name for logs.
    fn name(&self) -> &str {
        "custom"
    }

    /// `true` if only byte-identical payloads can ever match.
    ///
    /// Such an oracle cannot be combined with the mirror-attack guard,
    /// which rejects a recovered payload equal to ours.
    fn matches_only_identical(&self) -> bool {
        false
    }
}

/// Builds the oracle selected in config.
///
/// # Errors
/// `ConfigInvalid` for an unusable threshold.
pub fn from_config(config: &OracleConfig) -> Result<Arc<dyn VerificationOracle>> {
    Ok(match config.kind {
        OracleKind::Exact => Arc::new(ExactMatchOracle),
        OracleKind::Similarity => Arc::new(SimilarityOracle::new(config.threshold)?),
    })
}

// ============================================
// ExactMatchOracle
// ============================================

/// Matches only byte-identical payloads.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExactMatchOracle;

impl VerificationOracle for ExactMatchOracle {
    fn decide(&self, local: &[u8], remote: &[u8]) -> bool {
        local.len() == remote.len() && bool::from(local.ct_eq(remote))
    }

    fn name(&self) -> &str {
        "exact"
    }

    fn matches_only_identical(&self) -> bool {
        true
    }
}

// ============================================
// SimilarityOracle
// ============================================

/// Matches when at least `threshold` of the byte positions agree.
#[derive(Debug, Clone, Copy)]
pub struct SimilarityOracle {
    threshold: f64,
}

impl SimilarityOracle {
    /// # Errors
    /// `ConfigInvalid` unless `threshold` is within `[0, 1]`.
    pub fn new(threshold: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(PairingError::config_invalid(
                "oracle.threshold",
                format!("{threshold} is not within [0, 1]"),
            ));
        }
        Ok(Self { threshold })
    }

    #[must_use]
    pub const fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Fraction of equal bytes; 0 for payloads of different length.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn similarity(local: &[u8], remote: &[u8]) -> f64 {
        if local.len() != remote.len() {
            return 0.0;
        }
        if local.is_empty() {
            return 1.0;
        }
        let equal = local.iter().zip(remote).filter(|(a, b)| a == b).count();
        equal as f64 / local.len() as f64
    }
}

impl VerificationOracle for SimilarityOracle {
    fn decide(&self, local: &[u8], remote: &[u8]) -> bool {
        Self::similarity(local, remote) >= self.threshold
    }

    fn name(&self) -> &str {
        "similarity"
    }

    fn matches_only_identical(&self) -> bool {
        self.threshold >= 1.0
    }
}

// ============================================
// FnOracle
// ============================================

/// Adapts a closure.
pub struct FnOracle<F> {
    f: F,
}

impl<F> FnOracle<F>
where
    F: Fn(&[u8], &[u8]) -> bool + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> VerificationOracle for FnOracle<F>
where
    F: Fn(&[u8], &[u8]) -> bool + Send + Sync,
{
    fn decide(&self, local: &[u8], remote: &[u8]) -> bool {
        (self.f)(local, remote)
    }
}

impl<F> fmt::Debug for FnOracle<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnOracle").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        let oracle = ExactMatchOracle;
        assert!(oracle.decide(&[1, 2, 3], &[1, 2, 3]));
        assert!(!oracle.decide(&[1, 2, 3], &[1, 2, 4]));
        assert!(!oracle.decide(&[1, 2, 3], &[1, 2]));
    }

    #[test]
    fn test_similarity_threshold() {
        let oracle = SimilarityOracle::new(0.75).unwrap();
        assert!(oracle.decide(&[1, 2, 3, 4], &[1, 2, 3, 9]));
        assert!(!oracle.decide(&[1, 2, 3, 4], &[1, 2, 8, 9]));
        assert!(!oracle.decide(&[1, 2, 3, 4], &[1, 2, 3]));
        assert!((SimilarityOracle::similarity(&[0; 10], &[0; 10]) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_threshold_rejected_eagerly() {
        assert!(SimilarityOracle::new(1.01).is_err());
        assert!(SimilarityOracle::new(-0.5).is_err());
        assert!(SimilarityOracle::new(f64::NAN).is_err());
        assert!(SimilarityOracle::new(0.0).is_ok());
        assert!(SimilarityOracle::new(1.0).is_ok());
    }

    #[test]
    fn test_from_config() {
        let exact = from_config(&OracleConfig {
            kind: OracleKind::Exact,
            threshold: 0.5,
        })
        .unwrap();
        assert_eq!(exact.name(), "exact");
        assert!(exact.matches_only_identical());

        let similar = from_config(&OracleConfig::default()).unwrap();
        assert!(!similar.matches_only_identical());
        assert!(SimilarityOracle::new(1.0).unwrap().matches_only_identical());

        let bad = OracleConfig {
            kind: OracleKind::Similarity,
            threshold: 2.0,
        };
        assert!(from_config(&bad).is_err());
    }

    #[test]
    fn test_fn_oracle() {
        let oracle = FnOracle::new(|local: &[u8], remote: &[u8]| local[0] ^ remote[0] == 3);
        assert!(oracle.decide(&[1], &[2]));
        assert!(!oracle.decide(&[1], &[1]));
        assert_eq!(oracle.name(), "custom");
    }
}
