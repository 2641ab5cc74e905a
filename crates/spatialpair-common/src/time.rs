// ============================================
// File: crates/spatialpair-common/src/time.rs
// ============================================
//! # Time Helpers
//!
//! Round, payload and handshake timeouts are configured as `Duration`
//! but reported in logs and errors as whole milliseconds.

use std::time::Duration;

/// Converts a duration to whole milliseconds, saturating at `u64::MAX`.
#[must_use]
pub fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_millis_conversion() {
        assert_eq!(millis(Duration::from_millis(1500)), 1500);
        assert_eq!(millis(Duration::ZERO), 0);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }
}
