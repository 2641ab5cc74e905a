// ============================================
// File: crates/spatialpair-node/src/error.rs
// ============================================
//! # Pairing Error Types
//!
//! ## Creation Reason
//! Every pairing attempt ends in exactly one event. Failures need a
//! stable category for the `EventSink` and a readable cause for logs,
//! so all lower-layer errors funnel into `PairingError`.
//!
//! ## Main Functionality
//! - `PairingError`: protocol, interlock, verification and internal failures
//! - `PairingError::category`: maps any error onto a [`FailureReason`]
//!
//! ## ⚠️ Important Note for Next Developer
//! - Never put key bytes into an error message
//! - `VerificationRejected` is a legitimate negative outcome, not a fault
//!
//! ## Last Modified
//! v0.1.0 - Initial pairing error taxonomy

use thiserror::Error;

use spatialpair_common::CommonError;
use spatialpair_core::CoreError;
use spatialpair_transport::TransportError;

use crate::events::FailureReason;

/// Result type for pairing operations.
pub type Result<T> = std::result::Result<T, PairingError>;

/// Pairing error types.
#[derive(Error, Debug)]
pub enum PairingError {
    #[error("Failed to load configuration from '{path}': {reason}")]
    ConfigLoad {
        path: String,
        reason: String,
    },

    #[error("Invalid configuration: {field} - {reason}")]
    ConfigInvalid {
        field: String,
        reason: String,
    },

    #[error("Protocol error in {state}: {reason}")]
    Protocol {
        state: String,
        reason: String,
    },

    #[error("Interlock timed out at {stage} after {timeout_ms}ms")]
    InterlockTimeout {
        stage: String,
        timeout_ms: u64,
    },

    #[error("Interlock protocol error: {reason}")]
    InterlockProtocol {
        reason: String,
    },

    #[error("Verification rejected: {reason}")]
    VerificationRejected {
        reason: String,
    },

    #[error("No local payload within {waited_ms}ms")]
    PayloadTimeout {
        waited_ms: u64,
    },

    #[error("A {operation} run is already active for {remote}")]
    AlreadyActive {
        remote: String,
        operation: String,
    },

    #[error("Remote {remote} is {state}, {operation} requires {required}")]
    InvalidState {
        remote: String,
        state: String,
        operation: String,
        required: String,
    },

    #[error("Interlock group aborted: {reason}")]
    GroupAborted {
        reason: String,
    },

    #[error("Verification cancelled")]
    Cancelled,

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },

    #[error(transparent)]
    Common(#[from] CommonError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PairingError {
    pub fn config_load(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn config_invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn protocol(state: impl ToString, reason: impl Into<String>) -> Self {
        Self::Protocol {
            state: state.to_string(),
            reason: reason.into(),
        }
    }

    pub fn interlock_timeout(stage: impl Into<String>, timeout_ms: u64) -> Self {
        Self::InterlockTimeout {
            stage: stage.into(),
            timeout_ms,
        }
    }

    pub fn interlock_protocol(reason: impl Into<String>) -> Self {
        Self::InterlockProtocol {
            reason: reason.into(),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::VerificationRejected {
            reason: reason.into(),
        }
    }

    pub fn already_active(remote: impl ToString, operation: impl Into<String>) -> Self {
        Self::AlreadyActive {
            remote: remote.to_string(),
            operation: operation.into(),
        }
    }

    pub fn invalid_state(
        remote: impl ToString,
        state: impl ToString,
        operation: impl Into<String>,
        required: impl Into<String>,
    ) -> Self {
        Self::InvalidState {
            remote: remote.to_string(),
            state: state.to_string(),
            operation: operation.into(),
            required: required.into(),
        }
    }

    pub fn group_aborted(reason: impl Into<String>) -> Self {
        Self::GroupAborted {
            reason: reason.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(self, Self::ConfigLoad { .. } | Self::ConfigInvalid { .. })
    }

    /// Returns `true` for a timeout of any blocking step.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::InterlockTimeout { .. } | Self::PayloadTimeout { .. } => true,
            Self::Transport(e) => e.is_timeout(),
            _ => false,
        }
    }

    /// Maps the error onto the category reported to event sinks.
    #[must_use]
    pub fn category(&self) -> FailureReason {
        match self {
            Self::Protocol { .. } | Self::AlreadyActive { .. } => FailureReason::Protocol,
            Self::InterlockTimeout { .. } | Self::GroupAborted { .. } => {
                FailureReason::InterlockTimeout
            }
            Self::InterlockProtocol { .. } => FailureReason::InterlockProtocol,
            Self::VerificationRejected { .. } => FailureReason::VerificationRejected,
            Self::PayloadTimeout { .. } => FailureReason::PayloadUnavailable,
            Self::Cancelled => FailureReason::Cancelled,
            Self::Core(e) if e.is_protocol_error() => FailureReason::Protocol,
            Self::Core(e) if e.is_interlock_error() => FailureReason::InterlockProtocol,
            Self::Transport(_) | Self::Io(_) => FailureReason::Transport,
            Self::ConfigLoad { .. }
            | Self::ConfigInvalid { .. }
            | Self::InvalidState { .. }
            | Self::Internal { .. }
            | Self::Common(_)
            | Self::Core(_) => FailureReason::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(
            PairingError::protocol("AwaitHello", "missing greeting").category(),
            FailureReason::Protocol
        );
        assert_eq!(
            PairingError::interlock_timeout("round 2 of 2", 500).category(),
            FailureReason::InterlockTimeout
        );
        assert_eq!(
            PairingError::rejected("oracle").category(),
            FailureReason::VerificationRejected
        );
        assert_eq!(
            PairingError::group_aborted("barrier").category(),
            FailureReason::InterlockTimeout
        );
        assert_eq!(
            PairingError::PayloadTimeout { waited_ms: 10 }.category(),
            FailureReason::PayloadUnavailable
        );
    }

    #[test]
    fn test_wrapped_core_errors() {
        let err: PairingError = CoreError::invalid_peer_key("value is 1").into();
        assert_eq!(err.category(), FailureReason::Protocol);

        let err: PairingError = CoreError::MirrorDetected {
            reason: "echo".into(),
        }
        .into();
        assert_eq!(err.category(), FailureReason::InterlockProtocol);

        let err: PairingError = CoreError::invalid_state("complete", "Generated").into();
        assert_eq!(err.category(), FailureReason::Internal);
    }

    #[test]
    fn test_timeout_classification() {
        let err: PairingError = TransportError::timeout("reading line").into();
        assert!(err.is_timeout());
        assert_eq!(err.category(), FailureReason::Transport);
        assert!(!PairingError::Cancelled.is_timeout());
    }

    #[test]
    fn test_config_errors() {
        let err = PairingError::config_invalid("interlock.rounds", "must be at least 2");
        assert!(err.is_config_error());
        assert!(err.to_string().contains("interlock.rounds"));
    }
}
