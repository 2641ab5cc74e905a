// ============================================
// File: crates/spatialpair-core/src/protocol/messages.rs
// ============================================
//! # Protocol Messages
//!
//! ## Main Functionality
//! - `HandshakeMessage`: the three handshake lines
//! - `VerificationStatus`: the ACK/NACK line exchanged after the oracle
//!   decides
//!
//! ## Wire Format
//! One message per `\n`-terminated line:
//! ```text
//! responder → initiator   HELO <protocol-name>
//! initiator → responder   AUTHREQ <hex public value>[ PARAM <value>]
//! responder → initiator   AUTHACK <hex public value>
//! both directions         ACK <param> | NACK <param>
//! ```
//!
//! ## Last Modified
//! v0.1.0 - Initial line messages

use std::fmt;

// ============================================
// Constants
// ============================================

/// Greeting command.
pub const HELLO_COMMAND: &str = "HELO";

/// Initiator's public value command.
pub const REQUEST_COMMAND: &str = "AUTHREQ";

/// Responder's public value command.
pub const ACK_COMMAND: &str = "AUTHACK";

/// Marker for the optional parameter on the request line.
pub const PARAM_KEYWORD: &str = "PARAM";

/// Positive verification status.
pub const STATUS_ACK: &str = "ACK";

/// Negative verification status.
pub const STATUS_NACK: &str = "NACK";

/// Protocol name announced in the greeting by default.
pub const DEFAULT_PROTOCOL_NAME: &str = "SpatialPair Authentication";

// ============================================
// HandshakeMessage
// ============================================

/// A decoded handshake line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeMessage {
    /// `HELO <protocol>`
    Hello {
        /// Protocol name
        protocol: String,
    },
    /// `AUTHREQ <hex>[ PARAM <value>]`
    Request {
        /// Initiator's DH public value
        public_value: Vec<u8>,
        /// Optional parameter for the calling protocol
        parameter: Option<String>,
    },
    /// `AUTHACK <hex>`
    Ack {
        /// Responder's DH public value
        public_value: Vec<u8>,
    },
}

impl HandshakeMessage {
    /// The command keyword of this message.
    #[must_use]
    pub const fn command(&self) -> &'static str {
        match self {
            Self::Hello { .. } => HELLO_COMMAND,
            Self::Request { .. } => REQUEST_COMMAND,
            Self::Ack { .. } => ACK_COMMAND,
        }
    }
}

impl fmt::Display for HandshakeMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hello { protocol } => write!(f, "{HELLO_COMMAND} {protocol}"),
            Self::Request {
                public_value,
                parameter,
            } => {
                write!(f, "{REQUEST_COMMAND} {}", hex::encode(public_value))?;
                if let Some(param) = parameter {
                    write!(f, " {PARAM_KEYWORD} {param}")?;
                }
                Ok(())
            }
            Self::Ack { public_value } => {
                write!(f, "{ACK_COMMAND} {}", hex::encode(public_value))
            }
        }
    }
}

// ============================================
// VerificationStatus
// ============================================

/// Outcome line each side sends after its oracle decides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationStatus {
    /// Local oracle matched.
    Ack(String),
    /// Local oracle did not match.
    Nack(String),
}

impl VerificationStatus {
    /// Builds the status for a local decision.
    pub fn from_decision(matched: bool, parameter: impl Into<String>) -> Self {
        if matched {
            Self::Ack(parameter.into())
        } else {
            Self::Nack(parameter.into())
        }
    }

    /// Returns `true` for `ACK`.
    #[must_use]
    pub const fn is_ack(&self) -> bool {
        matches!(self, Self::Ack(_))
    }

    /// The parameter carried after the keyword.
    #[must_use]
    pub fn parameter(&self) -> &str {
        match self {
            Self::Ack(p) | Self::Nack(p) => p,
        }
    }
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ack(p) => write!(f, "{STATUS_ACK} {p}"),
            Self::Nack(p) => write!(f, "{STATUS_NACK} {p}"),
        }
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_line_with_parameter() {
        let msg = HandshakeMessage::Request {
            public_value: vec![0xab, 0x01],
            parameter: Some("payload=64".into()),
        };
        assert_eq!(msg.to_string(), "AUTHREQ ab01 PARAM payload=64");
        assert_eq!(msg.command(), "AUTHREQ");
    }

    #[test]
    fn test_hello_line() {
        let msg = HandshakeMessage::Hello {
            protocol: DEFAULT_PROTOCOL_NAME.into(),
        };
        assert_eq!(msg.to_string(), "HELO SpatialPair Authentication");
    }

    #[test]
    fn test_status_lines() {
        assert_eq!(VerificationStatus::from_decision(true, "").to_string(), "ACK ");
        let nack = VerificationStatus::from_decision(false, "mismatch");
        assert_eq!(nack.to_string(), "NACK mismatch");
        assert!(!nack.is_ack());
        assert_eq!(nack.parameter(), "mismatch");
    }
}
