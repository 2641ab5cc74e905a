// ============================================
// File: crates/spatialpair-transport/src/error.rs
// ============================================
//! # Transport Error Types
//!
//! ## Creation Reason
//! Errors raised while listening, connecting, and moving lines or raw
//! fragments over a peer connection.
//!
//! ## Error Categories
//! 1. **Setup**: bind / connect / accept failures
//! 2. **Stream**: peer closed, line too long, invalid UTF-8
//! 3. **Time**: a read or write missed its deadline
//!
//! ## ⚠️ Important Note for Next Developer
//! - `Timeout` is distinct from `Closed`: the interlock driver maps the
//!   first to `InterlockTimeout` and the second to a protocol failure
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use spatialpair_common::error::CommonError;

// ============================================
// Result Type Alias
// ============================================

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

// ============================================
// TransportError
// ============================================

/// Transport layer errors.
#[derive(Error, Debug)]
pub enum TransportError {
    // ========================================
    // Setup Errors
    // ========================================

    /// Failed to bind a listener.
    #[error("Failed to bind to {addr}: {reason}")]
    BindFailed {
        /// Address we tried to bind
        addr: SocketAddr,
        /// Failure reason
        reason: String,
    },

    /// Failed to connect to a peer.
    #[error("Failed to connect to {addr}: {reason}")]
    ConnectFailed {
        /// Peer address
        addr: SocketAddr,
        /// Failure reason
        reason: String,
    },

    /// Listener stopped accepting.
    #[error("Listener closed")]
    ListenerClosed,

    // ========================================
    // Stream Errors
    // ========================================

    /// Peer closed the stream before the expected data arrived.
    #[error("Connection closed by peer while {operation}")]
    Closed {
        /// What we were doing
        operation: String,
    },

    /// Received line exceeds the configured maximum.
    #[error("Line exceeds {max} bytes")]
    LineTooLong {
        /// Configured maximum
        max: usize,
    },

    /// Received line is not valid UTF-8.
    #[error("Line is not valid UTF-8")]
    InvalidUtf8,

    /// Operation did not complete before its deadline.
    #[error("Operation timed out: {operation}")]
    Timeout {
        /// What timed out
        operation: String,
    },

    /// I/O error with context.
    #[error("I/O error during {context}: {source}")]
    Io {
        /// What operation failed
        context: String,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    // ========================================
    // Wrapped Errors
    // ========================================

    /// Error from common crate.
    #[error(transparent)]
    Common(#[from] CommonError),
}

impl TransportError {
    /// Creates a `BindFailed` error.
    pub fn bind_failed(addr: SocketAddr, reason: impl Into<String>) -> Self {
        Self::BindFailed {
            addr,
            reason: reason.into(),
        }
    }

    /// Creates a `ConnectFailed` error.
    pub fn connect_failed(addr: SocketAddr, reason: impl Into<String>) -> Self {
        Self::ConnectFailed {
            addr,
            reason: reason.into(),
        }
    }

    /// Creates a `Closed` error.
    pub fn closed(operation: impl Into<String>) -> Self {
        Self::Closed {
            operation: operation.into(),
        }
    }

    /// Creates a `Timeout` error.
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Creates an `Io` error with context.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Returns `true` if the operation missed its deadline.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns `true` if the peer went away.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::Closed { .. } => true,
            Self::Io { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        Self::io("stream operation", err)
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
        let err = TransportError::LineTooLong { max: 1024 };
        assert!(err.to_string().contains("1024"));

        let err = TransportError::closed("reading AUTHACK");
        assert!(err.to_string().contains("AUTHACK"));
    }

    #[test]
    fn test_error_classification() {
        assert!(TransportError::timeout("round 2").is_timeout());
        assert!(!TransportError::timeout("round 2").is_disconnect());
        assert!(TransportError::closed("read").is_disconnect());

        let eof = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        let err: TransportError = eof.into();
        assert!(err.is_disconnect());
    }
}
