// ============================================
// File: crates/spatialpair-core/src/protocol/codec.rs
// ============================================
//! # Handshake Line Codec
//!
//! ## Creation Reason
//! Decodes each handshake line exactly once, at the transport
//! boundary, into a typed message, raising a distinct error for every
//! way a line can be wrong.
//!
//! ## Parsing Strategy
//! 1. Split the command keyword from the rest of the line
//! 2. Compare the keyword with the one the current state expects
//! 3. Decode and length-check the hex public value
//! 4. Extract the optional `PARAM` suffix (request only)
//!
//! ## ⚠️ Important Note for Next Developer
//! - Lines arrive without their trailing newline
//! - The public value length is fixed by the DH group; anything else
//!   is a `KeyEncoding` error, never silently padded
//!
//! ## Last Modified
//! v0.1.0 - Initial line codec

use crate::error::{CoreError, Result};
use crate::protocol::messages::{
    HandshakeMessage, VerificationStatus, ACK_COMMAND, HELLO_COMMAND, PARAM_KEYWORD,
    REQUEST_COMMAND, STATUS_ACK, STATUS_NACK,
};

fn split_command(line: &str) -> (&str, &str) {
    line.split_once(' ').unwrap_or((line, ""))
}

/// Encoder/decoder for handshake lines with a fixed public value size.
#[derive(Debug, Clone)]
pub struct HandshakeCodec {
    protocol_name: String,
    public_value_size: usize,
}

impl HandshakeCodec {
    /// Creates a codec for `protocol_name` and public values of
    /// `public_value_size` bytes.
    pub fn new(protocol_name: impl Into<String>, public_value_size: usize) -> Self {
        Self {
            protocol_name: protocol_name.into(),
            public_value_size,
        }
    }

    /// Expected public value size in bytes.
    #[must_use]
    pub const fn public_value_size(&self) -> usize {
        self.public_value_size
    }

    /// The greeting this side sends.
    #[must_use]
    pub fn hello(&self) -> HandshakeMessage {
        HandshakeMessage::Hello {
            protocol: self.protocol_name.clone(),
        }
    }

    /// Encodes a message as a line (no terminator).
    #[must_use]
    pub fn encode(&self, msg: &HandshakeMessage) -> String {
        msg.to_string()
    }

    /// Checks a greeting line.
    ///
    /// # Errors
    /// `BadGreeting` if the line is empty, is not `HELO`, or names
    /// another protocol.
    pub fn decode_hello(&self, line: &str) -> Result<()> {
        if line.is_empty() {
            return Err(CoreError::bad_greeting("empty greeting"));
        }
        let (command, protocol) = split_command(line);
        if command != HELLO_COMMAND {
            return Err(CoreError::bad_greeting(format!(
                "expected '{HELLO_COMMAND}' greeting"
            )));
        }
        if protocol != self.protocol_name {
            return Err(CoreError::bad_greeting(format!(
                "unsupported protocol '{protocol}'"
            )));
        }
        Ok(())
    }

    /// Decodes `AUTHREQ <hex>[ PARAM <value>]`.
    ///
    /// # Errors
    /// `UnexpectedCommand` for another keyword, `KeyEncoding` for a bad
    /// public value.
    pub fn decode_request(&self, line: &str) -> Result<HandshakeMessage> {
        let (command, rest) = split_command(line);
        if command != REQUEST_COMMAND {
            return Err(CoreError::unexpected_command(REQUEST_COMMAND));
        }
        let marker = format!(" {PARAM_KEYWORD} ");
        let (value, parameter) = match rest.split_once(marker.as_str()) {
            Some((value, param)) => (value, Some(param.to_string())),
            None => (rest, None),
        };
        Ok(HandshakeMessage::Request {
            public_value: self.decode_public_value(value)?,
            parameter,
        })
    }

    /// Decodes `AUTHACK <hex>`.
    ///
    /// # Errors
    /// `UnexpectedCommand` for another keyword, `KeyEncoding` for a bad
    /// public value.
    pub fn decode_ack(&self, line: &str) -> Result<HandshakeMessage> {
        let (command, rest) = split_command(line);
        if command != ACK_COMMAND {
            return Err(CoreError::unexpected_command(ACK_COMMAND));
        }
        Ok(HandshakeMessage::Ack {
            public_value: self.decode_public_value(rest)?,
        })
    }

    fn decode_public_value(&self, field: &str) -> Result<Vec<u8>> {
        let bytes = hex::decode(field.trim())
            .map_err(|e| CoreError::key_encoding(format!("not hex: {e}")))?;
        if bytes.len() != self.public_value_size {
            return Err(CoreError::key_encoding(format!(
                "expected {} bytes hex-encoded, got {}",
                self.public_value_size,
                bytes.len()
            )));
        }
        Ok(bytes)
    }

    /// Decodes an `ACK`/`NACK` status line.
    ///
    /// # Errors
    /// `UnexpectedCommand` if the line is neither.
    pub fn decode_status(line: &str) -> Result<VerificationStatus> {
        let (command, rest) = split_command(line);
        match command {
            STATUS_ACK => Ok(VerificationStatus::Ack(rest.to_string())),
            STATUS_NACK => Ok(VerificationStatus::Nack(rest.to_string())),
            _ => Err(CoreError::unexpected_command(format!("{STATUS_ACK}|{STATUS_NACK}"))),
        }
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::DEFAULT_PROTOCOL_NAME;

    fn codec() -> HandshakeCodec {
        HandshakeCodec::new(DEFAULT_PROTOCOL_NAME, 4)
    }

    #[test]
    fn test_hello_accepts_own_protocol() {
        let c = codec();
        let line = c.encode(&c.hello());
        assert!(c.decode_hello(&line).is_ok());
    }

    #[test]
    fn test_hello_rejections() {
        let c = codec();
        assert!(matches!(c.decode_hello(""), Err(CoreError::BadGreeting { .. })));
        assert!(matches!(c.decode_hello("HELLO there"), Err(CoreError::BadGreeting { .. })));
        assert!(matches!(
            c.decode_hello("HELO Other Protocol"),
            Err(CoreError::BadGreeting { .. })
        ));
    }

    #[test]
    fn test_request_with_and_without_param() {
        let c = codec();
        let msg = c.decode_request("AUTHREQ 01020304 PARAM size=64").unwrap();
        assert_eq!(
            msg,
            HandshakeMessage::Request {
                public_value: vec![1, 2, 3, 4],
                parameter: Some("size=64".into()),
            }
        );
        let msg = c.decode_request("AUTHREQ 0a0b0c0d").unwrap();
        assert!(matches!(msg, HandshakeMessage::Request { parameter: None, .. }));
    }

    #[test]
    fn test_wrong_command() {
        let c = codec();
        assert!(matches!(
            c.decode_request("AUTHACK 01020304"),
            Err(CoreError::UnexpectedCommand { .. })
        ));
        assert!(matches!(
            c.decode_ack("AUTHREQ 01020304"),
            Err(CoreError::UnexpectedCommand { .. })
        ));
    }

    #[test]
    fn test_bad_public_values() {
        let c = codec();
        assert!(matches!(c.decode_ack("AUTHACK 0102"), Err(CoreError::KeyEncoding { .. })));
        assert!(matches!(c.decode_ack("AUTHACK zz020304"), Err(CoreError::KeyEncoding { .. })));
        assert!(matches!(c.decode_ack("AUTHACK"), Err(CoreError::KeyEncoding { .. })));
    }

    #[test]
    fn test_status_lines() {
        assert!(HandshakeCodec::decode_status("ACK ").unwrap().is_ack());
        assert!(HandshakeCodec::decode_status("ACK").unwrap().is_ack());
        let nack = HandshakeCodec::decode_status("NACK too different").unwrap();
        assert_eq!(nack, VerificationStatus::Nack("too different".into()));
        assert!(HandshakeCodec::decode_status("MAYBE").is_err());
    }
}
