// ============================================
// File: crates/spatialpair-transport/src/connection.rs
// ============================================
//! # Peer Connection
//!
//! ## Creation Reason
//! One duplex byte stream per remote party. The handshake speaks
//! newline-terminated lines over it, the interlock exchange speaks raw
//! fixed-size fragments, and the status exchange switches back to
//! lines, all on the same stream.
//!
//! ## Main Functionality
//! - `Connection::new`: wrap any `AsyncRead + AsyncWrite` stream
//! - Line I/O with a length bound
//! - Exact-length binary reads/writes
//! - `*_until` variants that fail with `Timeout` at an absolute deadline
//! - `shutdown`: flush, half-close
//!
//! ## ⚠️ Important Note for Next Developer
//! - Reads are buffered: never read from the raw stream once wrapped
//! - Every write is flushed, fragments must not sit in a buffer while
//!   the interlock waits for the peer
//!
//! ## Last Modified
//! v0.1.0 - Initial connection wrapper

use std::fmt;
use std::net::SocketAddr;

use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf,
    WriteHalf,
};
use tokio::time::{timeout_at, Instant};
use tracing::trace;

use crate::error::{Result, TransportError};

// ============================================
// Constants
// ============================================

/// Default maximum line length in bytes.
pub const DEFAULT_MAX_LINE_LEN: usize = 1024;

/// Object-safe stream bound.
pub trait PeerStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> PeerStream for T {}

type BoxedStream = Box<dyn PeerStream>;

// ============================================
// Connection
// ============================================

/// A duplex connection to one remote party.
pub struct Connection {
    reader: BufReader<ReadHalf<BoxedStream>>,
    writer: WriteHalf<BoxedStream>,
    peer_addr: Option<SocketAddr>,
    max_line_len: usize,
}

impl Connection {
    /// Wraps a stream.
    pub fn new<S>(stream: S, peer_addr: Option<SocketAddr>) -> Self
    where
        S: PeerStream + 'static,
    {
        let boxed: BoxedStream = Box::new(stream);
        let (read, write) = tokio::io::split(boxed);
        Self {
            reader: BufReader::new(read),
            writer: write,
            peer_addr,
            max_line_len: DEFAULT_MAX_LINE_LEN,
        }
    }

    /// Sets the maximum accepted line length.
    #[must_use]
    pub fn with_max_line_len(mut self, max_line_len: usize) -> Self {
        self.max_line_len = max_line_len;
        self
    }

    /// Remote address, if the stream has one.
    #[must_use]
    pub const fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    // ========================================
    // Line I/O
    // ========================================

    /// Reads one line, stripping the `\n` / `\r\n` terminator.
    ///
    /// # Errors
    /// - `Closed` at end of stream before any byte of the line
    /// - `LineTooLong` if the line exceeds the configured maximum
    /// - `InvalidUtf8` for non-UTF-8 content
    pub async fn read_line(&mut self) -> Result<String> {
        let limit = u64::try_from(self.max_line_len).unwrap_or(u64::MAX).saturating_add(1);
        let mut buf = Vec::with_capacity(128);
        let read = (&mut self.reader)
            .take(limit)
            .read_until(b'\n', &mut buf)
            .await
            .map_err(|e| TransportError::io("reading line", e))?;

        if read == 0 {
            return Err(TransportError::closed("reading line"));
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
        }
        if buf.len() > self.max_line_len {
            return Err(TransportError::LineTooLong {
                max: self.max_line_len,
            });
        }
        let line = String::from_utf8(buf).map_err(|_| TransportError::InvalidUtf8)?;
        trace!(len = line.len(), "line received");
        Ok(line)
    }

    /// Reads one line, failing with `Timeout` at `deadline`.
    ///
    /// # Errors
    /// As [`read_line`](Self::read_line), plus `Timeout`.
    pub async fn read_line_until(&mut self, deadline: Instant) -> Result<String> {
        timeout_at(deadline, self.read_line())
            .await
            .map_err(|_| TransportError::timeout("reading line"))?
    }

    /// Writes `line` followed by `\n` and flushes.
    ///
    /// # Errors
    /// `Io` on write failure.
    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        let mut data = Vec::with_capacity(line.len() + 1);
        data.extend_from_slice(line.as_bytes());
        data.push(b'\n');
        self.write_all(&data).await
    }

    // ========================================
    // Binary I/O
    // ========================================

    /// Fills `buf` completely.
    ///
    /// # Errors
    /// `Closed` if the peer hangs up first, `Io` otherwise.
    pub async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        match self.reader.read_exact(buf).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(TransportError::closed("reading fragment"))
            }
            Err(e) => Err(TransportError::io("reading fragment", e)),
        }
    }

    /// Fills `buf` completely, failing with `Timeout` at `deadline`.
    ///
    /// # Errors
    /// As [`read_exact`](Self::read_exact), plus `Timeout`.
    pub async fn read_exact_until(&mut self, buf: &mut [u8], deadline: Instant) -> Result<()> {
        timeout_at(deadline, self.read_exact(buf))
            .await
            .map_err(|_| TransportError::timeout("reading fragment"))?
    }

    /// Writes all of `data` and flushes.
    ///
    /// # Errors
    /// `Io` on write failure.
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.writer
            .write_all(data)
            .await
            .map_err(|e| TransportError::io("writing", e))?;
        self.writer
            .flush()
            .await
            .map_err(|e| TransportError::io("flushing", e))
    }

    /// Writes all of `data`, failing with `Timeout` at `deadline`.
    ///
    /// # Errors
    /// As [`write_all`](Self::write_all), plus `Timeout`.
    pub async fn write_all_until(&mut self, data: &[u8], deadline: Instant) -> Result<()> {
        timeout_at(deadline, self.write_all(data))
            .await
            .map_err(|_| TransportError::timeout("writing fragment"))?
    }

    // ========================================
    // Teardown
    // ========================================

    /// Flushes and half-closes the write side. Dropping the connection
    /// afterwards closes it fully.
    ///
    /// # Errors
    /// `Io` if flushing or shutdown fails.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer
            .flush()
            .await
            .map_err(|e| TransportError::io("flushing", e))?;
        self.writer
            .shutdown()
            .await
            .map_err(|e| TransportError::io("shutting down", e))
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("peer_addr", &self.peer_addr)
            .field("max_line_len", &self.max_line_len)
            .finish_non_exhaustive()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn pair() -> (Connection, Connection) {
        let (a, b) = tokio::io::duplex(4096);
        (Connection::new(a, None), Connection::new(b, None))
    }

    #[tokio::test]
    async fn test_line_roundtrip_strips_terminators() {
        let (mut a, mut b) = pair();
        a.write_line("HELO test").await.unwrap();
        a.write_all(b"AUTHREQ 00\r\n").await.unwrap();
        assert_eq!(b.read_line().await.unwrap(), "HELO test");
        assert_eq!(b.read_line().await.unwrap(), "AUTHREQ 00");
    }

    #[tokio::test]
    async fn test_line_too_long() {
        let (a, b) = pair();
        let mut a = a;
        let mut b = b.with_max_line_len(8);
        a.write_line("0123456789abcdef").await.unwrap();
        assert!(matches!(b.read_line().await, Err(TransportError::LineTooLong { max: 8 })));
    }

    #[tokio::test]
    async fn test_closed_stream() {
        let (mut a, mut b) = pair();
        a.shutdown().await.unwrap();
        assert!(matches!(b.read_line().await, Err(TransportError::Closed { .. })));
        let mut buf = [0u8; 4];
        assert!(b.read_exact(&mut buf).await.unwrap_err().is_disconnect());
    }

    #[tokio::test]
    async fn test_read_exact_deadline() {
        let (mut a, mut b) = pair();
        a.write_all(&[1, 2]).await.unwrap();
        let mut buf = [0u8; 4];
        let deadline = Instant::now() + Duration::from_millis(50);
        let err = b.read_exact_until(&mut buf, deadline).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_mixed_line_and_binary() {
        let (mut a, mut b) = pair();
        a.write_line("AUTHACK ff").await.unwrap();
        a.write_all(&[9, 8, 7]).await.unwrap();
        a.write_line("ACK ").await.unwrap();

        assert_eq!(b.read_line().await.unwrap(), "AUTHACK ff");
        let mut buf = [0u8; 3];
        b.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [9, 8, 7]);
        assert_eq!(b.read_line().await.unwrap(), "ACK ");
    }
}
