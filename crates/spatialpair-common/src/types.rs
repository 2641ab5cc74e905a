// ============================================
// File: crates/spatialpair-common/src/types.rs
// ============================================
//! # Core Type Definitions
//!
//! ## Creation Reason
//! Identifies the other device in a pairing attempt. A `RemoteParty`
//! lives exactly as long as one attempt: it is created when a connection
//! is accepted or initiated and dropped once the attempt resolves.
//!
//! ## Main Functionality
//! - `RemoteId`: 128-bit registry key, derived from the peer address or
//!   drawn at random for parties without one
//! - `RemoteParty`: id plus optional network address and logical name
//!
//! ## Main Logical Flow
//! 1. Listener accepts / connector connects → `RemoteParty::new(addr)`
//! 2. The id keys the key manager entry and the active-run table
//! 3. Display form (base64) appears in logs and events
//!
//! ## ⚠️ Important Note for Next Developer
//! - Equality and hashing use the id only. The id of an addressed party
//!   is derived from address and port, so a second attempt towards the
//!   same peer maps to the same key manager entry and is rejected while
//!   the first is still running
//! - Anonymous parties get ids from the OS RNG
//!
//! ## Last Modified
//! v0.1.0 - Initial remote party types

use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::CommonError;

// ============================================
// Constants
// ============================================

/// Size of `RemoteId` in bytes.
pub const REMOTE_ID_SIZE: usize = 16;

/// Domain tag mixed into address-derived ids.
const ADDRESS_ID_TAG: &[u8] = b"spatialpair remote address\0";

// ============================================
// RemoteId
// ============================================

/// Opaque identifier of one remote party for one pairing attempt.
///
/// # Example
/// ```
/// use spatialpair_common::types::RemoteId;
///
/// let id = RemoteId::generate();
/// let parsed: RemoteId = id.to_string().parse().unwrap();
/// assert_eq!(id, parsed);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RemoteId([u8; REMOTE_ID_SIZE]);

impl RemoteId {
    /// Generates a new random `RemoteId`.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; REMOTE_ID_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Derives the id of the party at `addr` (address and port).
    #[must_use]
    pub fn for_address(addr: SocketAddr) -> Self {
        let digest = Sha256::new()
            .chain_update(ADDRESS_ID_TAG)
            .chain_update(addr.to_string().as_bytes())
            .finalize();
        let mut bytes = [0u8; REMOTE_ID_SIZE];
        bytes.copy_from_slice(&digest[..REMOTE_ID_SIZE]);
        Self(bytes)
    }

    /// Creates a `RemoteId` from raw bytes.
    ///
    /// Returns `None` if `bytes` is not exactly 16 bytes long.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let id: [u8; REMOTE_ID_SIZE] = bytes.try_into().ok()?;
        Some(Self(id))
    }

    /// Returns the raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; REMOTE_ID_SIZE] {
        &self.0
    }
}

impl fmt::Debug for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RemoteId({self})")
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", BASE64.encode(self.0))
    }
}

impl FromStr for RemoteId {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = BASE64.decode(s)?;
        Self::from_bytes(&bytes)
            .ok_or_else(|| CommonError::invalid_length(REMOTE_ID_SIZE, bytes.len()))
    }
}

impl Serialize for RemoteId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for RemoteId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================
// RemoteParty
// ============================================

/// A pairing peer: opaque id, plus where it connected from and an
/// optional logical name announced by the calling protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteParty {
    id: RemoteId,
    addr: Option<SocketAddr>,
    name: Option<String>,
}

impl RemoteParty {
    /// Creates a party for a connection to or from `addr`.
    ///
    /// Every call with the same address yields the same id.
    #[must_use]
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            id: RemoteId::for_address(addr),
            addr: Some(addr),
            name: None,
        }
    }

    /// Creates a party without a network address (in-memory links, tests).
    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            id: RemoteId::generate(),
            addr: None,
            name: None,
        }
    }

    /// Attaches a logical name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Returns the registry id.
    #[must_use]
    pub const fn id(&self) -> RemoteId {
        self.id
    }

    /// Returns the network address, if known.
    #[must_use]
    pub const fn addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    /// Returns the logical name, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl PartialEq for RemoteParty {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for RemoteParty {}

impl Hash for RemoteParty {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for RemoteParty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.name, self.addr) {
            (Some(name), _) => write!(f, "{name}[{}]", self.id),
            (None, Some(addr)) => write!(f, "{addr}[{}]", self.id),
            (None, None) => write!(f, "[{}]", self.id),
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
    fn test_remote_id_generation_is_unique() {
        let a = RemoteId::generate();
        let b = RemoteId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_remote_id_parse_rejects_wrong_length() {
        let short = BASE64.encode([1u8; 4]);
        let err = short.parse::<RemoteId>().unwrap_err();
        assert!(matches!(err, CommonError::InvalidLength { expected: 16, actual: 4 }));
        assert!("not base64!".parse::<RemoteId>().is_err());
    }

    #[test]
    fn test_remote_id_json() {
        let id = RemoteId::generate();
        let json = serde_json::to_string(&id).unwrap();
        let back: RemoteId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn test_party_identity_follows_address() {
        let addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        let a = RemoteParty::new(addr);
        let b = RemoteParty::new(addr);
        assert_eq!(a, b);
        assert_eq!(a.id(), RemoteId::for_address(addr));
        assert_eq!(a, a.clone().with_name("phone"));

        let other_port = RemoteParty::new("127.0.0.1:4001".parse().unwrap());
        assert_ne!(a, other_port);
        assert_ne!(RemoteParty::anonymous(), RemoteParty::anonymous());
    }

    #[test]
    fn test_party_display() {
        let party = RemoteParty::anonymous().with_name("watch");
        assert!(party.to_string().starts_with("watch["));
        assert_eq!(party.name(), Some("watch"));
        assert!(party.addr().is_none());
    }
}
