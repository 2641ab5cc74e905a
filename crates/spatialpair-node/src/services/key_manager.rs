// ============================================
// File: crates/spatialpair-node/src/services/key_manager.rs
// ============================================
//! # Key Manager
//!
//! ## Creation Reason
//! Holds the derived key material for each remote party between
//! handshake completion and the verification decision, together with
//! the per-remote pairing state. It is the only shared mutable state
//! across verification runs apart from the group barrier.
//!
//! ## Main Functionality
//! - `PairingState`: per-remote state machine
//! - `KeyManager`: state transitions, key custody and wiping
//! - `AuthenticationKeyLease`: the authentication key, moved out for
//!   exactly one verification run and handed back on drop
//! - Stale entry cleanup
//!
//! ## State Machine
//! ```text
//! ┌────────────┐ started ┌─────────────┐ success ┌───────────┐
//! │ NotStarted │────────►│ Handshaking │────────►│ Verifying │
//! └─────┬──────┘         └──────┬──────┘         └─────┬─────┘
//!       │ success               │ failure     matched  │  not matched
//!       └───────────────────────┼──────────►┌──────────┴┐   ┌──────────┐
//!                               └──────────►│  Failed   │◄──│ Verified │
//!                                           └───────────┘   └──────────┘
//!                                 (Verified and Failed are terminal)
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Every transition happens under the single map lock
//! - Key material is wiped on entering Verified or Failed, and on removal
//! - The authentication key is only leased out in Verifying, to one run
//!   at a time. No copy of it exists outside the entry or the lease
//! - A lease returning to a wiped or replaced entry zeroizes its key
//!
//! ## Last Modified
//! v0.1.0 - Initial key manager

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use spatialpair_common::{RemoteId, RemoteParty};
use spatialpair_core::{AuthenticationKey, AuthenticationKeyMaterial, SessionKey};

use crate::error::{PairingError, Result};

// ============================================
// PairingState
// ============================================

/// Pairing state of one remote party.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairingState {
    NotStarted,
    Handshaking,
    Verifying,
    Verified,
    Failed,
}

impl PairingState {
    /// `true` for `Verified` and `Failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Verified | Self::Failed)
    }

    /// `true` while a handshake or verification is in flight.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Handshaking | Self::Verifying)
    }
}

impl fmt::Display for PairingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotStarted => "not started",
            Self::Handshaking => "handshaking",
            Self::Verifying => "verifying",
            Self::Verified => "verified",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

// ============================================
// KeyManagerEntry
// ============================================

struct KeyManagerEntry {
    remote: RemoteParty,
    state: PairingState,
    keys: Option<AuthenticationKeyMaterial>,
    /// Id of the lease currently holding the authentication key.
    lease: Option<u64>,
    parameter: Option<String>,
    created_at: Instant,
}

impl KeyManagerEntry {
    fn new(remote: &RemoteParty, state: PairingState) -> Self {
        Self {
            remote: remote.clone(),
            state,
            keys: None,
            lease: None,
            parameter: None,
            created_at: Instant::now(),
        }
    }

    fn wipe(&mut self) {
        if let Some(mut keys) = self.keys.take() {
            keys.wipe();
        }
        self.lease = None;
    }
}

// ============================================
// AuthenticationKeyLease
// ============================================

/// Exclusive use of one remote's authentication key.
///
/// Created by [`KeyManager::lease_authentication_key`]. While it lives the
/// entry holds zeros in place of the key.
pub struct AuthenticationKeyLease {
    manager: Arc<KeyManager>,
    remote: RemoteParty,
    id: u64,
    key: AuthenticationKey,
}

impl AuthenticationKeyLease {
    #[must_use]
    pub fn key(&self) -> &AuthenticationKey {
        &self.key
    }
}

impl Drop for AuthenticationKeyLease {
    fn drop(&mut self) {
        let key = std::mem::replace(&mut self.key, AuthenticationKey::zeroed());
        self.manager.return_lease(&self.remote, self.id, key);
    }
}

impl fmt::Debug for AuthenticationKeyLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticationKeyLease")
            .field("remote", &self.remote)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

// ============================================
// KeyManager
// ============================================

/// Registry of pairing state and key material per remote party.
pub struct KeyManager {
    entries: RwLock<HashMap<RemoteId, KeyManagerEntry>>,
    concurrent_verification: bool,
    next_lease: AtomicU64,
}

impl KeyManager {
    /// Creates an empty key manager.
    ///
    /// With `concurrent_verification` off, at most one remote may be in
    /// `Verifying` at any time.
    #[must_use]
    pub fn new(concurrent_verification: bool) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            concurrent_verification,
            next_lease: AtomicU64::new(1),
        }
    }

    /// Current state; `NotStarted` for unknown remotes.
    #[must_use]
    pub fn lookup(&self, remote: &RemoteParty) -> PairingState {
        self.entries
            .read()
            .get(&remote.id())
            .map_or(PairingState::NotStarted, |e| e.state)
    }

    /// Marks a handshake as running.
    ///
    /// # Errors
    /// `AlreadyActive` if a handshake or verification is in flight.
    pub fn record_handshake_started(&self, remote: &RemoteParty) -> Result<()> {
        let mut entries = self.entries.write();
        if let Some(existing) = entries.get(&remote.id()) {
            if existing.state.is_active() {
                return Err(PairingError::already_active(remote, "handshake"));
            }
        }
        if let Some(mut old) = entries.insert(remote.id(), KeyManagerEntry::new(remote, PairingState::Handshaking)) {
            old.wipe();
        }
        debug!(remote = %remote, "Handshake started");
        Ok(())
    }

    /// Stores the derived keys and moves the remote to `Verifying`.
    ///
    /// On rejection the supplied key material is wiped.
    ///
    /// # Errors
    /// - `AlreadyActive` if the remote is already `Verifying`
    /// - `AlreadyActive` if another remote is `Verifying` and concurrent
    ///   verification is disabled
    pub fn record_handshake_success(
        &self,
        remote: &RemoteParty,
        mut keys: AuthenticationKeyMaterial,
        parameter: Option<String>,
    ) -> Result<()> {
        let mut entries = self.entries.write();
        let id = remote.id();

        if entries.get(&id).is_some_and(|e| e.state == PairingState::Verifying) {
            keys.wipe();
            return Err(PairingError::already_active(remote, "verification"));
        }
        if !self.concurrent_verification {
            if let Some(other) = entries
                .values()
                .find(|e| e.state == PairingState::Verifying && e.remote.id() != id)
            {
                keys.wipe();
                return Err(PairingError::already_active(&other.remote, "verification"));
            }
        }

        let entry = entries
            .entry(id)
            .or_insert_with(|| KeyManagerEntry::new(remote, PairingState::NotStarted));
        entry.wipe();
        if entry.state.is_terminal() {
            entry.created_at = Instant::now();
        }
        entry.state = PairingState::Verifying;
        entry.keys = Some(keys);
        entry.parameter = parameter;

        info!(remote = %remote, "Handshake complete, verifying");
        Ok(())
    }

    /// Moves the remote to `Failed` after a handshake error.
    pub fn record_handshake_failure(&self, remote: &RemoteParty) {
        let mut entries = self.entries.write();
        let entry = entries
            .entry(remote.id())
            .or_insert_with(|| KeyManagerEntry::new(remote, PairingState::NotStarted));
        entry.wipe();
        entry.state = PairingState::Failed;
        warn!(remote = %remote, "Handshake failed");
    }

    /// Moves the authentication key out for one verification run.
    ///
    /// The key goes back into the entry when the lease drops.
    ///
    /// # Errors
    /// - `InvalidState` unless the remote is `Verifying`
    /// - `AlreadyActive` if another run holds the key
    /// - `Internal` if the key material is missing
    pub fn lease_authentication_key(
        self: &Arc<Self>,
        remote: &RemoteParty,
    ) -> Result<AuthenticationKeyLease> {
        let mut entries = self.entries.write();
        let entry = match entries.get_mut(&remote.id()) {
            Some(entry) if entry.state == PairingState::Verifying => entry,
            other => {
                return Err(PairingError::invalid_state(
                    remote,
                    other.map_or(PairingState::NotStarted, |e| e.state),
                    "reading the authentication key",
                    PairingState::Verifying.to_string(),
                ));
            }
        };
        if entry.lease.is_some() {
            return Err(PairingError::already_active(remote, "verification"));
        }
        let keys = entry
            .keys
            .as_mut()
            .ok_or_else(|| PairingError::internal(format!("no key material for {remote}")))?;

        let id = self.next_lease.fetch_add(1, Ordering::Relaxed);
        let key = keys.take_authentication_key();
        entry.lease = Some(id);
        debug!(remote = %remote, lease = id, "Authentication key leased");

        Ok(AuthenticationKeyLease {
            manager: Arc::clone(self),
            remote: remote.clone(),
            id,
            key,
        })
    }

    /// Puts a leased key back if its entry still waits for it.
    fn return_lease(&self, remote: &RemoteParty, id: u64, key: AuthenticationKey) {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get_mut(&remote.id()) {
            if entry.lease == Some(id) {
                entry.lease = None;
                if let Some(keys) = entry.keys.as_mut() {
                    keys.restore_authentication_key(key);
                    return;
                }
            }
        }
        debug!(remote = %remote, lease = id, "Leased key discarded");
    }

    /// `true` while a verification run holds the remote's authentication key.
    #[must_use]
    pub fn is_leased(&self, remote: &RemoteParty) -> bool {
        self.entries
            .read()
            .get(&remote.id())
            .is_some_and(|e| e.lease.is_some())
    }

    /// Parameter the handshake carried, if any.
    #[must_use]
    pub fn parameter(&self, remote: &RemoteParty) -> Option<String> {
        self.entries
            .read()
            .get(&remote.id())
            .and_then(|e| e.parameter.clone())
    }

    /// Records the verification decision and wipes the stored keys.
    ///
    /// Returns the session key on a match; the caller owns it from then on.
    ///
    /// # Errors
    /// `InvalidState` unless the remote is `Verifying`.
    pub fn record_verification_result(
        &self,
        remote: &RemoteParty,
        matched: bool,
    ) -> Result<Option<SessionKey>> {
        let mut entries = self.entries.write();
        let Some(entry) = entries.get_mut(&remote.id()) else {
            return Err(PairingError::invalid_state(
                remote,
                PairingState::NotStarted,
                "recording a verification result",
                PairingState::Verifying.to_string(),
            ));
        };
        if entry.state != PairingState::Verifying {
            return Err(PairingError::invalid_state(
                remote,
                entry.state,
                "recording a verification result",
                PairingState::Verifying.to_string(),
            ));
        }

        let session_key = match (&entry.keys, matched) {
            (Some(keys), true) => Some(keys.session_key().clone()),
            (None, true) => {
                entry.state = PairingState::Failed;
                return Err(PairingError::internal(format!("no key material for {remote}")));
            }
            (_, false) => None,
        };
        entry.wipe();
        entry.state = if matched {
            PairingState::Verified
        } else {
            PairingState::Failed
        };

        info!(remote = %remote, state = %entry.state, "Verification recorded");
        Ok(session_key)
    }

    /// `true` if key material is held for the remote.
    #[must_use]
    pub fn has_key_material(&self, remote: &RemoteParty) -> bool {
        self.entries
            .read()
            .get(&remote.id())
            .is_some_and(|e| e.keys.is_some())
    }

    /// All remotes currently in `state`.
    #[must_use]
    pub fn remotes_in_state(&self, state: PairingState) -> Vec<RemoteParty> {
        self.entries
            .read()
            .values()
            .filter(|e| e.state == state)
            .map(|e| e.remote.clone())
            .collect()
    }

    /// `true` if no handshake or verification is in flight.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        !self.entries.read().values().any(|e| e.state.is_active())
    }

    /// Forgets a remote, wiping its keys. Returns its last state.
    pub fn remove(&self, remote: &RemoteParty) -> Option<PairingState> {
        let mut entry = self.entries.write().remove(&remote.id())?;
        entry.wipe();
        Some(entry.state)
    }

    /// Fails every entry stuck in an active state for longer than `max_age`.
    ///
    /// Returns the affected remotes.
    pub fn cleanup_stale(&self, max_age: Duration) -> Vec<RemoteParty> {
        let mut stale = Vec::new();
        let mut entries = self.entries.write();
        for entry in entries.values_mut() {
            if entry.state.is_active() && entry.created_at.elapsed() > max_age {
                entry.wipe();
                entry.state = PairingState::Failed;
                stale.push(entry.remote.clone());
            }
        }
        drop(entries);

        if !stale.is_empty() {
            info!("Failed {} stale pairing entries", stale.len());
        }
        stale
    }

    /// Number of tracked remotes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for KeyManager {
    fn default() -> Self {
        Self::new(true)
    }
}

impl fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyManager")
            .field("entries", &self.len())
            .field("concurrent_verification", &self.concurrent_verification)
            .finish()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use spatialpair_core::KeyAgreement;

    use super::*;

    fn material(seed: u8) -> AuthenticationKeyMaterial {
        AuthenticationKeyMaterial::new(
            SessionKey::from_bytes([seed; 32]),
            AuthenticationKey::from_bytes([seed.wrapping_add(1); 32]),
        )
    }

    #[test]
    fn test_full_success_path() {
        let km = Arc::new(KeyManager::default());
        let remote = RemoteParty::anonymous();
        assert_eq!(km.lookup(&remote), PairingState::NotStarted);

        km.record_handshake_started(&remote).unwrap();
        assert_eq!(km.lookup(&remote), PairingState::Handshaking);
        assert!(!km.is_idle());

        km.record_handshake_success(&remote, material(1), Some("64".into()))
            .unwrap();
        assert_eq!(km.lookup(&remote), PairingState::Verifying);
        assert_eq!(km.parameter(&remote).as_deref(), Some("64"));
        assert_eq!(
            km.lease_authentication_key(&remote).unwrap().key(),
            &AuthenticationKey::from_bytes([2; 32])
        );

        let session = km.record_verification_result(&remote, true).unwrap();
        assert_eq!(session, Some(SessionKey::from_bytes([1; 32])));
        assert_eq!(km.lookup(&remote), PairingState::Verified);
        assert!(km.is_idle());
    }

    #[test]
    fn test_key_only_readable_while_verifying() {
        let km = Arc::new(KeyManager::default());
        let remote = RemoteParty::anonymous();
        assert!(km.lease_authentication_key(&remote).is_err());

        km.record_handshake_started(&remote).unwrap();
        assert!(matches!(
            km.lease_authentication_key(&remote),
            Err(PairingError::InvalidState { .. })
        ));

        km.record_handshake_success(&remote, material(3), None).unwrap();
        assert!(km.lease_authentication_key(&remote).is_ok());

        km.record_verification_result(&remote, false).unwrap();
        assert!(km.lease_authentication_key(&remote).is_err());
    }

    #[test]
    fn test_double_handshake_success_rejected() {
        let km = Arc::new(KeyManager::default());
        let remote = RemoteParty::anonymous();
        km.record_handshake_success(&remote, material(1), None).unwrap();
        let err = km.record_handshake_success(&remote, material(5), None).unwrap_err();
        assert!(matches!(err, PairingError::AlreadyActive { .. }));

        // The original keys survive the rejected call.
        assert_eq!(
            km.lease_authentication_key(&remote).unwrap().key(),
            &AuthenticationKey::from_bytes([2; 32])
        );

        // A fresh attempt is allowed once the first one resolves.
        km.record_verification_result(&remote, false).unwrap();
        km.record_handshake_success(&remote, material(5), None).unwrap();
    }

    #[test]
    fn test_concurrent_handshake_rejected() {
        let km = Arc::new(KeyManager::default());
        let remote = RemoteParty::anonymous();
        km.record_handshake_started(&remote).unwrap();
        assert!(km.record_handshake_started(&remote).is_err());

        km.record_handshake_failure(&remote);
        assert_eq!(km.lookup(&remote), PairingState::Failed);
        km.record_handshake_started(&remote).unwrap();
    }

    #[test]
    fn test_keys_wiped_on_both_outcomes() {
        let km = Arc::new(KeyManager::default());
        let a = RemoteParty::anonymous();
        let b = RemoteParty::anonymous();
        km.record_handshake_success(&a, material(1), None).unwrap();
        km.record_handshake_success(&b, material(2), None).unwrap();
        assert!(km.has_key_material(&a));

        km.record_verification_result(&a, true).unwrap();
        km.record_verification_result(&b, false).unwrap();
        assert!(!km.has_key_material(&a));
        assert!(!km.has_key_material(&b));
        assert!(km.lease_authentication_key(&a).is_err());
        assert!(km.lease_authentication_key(&b).is_err());
    }

    #[test]
    fn test_result_requires_verifying() {
        let km = Arc::new(KeyManager::default());
        let remote = RemoteParty::anonymous();
        assert!(km.record_verification_result(&remote, true).is_err());
        km.record_handshake_success(&remote, material(1), None).unwrap();
        km.record_verification_result(&remote, true).unwrap();
        assert!(km.record_verification_result(&remote, true).is_err());
    }

    #[test]
    fn test_exclusive_verification() {
        let km = Arc::new(KeyManager::new(false));
        let a = RemoteParty::anonymous();
        let b = RemoteParty::anonymous();
        km.record_handshake_success(&a, material(1), None).unwrap();
        assert!(km.record_handshake_success(&b, material(2), None).is_err());
        assert_eq!(km.lookup(&b), PairingState::NotStarted);

        km.record_verification_result(&a, true).unwrap();
        km.record_handshake_success(&b, material(2), None).unwrap();
        assert_eq!(km.remotes_in_state(PairingState::Verifying), vec![b]);
    }

    #[test]
    fn test_cleanup_stale_and_remove() {
        let km = Arc::new(KeyManager::default());
        let remote = RemoteParty::anonymous();
        km.record_handshake_success(&remote, material(1), None).unwrap();

        assert!(km.cleanup_stale(Duration::from_secs(60)).is_empty());
        std::thread::sleep(Duration::from_millis(5));
        let stale = km.cleanup_stale(Duration::from_millis(1));
        assert_eq!(stale, vec![remote.clone()]);
        assert_eq!(km.lookup(&remote), PairingState::Failed);
        assert!(!km.has_key_material(&remote));

        assert_eq!(km.remove(&remote), Some(PairingState::Failed));
        assert!(km.is_empty());
        assert_eq!(km.remove(&remote), None);
    }

    #[test]
    fn test_with_real_key_agreement() {
        let mut alice = KeyAgreement::new();
        let mut bob = KeyAgreement::new();
        let pa = alice.generate().unwrap();
        let pb = bob.generate().unwrap();
        let ka = alice.complete(&pb).unwrap();
        let kb = bob.complete(&pa).unwrap();

        let km = Arc::new(KeyManager::default());
        let a = RemoteParty::anonymous();
        let b = RemoteParty::anonymous();
        km.record_handshake_success(&a, ka, None).unwrap();
        km.record_handshake_success(&b, kb, None).unwrap();
        assert_eq!(
            km.lease_authentication_key(&a).unwrap().key(),
            km.lease_authentication_key(&b).unwrap().key()
        );
    }

    #[test]
    fn test_lease_is_exclusive_and_returned_on_drop() {
        let km = Arc::new(KeyManager::default());
        let remote = RemoteParty::anonymous();
        km.record_handshake_success(&remote, material(1), None).unwrap();

        let lease = km.lease_authentication_key(&remote).unwrap();
        assert!(km.is_leased(&remote));
        assert!(matches!(
            km.lease_authentication_key(&remote),
            Err(PairingError::AlreadyActive { .. })
        ));
        drop(lease);

        assert!(!km.is_leased(&remote));
        let again = km.lease_authentication_key(&remote).unwrap();
        assert_eq!(again.key(), &AuthenticationKey::from_bytes([2; 32]));
    }

    #[test]
    fn test_wipe_while_leased_discards_key() {
        let km = Arc::new(KeyManager::default());
        let remote = RemoteParty::anonymous();
        km.record_handshake_success(&remote, material(1), None).unwrap();
        let lease = km.lease_authentication_key(&remote).unwrap();

        // The stored material holds zeros while the run owns the key.
        {
            let entries = km.entries.read();
            let stored = entries[&remote.id()].keys.as_ref().unwrap();
            assert!(stored.authentication_key().is_zeroed());
        }

        km.record_verification_result(&remote, false).unwrap();
        drop(lease);
        assert!(!km.has_key_material(&remote));
        assert!(!km.is_leased(&remote));

        // A new attempt for the same remote does not receive the old key.
        km.record_handshake_success(&remote, material(7), None).unwrap();
        assert_eq!(
            km.lease_authentication_key(&remote).unwrap().key(),
            &AuthenticationKey::from_bytes([8; 32])
        );
    }
}
