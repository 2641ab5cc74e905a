// ============================================
// File: crates/spatialpair-node/src/events.rs
// ============================================
//! # Pairing Events
//!
//! ## Creation Reason
//! Callers learn about pairing outcomes through callbacks. Listeners are
//! registered on an `EventRegistry` owned by one orchestrator, never in a
//! process-wide list.
//!
//! ## Main Functionality
//! - `EventSink`: success / failure / progress callbacks
//! - `EventRegistry`: fan-out to any number of sinks, add and remove at runtime
//! - `ProtocolHooks`: per-protocol-variant extension points
//! - `ChannelSink`, `LoggingSink`: ready-made sinks
//!
//! ## Event Contract
//! ```text
//! attempt ──► on_progress* ──► on_success   (exactly one of these two)
//!                         └──► on_failure
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Sinks run on the verification task: keep them quick and non-blocking
//! - Progress never implies eventual success
//!
//! ## Last Modified
//! v0.1.0 - Initial event plumbing

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use spatialpair_common::RemoteParty;
use spatialpair_core::SessionKey;

use crate::error::PairingError;
use crate::services::payload::PayloadSlot;

// ============================================
// FailureReason
// ============================================

/// Category of a failed pairing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Malformed or unexpected message, invalid key material.
    Protocol,
    /// A round's bytes or a group barrier did not complete in time.
    InterlockTimeout,
    /// Mirrored payload or payload length mismatch.
    InterlockProtocol,
    /// The oracle (local or remote) reported no match.
    VerificationRejected,
    /// No local payload arrived within the grace period.
    PayloadUnavailable,
    /// Connection failure outside the interlock.
    Transport,
    /// Stopped by shutdown.
    Cancelled,
    /// Invariant violation.
    Internal,
}

impl FailureReason {
    /// `false` only for a legitimate negative verification outcome.
    #[must_use]
    pub const fn is_system_error(self) -> bool {
        !matches!(self, Self::VerificationRejected)
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Protocol => "protocol error",
            Self::InterlockTimeout => "interlock timeout",
            Self::InterlockProtocol => "interlock protocol error",
            Self::VerificationRejected => "verification rejected",
            Self::PayloadUnavailable => "local payload unavailable",
            Self::Transport => "transport failure",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal error",
        };
        f.write_str(s)
    }
}

// ============================================
// EventSink
// ============================================

/// Receives pairing outcomes.
pub trait EventSink: Send + Sync {
    /// The remote party is verified. `session_key` belongs to the sink
    /// only if it clones it.
    fn on_success(&self, remote: &RemoteParty, session_key: &SessionKey, parameter: Option<&str>);

    /// The attempt failed.
    fn on_failure(&self, remote: &RemoteParty, reason: FailureReason, cause: Option<&PairingError>);

    /// Step `current` of `max` completed.
    fn on_progress(&self, remote: &RemoteParty, current: u32, max: u32, message: &str);
}

/// Handle returned by [`EventRegistry::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkId(u64);

/// Fan-out over registered sinks.
#[derive(Default)]
pub struct EventRegistry {
    sinks: RwLock<Vec<(SinkId, Arc<dyn EventSink>)>>,
    next_id: AtomicU64,
}

impl EventRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a sink.
    pub fn add(&self, sink: Arc<dyn EventSink>) -> SinkId {
        let id = SinkId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.sinks.write().push((id, sink));
        id
    }

    /// Unregisters a sink. Returns `false` if it was not registered.
    pub fn remove(&self, id: SinkId) -> bool {
        let mut sinks = self.sinks.write();
        let before = sinks.len();
        sinks.retain(|(sid, _)| *sid != id);
        sinks.len() != before
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sinks.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sinks.read().is_empty()
    }

    // Callbacks run without the lock held so a sink may add or remove sinks.
    fn snapshot(&self) -> Vec<Arc<dyn EventSink>> {
        self.sinks.read().iter().map(|(_, s)| Arc::clone(s)).collect()
    }
}

impl EventSink for EventRegistry {
    fn on_success(&self, remote: &RemoteParty, session_key: &SessionKey, parameter: Option<&str>) {
        for sink in self.snapshot() {
            sink.on_success(remote, session_key, parameter);
        }
    }

    fn on_failure(&self, remote: &RemoteParty, reason: FailureReason, cause: Option<&PairingError>) {
        for sink in self.snapshot() {
            sink.on_failure(remote, reason, cause);
        }
    }

    fn on_progress(&self, remote: &RemoteParty, current: u32, max: u32, message: &str) {
        for sink in self.snapshot() {
            sink.on_progress(remote, current, max, message);
        }
    }
}

impl fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRegistry")
            .field("sinks", &self.len())
            .finish()
    }
}

// ============================================
// ProtocolHooks
// ============================================

/// Extension points for one pairing-protocol variant (motion, audio, ...).
///
/// All methods default to no-ops.
pub trait ProtocolHooks: Send + Sync {
    /// Called before a verification run waits for its local payload.
    /// Implementations typically start the sampler that will publish into
    /// `payload`.
    fn start_verification(
        &self,
        _remote: &RemoteParty,
        _parameter: Option<&str>,
        _payload: &Arc<PayloadSlot>,
    ) {
    }

    fn on_success(&self, _remote: &RemoteParty, _session_key: &SessionKey) {}

    fn on_failure(&self, _remote: &RemoteParty, _reason: FailureReason) {}

    fn on_progress(&self, _remote: &RemoteParty, _current: u32, _max: u32, _message: &str) {}
}

/// Hooks that do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl ProtocolHooks for NoopHooks {}

// ============================================
// Ready-made sinks
// ============================================

/// An event as delivered by [`ChannelSink`].
#[derive(Debug)]
pub enum PairingEvent {
    Success {
        remote: RemoteParty,
        session_key: SessionKey,
        parameter: Option<String>,
    },
    Failure {
        remote: RemoteParty,
        reason: FailureReason,
        message: Option<String>,
    },
    Progress {
        remote: RemoteParty,
        current: u32,
        max: u32,
        message: String,
    },
}

impl PairingEvent {
    /// `true` for success and failure events.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress { .. })
    }

    #[must_use]
    pub const fn remote(&self) -> &RemoteParty {
        match self {
            Self::Success { remote, .. }
            | Self::Failure { remote, .. }
            | Self::Progress { remote, .. } => remote,
        }
    }
}

/// Forwards events into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<PairingEvent>,
}

impl ChannelSink {
    /// Creates the sink and its receiving end.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PairingEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: PairingEvent) {
        if self.tx.send(event).is_err() {
            debug!("Event receiver dropped");
        }
    }
}

impl EventSink for ChannelSink {
    fn on_success(&self, remote: &RemoteParty, session_key: &SessionKey, parameter: Option<&str>) {
        self.send(PairingEvent::Success {
            remote: remote.clone(),
            session_key: session_key.clone(),
            parameter: parameter.map(str::to_owned),
        });
    }

    fn on_failure(&self, remote: &RemoteParty, reason: FailureReason, cause: Option<&PairingError>) {
        self.send(PairingEvent::Failure {
            remote: remote.clone(),
            reason,
            message: cause.map(ToString::to_string),
        });
    }

    fn on_progress(&self, remote: &RemoteParty, current: u32, max: u32, message: &str) {
        self.send(PairingEvent::Progress {
            remote: remote.clone(),
            current,
            max,
            message: message.to_owned(),
        });
    }
}

/// Writes every event to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSink;

impl EventSink for LoggingSink {
    fn on_success(&self, remote: &RemoteParty, _session_key: &SessionKey, parameter: Option<&str>) {
        info!(remote = %remote, parameter = ?parameter, "Pairing succeeded");
    }

    fn on_failure(&self, remote: &RemoteParty, reason: FailureReason, cause: Option<&PairingError>) {
        match cause {
            Some(e) => warn!(remote = %remote, %reason, cause = %e, "Pairing failed"),
            None => warn!(remote = %remote, %reason, "Pairing failed"),
        }
    }

    fn on_progress(&self, remote: &RemoteParty, current: u32, max: u32, message: &str) {
        debug!(remote = %remote, current, max, step = message, "Pairing progress");
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_fan_out_and_remove() {
        let registry = EventRegistry::new();
        let (a, mut rx_a) = ChannelSink::new();
        let (b, mut rx_b) = ChannelSink::new();
        let id_a = registry.add(Arc::new(a));
        registry.add(Arc::new(b));
        assert_eq!(registry.len(), 2);

        let remote = RemoteParty::anonymous();
        registry.on_progress(&remote, 1, 4, "greeting sent");
        assert!(matches!(rx_a.try_recv(), Ok(PairingEvent::Progress { current: 1, .. })));
        assert!(matches!(rx_b.try_recv(), Ok(PairingEvent::Progress { max: 4, .. })));

        assert!(registry.remove(id_a));
        assert!(!registry.remove(id_a));
        registry.on_failure(&remote, FailureReason::Protocol, None);
        assert!(rx_a.try_recv().is_err());
        let event = rx_b.try_recv().unwrap();
        assert!(event.is_terminal());
        assert_eq!(event.remote(), &remote);
    }

    #[test]
    fn test_failure_reason_wire_names() {
        assert_eq!(
            serde_json::to_string(&FailureReason::InterlockTimeout).unwrap(),
            "\"interlock_timeout\""
        );
        let reason: FailureReason = serde_json::from_str("\"payload_unavailable\"").unwrap();
        assert_eq!(reason, FailureReason::PayloadUnavailable);
        assert!(!FailureReason::VerificationRejected.is_system_error());
    }

    #[test]
    fn test_success_event_carries_key() {
        let (sink, mut rx) = ChannelSink::new();
        let remote = RemoteParty::anonymous();
        let key = SessionKey::from_bytes([7u8; 32]);
        sink.on_success(&remote, &key, Some("64"));

        match rx.try_recv().unwrap() {
            PairingEvent::Success {
                session_key,
                parameter,
                ..
            } => {
                assert_eq!(session_key, key);
                assert_eq!(parameter.as_deref(), Some("64"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_failure_reason_display() {
        assert_eq!(FailureReason::InterlockTimeout.to_string(), "interlock timeout");
        assert!(!FailureReason::VerificationRejected.is_system_error());
        assert!(FailureReason::Internal.is_system_error());
    }
}
