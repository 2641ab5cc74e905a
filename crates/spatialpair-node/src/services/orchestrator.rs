// ============================================
// File: crates/spatialpair-node/src/services/orchestrator.rs
// ============================================
//! # Verification Orchestrator
//!
//! ## Creation Reason
//! Ties the pieces of one pairing attempt together: handshake, key
//! custody, local payload, interlock, oracle decision, status exchange
//! and exactly one terminal event per remote party and attempt.
//!
//! ## Main Functionality
//! - `handshake_responder` / `handshake_initiator`: DH handshake into `Verifying`
//! - `verify`: one verification run over a kept connection
//! - `verify_continuously`: debug mode that keeps re-verifying
//! - `verify_group`: N candidates behind one interlock group barrier
//! - `accept` / `initiate`: handshake and verification in one call
//!
//! ## Verification Run
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌───────────┐   ┌────────┐   ┌──────────┐
//! │ start hook + │──►│  interlock  │──►│  oracle   │──►│ ACK /  │──►│ KeyMgr + │
//! │ payload wait │   │  N rounds   │   │ (blocking)│   │  NACK  │   │  event   │
//! └──────────────┘   └─────────────┘   └───────────┘   └────────┘   └──────────┘
//!   step 1             steps 2..=N+1     step N+2
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Every exit path of a run goes through `finish_run`, which is the only
//!   place terminal events are raised for verification
//! - A second handshake or `verify` for a remote with an attempt in
//!   flight is rejected with `AlreadyActive` and gets its own `Protocol`
//!   failure event; the running attempt is untouched and still reports
//!   its own outcome
//! - Events go to the `EventRegistry` first, then to `ProtocolHooks`
//!
//! ## Last Modified
//! v0.1.0 - Initial orchestrator

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use spatialpair_common::time::millis;
use spatialpair_common::{RemoteId, RemoteParty};
use spatialpair_core::{HandshakeCodec, SessionKey, VerificationStatus};
use spatialpair_transport::{Connection, TransportError};

use crate::config::PairingConfig;
use crate::error::{PairingError, Result};
use crate::events::{EventRegistry, EventSink, NoopHooks, ProtocolHooks};
use crate::services::group::{GroupMember, InterlockGroup};
use crate::services::handshake::{
    run_initiator, run_responder, HandshakeOutcome, HandshakeSettings, HANDSHAKE_STEPS,
};
use crate::services::interlock::{InterlockExchange, InterlockParams};
use crate::services::key_manager::{KeyManager, PairingState};
use crate::services::oracle::VerificationOracle;
use crate::services::payload::PayloadSlot;

// ============================================
// Results
// ============================================

/// A remote party whose handshake completed; it is `Verifying`.
#[derive(Debug)]
pub struct PendingVerification {
    pub remote: RemoteParty,
    /// Present when the handshake kept the connection.
    pub connection: Option<Connection>,
    pub parameter: Option<String>,
}

/// A verified remote party.
#[derive(Debug)]
pub struct PairedRemote {
    pub remote: RemoteParty,
    pub session_key: SessionKey,
    pub parameter: Option<String>,
}

/// How a combined handshake and verification call ended.
#[derive(Debug)]
pub enum VerificationOutcome {
    /// Single-shot mode verified the remote.
    Paired(PairedRemote),
    /// Continuous mode was stopped after `decisions` decisions.
    Stopped { remote: RemoteParty, decisions: u64 },
}

/// Per-member results of a grouped verification.
#[derive(Debug, Default)]
pub struct GroupReport {
    pub outcomes: Vec<(RemoteParty, Result<PairedRemote>)>,
    /// Members that were not `Verifying` (or already running) at group start.
    pub skipped: Vec<RemoteParty>,
}

impl GroupReport {
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|(_, r)| r.is_ok()).count()
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

/// Local and peer decisions of one verification attempt.
#[derive(Debug, Clone, Copy)]
struct Decision {
    matched: bool,
    /// `None` when the status exchange is disabled.
    peer_ack: Option<bool>,
}

// ============================================
// RunGuard
// ============================================

/// Marks a verification run as active until dropped.
struct RunGuard {
    active: Arc<DashMap<RemoteId, Instant>>,
    id: RemoteId,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.active.remove(&self.id);
    }
}

// ============================================
// Orchestrator
// ============================================

/// Runs pairing attempts for one local device.
///
/// # Lifecycle
/// 1. Create with `Orchestrator::new(config, oracle)`
/// 2. Register sinks on [`events`](Self::events), inject hooks with `with_hooks`
/// 3. Feed local payloads through [`payload`](Self::payload)
/// 4. Call `accept` / `initiate`, or the individual steps
pub struct Orchestrator {
    config: PairingConfig,
    handshake: HandshakeSettings,
    interlock: InterlockParams,
    keys: Arc<KeyManager>,
    events: Arc<EventRegistry>,
    hooks: Arc<dyn ProtocolHooks>,
    oracle: Arc<dyn VerificationOracle>,
    payload: Arc<PayloadSlot>,
    active: Arc<DashMap<RemoteId, Instant>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Orchestrator {
    /// Creates an orchestrator.
    ///
    /// # Errors
    /// `ConfigInvalid` if `config` does not validate, or if the mirror
    /// guard is on and `oracle` only accepts identical payloads.
    pub fn new(config: PairingConfig, oracle: Arc<dyn VerificationOracle>) -> Result<Self> {
        config.validate()?;
        if config.interlock.mirror_attack_guard && oracle.matches_only_identical() {
            return Err(PairingError::config_invalid(
                "interlock.mirror_attack_guard",
                format!(
                    "oracle '{}' only accepts identical payloads, which the guard rejects",
                    oracle.name()
                ),
            ));
        }
        let handshake = HandshakeSettings::from_config(&config.handshake)?;
        let interlock = InterlockParams::from(&config.interlock);
        let keys = Arc::new(KeyManager::new(config.verification.concurrent_verification));
        let (shutdown_tx, _) = broadcast::channel(1);

        info!(
            rounds = interlock.rounds,
            oracle = oracle.name(),
            mirror_guard = interlock.mirror_attack_guard,
            "Orchestrator initialized"
        );

        Ok(Self {
            config,
            handshake,
            interlock,
            keys,
            events: Arc::new(EventRegistry::new()),
            hooks: Arc::new(NoopHooks),
            oracle,
            payload: Arc::new(PayloadSlot::new()),
            active: Arc::new(DashMap::new()),
            shutdown_tx,
        })
    }

    /// Replaces the protocol hooks.
    #[must_use]
    pub fn with_hooks(mut self, hooks: Arc<dyn ProtocolHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    #[must_use]
    pub fn config(&self) -> &PairingConfig {
        &self.config
    }

    #[must_use]
    pub fn key_manager(&self) -> &Arc<KeyManager> {
        &self.keys
    }

    /// Sink registry; every event of this orchestrator goes through it.
    #[must_use]
    pub fn events(&self) -> &Arc<EventRegistry> {
        &self.events
    }

    /// Slot the local payload producer publishes into.
    #[must_use]
    pub fn payload(&self) -> &Arc<PayloadSlot> {
        &self.payload
    }

    /// Number of verification runs in flight.
    #[must_use]
    pub fn active_runs(&self) -> usize {
        self.active.len()
    }

    /// Upper bound on how long one attempt can legitimately stay active.
    #[must_use]
    pub fn attempt_budget(&self) -> Duration {
        let rounds = u32::try_from(self.interlock.rounds).unwrap_or(u32::MAX);
        self.handshake.timeout
            + self.config.verification.payload_grace()
            + self.config.interlock.group_timeout()
            + self.interlock.round_timeout.saturating_mul(rounds.saturating_add(2))
    }

    /// Stops continuous-checking runs.
    pub fn shutdown(&self) {
        if self.shutdown_tx.send(()).is_err() {
            debug!("No continuous runs to stop");
        }
    }

    // ========================================
    // Handshake
    // ========================================

    /// Runs the responder handshake on an accepted connection.
    ///
    /// # Errors
    /// `AlreadyActive` if the remote has an attempt in flight; the
    /// rejection raises its own failure event.
    /// Any handshake error, after one failure event.
    pub async fn handshake_responder(
        &self,
        remote: RemoteParty,
        conn: Connection,
    ) -> Result<PendingVerification> {
        self.run_handshake(remote, conn, None, &self.handshake).await
    }

    /// Runs the initiator handshake on an opened connection, offering
    /// `parameter` to the responder.
    ///
    /// # Errors
    /// As [`handshake_responder`](Self::handshake_responder).
    pub async fn handshake_initiator(
        &self,
        remote: RemoteParty,
        conn: Connection,
        parameter: Option<String>,
    ) -> Result<PendingVerification> {
        self.run_handshake(remote, conn, Some(parameter), &self.handshake)
            .await
    }

    /// `initiator` is `Some(parameter)` for the initiator role.
    async fn run_handshake(
        &self,
        remote: RemoteParty,
        mut conn: Connection,
        initiator: Option<Option<String>>,
        settings: &HandshakeSettings,
    ) -> Result<PendingVerification> {
        if let Err(e) = self.keys.record_handshake_started(&remote) {
            warn!(remote = %remote, error = %e, "Handshake rejected");
            self.fail(&remote, &e);
            close(&mut conn).await;
            return Err(e);
        }

        let observed = remote.clone();
        let progress = |step: u32, message: &str| {
            self.progress(&observed, step, HANDSHAKE_STEPS, message);
        };
        let result = match initiator {
            Some(parameter) => run_initiator(conn, remote.clone(), settings, parameter, &progress).await,
            None => run_responder(conn, remote.clone(), settings, &progress).await,
        };

        let HandshakeOutcome {
            remote,
            keys,
            mut connection,
            parameter,
        } = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                self.keys.record_handshake_failure(&remote);
                self.fail(&remote, &e);
                return Err(e);
            }
        };

        if let Err(e) = self.keys.record_handshake_success(&remote, keys, parameter.clone()) {
            self.keys.record_handshake_failure(&remote);
            self.fail(&remote, &e);
            if let Some(conn) = connection.as_mut() {
                close(conn).await;
            }
            return Err(e);
        }

        Ok(PendingVerification {
            remote,
            connection,
            parameter,
        })
    }

    // ========================================
    // Verification
    // ========================================

    /// Verifies a `Verifying` remote over its kept connection.
    ///
    /// Raises exactly one terminal event, including when the run is
    /// rejected as a duplicate. The connection is closed on return.
    ///
    /// # Errors
    /// - `AlreadyActive` if a run for `remote` is in flight
    /// - `VerificationRejected` if either oracle says no match
    /// - `PayloadTimeout`, `InterlockTimeout`, `InterlockProtocol`,
    ///   `Protocol`, `Transport`, `InvalidState`
    pub async fn verify(&self, remote: &RemoteParty, mut conn: Connection) -> Result<PairedRemote> {
        let _run = match self.claim(remote) {
            Ok(guard) => guard,
            Err(e) => {
                warn!(remote = %remote, "Duplicate verification rejected");
                self.fail(remote, &e);
                close(&mut conn).await;
                return Err(e);
            }
        };
        let result = self.attempt(remote, &mut conn, None, None).await;
        self.finish_run(remote, conn, result).await
    }

    /// Keeps re-verifying `remote` until `shutdown` or the first error.
    ///
    /// Debug mode: each decision is reported as progress, never as
    /// success. Returns the number of decisions on shutdown, after a
    /// `Cancelled` failure event.
    ///
    /// # Errors
    /// As [`verify`](Self::verify), except that a no-match decision does
    /// not stop the loop.
    pub async fn verify_continuously(
        &self,
        remote: &RemoteParty,
        mut conn: Connection,
    ) -> Result<u64> {
        let _run = match self.claim(remote) {
            Ok(guard) => guard,
            Err(e) => {
                warn!(remote = %remote, "Duplicate verification rejected");
                self.fail(remote, &e);
                close(&mut conn).await;
                return Err(e);
            }
        };
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let max = self.verification_steps();
        let mut decisions = 0u64;

        loop {
            let attempt = tokio::select! {
                _ = shutdown_rx.recv() => None,
                result = self.attempt(remote, &mut conn, None, None) => Some(result),
            };

            match attempt {
                None => {
                    info!(remote = %remote, decisions, "Continuous verification stopped");
                    self.abandon(remote);
                    self.fail(remote, &PairingError::Cancelled);
                    close(&mut conn).await;
                    return Ok(decisions);
                }
                Some(Ok(decision)) => {
                    decisions += 1;
                    let verdict = if decision.matched && decision.peer_ack != Some(false) {
                        "match"
                    } else {
                        "no match"
                    };
                    debug!(remote = %remote, decisions, verdict, "Continuous decision");
                    self.progress(remote, max, max, verdict);
                }
                Some(Err(e)) => {
                    self.abandon(remote);
                    self.fail(remote, &e);
                    close(&mut conn).await;
                    return Err(e);
                }
            }
        }
    }

    /// Verifies several candidates at once behind one group barrier.
    ///
    /// Members not in `Verifying`, or with a run in flight, are skipped
    /// with a log line and no event. The local payload is sampled once
    /// and shared by every member.
    pub async fn verify_group(self: &Arc<Self>, members: Vec<(RemoteParty, Connection)>) -> GroupReport {
        let mut report = GroupReport::default();
        let mut eligible = Vec::with_capacity(members.len());

        for (remote, mut conn) in members {
            let state = self.keys.lookup(&remote);
            if state != PairingState::Verifying {
                warn!(remote = %remote, state = %state, "Skipping group member");
                close(&mut conn).await;
                report.skipped.push(remote);
                continue;
            }
            match self.claim(&remote) {
                Ok(guard) => eligible.push((remote, conn, guard)),
                Err(_) => {
                    warn!(remote = %remote, "Skipping group member with a run in flight");
                    close(&mut conn).await;
                    report.skipped.push(remote);
                }
            }
        }
        if eligible.is_empty() {
            return report;
        }

        for (remote, _, _) in &eligible {
            let parameter = self.keys.parameter(remote);
            self.hooks
                .start_verification(remote, parameter.as_deref(), &self.payload);
        }
        let local = match self
            .payload
            .snapshot_within(self.config.verification.payload_grace())
            .await
        {
            Ok(local) => local,
            Err(e) => {
                for (remote, conn, _guard) in eligible {
                    let result = self.finish_run(&remote, conn, Err(clone_payload_error(&e))).await;
                    report.outcomes.push((remote, result));
                }
                return report;
            }
        };

        let handles = InterlockGroup::create(eligible.len(), self.config.interlock.group_timeout());
        info!(members = handles.len(), "Group verification started");

        let mut tasks = Vec::with_capacity(eligible.len());
        for ((remote, mut conn, guard), member) in eligible.into_iter().zip(handles) {
            let this = Arc::clone(self);
            let local = local.clone();
            let task_remote = remote.clone();
            let handle = tokio::spawn(async move {
                let _run = guard;
                let result = this
                    .attempt(&task_remote, &mut conn, Some(&member), Some(local))
                    .await;
                drop(member);
                this.finish_run(&task_remote, conn, result).await
            });
            tasks.push((remote, handle));
        }

        for (remote, handle) in tasks {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    let err = PairingError::internal(format!("group member task failed: {e}"));
                    self.abandon(&remote);
                    self.fail(&remote, &err);
                    Err(err)
                }
            };
            report.outcomes.push((remote, result));
        }

        info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            skipped = report.skipped.len(),
            "Group verification finished"
        );
        report
    }

    // ========================================
    // Combined flows
    // ========================================

    /// Handles an inbound connection: responder handshake, then
    /// verification (continuous if configured).
    ///
    /// # Errors
    /// Any handshake or verification error.
    pub async fn accept(&self, conn: Connection) -> Result<VerificationOutcome> {
        let remote = remote_for(&conn);
        let settings = self.handshake.keeping_connection(true);
        let pending = self.run_handshake(remote, conn, None, &settings).await?;
        self.verify_pending(pending).await
    }

    /// Opens the pairing from this side: initiator handshake, then
    /// verification (continuous if configured).
    ///
    /// # Errors
    /// Any handshake or verification error.
    pub async fn initiate(
        &self,
        remote: RemoteParty,
        conn: Connection,
        parameter: Option<String>,
    ) -> Result<VerificationOutcome> {
        let settings = self.handshake.keeping_connection(true);
        let pending = self
            .run_handshake(remote, conn, Some(parameter), &settings)
            .await?;
        self.verify_pending(pending).await
    }

    async fn verify_pending(&self, pending: PendingVerification) -> Result<VerificationOutcome> {
        let PendingVerification {
            remote, connection, ..
        } = pending;
        let Some(conn) = connection else {
            let err = PairingError::internal("handshake did not keep the connection");
            self.abandon(&remote);
            self.fail(&remote, &err);
            return Err(err);
        };

        if self.config.verification.continuous_checking {
            let decisions = self.verify_continuously(&remote, conn).await?;
            Ok(VerificationOutcome::Stopped { remote, decisions })
        } else {
            self.verify(&remote, conn).await.map(VerificationOutcome::Paired)
        }
    }

    // ========================================
    // Run internals
    // ========================================

    fn claim(&self, remote: &RemoteParty) -> Result<RunGuard> {
        match self.active.entry(remote.id()) {
            Entry::Occupied(_) => Err(PairingError::already_active(remote, "verification")),
            Entry::Vacant(slot) => {
                slot.insert(Instant::now());
                Ok(RunGuard {
                    active: Arc::clone(&self.active),
                    id: remote.id(),
                })
            }
        }
    }

    fn verification_steps(&self) -> u32 {
        u32::try_from(self.interlock.rounds)
            .unwrap_or(u32::MAX)
            .saturating_add(2)
    }

    /// One decision: payload, interlock, oracle, status exchange.
    ///
    /// `local` is supplied by grouped runs; otherwise the start hook is
    /// called and the slot is consumed.
    async fn attempt(
        &self,
        remote: &RemoteParty,
        conn: &mut Connection,
        member: Option<&GroupMember>,
        local: Option<Vec<u8>>,
    ) -> Result<Decision> {
        let lease = self.keys.lease_authentication_key(remote)?;
        let parameter = self.keys.parameter(remote);
        let max = self.verification_steps();

        let local = match local {
            Some(local) => local,
            None => {
                self.hooks
                    .start_verification(remote, parameter.as_deref(), &self.payload);
                self.payload
                    .take_within(self.config.verification.payload_grace())
                    .await?
            }
        };
        self.progress(remote, 1, max, "local payload ready");

        let mut exchange = InterlockExchange::new(conn, lease.key(), self.interlock);
        if let Some(member) = member {
            exchange = exchange.with_group(member);
        }
        let peer_payload = exchange
            .exchange(&local, |round| {
                let step = u32::try_from(round).unwrap_or(u32::MAX).saturating_add(1);
                self.progress(remote, step, max, "interlock round complete");
            })
            .await?;

        let oracle = Arc::clone(&self.oracle);
        let matched = tokio::task::spawn_blocking(move || oracle.decide(&local, &peer_payload))
            .await
            .map_err(|e| PairingError::internal(format!("oracle task failed: {e}")))?;
        debug!(remote = %remote, oracle = self.oracle.name(), matched, "Oracle decided");
        self.progress(remote, max, max, "decision made");

        let peer_ack = if self.config.verification.status_exchange {
            Some(
                self.exchange_status(conn, matched, parameter.unwrap_or_default())
                    .await?,
            )
        } else {
            None
        };

        Ok(Decision { matched, peer_ack })
    }

    async fn exchange_status(
        &self,
        conn: &mut Connection,
        matched: bool,
        parameter: String,
    ) -> Result<bool> {
        let status = VerificationStatus::from_decision(matched, parameter);
        let deadline = tokio::time::Instant::now() + self.interlock.round_timeout;
        conn.write_line(&status.to_string()).await?;

        let line = conn.read_line_until(deadline).await.map_err(|e| {
            if matches!(
                e,
                TransportError::Timeout { .. }
                    | TransportError::Closed { .. }
                    | TransportError::LineTooLong { .. }
                    | TransportError::InvalidUtf8
            ) {
                PairingError::protocol(
                    "status exchange",
                    format!("{e} (waited up to {}ms)", millis(self.interlock.round_timeout)),
                )
            } else {
                e.into()
            }
        })?;
        let peer = HandshakeCodec::decode_status(&line)?;
        debug!(ack = peer.is_ack(), "Peer status received");
        Ok(peer.is_ack())
    }

    /// Settles a run: key manager transition, one terminal event, close.
    async fn finish_run(
        &self,
        remote: &RemoteParty,
        mut conn: Connection,
        result: Result<Decision>,
    ) -> Result<PairedRemote> {
        let outcome = result.and_then(|decision| self.settle(remote, decision));
        match &outcome {
            Ok(paired) => {
                info!(remote = %remote, "Remote verified");
                self.succeed(remote, &paired.session_key, paired.parameter.as_deref());
            }
            Err(e) => {
                self.abandon(remote);
                self.fail(remote, e);
            }
        }
        close(&mut conn).await;
        outcome
    }

    fn settle(&self, remote: &RemoteParty, decision: Decision) -> Result<PairedRemote> {
        let parameter = self.keys.parameter(remote);
        if !decision.matched {
            self.keys.record_verification_result(remote, false)?;
            return Err(PairingError::rejected("payloads do not match"));
        }
        if decision.peer_ack == Some(false) {
            self.keys.record_verification_result(remote, false)?;
            return Err(PairingError::rejected("remote rejected"));
        }
        let session_key = self
            .keys
            .record_verification_result(remote, true)?
            .ok_or_else(|| PairingError::internal(format!("no session key for {remote}")))?;
        Ok(PairedRemote {
            remote: remote.clone(),
            session_key,
            parameter,
        })
    }

    /// Fails and wipes a remote still holding keys.
    fn abandon(&self, remote: &RemoteParty) {
        if self.keys.lookup(remote) == PairingState::Verifying {
            if let Err(e) = self.keys.record_verification_result(remote, false) {
                debug!(remote = %remote, error = %e, "Could not record abandoned run");
            }
        }
    }

    // ========================================
    // Events
    // ========================================

    fn progress(&self, remote: &RemoteParty, current: u32, max: u32, message: &str) {
        self.events.on_progress(remote, current, max, message);
        self.hooks.on_progress(remote, current, max, message);
    }

    fn succeed(&self, remote: &RemoteParty, session_key: &SessionKey, parameter: Option<&str>) {
        self.events.on_success(remote, session_key, parameter);
        self.hooks.on_success(remote, session_key);
    }

    fn fail(&self, remote: &RemoteParty, error: &PairingError) {
        let reason = error.category();
        self.events.on_failure(remote, reason, Some(error));
        self.hooks.on_failure(remote, reason);
    }
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("rounds", &self.interlock.rounds)
            .field("oracle", &self.oracle.name())
            .field("keys", &self.keys)
            .field("events", &self.events)
            .field("active_runs", &self.active.len())
            .finish_non_exhaustive()
    }
}

// ============================================
// Helpers
// ============================================

/// Identity for the party on the other end of `conn`.
#[must_use]
pub fn remote_for(conn: &Connection) -> RemoteParty {
    conn.peer_addr()
        .map_or_else(RemoteParty::anonymous, RemoteParty::new)
}

async fn close(conn: &mut Connection) {
    if let Err(e) = conn.shutdown().await {
        debug!(error = %e, "Connection shutdown failed");
    }
}

fn clone_payload_error(err: &PairingError) -> PairingError {
    match err {
        PairingError::PayloadTimeout { waited_ms } => PairingError::PayloadTimeout {
            waited_ms: *waited_ms,
        },
        other => PairingError::internal(other.to_string()),
    }
}

// ============================================
// Tests
// ============================================
