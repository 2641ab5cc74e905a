// ============================================
// File: crates/spatialpair-node/src/services/handshake.rs
// ============================================
//! # Handshake State Machine
//!
//! ## Creation Reason
//! Runs one Diffie-Hellman handshake per connection attempt over the
//! line protocol and produces the derived key material.
//!
//! ## Main Functionality
//! - `HandshakeStateMachine`: explicit state tracking per role
//! - `run_responder` / `run_initiator`: full runs with timeout and teardown
//! - `HandshakeOutcome`: keys, optional kept connection, optional parameter
//!
//! ## Handshake Flow
//! ```text
//!   Initiator                                Responder
//!   ─────────                                ─────────
//!   AwaitHello      ◄──── HELO <protocol> ─── SentHello
//!   AwaitPeerAck    ── AUTHREQ <hex>[ PARAM p] ──► AwaitPeerPublicKey
//!                   ◄──── AUTHACK <hex> ─────
//!   Done                                     Done
//! ```
//!
//! ## Progress Checkpoints
//! 4 steps per side: greeting, own public value, peer public value,
//! shared secret (in the order the role reaches them).
//!
//! ## ⚠️ Important Note for Next Developer
//! - Every failure closes the connection (flush, half-close, drop)
//! - Key agreement state is wiped on failure; `KeyAgreement` also wipes on drop
//! - The whole run is bounded by the configured handshake timeout
//!
//! ## Last Modified
//! v0.1.0 - Initial handshake state machine

use std::fmt;
use std::time::Duration;

use tracing::{debug, info, warn};

use spatialpair_common::time::millis;
use spatialpair_common::RemoteParty;
use spatialpair_core::{
    AuthenticationKeyMaterial, DhGroup, HandshakeCodec, HandshakeMessage, KeyAgreement,
};
use spatialpair_transport::{Connection, TransportError};

use crate::config::HandshakeConfig;
use crate::error::{PairingError, Result};

/// Number of progress steps a handshake reports.
pub const HANDSHAKE_STEPS: u32 = 4;

/// Progress callback: `(step, message)`, step in `1..=HANDSHAKE_STEPS`.
pub type Progress<'a> = &'a (dyn Fn(u32, &str) + Send + Sync);

// ============================================
// HandshakeRole / HandshakeState
// ============================================

/// Which side of the handshake this machine plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeRole {
    /// Accepted the connection, greets first.
    Responder,
    /// Opened the connection, expects a greeting.
    Initiator,
}

/// Handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Nothing sent or received yet.
    Init,
    /// Responder sent its greeting.
    SentHello,
    /// Initiator waits for the greeting.
    AwaitHello,
    /// Responder waits for `AUTHREQ`.
    AwaitPeerPublicKey,
    /// Initiator waits for `AUTHACK`.
    AwaitPeerAck,
    /// Keys derived.
    Done,
    /// Aborted; key agreement wiped.
    Failed,
}

impl HandshakeState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ============================================
// HandshakeSettings
// ============================================

/// Handshake parameters resolved from config.
#[derive(Debug, Clone)]
pub struct HandshakeSettings {
    pub protocol_name: String,
    pub timeout: Duration,
    pub keep_connected: bool,
    pub group: DhGroup,
}

impl HandshakeSettings {
    /// # Errors
    /// `ConfigInvalid` for an unusable DH group.
    pub fn from_config(config: &HandshakeConfig) -> Result<Self> {
        Ok(Self {
            protocol_name: config.protocol_name.clone(),
            timeout: config.timeout(),
            keep_connected: config.keep_connected,
            group: config.dh_group()?,
        })
    }

    /// Same settings with `keep_connected` overridden.
    #[must_use]
    pub fn keeping_connection(&self, keep: bool) -> Self {
        Self {
            keep_connected: keep,
            ..self.clone()
        }
    }
}

impl Default for HandshakeSettings {
    fn default() -> Self {
        Self {
            protocol_name: spatialpair_core::DEFAULT_PROTOCOL_NAME.to_string(),
            timeout: Duration::from_secs(10),
            keep_connected: true,
            group: DhGroup::skip_1024(),
        }
    }
}

// ============================================
// HandshakeOutcome
// ============================================

/// Result of a successful handshake.
#[derive(Debug)]
pub struct HandshakeOutcome {
    pub remote: RemoteParty,
    pub keys: AuthenticationKeyMaterial,
    /// The connection, if it was kept for verification.
    pub connection: Option<Connection>,
    /// Parameter the initiator appended to `AUTHREQ`.
    pub parameter: Option<String>,
}

// ============================================
// HandshakeStateMachine
// ============================================

/// One handshake run.
pub struct HandshakeStateMachine {
    role: HandshakeRole,
    state: HandshakeState,
    codec: HandshakeCodec,
    agreement: KeyAgreement,
}

impl HandshakeStateMachine {
    #[must_use]
    pub fn new(role: HandshakeRole, settings: &HandshakeSettings) -> Self {
        Self {
            role,
            state: HandshakeState::Init,
            codec: HandshakeCodec::new(
                settings.protocol_name.clone(),
                settings.group.public_value_size(),
            ),
            agreement: KeyAgreement::with_group(settings.group.clone()),
        }
    }

    #[must_use]
    pub const fn role(&self) -> HandshakeRole {
        self.role
    }

    #[must_use]
    pub const fn state(&self) -> HandshakeState {
        self.state
    }

    fn transition(&mut self, next: HandshakeState) {
        debug!(role = ?self.role, from = %self.state, to = %next, "Handshake transition");
        self.state = next;
    }

    fn fail(&mut self) {
        self.agreement.wipe();
        self.state = HandshakeState::Failed;
    }

    async fn read_line(&self, conn: &mut Connection) -> Result<String> {
        conn.read_line().await.map_err(|e| {
            if matches!(
                e,
                TransportError::LineTooLong { .. }
                    | TransportError::InvalidUtf8
                    | TransportError::Closed { .. }
            ) {
                PairingError::protocol(self.state, e.to_string())
            } else {
                e.into()
            }
        })
    }

    async fn drive_responder(
        &mut self,
        conn: &mut Connection,
        progress: Progress<'_>,
    ) -> Result<(AuthenticationKeyMaterial, Option<String>)> {
        conn.write_line(&self.codec.encode(&self.codec.hello())).await?;
        self.transition(HandshakeState::SentHello);
        progress(1, "greeting sent");

        let own_public = self.agreement.generate()?;
        self.transition(HandshakeState::AwaitPeerPublicKey);
        let line = self.read_line(conn).await?;
        let HandshakeMessage::Request {
            public_value,
            parameter,
        } = self.codec.decode_request(&line)?
        else {
            return Err(PairingError::internal("request decoder returned another message"));
        };
        progress(2, "peer public key received");

        let keys = self.agreement.complete(&public_value)?;
        progress(3, "shared secret computed");

        let ack = HandshakeMessage::Ack {
            public_value: own_public,
        };
        conn.write_line(&self.codec.encode(&ack)).await?;
        progress(4, "own public key sent");

        self.transition(HandshakeState::Done);
        Ok((keys, parameter))
    }

    async fn drive_initiator(
        &mut self,
        conn: &mut Connection,
        parameter: Option<String>,
        progress: Progress<'_>,
    ) -> Result<AuthenticationKeyMaterial> {
        self.transition(HandshakeState::AwaitHello);
        let line = self.read_line(conn).await?;
        self.codec.decode_hello(&line)?;
        progress(1, "greeting received");

        let request = HandshakeMessage::Request {
            public_value: self.agreement.generate()?,
            parameter,
        };
        conn.write_line(&self.codec.encode(&request)).await?;
        self.transition(HandshakeState::AwaitPeerAck);
        progress(2, "own public key sent");

        let line = self.read_line(conn).await?;
        let HandshakeMessage::Ack { public_value } = self.codec.decode_ack(&line)? else {
            return Err(PairingError::internal("ack decoder returned another message"));
        };
        progress(3, "peer public key received");

        let keys = self.agreement.complete(&public_value)?;
        progress(4, "shared secret computed");

        self.transition(HandshakeState::Done);
        Ok(keys)
    }
}

impl fmt::Debug for HandshakeStateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandshakeStateMachine")
            .field("role", &self.role)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

// ============================================
// Runs
// ============================================

/// Runs the responder side on an accepted connection.
///
/// # Errors
/// `Protocol` (timeout, framing), `Core` (bad greeting, command, key
/// encoding, rejected peer key) or `Transport`. The connection is
/// closed on every error.
pub async fn run_responder(
    mut conn: Connection,
    remote: RemoteParty,
    settings: &HandshakeSettings,
    progress: Progress<'_>,
) -> Result<HandshakeOutcome> {
    let mut machine = HandshakeStateMachine::new(HandshakeRole::Responder, settings);
    let result = tokio::time::timeout(settings.timeout, machine.drive_responder(&mut conn, progress)).await;
    let result = flatten_timeout(result, &machine, settings.timeout);

    match result {
        Ok((keys, parameter)) => {
            info!(remote = %remote, parameter = ?parameter, "Responder handshake complete");
            let connection = keep_or_close(conn, settings.keep_connected).await;
            Ok(HandshakeOutcome {
                remote,
                keys,
                connection,
                parameter,
            })
        }
        Err(e) => Err(abort(&mut machine, conn, &remote, e).await),
    }
}

/// Runs the initiator side on an opened connection.
///
/// `parameter` is appended to `AUTHREQ` for the responder.
///
/// # Errors
/// As [`run_responder`].
pub async fn run_initiator(
    mut conn: Connection,
    remote: RemoteParty,
    settings: &HandshakeSettings,
    parameter: Option<String>,
    progress: Progress<'_>,
) -> Result<HandshakeOutcome> {
    let mut machine = HandshakeStateMachine::new(HandshakeRole::Initiator, settings);
    let result = tokio::time::timeout(
        settings.timeout,
        machine.drive_initiator(&mut conn, parameter.clone(), progress),
    )
    .await;
    let result = flatten_timeout(result, &machine, settings.timeout);

    match result {
        Ok(keys) => {
            info!(remote = %remote, "Initiator handshake complete");
            let connection = keep_or_close(conn, settings.keep_connected).await;
            Ok(HandshakeOutcome {
                remote,
                keys,
                connection,
                parameter,
            })
        }
        Err(e) => Err(abort(&mut machine, conn, &remote, e).await),
    }
}

fn flatten_timeout<T>(
    result: std::result::Result<Result<T>, tokio::time::error::Elapsed>,
    machine: &HandshakeStateMachine,
    timeout: Duration,
) -> Result<T> {
    result.unwrap_or_else(|_| {
        Err(PairingError::protocol(
            machine.state(),
            format!("handshake timed out after {}ms", millis(timeout)),
        ))
    })
}

async fn keep_or_close(mut conn: Connection, keep: bool) -> Option<Connection> {
    if keep {
        return Some(conn);
    }
    if let Err(e) = conn.shutdown().await {
        debug!(error = %e, "Connection shutdown after handshake failed");
    }
    None
}

async fn abort(
    machine: &mut HandshakeStateMachine,
    mut conn: Connection,
    remote: &RemoteParty,
    err: PairingError,
) -> PairingError {
    warn!(remote = %remote, role = ?machine.role(), state = %machine.state(), error = %err, "Handshake failed");
    machine.fail();
    if let Err(e) = conn.shutdown().await {
        debug!(error = %e, "Connection shutdown after handshake failure failed");
    }
    err
}

// ============================================
// Tests
// ============================================
