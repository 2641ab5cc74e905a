// ============================================
// File: crates/spatialpair-node/src/services/interlock.rs
// ============================================
//! # Interlock Exchange
//!
//! ## Creation Reason
//! Drives the anti-relay exchange of two equal-length payloads over an
//! established connection. The cipher and fragment arithmetic live in
//! `spatialpair_core::interlock`; this module adds the wire sequencing,
//! deadlines and group barrier.
//!
//! ## Wire Sequence
//! ```text
//! both:  [u32 BE payload length] ──►   ◄── [u32 BE payload length]
//! round 1:  (barrier) fragment 1 ──►   ◄── fragment 1
//! round 2:  (barrier) fragment 2 ──►   ◄── fragment 2
//!   ...
//! round n:  (barrier) fragment n ──►   ◄── fragment n   ──► decrypt
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Round `i+1` is never sent before round `i` was both sent and received
//! - A missed deadline fails the exchange, there is no partial retry
//! - Both peers must use the same round count
//!
//! ## Last Modified
//! v0.1.0 - Initial interlock driver

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use spatialpair_common::time::millis;
use spatialpair_core::{AuthenticationKey, CoreError, InterlockEngine};
use spatialpair_transport::{Connection, TransportError};

use crate::config::InterlockConfig;
use crate::error::{PairingError, Result};
use crate::services::group::GroupMember;

/// Size of the payload length preamble.
const PREAMBLE_LEN: usize = 4;

// ============================================
// InterlockParams
// ============================================

/// Per-exchange interlock parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterlockParams {
    pub rounds: usize,
    pub round_timeout: Duration,
    pub mirror_attack_guard: bool,
}

impl From<&InterlockConfig> for InterlockParams {
    fn from(config: &InterlockConfig) -> Self {
        Self {
            rounds: config.rounds,
            round_timeout: config.round_timeout(),
            mirror_attack_guard: config.mirror_attack_guard,
        }
    }
}

// ============================================
// InterlockExchange
// ============================================

/// One interlock exchange over a borrowed connection.
pub struct InterlockExchange<'a> {
    conn: &'a mut Connection,
    key: &'a AuthenticationKey,
    params: InterlockParams,
    group: Option<&'a GroupMember>,
}

impl<'a> InterlockExchange<'a> {
    pub fn new(conn: &'a mut Connection, key: &'a AuthenticationKey, params: InterlockParams) -> Self {
        Self {
            conn,
            key,
            params,
            group: None,
        }
    }

    /// Holds every round at `member`'s group barrier before sending.
    #[must_use]
    pub fn with_group(mut self, member: &'a GroupMember) -> Self {
        self.group = Some(member);
        self
    }

    /// Exchanges `local` for the peer's payload.
    ///
    /// `on_round` is called with the 1-based index of each completed round.
    ///
    /// # Errors
    /// - `InterlockTimeout` if a round misses its deadline
    /// - `InterlockProtocol` on length mismatch, bad fragment or mirrored payload
    /// - `GroupAborted` if the group barrier fails
    /// - `Transport` if the connection breaks
    pub async fn exchange<F>(self, local: &[u8], mut on_round: F) -> Result<Vec<u8>>
    where
        F: FnMut(usize),
    {
        let Self {
            conn,
            key,
            params,
            group,
        } = self;
        let timeout_ms = millis(params.round_timeout);
        let mut engine = InterlockEngine::new(key, local, params.rounds)?;

        let local_len = u32::try_from(local.len())
            .map_err(|_| PairingError::interlock_protocol("payload exceeds u32 length"))?;
        let deadline = Instant::now() + params.round_timeout;
        let mut preamble = [0u8; PREAMBLE_LEN];
        conn.write_all_until(&local_len.to_be_bytes(), deadline)
            .await
            .map_err(|e| stage_error(e, "length preamble", timeout_ms))?;
        conn.read_exact_until(&mut preamble, deadline)
            .await
            .map_err(|e| stage_error(e, "length preamble", timeout_ms))?;
        let remote_len = u32::from_be_bytes(preamble);
        if remote_len != local_len {
            return Err(PairingError::interlock_protocol(format!(
                "payload length mismatch: local {local_len}, remote {remote_len}"
            )));
        }

        let rounds = params.rounds;
        for round in 0..rounds {
            if let Some(member) = group {
                member.arrive(round).await?;
            }
            let stage = format!("round {} of {rounds}", round + 1);
            let deadline = Instant::now() + params.round_timeout;

            conn.write_all_until(engine.outgoing(round)?, deadline)
                .await
                .map_err(|e| stage_error(e, &stage, timeout_ms))?;

            let mut incoming = vec![0u8; engine.layout().fragment_len(round)];
            conn.read_exact_until(&mut incoming, deadline)
                .await
                .map_err(|e| stage_error(e, &stage, timeout_ms))?;
            engine.receive(round, &incoming).map_err(interlock_error)?;

            debug!(round = round + 1, rounds, "Interlock round complete");
            on_round(round + 1);
        }

        engine
            .finish(params.mirror_attack_guard)
            .map_err(interlock_error)
    }
}

fn stage_error(err: TransportError, stage: &str, timeout_ms: u64) -> PairingError {
    if err.is_timeout() {
        PairingError::interlock_timeout(stage, timeout_ms)
    } else {
        err.into()
    }
}

fn interlock_error(err: CoreError) -> PairingError {
    if err.is_interlock_error() {
        PairingError::interlock_protocol(err.to_string())
    } else {
        err.into()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use spatialpair_core::FragmentLayout;
    use spatialpair_transport::MockConnection;

    use super::*;

    fn key(seed: u8) -> AuthenticationKey {
        AuthenticationKey::from_bytes([seed; 32])
    }

    fn params(rounds: usize, timeout_ms: u64, guard: bool) -> InterlockParams {
        InterlockParams {
            rounds,
            round_timeout: Duration::from_millis(timeout_ms),
            mirror_attack_guard: guard,
        }
    }

    async fn run_pair(
        a_payload: Vec<u8>,
        b_payload: Vec<u8>,
        p: InterlockParams,
    ) -> (Result<Vec<u8>>, Result<Vec<u8>>) {
        let (mut a, mut b) = MockConnection::pair();
        let task = tokio::spawn(async move {
            let k = key(7);
            InterlockExchange::new(&mut b, &k, p)
                .exchange(&b_payload, |_| {})
                .await
        });
        let k = key(7);
        let ra = InterlockExchange::new(&mut a, &k, p)
            .exchange(&a_payload, |_| {})
            .await;
        (ra, task.await.unwrap())
    }

    #[tokio::test]
    async fn test_honest_peers_recover_each_other() {
        let (ra, rb) = run_pair(vec![0x01; 64], vec![0x02; 64], params(2, 1000, true)).await;
        assert_eq!(ra.unwrap(), vec![0x02; 64]);
        assert_eq!(rb.unwrap(), vec![0x01; 64]);
    }

    #[tokio::test]
    async fn test_many_rounds_odd_length() {
        let a: Vec<u8> = (0..100u8).collect();
        let b: Vec<u8> = (0..100u8).rev().collect();
        let (ra, rb) = run_pair(a.clone(), b.clone(), params(7, 1000, true)).await;
        assert_eq!(ra.unwrap(), b);
        assert_eq!(rb.unwrap(), a);
    }

    #[tokio::test]
    async fn test_round_callback() {
        let (mut a, mut b) = MockConnection::pair();
        let peer = tokio::spawn(async move {
            let k = key(1);
            InterlockExchange::new(&mut b, &k, params(3, 1000, true))
                .exchange(&[5u8; 32], |_| {})
                .await
        });
        let k = key(1);
        let mut seen = Vec::new();
        InterlockExchange::new(&mut a, &k, params(3, 1000, true))
            .exchange(&[6u8; 32], |r| seen.push(r))
            .await
            .unwrap();
        peer.await.unwrap().unwrap();
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_length_mismatch() {
        let (ra, rb) = run_pair(vec![0x01; 64], vec![0x02; 32], params(2, 1000, true)).await;
        assert!(matches!(ra, Err(PairingError::InterlockProtocol { .. })));
        assert!(matches!(rb, Err(PairingError::InterlockProtocol { .. })));
    }

    #[tokio::test]
    async fn test_withheld_final_round_times_out() {
        let timeout = Duration::from_millis(150);
        let (mut a, mut b) = MockConnection::pair();

        // Honest-looking peer that stops after round 1.
        let peer = tokio::spawn(async move {
            let mut engine = InterlockEngine::new(&key(3), &[0x02; 64], 2).unwrap();
            let mut len = [0u8; 4];
            b.read_exact(&mut len).await.unwrap();
            b.write_all(&64u32.to_be_bytes()).await.unwrap();
            b.write_all(engine.outgoing(0).unwrap()).await.unwrap();
            let mut frag = vec![0u8; engine.layout().fragment_len(0)];
            b.read_exact(&mut frag).await.unwrap();
            engine.receive(0, &frag).unwrap();
            let partial = engine.finish(true);
            tokio::time::sleep(Duration::from_millis(500)).await;
            drop(b);
            partial
        });

        let start = Instant::now();
        let err = InterlockExchange::new(&mut a, &key(3), params(2, 150, true))
            .exchange(&[0x01; 64], |_| {})
            .await
            .unwrap_err();
        let elapsed = start.elapsed();

        match err {
            PairingError::InterlockTimeout { stage, timeout_ms } => {
                assert_eq!(stage, "round 2 of 2");
                assert_eq!(timeout_ms, 150);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(elapsed >= timeout);
        assert!(elapsed < timeout + Duration::from_millis(1000));

        // The withholding side could not decrypt from one round either.
        assert!(matches!(
            peer.await.unwrap(),
            Err(CoreError::Incomplete { received: 1, rounds: 2 })
        ));
    }

    async fn echo_peer(mut conn: Connection, plaintext_len: usize, rounds: usize) {
        let layout = FragmentLayout::new(plaintext_len, rounds).unwrap();
        let mut len = [0u8; 4];
        conn.read_exact(&mut len).await.unwrap();
        conn.write_all(&len).await.unwrap();
        for round in 0..rounds {
            let mut frag = vec![0u8; layout.fragment_len(round)];
            conn.read_exact(&mut frag).await.unwrap();
            conn.write_all(&frag).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_mirror_attack_detected() {
        let (mut a, b) = MockConnection::pair();
        let relay = tokio::spawn(echo_peer(b, 64, 2));
        let err = InterlockExchange::new(&mut a, &key(9), params(2, 1000, true))
            .exchange(&[0x01; 64], |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, PairingError::InterlockProtocol { .. }));
        relay.await.unwrap();
    }

    #[tokio::test]
    async fn test_mirror_accepted_without_guard() {
        let (mut a, b) = MockConnection::pair();
        let relay = tokio::spawn(echo_peer(b, 64, 2));
        let recovered = InterlockExchange::new(&mut a, &key(9), params(2, 1000, false))
            .exchange(&[0x01; 64], |_| {})
            .await
            .unwrap();
        assert_eq!(recovered, vec![0x01; 64]);
        relay.await.unwrap();
    }

    #[tokio::test]
    async fn test_mismatched_keys_do_not_recover_payload() {
        let (mut a, mut b) = MockConnection::pair();
        let task = tokio::spawn(async move {
            InterlockExchange::new(&mut b, &key(1), params(2, 1000, true))
                .exchange(&[0x02; 64], |_| {})
                .await
        });
        let recovered = InterlockExchange::new(&mut a, &key(2), params(2, 1000, true))
            .exchange(&[0x01; 64], |_| {})
            .await
            .unwrap();
        assert_ne!(recovered, vec![0x02; 64]);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_peer_hangup_is_transport_error() {
        let (mut a, b) = MockConnection::pair();
        drop(b);
        let err = InterlockExchange::new(&mut a, &key(1), params(2, 1000, true))
            .exchange(&[0x01; 64], |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, PairingError::Transport(_)));
    }
}
