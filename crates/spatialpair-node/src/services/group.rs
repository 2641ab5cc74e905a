// ============================================
// File: crates/spatialpair-node/src/services/group.rs
// ============================================
//! # Interlock Group Barrier
//!
//! ## Creation Reason
//! When one device verifies against several candidate peers at once, a
//! member that released round `i` early would let an attacker holding
//! another candidate slot learn fragments ahead of the honest peers.
//! Every member therefore waits at a per-round barrier.
//!
//! ## Main Functionality
//! - `InterlockGroup::create`: one barrier and N member handles
//! - `GroupMember::arrive`: commit to a round, wait for the cohort
//! - Dropping a `GroupMember` leaves the group
//!
//! ## Barrier Rules
//! ```text
//! round i:  m0 ──arrive──┐
//!           m1 ──arrive──┼── last arrival releases everyone ──► send fragment i
//!           m2 ──arrive──┘
//!
//! timeout at any barrier ──► whole group aborted
//! member leaves          ──► remaining members no longer wait for it
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - A barrier cannot partially succeed: a timeout aborts every member
//! - The barrier deadline is fixed by the first arrival of each round
//!
//! ## Last Modified
//! v0.1.0 - Initial group barrier

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{PairingError, Result};

// ============================================
// BarrierState
// ============================================

struct BarrierState {
    round: usize,
    committed: Vec<bool>,
    active: Vec<bool>,
    ready: usize,
    round_deadline: Option<Instant>,
    aborted: Option<String>,
}

impl BarrierState {
    fn active_count(&self) -> usize {
        self.active.iter().filter(|a| **a).count()
    }

    fn release(&mut self) {
        self.round += 1;
        self.committed.iter_mut().for_each(|c| *c = false);
        self.ready = 0;
        self.round_deadline = None;
    }
}

// ============================================
// InterlockGroup
// ============================================

/// Barrier shared by the members of one grouped verification.
pub struct InterlockGroup {
    state: Mutex<BarrierState>,
    released: Notify,
    timeout: Duration,
}

impl InterlockGroup {
    /// Creates a group of `members` and returns one handle per member.
    ///
    /// `timeout` bounds each barrier wait, measured from the first
    /// arrival of a round.
    #[must_use]
    pub fn create(members: usize, timeout: Duration) -> Vec<GroupMember> {
        let group = Arc::new(Self {
            state: Mutex::new(BarrierState {
                round: 0,
                committed: vec![false; members],
                active: vec![true; members],
                ready: 0,
                round_deadline: None,
                aborted: None,
            }),
            released: Notify::new(),
            timeout,
        });
        debug!(members, "Interlock group created");
        (0..members)
            .map(|index| GroupMember {
                group: Arc::clone(&group),
                index,
            })
            .collect()
    }

    /// Members that have not left.
    #[must_use]
    pub fn active_members(&self) -> usize {
        self.state.lock().active_count()
    }

    /// `true` once every member has left.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active_members() == 0
    }

    /// Number of rounds released so far.
    #[must_use]
    pub fn released_rounds(&self) -> usize {
        self.state.lock().round
    }

    /// `true` after a timeout or an explicit abort.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.state.lock().aborted.is_some()
    }

    /// Aborts the group; every waiting and future `arrive` fails.
    pub fn abort(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let mut state = self.state.lock();
        if state.aborted.is_none() {
            warn!(reason = %reason, "Interlock group aborted");
            state.aborted = Some(reason);
        }
        drop(state);
        self.released.notify_waiters();
    }

    async fn arrive(&self, index: usize, round: usize) -> Result<()> {
        let deadline = {
            let mut state = self.state.lock();
            if let Some(reason) = &state.aborted {
                return Err(PairingError::group_aborted(reason.clone()));
            }
            if !state.active.get(index).copied().unwrap_or(false) {
                return Err(PairingError::internal(format!(
                    "group member {index} arrived after leaving"
                )));
            }
            if round != state.round || state.committed[index] {
                return Err(PairingError::internal(format!(
                    "group member {index} arrived at round {round}, barrier is at {}",
                    state.round
                )));
            }

            state.committed[index] = true;
            state.ready += 1;
            let timeout = self.timeout;
            let deadline = *state
                .round_deadline
                .get_or_insert_with(|| Instant::now() + timeout);

            if state.ready == state.active_count() {
                state.release();
                drop(state);
                self.released.notify_waiters();
                debug!(round, "Group barrier released");
                return Ok(());
            }
            deadline
        };

        loop {
            let notified = self.released.notified();
            {
                let state = self.state.lock();
                if let Some(reason) = &state.aborted {
                    return Err(PairingError::group_aborted(reason.clone()));
                }
                if state.round > round {
                    return Ok(());
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                let reason = {
                    let state = self.state.lock();
                    if state.round > round {
                        return Ok(());
                    }
                    format!(
                        "barrier for round {} timed out with {} of {} members ready",
                        round + 1,
                        state.ready,
                        state.active_count()
                    )
                };
                self.abort(reason.clone());
                return Err(PairingError::group_aborted(reason));
            }
        }
    }

    fn leave(&self, index: usize) {
        let mut state = self.state.lock();
        if !state.active.get(index).copied().unwrap_or(false) {
            return;
        }
        state.active[index] = false;
        if state.committed[index] {
            state.committed[index] = false;
            state.ready -= 1;
        }

        let remaining = state.active_count();
        let release = state.aborted.is_none() && state.ready > 0 && state.ready == remaining;
        if release {
            state.release();
        }
        drop(state);

        if release {
            self.released.notify_waiters();
        }
        debug!(member = index, remaining, "Member left interlock group");
    }
}

impl fmt::Debug for InterlockGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("InterlockGroup")
            .field("members", &state.active.len())
            .field("active", &state.active_count())
            .field("round", &state.round)
            .field("aborted", &state.aborted.is_some())
            .finish()
    }
}

// ============================================
// GroupMember
// ============================================

/// One member's handle on an [`InterlockGroup`]. Dropping it leaves the group.
#[derive(Debug)]
pub struct GroupMember {
    group: Arc<InterlockGroup>,
    index: usize,
}

impl GroupMember {
    /// Commits to `round` (zero-based) and waits until every active
    /// member has done the same.
    ///
    /// # Errors
    /// `GroupAborted` on barrier timeout or after an abort, `Internal` on
    /// an out-of-order call.
    pub async fn arrive(&self, round: usize) -> Result<()> {
        self.group.arrive(self.index, round).await
    }

    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub fn group(&self) -> &Arc<InterlockGroup> {
        &self.group
    }
}

impl Drop for GroupMember {
    fn drop(&mut self) {
        self.group.leave(self.index);
    }
}

// ============================================
// Tests
// ============================================
