// ============================================
// File: crates/spatialpair-node/src/services/payload.rs
// ============================================
//! # Local Payload Slot
//!
//! ## Creation Reason
//! The local payload (a sensor segment sampled while the user performs
//! the pairing gesture) is produced by an external collaborator at its
//! own pace. Verification runs wait for it here with a bounded grace
//! period instead of polling.
//!
//! ## Main Functionality
//! - `PayloadSlot::publish`: producer side, replaces the current payload
//!   and wakes every waiter
//! - `take_within` / `snapshot_within`: consumer side with a deadline
//!
//! ## ⚠️ Important Note for Next Developer
//! - The `Notified` future is created before the slot is checked, a
//!   publish between check and await is never lost
//! - `take_within` consumes, so continuous checking waits for a fresh sample
//!
//! ## Last Modified
//! v0.1.0 - Initial payload slot

use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;
use zeroize::Zeroizing;

use spatialpair_common::time::millis;

use crate::error::{PairingError, Result};

/// Single shared slot between the payload producer and verification runs.
#[derive(Debug, Default)]
pub struct PayloadSlot {
    payload: Mutex<Option<Zeroizing<Vec<u8>>>>,
    notify: Notify,
}

impl PayloadSlot {
    /// Creates an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a new payload, replacing any unconsumed one.
    pub fn publish(&self, payload: Vec<u8>) {
        let len = payload.len();
        *self.payload.lock() = Some(Zeroizing::new(payload));
        self.notify.notify_waiters();
        debug!(len, "Local payload published");
    }

    /// Drops the current payload, if any.
    pub fn clear(&self) {
        self.payload.lock().take();
    }

    /// `true` if a payload is waiting.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.payload.lock().is_some()
    }

    /// Waits up to `grace` for a payload and removes it from the slot.
    ///
    /// # Errors
    /// `PayloadTimeout` if none arrives in time.
    pub async fn take_within(&self, grace: Duration) -> Result<Vec<u8>> {
        self.wait(grace, |slot| slot.take().map(|p| p.to_vec())).await
    }

    /// Waits up to `grace` for a payload and returns a copy, leaving it
    /// in place for other runs.
    ///
    /// # Errors
    /// `PayloadTimeout` if none arrives in time.
    pub async fn snapshot_within(&self, grace: Duration) -> Result<Vec<u8>> {
        self.wait(grace, |slot| slot.as_ref().map(|p| p.to_vec())).await
    }

    async fn wait<F>(&self, grace: Duration, mut read: F) -> Result<Vec<u8>>
    where
        F: FnMut(&mut Option<Zeroizing<Vec<u8>>>) -> Option<Vec<u8>>,
    {
        let deadline = Instant::now() + grace;
        loop {
            let notified = self.notify.notified();
            let ready = {
                let mut slot = self.payload.lock();
                read(&mut *slot)
            };
            if let Some(payload) = ready {
                return Ok(payload);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(PairingError::PayloadTimeout {
                    waited_ms: millis(grace),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn test_ready_payload_returned_immediately() {
        let slot = PayloadSlot::new();
        slot.publish(vec![1, 2, 3]);
        assert!(slot.is_ready());
        assert_eq!(slot.snapshot_within(Duration::from_millis(10)).await.unwrap(), vec![1, 2, 3]);
        assert!(slot.is_ready());
        assert_eq!(slot.take_within(Duration::from_millis(10)).await.unwrap(), vec![1, 2, 3]);
        assert!(!slot.is_ready());
    }

    #[tokio::test]
    async fn test_waiter_woken_by_publish() {
        let slot = Arc::new(PayloadSlot::new());
        let waiter = {
            let slot = Arc::clone(&slot);
            tokio::spawn(async move { slot.take_within(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        slot.publish(vec![9; 64]);
        assert_eq!(waiter.await.unwrap().unwrap(), vec![9; 64]);
    }

    #[tokio::test]
    async fn test_grace_period_expires() {
        let slot = PayloadSlot::new();
        let start = Instant::now();
        let err = slot.take_within(Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, PairingError::PayloadTimeout { waited_ms: 50 }));
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_clear() {
        let slot = PayloadSlot::new();
        slot.publish(vec![1]);
        slot.clear();
        assert!(slot.take_within(Duration::from_millis(10)).await.is_err());
    }
}
