// ============================================
// File: crates/spatialpair-node/src/server.rs
// ============================================
//! # Pairing Node
//!
//! ## Creation Reason
//! Runs an orchestrator as a long-lived service: accepts inbound pairing
//! requests, opens outbound ones, and keeps the key registry tidy.
//!
//! ## Main Functionality
//! - `PairingNode`: lifecycle around one `Orchestrator`
//! - Accept loop spawning one pairing task per connection
//! - Cleanup task failing stale attempts
//! - Graceful shutdown via broadcast signal
//!
//! ## Node Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        PairingNode                          │
//! │                                                             │
//! │  ┌──────────────┐   accept   ┌──────────────────────────┐   │
//! │  │ PeerListener │──────────► │ task per connection      │   │
//! │  └──────────────┘            │  Orchestrator::accept    │   │
//! │  ┌──────────────┐  pair_with │                          │   │
//! │  │ PeerConnector│──────────► │  Orchestrator::initiate  │   │
//! │  └──────────────┘            └──────────────────────────┘   │
//! │  ┌──────────────┐                                           │
//! │  │ Cleanup Task │──► KeyManager::cleanup_stale              │
//! │  └──────────────┘                                           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Graceful shutdown waits for pairing tasks, then aborts stragglers
//! - Shutdown also stops continuous-checking runs in the orchestrator
//! - Use tokio::select! for concurrent operations
//!
//! ## Last Modified
//! v0.1.0 - Initial pairing node

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use spatialpair_common::RemoteParty;
use spatialpair_transport::{
    PeerConnector, PeerListener, TcpPeerConnector, TcpPeerListener, TransportError,
};

use crate::error::Result;
use crate::services::key_manager::PairingState;
use crate::services::{Orchestrator, VerificationOutcome};

/// How long shutdown waits for running pairing tasks.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

// ============================================
// PairingNode
// ============================================

/// A pairing service bound to a listener.
///
/// # Lifecycle
/// 1. Create with `PairingNode::new` or `PairingNode::bind_tcp`
/// 2. Start with `node.run().await`
/// 3. Stop with `node.shutdown()`
pub struct PairingNode {
    orchestrator: Arc<Orchestrator>,
    listener: Arc<dyn PeerListener>,
    connector: Arc<dyn PeerConnector>,
    /// Shutdown flag.
    shutdown: Arc<AtomicBool>,
    /// Shutdown signal sender.
    shutdown_tx: broadcast::Sender<()>,
}

impl PairingNode {
    /// Creates a node over the given listener and connector.
    #[must_use]
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        listener: Arc<dyn PeerListener>,
        connector: Arc<dyn PeerConnector>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            orchestrator,
            listener,
            connector,
            shutdown: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    /// Creates a TCP node from the orchestrator's `[network]` config.
    ///
    /// # Errors
    /// `Transport` if the listen address cannot be bound.
    pub async fn bind_tcp(orchestrator: Arc<Orchestrator>) -> Result<Self> {
        let network = orchestrator.config().network.clone();
        let listener = TcpPeerListener::bind(network.listen_addr)
            .await?
            .with_max_line_len(network.max_line_len);
        let connector = TcpPeerConnector::new(network.connect_timeout(), network.max_line_len);
        Ok(Self::new(orchestrator, Arc::new(listener), Arc::new(connector)))
    }

    #[must_use]
    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Address the listener is bound to, if any.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts pairing requests until shutdown or until the listener closes.
    ///
    /// # Errors
    /// Currently always returns `Ok`; accept failures are logged and skipped.
    pub async fn run(&self) -> Result<()> {
        info!(addr = ?self.local_addr(), "Pairing node started");
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let cleanup = self.spawn_cleanup_task();
        let mut runs = JoinSet::new();

        while !self.shutdown.load(Ordering::SeqCst) {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!("Accept loop received shutdown signal");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => {
                        let orchestrator = Arc::clone(&self.orchestrator);
                        runs.spawn(async move {
                            match orchestrator.accept(conn).await {
                                Ok(VerificationOutcome::Paired(paired)) => {
                                    debug!(remote = %paired.remote, "Inbound pairing complete");
                                }
                                Ok(VerificationOutcome::Stopped { remote, decisions }) => {
                                    debug!(remote = %remote, decisions, "Inbound checking stopped");
                                }
                                Err(e) => debug!(error = %e, "Inbound pairing failed"),
                            }
                        });
                    }
                    Err(TransportError::ListenerClosed) => {
                        info!("Listener closed");
                        break;
                    }
                    Err(e) => warn!(error = %e, "Accept failed"),
                },
                Some(done) = runs.join_next(), if !runs.is_empty() => {
                    if let Err(e) = done {
                        warn!(error = %e, "Pairing task failed");
                    }
                }
            }
        }

        info!("Shutting down pairing node...");
        self.shutdown();

        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while runs.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(remaining = runs.len(), "Pairing tasks timed out during shutdown");
            runs.abort_all();
        }

        match tokio::time::timeout(SHUTDOWN_GRACE, cleanup).await {
            Ok(Ok(())) => debug!("Cleanup task completed"),
            Ok(Err(e)) => warn!(error = %e, "Cleanup task failed"),
            Err(_) => warn!("Cleanup task timed out during shutdown"),
        }

        info!("Pairing node shutdown complete");
        Ok(())
    }

    /// Pairs with the node at `addr` as initiator.
    ///
    /// # Errors
    /// `Transport` if `addr` is unreachable, otherwise as
    /// [`Orchestrator::initiate`].
    pub async fn pair_with(
        &self,
        addr: SocketAddr,
        parameter: Option<String>,
    ) -> Result<VerificationOutcome> {
        let conn = self.connector.connect(addr).await?;
        info!(peer = %addr, "Pairing with peer");
        self.orchestrator
            .initiate(RemoteParty::new(addr), conn, parameter)
            .await
    }

    /// Triggers shutdown.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());
        self.orchestrator.shutdown();
    }

    /// Spawns the registry cleanup task.
    fn spawn_cleanup_task(&self) -> JoinHandle<()> {
        let orchestrator = Arc::clone(&self.orchestrator);
        let shutdown = Arc::clone(&self.shutdown);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let max_age = orchestrator.attempt_budget();

        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(max_age);
            interval_timer.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("Cleanup task received shutdown signal");
                        break;
                    }
                    _ = interval_timer.tick() => {
                        if shutdown.load(Ordering::SeqCst) {
                            break;
                        }

                        let keys = orchestrator.key_manager();
                        let stale = keys.cleanup_stale(max_age);
                        for remote in &stale {
                            warn!(remote = %remote, "Failed stale pairing attempt");
                        }

                        let finished: Vec<_> = keys
                            .remotes_in_state(PairingState::Verified)
                            .into_iter()
                            .chain(keys.remotes_in_state(PairingState::Failed))
                            .collect();
                        for remote in &finished {
                            keys.remove(remote);
                        }

                        debug!(
                            stale = stale.len(),
                            removed = finished.len(),
                            entries = keys.len(),
                            "Cleanup cycle complete"
                        );
                    }
                }
            }

            debug!("Cleanup task exiting");
        })
    }
}

impl std::fmt::Debug for PairingNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairingNode")
            .field("local_addr", &self.local_addr())
            .field("orchestrator", &self.orchestrator)
            .finish_non_exhaustive()
    }
}

// ============================================
// Tests
// ============================================
