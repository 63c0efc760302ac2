//! Receiver-side bookkeeping of live inbound connections.
//!
//! The registry is the only state shared across connection handler tasks. It
//! is injected into every handler at construction rather than reached through
//! a global, and it maps each connection to the sender side of that handler's
//! outbound mailbox so any handler can broadcast to the rest.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc;

/// Opaque identifier of one accepted connection.
pub type ConnectionId = u64;

/// Commands delivered to a handler's outbound mailbox. Because the mailbox is
/// drained by the single task owning the socket, a `Line` queued before a
/// `Close` is written out before the connection drops.
#[derive(Debug)]
pub enum PeerCommand {
    /// Write one line to the peer.
    Line(String),
    /// Close the connection.
    Close,
}

/// Thread-safe set of currently open inbound connections.
///
/// A connection is present exactly while its handler is attached: inserted on
/// attach, removed on detach. Removal is idempotent.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    peers: Mutex<HashMap<ConnectionId, mpsc::Sender<PeerCommand>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out a fresh connection id.
    pub fn allocate_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn insert(&self, id: ConnectionId, peer: mpsc::Sender<PeerCommand>) {
        self.lock().insert(id, peer);
    }

    /// Remove a connection. Returns whether it was present; removing a
    /// non-member is a no-op.
    pub fn remove(&self, id: ConnectionId) -> bool {
        self.lock().remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Snapshot of every registered connection, taken under the lock and
    /// iterated outside it. Broadcast order is unspecified.
    pub fn peers(&self) -> Vec<(ConnectionId, mpsc::Sender<PeerCommand>)> {
        self.lock()
            .iter()
            .map(|(id, peer)| (*id, peer.clone()))
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ConnectionId, mpsc::Sender<PeerCommand>>> {
        // A poisoned lock only means another handler panicked mid-update;
        // the map itself is still usable.
        self.peers.lock().unwrap_or_else(|err| err.into_inner())
    }
}
