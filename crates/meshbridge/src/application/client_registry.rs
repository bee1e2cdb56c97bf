//! ClientRegistry: the set of currently connected TCP clients.
//!
//! The registry is the only piece of state that more than one task mutates:
//!
//! - the listener adds clients as they connect,
//! - client sessions remove themselves when their socket closes,
//! - the uplink pump iterates every client to broadcast a frame.
//!
//! All three go through one `tokio::sync::Mutex`, so a broadcast never sees a
//! half-removed client and an add is never lost during iteration.
//!
//! # Client lifecycle (for beginners)
//!
//! ```text
//! accept ──► ClientHandle::new ──► register ──► broadcast* ──► unregister
//!                  │                                   │
//!                  └─ ClientOutbound (session writer)  └─ evicted on failure
//! ```
//!
//! A [`ClientHandle`] is the registry's half of a client: the sending end of
//! its outbound queue and a liveness flag.  The matching [`ClientOutbound`] is
//! owned by the client's writer task, which drains the queue onto the socket.
//! Dropping the handle (unregister, eviction, shutdown) closes the queue, so
//! the writer finishes what is queued and exits.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use meshbridge_core::{encode_frame, Frame};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

/// Unique identifier for one client connection.
pub type ClientId = Uuid;

/// Errors returned by [`ClientRegistry::register`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The configured client cap has been reached.
    #[error("client limit of {limit} reached")]
    Full { limit: usize },
}

/// Summary of one [`ClientRegistry::broadcast`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastOutcome {
    /// Clients that received the frame in their outbound queue.
    pub delivered: usize,
    /// Clients removed because they could not take the frame.
    pub evicted: usize,
}

/// Why a frame could not be queued for a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeliveryFailure {
    /// The writer task has exited (socket closed or write failed).
    Closed,
    /// The outbound queue is full: the client is not keeping up.
    QueueFull,
}

impl DeliveryFailure {
    fn as_str(self) -> &'static str {
        match self {
            DeliveryFailure::Closed => "connection closed",
            DeliveryFailure::QueueFull => "outbound queue full",
        }
    }
}

// ── Client handle ─────────────────────────────────────────────────────────────

/// The registry's view of one connected client.
#[derive(Debug)]
pub struct ClientHandle {
    id: ClientId,
    peer_addr: SocketAddr,
    outbound: mpsc::Sender<Bytes>,
    alive: Arc<AtomicBool>,
}

impl ClientHandle {
    /// Creates a handle and the matching outbound queue receiver.
    ///
    /// `queue_depth` is the number of encoded frames that may be waiting for
    /// the socket before the client is treated as too slow.
    pub fn new(peer_addr: SocketAddr, queue_depth: usize) -> (Self, ClientOutbound) {
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        let alive = Arc::new(AtomicBool::new(true));
        let handle = Self {
            id: Uuid::new_v4(),
            peer_addr,
            outbound: tx,
            alive: Arc::clone(&alive),
        };
        let outbound = ClientOutbound { queue: rx, alive };
        (handle, outbound)
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// `false` once the client's writer has given up on the socket.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Queues an encoded frame without waiting.
    fn try_deliver(&self, bytes: &Bytes) -> Result<(), DeliveryFailure> {
        if !self.is_alive() {
            return Err(DeliveryFailure::Closed);
        }
        self.outbound.try_send(bytes.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryFailure::QueueFull,
            mpsc::error::TrySendError::Closed(_) => DeliveryFailure::Closed,
        })
    }
}

/// The writer task's half of a client: encoded frames waiting for the socket.
#[derive(Debug)]
pub struct ClientOutbound {
    queue: mpsc::Receiver<Bytes>,
    alive: Arc<AtomicBool>,
}

impl ClientOutbound {
    /// Waits for the next encoded frame.  Returns `None` once the registry has
    /// dropped the client's handle and the queue is empty.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.queue.recv().await
    }

    /// Clears the liveness flag after a socket write failure, so the next
    /// broadcast evicts the client instead of queueing more frames for it.
    pub fn mark_dead(&self) {
        self.alive.store(false, Ordering::Release);
    }
}

// ── Registry ──────────────────────────────────────────────────────────────────

/// Mutex-protected set of connected clients.
///
/// Owned by the bridge coordinator; its lifetime is that of one bridge run.
#[derive(Debug)]
pub struct ClientRegistry {
    clients: Mutex<HashMap<ClientId, ClientHandle>>,
    max_clients: Option<usize>,
}

impl ClientRegistry {
    /// Creates an empty registry.  `max_clients = None` means no cap.
    pub fn new(max_clients: Option<usize>) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            max_clients,
        }
    }

    /// Adds a client and returns the new client count.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Full`] if the client cap has been reached.  The
    /// check and the insert happen under the same lock.
    pub async fn register(&self, handle: ClientHandle) -> Result<usize, RegistryError> {
        let mut clients = self.clients.lock().await;
        if let Some(limit) = self.max_clients {
            if clients.len() >= limit {
                return Err(RegistryError::Full { limit });
            }
        }
        debug!("registering client {} ({})", handle.id, handle.peer_addr);
        clients.insert(handle.id, handle);
        Ok(clients.len())
    }

    /// Removes a client.  Returns `false` if it was already gone (for example
    /// evicted by a broadcast).
    pub async fn unregister(&self, id: ClientId) -> bool {
        self.clients.lock().await.remove(&id).is_some()
    }

    /// Encodes `frame` once and queues the same bytes for every client.
    ///
    /// A client that cannot take the frame is removed and logged; every other
    /// client still receives it, and nothing is reported to the caller as an
    /// error.
    pub async fn broadcast(&self, frame: &Frame) -> BroadcastOutcome {
        let bytes = encode_frame(frame);
        let mut clients = self.clients.lock().await;

        let mut evicted = 0;
        clients.retain(|id, handle| match handle.try_deliver(&bytes) {
            Ok(()) => true,
            Err(failure) => {
                warn!(
                    "evicting client {id} ({}): {}",
                    handle.peer_addr,
                    failure.as_str()
                );
                evicted += 1;
                false
            }
        });

        BroadcastOutcome {
            delivered: clients.len(),
            evicted,
        }
    }

    /// Number of registered clients.
    pub async fn len(&self) -> usize {
        self.clients.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.lock().await.is_empty()
    }

    /// IDs of every registered client.
    pub async fn client_ids(&self) -> Vec<ClientId> {
        self.clients.lock().await.keys().copied().collect()
    }

    /// Drops every handle, closing all outbound queues.  Used at shutdown.
    pub async fn close_all(&self) -> usize {
        let mut clients = self.clients.lock().await;
        let count = clients.len();
        clients.clear();
        count
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
