//! Connection registry: the set of clients currently assumed reachable.
//!
//! Membership is optimistic: a handle stays registered until its owner
//! disconnects or a delivery to it fails (see [`super::dispatcher`]).

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{RwLock, mpsc, watch};
use tracing::debug;

/// A unique ID assigned to each connected WebSocket client.
pub type ClientId = u64;

/// A serialized text frame queued for a client's writer task.
pub type Frame = Arc<str>;

/// Why a frame could not be handed to a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("client channel closed")]
    Closed,

    #[error("client did not accept the frame within {0:?}")]
    Timeout(Duration),
}

/// Identity plus send capability for one live client.  The connection's
/// writer task owns the receiving half and the socket sink.
///
/// Every clone shares one close signal, fired when the client leaves the
/// registry so its session can shut down.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    id: ClientId,
    tx: mpsc::Sender<Frame>,
    closed: Arc<watch::Sender<bool>>,
}

impl ClientHandle {
    pub fn new(id: ClientId, tx: mpsc::Sender<Frame>) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            id,
            tx,
            closed: Arc::new(closed),
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Fire the close signal. Idempotent.
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Receiver that flips to `true` once [`ClientHandle::close`] runs. It
    /// does not keep the frame channel open.
    pub fn close_signal(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }

    /// Queue a frame for this client, waiting at most `timeout` for room in
    /// its outbound buffer.
    pub async fn send(&self, frame: Frame, timeout: Duration) -> Result<(), DeliveryError> {
        self.tx.send_timeout(frame, timeout).await.map_err(|e| match e {
            mpsc::error::SendTimeoutError::Closed(_) => DeliveryError::Closed,
            mpsc::error::SendTimeoutError::Timeout(_) => DeliveryError::Timeout(timeout),
        })
    }
}

impl PartialEq for ClientHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ClientHandle {}

impl Hash for ClientHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Process-wide set of registered clients keyed by [`ClientId`].
#[derive(Debug)]
pub struct Registry {
    clients: RwLock<HashMap<ClientId, ClientHandle>>,
    next_id: AtomicU64,
}

impl Registry {
    /// Create a new, empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Allocate a fresh client id. Ids are never reused.
    pub fn next_client_id(&self) -> ClientId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Build a handle with a bounded outbound channel and return it together
    /// with the receiving half for the writer task. The handle is not
    /// registered yet.
    pub fn open(&self, buffer: usize) -> (ClientHandle, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (ClientHandle::new(self.next_client_id(), tx), rx)
    }

    /// Insert a handle. Adding an id that is already present keeps the
    /// existing entry.
    pub async fn add(&self, handle: ClientHandle) {
        let id = handle.id();
        let mut clients = self.clients.write().await;
        clients.entry(id).or_insert(handle);
        debug!(client_id = id, active_connections = clients.len(), "client registered");
    }

    /// Remove a client and fire its close signal. Returns whether it was
    /// present; removing an absent id is a no-op.
    pub async fn remove(&self, client_id: ClientId) -> bool {
        let mut clients = self.clients.write().await;
        match clients.remove(&client_id) {
            Some(handle) => {
                handle.close();
                debug!(client_id, active_connections = clients.len(), "client unregistered");
                true
            }
            None => false,
        }
    }

    /// Point-in-time copy of all registered handles. Later `add`/`remove`
    /// calls do not affect the returned vector.
    pub async fn snapshot(&self) -> Vec<ClientHandle> {
        self.clients.read().await.values().cloned().collect()
    }

    /// Number of registered clients.
    pub async fn count(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn contains(&self, client_id: ClientId) -> bool {
        self.clients.read().await.contains_key(&client_id)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
