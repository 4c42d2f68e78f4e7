//! The transport capability the replication core is built on (spec §9,
//! "Tagged variants vs polymorphism" — `{ open, close, send, recv, name,
//! msg_size, param_set, param_get, status_get }`), plus a self-contained
//! loopback implementation for tests.

use async_trait::async_trait;
use tokio::sync::mpsc;

use gcs_wire::{ComponentMessage, GcsError, MemberId};

/// One message as delivered by a transport, tagged by wire type.
#[derive(Debug, Clone)]
pub enum TransportMessage {
    Action { sender: MemberId, payload: Vec<u8> },
    Last { sender: MemberId, payload: Vec<u8> },
    Vote { sender: MemberId, payload: Vec<u8> },
    Join { sender: MemberId, payload: Vec<u8> },
    Sync { sender: MemberId, payload: Vec<u8> },
    Flow { sender: MemberId, payload: Vec<u8> },
    Component(ComponentMessage),
    StateUuid { sender: MemberId, uuid: [u8; 16] },
    StateMsg { sender: MemberId, payload: Vec<u8> },
    Causal(u64),
}

/// Capability set a replication core needs from the underlying backend.
///
/// Modeled as a trait object rather than a closed enum because production
/// backends (TCP, UDP multicast, a cluster's internal bus) and the loopback
/// test double below genuinely differ in implementation, not just payload.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Opens a connection for the given logical channel name.
    ///
    /// # Errors
    ///
    /// Returns [`GcsError::NotConnected`] if the backend is unreachable.
    async fn open(&self, channel: &str, url: &str, bootstrap: bool) -> Result<(), GcsError>;

    /// Closes the connection. Idempotent.
    async fn close(&self) -> Result<(), GcsError>;

    /// Sends one already-framed wire message (type tag plus payload are the
    /// caller's responsibility; this only moves bytes) atomically: a backend
    /// delivers the whole message or fails the call, never a prefix of it.
    /// The returned count is peers the message was delivered to, not bytes
    /// written, so callers have no partial-write byte count to roll back to
    /// on failure.
    ///
    /// # Errors
    ///
    /// Returns [`GcsError::Again`] on transient backpressure,
    /// [`GcsError::NotConnected`] if the peer set is empty.
    async fn send(&self, msg: TransportMessage) -> Result<usize, GcsError>;

    /// Blocks until the next message arrives.
    ///
    /// # Errors
    ///
    /// Returns [`GcsError::NotConnected`] if the transport has been closed.
    async fn recv(&self) -> Result<TransportMessage, GcsError>;

    fn name(&self) -> &str;

    /// Maximum payload size this backend supports per message.
    fn msg_size(&self) -> usize;

    /// # Errors
    ///
    /// Returns [`GcsError::UnknownParam`] if `key` is not recognized.
    fn param_set(&self, key: &str, value: &str) -> Result<(), GcsError>;

    /// # Errors
    ///
    /// Returns [`GcsError::UnknownParam`] if `key` is not recognized.
    fn param_get(&self, key: &str) -> Result<String, GcsError>;

    fn status_get(&self) -> String;
}

/// An in-process transport that loops every sent message back to every
/// other loopback instance sharing the same channel, for self-contained
/// tests that don't need a real network.
pub struct LoopbackTransport {
    name: String,
    inbox_tx: mpsc::UnboundedSender<TransportMessage>,
    inbox_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<TransportMessage>>,
    peers: tokio::sync::RwLock<Vec<mpsc::UnboundedSender<TransportMessage>>>,
}

impl LoopbackTransport {
    #[must_use]
    pub fn new(name: impl Into<String>) -> std::sync::Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        std::sync::Arc::new(Self {
            name: name.into(),
            inbox_tx: tx,
            inbox_rx: tokio::sync::Mutex::new(rx),
            peers: tokio::sync::RwLock::new(Vec::new()),
        })
    }

    /// Connects two loopback transports so each sees the other's traffic
    /// (and its own, matching a real broadcast transport). Linking an
    /// instance to itself (the single-member component case) registers it
    /// as its own sole peer exactly once.
    pub async fn link(a: &std::sync::Arc<Self>, b: &std::sync::Arc<Self>) {
        if std::sync::Arc::ptr_eq(a, b) {
            a.peers.write().await.push(a.inbox_tx.clone());
            return;
        }
        a.peers.write().await.push(b.inbox_tx.clone());
        a.peers.write().await.push(a.inbox_tx.clone());
        b.peers.write().await.push(a.inbox_tx.clone());
        b.peers.write().await.push(b.inbox_tx.clone());
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn open(&self, _channel: &str, _url: &str, _bootstrap: bool) -> Result<(), GcsError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), GcsError> {
        Ok(())
    }

    async fn send(&self, msg: TransportMessage) -> Result<usize, GcsError> {
        let peers = self.peers.read().await;
        if peers.is_empty() {
            return Err(GcsError::NotConnected);
        }
        let mut sent = 0;
        for peer in peers.iter() {
            if peer.send(msg.clone()).is_ok() {
                sent += 1;
            }
        }
        Ok(sent)
    }

    async fn recv(&self) -> Result<TransportMessage, GcsError> {
        let mut rx = self.inbox_rx.lock().await;
        rx.recv().await.ok_or(GcsError::NotConnected)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn msg_size(&self) -> usize {
        64 * 1024
    }

    fn param_set(&self, key: &str, _value: &str) -> Result<(), GcsError> {
        Err(GcsError::UnknownParam(key.to_string()))
    }

    fn param_get(&self, key: &str) -> Result<String, GcsError> {
        Err(GcsError::UnknownParam(key.to_string()))
    }

    fn status_get(&self) -> String {
        "loopback: connected".to_string()
    }
}
