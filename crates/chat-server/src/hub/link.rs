//! Outbound side of a live connection as seen by the hub.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

/// Identifies one transport connection. A reconnecting user gets a new id,
/// so a late detach from an old socket can be told apart from the current one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Allocate a fresh id.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn_{}", self.0.simple())
    }
}

/// One item on a client's outbound queue.
///
/// Frames are encoded once and shared between every recipient.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outgoing {
    /// A single encoded envelope.
    Frame(Arc<String>),
    /// History replay, written back-to-back. Occupies one queue slot no
    /// matter how long the history is.
    Batch(Vec<Arc<String>>),
}

impl Outgoing {
    /// Number of text frames this item expands to.
    pub fn frame_count(&self) -> usize {
        match self {
            Self::Frame(_) => 1,
            Self::Batch(frames) => frames.len(),
        }
    }
}

/// Sender half handed to the hub on attach.
pub type OutboundSender = mpsc::Sender<Outgoing>;

/// Receiver half kept by the connection adapter.
pub type OutboundReceiver = mpsc::Receiver<Outgoing>;

/// Create a bounded outbound queue.
pub fn outbound_queue(capacity: usize) -> (OutboundSender, OutboundReceiver) {
    mpsc::channel(capacity.max(1))
}

/// The hub's handle on an attached connection. Dropping it closes the queue,
/// which ends the adapter's outbound pump and closes the socket.
#[derive(Debug)]
pub struct Link {
    conn: ConnectionId,
    outbound: OutboundSender,
}

impl Link {
    /// Bind a connection id to its outbound queue.
    pub fn new(conn: ConnectionId, outbound: OutboundSender) -> Self {
        Self { conn, outbound }
    }

    /// Connection id of this link.
    pub fn conn(&self) -> ConnectionId {
        self.conn
    }

    /// Enqueue without waiting. `false` means the queue is full or closed,
    /// and the caller must treat the connection as gone.
    pub fn deliver(&self, item: Outgoing) -> bool {
        self.outbound.try_send(item).is_ok()
    }
}
