//! Event sink contract: how clients and servers report peer lifecycle and data.

use std::future::Future;

use crate::peer::PeerId;

/// Callbacks driven by the read loops. Each peer's loop awaits its callbacks in
/// order, so a callback that waits (for instance on a full queue) holds back further
/// reads from that peer only.
pub trait Handler: Send + Sync + 'static {
    /// A peer connected, or (datagram transports) sent a datagram.
    fn connected(&self, id: PeerId) -> impl Future<Output = ()> + Send;

    /// One complete frame, delimiter stripped.
    fn received(&self, id: PeerId, payload: Vec<u8>) -> impl Future<Output = ()> + Send;

    /// The peer's read loop ended.
    fn disconnected(&self, id: PeerId) -> impl Future<Output = ()> + Send;
}

/// A received payload, tagged with its sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: PeerId,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    /// Not produced by the transports; available to consumers that fold their own
    /// failures into the same stream.
    Error,
}

/// Lifecycle notification for one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub id: PeerId,
    pub kind: EventKind,
}

impl Event {
    pub fn connected(id: PeerId) -> Self {
        Self {
            id,
            kind: EventKind::Connected,
        }
    }

    pub fn disconnected(id: PeerId) -> Self {
        Self {
            id,
            kind: EventKind::Disconnected,
        }
    }

    pub fn error(id: PeerId) -> Self {
        Self {
            id,
            kind: EventKind::Error,
        }
    }
}
