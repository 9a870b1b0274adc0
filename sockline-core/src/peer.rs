//! Peer identity: synthetic ids handed out per server, fixed id on the client side.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Handle identifying one peer for as long as it stays registered.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct PeerId(pub u64);

impl PeerId {
    /// The id a client reports for its own (single) connection.
    pub const CLIENT: PeerId = PeerId(1);

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for PeerId {
    fn from(v: u64) -> Self {
        PeerId(v)
    }
}

/// Monotonic id source. Ids are never reused by the same sequence, so a stale id
/// can't alias a newer peer.
#[derive(Debug)]
pub struct PeerIdSequence {
    next: AtomicU64,
}

impl PeerIdSequence {
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> PeerId {
        PeerId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for PeerIdSequence {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn sequence_starts_at_one_and_increments() {
        let seq = PeerIdSequence::new();
        assert_eq!(seq.next_id(), PeerId(1));
        assert_eq!(seq.next_id(), PeerId(2));
        assert_eq!(seq.next_id(), PeerId(3));
    }

    #[test]
    fn concurrent_ids_never_collide() {
        let seq = Arc::new(PeerIdSequence::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let seq = seq.clone();
                std::thread::spawn(move || (0..500).map(|_| seq.next_id()).collect::<Vec<_>>())
            })
            .collect();
        let mut seen = HashSet::new();
        for h in handles {
            for id in h.join().unwrap() {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(seen.len(), 4000);
    }
}
