//! Peer registry: id → handle table shared between the accept/read tasks and the
//! public send API of a server.

use parking_lot::Mutex;

use crate::peer::PeerId;

struct Entry<H> {
    id: PeerId,
    handle: H,
}

/// Thread-safe list of peers. One coarse lock guards the whole table and every
/// method takes it exactly once, so each operation is atomic to other callers.
/// Lookups are linear; the table holds the handful of peers one server talks to.
pub struct Registry<H> {
    entries: Mutex<Vec<Entry<H>>>,
}

impl<H: Clone> Registry<H> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Insert `handle` under `id`, or replace the handle already stored there.
    pub fn add_or_update(&self, id: PeerId, handle: H) {
        let mut entries = self.entries.lock();
        match entries.iter_mut().find(|e| e.id == id) {
            Some(entry) => entry.handle = handle,
            None => entries.push(Entry { id, handle }),
        }
    }

    /// Storage index and handle for `id`.
    pub fn get(&self, id: PeerId) -> Option<(usize, H)> {
        self.entries
            .lock()
            .iter()
            .enumerate()
            .find(|(_, e)| e.id == id)
            .map(|(i, e)| (i, e.handle.clone()))
    }

    /// Ids in storage order. Deletions swap the last entry into the freed slot, so
    /// the order is insertion order only until the first delete.
    pub fn ids(&self) -> Vec<PeerId> {
        self.entries.lock().iter().map(|e| e.id).collect()
    }

    /// Snapshot of every entry, in storage order.
    pub fn handles(&self) -> Vec<(PeerId, H)> {
        self.entries
            .lock()
            .iter()
            .map(|e| (e.id, e.handle.clone()))
            .collect()
    }

    pub fn exist(&self, id: PeerId) -> bool {
        self.entries.lock().iter().any(|e| e.id == id)
    }

    /// First id whose handle satisfies `pred`.
    pub fn find_id<F>(&self, mut pred: F) -> Option<PeerId>
    where
        F: FnMut(&H) -> bool,
    {
        self.entries
            .lock()
            .iter()
            .find(|e| pred(&e.handle))
            .map(|e| e.id)
    }

    /// Remove `id` (swap-remove) and return its handle. No-op when absent.
    pub fn delete(&self, id: PeerId) -> Option<H> {
        let mut entries = self.entries.lock();
        let index = entries.iter().position(|e| e.id == id)?;
        Some(entries.swap_remove(index).handle)
    }

    pub fn reset(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl<H: Clone> Default for Registry<H> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn filled(n: u64) -> Registry<String> {
        let r = Registry::new();
        for i in 1..=n {
            r.add_or_update(PeerId(i), format!("peer-{i}"));
        }
        r
    }

    #[test]
    fn add_or_update_keeps_single_entry() {
        let r = Registry::new();
        r.add_or_update(PeerId(7), "a");
        r.add_or_update(PeerId(7), "b");
        assert_eq!(r.len(), 1);
        assert_eq!(r.ids(), vec![PeerId(7)]);
        assert_eq!(r.get(PeerId(7)), Some((0, "b")));
    }

    #[test]
    fn get_absent_is_none() {
        let r = filled(2);
        assert_eq!(r.get(PeerId(99)), None);
        assert!(!r.exist(PeerId(99)));
    }

    #[test]
    fn ids_follow_insertion_order() {
        let r = filled(4);
        assert_eq!(r.ids(), vec![PeerId(1), PeerId(2), PeerId(3), PeerId(4)]);
    }

    #[test]
    fn delete_removes_one_and_swaps_last_in() {
        let r = filled(4);
        assert_eq!(r.delete(PeerId(2)), Some("peer-2".to_string()));
        assert!(!r.exist(PeerId(2)));
        assert_eq!(r.ids(), vec![PeerId(1), PeerId(4), PeerId(3)]);
        assert_eq!(r.get(PeerId(4)).map(|(i, _)| i), Some(1));
    }

    #[test]
    fn delete_absent_is_noop() {
        let r = filled(3);
        assert_eq!(r.delete(PeerId(42)), None);
        assert_eq!(r.len(), 3);
    }

    #[test]
    fn reset_clears_everything() {
        let r = filled(5);
        r.reset();
        assert!(r.ids().is_empty());
        assert!(r.is_empty());
        r.reset();
        assert!(r.is_empty());
    }

    #[test]
    fn find_id_by_handle() {
        let r = filled(3);
        assert_eq!(r.find_id(|h| h == "peer-3"), Some(PeerId(3)));
        assert_eq!(r.find_id(|h| h == "nobody"), None);
    }

    #[test]
    fn concurrent_writers_keep_ids_unique() {
        let r: Arc<Registry<u64>> = Arc::new(Registry::new());
        let threads: Vec<_> = (0..8u64)
            .map(|t| {
                let r = r.clone();
                std::thread::spawn(move || {
                    for i in 0..200u64 {
                        let id = PeerId(t * 1000 + i % 50);
                        r.add_or_update(id, i);
                        if i % 3 == 0 {
                            r.delete(id);
                        }
                        let _ = r.ids();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        let ids = r.ids();
        let unique: HashSet<_> = ids.iter().copied().collect();
        assert_eq!(unique.len(), ids.len());
        assert!(ids.len() <= 8 * 50);
    }
}
