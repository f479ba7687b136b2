use crate::error::TransferError;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

/// Which way a transfer moves relative to this endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// The peer is sending to us
    Inbound,
    /// We are sending to the peer
    Outbound,
}

/// Registry of transfers currently in flight.
///
/// At most one transfer per (direction, path) pair may run at a time;
/// a second request for the same pair is rejected rather than queued.
#[derive(Debug, Clone, Default)]
pub struct ActiveTransfers {
    inner: Arc<Mutex<HashSet<(Direction, String)>>>,
}

impl ActiveTransfers {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a (direction, path) slot, returning a permit that releases
    /// it when dropped.
    pub fn begin(&self, direction: Direction, path: &str) -> Result<TransferPermit, TransferError> {
        let key = (direction, path.to_owned());
        let mut active = lock(&self.inner);
        if !active.insert(key.clone()) {
            return Err(TransferError::AlreadyActive(path.to_owned()));
        }
        drop(active);
        Ok(TransferPermit {
            registry: self.inner.clone(),
            key,
        })
    }

    /// Number of transfers currently in flight.
    pub fn len(&self) -> usize {
        lock(&self.inner).len()
    }

    /// Whether no transfer is in flight.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive claim on one (direction, path) transfer slot.
///
/// Releases the slot on drop, so an aborted transfer never leaves the
/// path permanently busy.
#[derive(Debug)]
pub struct TransferPermit {
    registry: Arc<Mutex<HashSet<(Direction, String)>>>,
    key: (Direction, String),
}

impl Drop for TransferPermit {
    fn drop(&mut self) {
        lock(&self.registry).remove(&self.key);
    }
}

// A panic elsewhere must not wedge the registry, and the permit's Drop
// must never panic on a poisoned lock.
fn lock(
    registry: &Mutex<HashSet<(Direction, String)>>,
) -> MutexGuard<'_, HashSet<(Direction, String)>> {
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_claim_on_same_path_rejected() {
        let registry = ActiveTransfers::new();
        let _permit = registry.begin(Direction::Inbound, "data/a.bin").unwrap();
        let err = registry
            .begin(Direction::Inbound, "data/a.bin")
            .unwrap_err();
        assert!(matches!(err, TransferError::AlreadyActive(_)));
    }

    #[test]
    fn opposite_directions_coexist() {
        let registry = ActiveTransfers::new();
        let _in = registry.begin(Direction::Inbound, "data/a.bin").unwrap();
        let _out = registry.begin(Direction::Outbound, "data/a.bin").unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn poisoned_registry_recovers() {
        let registry = ActiveTransfers::new();
        let permit = registry.begin(Direction::Inbound, "data/p.bin").unwrap();

        let inner = registry.inner.clone();
        let _ = std::thread::spawn(move || {
            let _guard = inner.lock().unwrap();
            panic!("poison the registry lock");
        })
        .join();

        drop(permit);
        assert!(registry.is_empty());
        registry.begin(Direction::Inbound, "data/p.bin").unwrap();
    }

    #[test]
    fn drop_releases_slot() {
        let registry = ActiveTransfers::new();
        let permit = registry.begin(Direction::Outbound, "data/b.bin").unwrap();
        drop(permit);
        assert!(registry.is_empty());
        registry.begin(Direction::Outbound, "data/b.bin").unwrap();
    }
}
