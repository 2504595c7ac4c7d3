use formsync_common::RemoteIndex;
use std::collections::{BTreeMap, BTreeSet};

/// Errors from remote/local id translation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdMapError {
    #[error("remote index {0} already has a local slot")]
    AlreadyAllocated(RemoteIndex),
    #[error("remote index {0} has no local slot")]
    UnknownRemoteId(RemoteIndex),
    #[error("the player sentinel cannot be allocated")]
    Reserved,
}

/// Bijection between server-assigned remote indices and dense local slots.
///
/// Freed slots are handed out again, lowest first, before the slot space
/// grows. The slot space itself shrinks when its tail is freed, mirroring
/// how the world model trims its trailing empties.
#[derive(Debug, Clone, Default)]
pub struct IdentifierMap {
    slot_by_remote: BTreeMap<RemoteIndex, usize>,
    remote_by_slot: Vec<Option<RemoteIndex>>,
    free: BTreeSet<usize>,
}

impl IdentifierMap {
    pub const fn new() -> Self {
        Self {
            slot_by_remote: BTreeMap::new(),
            remote_by_slot: Vec::new(),
            free: BTreeSet::new(),
        }
    }

    /// Assign the lowest free local slot to `remote`.
    pub fn allocate(&mut self, remote: RemoteIndex) -> Result<usize, IdMapError> {
        if remote.is_player() {
            return Err(IdMapError::Reserved);
        }
        if self.slot_by_remote.contains_key(&remote) {
            return Err(IdMapError::AlreadyAllocated(remote));
        }
        let slot = match self.free.pop_first() {
            Some(slot) => slot,
            None => {
                self.remote_by_slot.push(None);
                self.remote_by_slot.len() - 1
            }
        };
        self.remote_by_slot[slot] = Some(remote);
        self.slot_by_remote.insert(remote, slot);
        tracing::trace!(%remote, slot, "allocated local slot");
        Ok(slot)
    }

    pub fn get(&self, remote: RemoteIndex) -> Result<usize, IdMapError> {
        self.slot_by_remote
            .get(&remote)
            .copied()
            .ok_or(IdMapError::UnknownRemoteId(remote))
    }

    /// Release the slot held by `remote`. Unknown indices are ignored.
    pub fn free(&mut self, remote: RemoteIndex) -> Option<usize> {
        let slot = self.slot_by_remote.remove(&remote)?;
        self.remote_by_slot[slot] = None;
        self.free.insert(slot);
        while let Some(None) = self.remote_by_slot.last() {
            let tail = self.remote_by_slot.len() - 1;
            self.remote_by_slot.pop();
            self.free.remove(&tail);
        }
        tracing::trace!(%remote, slot, "freed local slot");
        Some(slot)
    }

    /// Remote index currently holding `slot`.
    pub fn remote_of(&self, slot: usize) -> Option<RemoteIndex> {
        self.remote_by_slot.get(slot).copied().flatten()
    }

    /// Number of allocated pairs.
    pub fn len(&self) -> usize {
        self.slot_by_remote.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slot_by_remote.is_empty()
    }

    /// Size of the slot space including freed gaps.
    pub fn slot_space(&self) -> usize {
        self.remote_by_slot.len()
    }

    pub fn clear(&mut self) {
        self.slot_by_remote.clear();
        self.remote_by_slot.clear();
        self.free.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_allocation_is_slot_zero() {
        let mut ids = IdentifierMap::new();
        assert_eq!(ids.allocate(RemoteIndex(1000)), Ok(0));
        assert_eq!(ids.allocate(RemoteIndex(7)), Ok(1));
        assert_eq!(ids.get(RemoteIndex(1000)), Ok(0));
        assert_eq!(ids.remote_of(1), Some(RemoteIndex(7)));
    }

    #[test]
    fn double_allocation_fails() {
        let mut ids = IdentifierMap::new();
        ids.allocate(RemoteIndex(3)).unwrap();
        assert_eq!(
            ids.allocate(RemoteIndex(3)),
            Err(IdMapError::AlreadyAllocated(RemoteIndex(3)))
        );
    }

    #[test]
    fn player_sentinel_is_reserved() {
        let mut ids = IdentifierMap::new();
        assert_eq!(ids.allocate(RemoteIndex::PLAYER), Err(IdMapError::Reserved));
        assert!(ids.is_empty());
    }

    #[test]
    fn unknown_lookup_fails() {
        let ids = IdentifierMap::new();
        assert_eq!(
            ids.get(RemoteIndex(42)),
            Err(IdMapError::UnknownRemoteId(RemoteIndex(42)))
        );
    }

    #[test]
    fn freed_slots_reused_lowest_first() {
        let mut ids = IdentifierMap::new();
        for r in 0..5 {
            ids.allocate(RemoteIndex(r)).unwrap();
        }
        ids.free(RemoteIndex(3));
        ids.free(RemoteIndex(1));
        assert_eq!(ids.slot_space(), 5);
        assert_eq!(ids.allocate(RemoteIndex(10)), Ok(1));
        assert_eq!(ids.allocate(RemoteIndex(11)), Ok(3));
        assert_eq!(ids.allocate(RemoteIndex(12)), Ok(5));
    }

    #[test]
    fn free_is_idempotent() {
        let mut ids = IdentifierMap::new();
        ids.allocate(RemoteIndex(9)).unwrap();
        assert_eq!(ids.free(RemoteIndex(9)), Some(0));
        assert_eq!(ids.free(RemoteIndex(9)), None);
        assert_eq!(ids.free(RemoteIndex(12345)), None);
        assert!(ids.is_empty());
    }

    #[test]
    fn freeing_tail_shrinks_slot_space() {
        let mut ids = IdentifierMap::new();
        for r in 0..3 {
            ids.allocate(RemoteIndex(r)).unwrap();
        }
        ids.free(RemoteIndex(1));
        ids.free(RemoteIndex(2));
        assert_eq!(ids.slot_space(), 1);
        assert_eq!(ids.allocate(RemoteIndex(20)), Ok(1));
    }

    #[test]
    fn freed_id_can_be_allocated_again() {
        let mut ids = IdentifierMap::new();
        ids.allocate(RemoteIndex(1000)).unwrap();
        ids.free(RemoteIndex(1000));
        assert_eq!(ids.allocate(RemoteIndex(1000)), Ok(0));
    }
}
