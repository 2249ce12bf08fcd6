//! Open-handle bookkeeping: file and directory handles the kernel keeps
//! a `u64` reference to between `open`/`opendir` and `release`/
//! `releasedir`.
//!
//! The handle table itself has nothing to do with the inode table or
//! mount boundaries; the dispatcher pairs a stored handle with the mount
//! busy-counter bump/decrement when it opens or releases one.

use dashmap::mapref::entry::Entry;
use dashmap::mapref::one::{Ref, RefMut};
use dashmap::DashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe handle table with auto-incrementing `u64` keys.
///
/// IDs start at 1; 0 is reserved so it can double as "no handle" in
/// callers that store handle ids in a `u64` field with a default.
#[derive(Debug)]
pub struct HandleTable<K, V>
where
    K: Eq + Hash,
{
    handles: DashMap<K, V>,
    next_id: Option<AtomicU64>,
}

impl<V> HandleTable<u64, V> {
    pub fn new_auto_id() -> Self {
        Self {
            handles: DashMap::new(),
            next_id: Some(AtomicU64::new(1)),
        }
    }

    /// Inserts `value` under a freshly allocated id and returns it.
    pub fn insert_auto(&self, value: V) -> u64 {
        let next_id = self
            .next_id
            .as_ref()
            .expect("insert_auto requires new_auto_id");
        let mut value = Some(value);
        loop {
            let id = next_id
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                    Some(current.checked_add(1).unwrap_or(1))
                })
                .expect("fetch_update always succeeds");
            if id == 0 {
                continue;
            }
            if let Entry::Vacant(entry) = self.handles.entry(id) {
                entry.insert(value.take().expect("value already inserted"));
                return id;
            }
        }
    }
}

impl<K, V> HandleTable<K, V>
where
    K: Eq + Hash,
{
    pub fn get(&self, key: &K) -> Option<Ref<'_, K, V>> {
        self.handles.get(key)
    }

    pub fn get_mut(&self, key: &K) -> Option<RefMut<'_, K, V>> {
        self.handles.get_mut(key)
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.handles.remove(key).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl<V> Default for HandleTable<u64, V> {
    fn default() -> Self {
        Self::new_auto_id()
    }
}

/// A held file handle plus the `NodeId` it was opened against, so
/// `release` can find the owning mount without a second path
/// resolution.
pub struct OpenFile {
    pub node_id: u64,
    pub handle: Box<dyn crate::backend::FileHandle>,
}

/// A held directory stream, snapshotted eagerly at `opendir` time since
/// the connector does not stream backend readdir results incrementally.
pub struct OpenDir {
    pub node_id: u64,
    pub entries: Vec<crate::backend::DirEntry>,
}

/// The two handle tables the dispatcher consults, bundled together since
/// every mount/unmount path needs both kept in sync with its busy
/// counters.
#[derive(Default)]
pub struct HandleTables {
    pub files: HandleTable<u64, OpenFile>,
    pub dirs: HandleTable<u64, OpenDir>,
}

impl HandleTables {
    pub fn new() -> Self {
        Self {
            files: HandleTable::new_auto_id(),
            dirs: HandleTable::new_auto_id(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_ids_start_at_one_and_never_repeat() {
        let table: HandleTable<u64, &str> = HandleTable::new_auto_id();
        let a = table.insert_auto("a");
        let b = table.insert_auto("b");
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert_ne!(a, b);
    }

    #[test]
    fn remove_returns_value_and_frees_slot() {
        let table: HandleTable<u64, &str> = HandleTable::new_auto_id();
        let id = table.insert_auto("a");
        assert_eq!(table.remove(&id), Some("a"));
        assert_eq!(table.remove(&id), None);
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn get_mut_allows_in_place_update() {
        let table: HandleTable<u64, i32> = HandleTable::new_auto_id();
        let id = table.insert_auto(1);
        *table.get_mut(&id).unwrap() = 2;
        assert_eq!(*table.get(&id).unwrap(), 2);
    }
}
