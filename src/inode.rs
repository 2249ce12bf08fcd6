//! The inode table: a two-keyed store mapping `NodeId`s and
//! `(parentNodeId, name)` pairs to cached directory entries.
//!
//! The table is protected by a single reader-writer lock (see the
//! concurrency design notes): structural changes — insert, rename,
//! unlink, forget-to-zero, mount attach/detach — take the lock
//! exclusively, while the hot counters (`lookupCount`, `refCount`, the
//! per-mount busy counts) are atomics so a reader holding the shared lock
//! can still bump them without contending with other readers.

use crate::backend::EntryKind;
use crate::mount::MountRecord;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

/// The well-known `NodeId` of the filesystem root.
pub const ROOT_ID: u64 = 1;

/// Sentinel parent id for the root's name-index key, `(0, "")`. Id zero
/// is reserved and never assigned to a real entry.
const NO_PARENT: u64 = 0;

/// One cached directory entry.
///
/// The parent link is a plain `NodeId`, not a pointer: per the design
/// notes, modeling it as shared ownership would create cycles with no
/// natural collection point. Looking up a parent always goes back through
/// the id index.
#[derive(Debug)]
pub struct InodeEntry {
    node_id: u64,
    parent_id: u64,
    name: String,
    kind: EntryKind,
    lookup_count: AtomicI64,
    ref_count: AtomicI64,
    mount: Option<Arc<MountRecord>>,
    /// Set by `unlink`, which already decrements the parent's `refCount`
    /// at detach time: marks that a later cascading removal of this same
    /// entry (triggered by a matching `forget` draining `lookupCount` to
    /// zero) must not decrement that parent a second time.
    parent_unreffed: bool,
}

impl InodeEntry {
    pub fn node_id(&self) -> u64 {
        self.node_id
    }

    pub fn parent_id(&self) -> Option<u64> {
        (self.parent_id != NO_PARENT).then_some(self.parent_id)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    pub fn lookup_count(&self) -> i64 {
        self.lookup_count.load(Ordering::SeqCst)
    }

    pub fn ref_count(&self) -> i64 {
        self.ref_count.load(Ordering::SeqCst)
    }

    pub fn mount(&self) -> Option<&Arc<MountRecord>> {
        self.mount.as_ref()
    }

    /// Attaches a mount record to this entry. Used by the mount manager
    /// once it has registered the backend; overwrites any prior mount.
    pub fn set_mount(&mut self, mount: Option<Arc<MountRecord>>) {
        self.mount = mount;
    }

    pub fn is_root(&self) -> bool {
        self.node_id == ROOT_ID
    }

    fn is_removable(&self) -> bool {
        if self.is_root() {
            return false;
        }
        let pinned_by_mount = match &self.mount {
            Some(m) => !m.unmount_pending(),
            None => false,
        };
        !pinned_by_mount && self.lookup_count() <= 0 && self.ref_count() <= 0
    }
}

/// The error `getById` returns when asked for a `NodeId` the peer never
/// should have been holding. Per the design doc this is a programming
/// error from the protocol peer, not a user-visible `ENOENT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unknown node id {0}")]
pub struct UnknownNode(pub u64);

struct Inner {
    entries: HashMap<u64, InodeEntry>,
    name_index: HashMap<(u64, String), u64>,
    next_id: u64,
    next_synthetic: u64,
}

impl Inner {
    fn remove_cascading(&mut self, node_id: u64) {
        let Some(entry) = self.entries.get(&node_id) else {
            return;
        };
        if !entry.is_removable() {
            return;
        }
        let parent_id = entry.parent_id;
        let name = entry.name.clone();
        let parent_unreffed = entry.parent_unreffed;
        self.entries.remove(&node_id);
        self.name_index.remove(&(parent_id, name));
        if parent_id != NO_PARENT {
            if !parent_unreffed {
                if let Some(parent) = self.entries.get(&parent_id) {
                    parent.ref_count.fetch_sub(1, Ordering::SeqCst);
                }
            }
            self.remove_cascading(parent_id);
        }
    }
}

/// Thread-safe two-keyed inode table.
///
/// Cloning an `InodeTable` is cheap and shares the same underlying lock
/// and entries (an `Arc` clone) — used to hand a read-only diagnostics
/// handle to a background thread without giving it ownership of the
/// connector itself.
#[derive(Clone)]
pub struct InodeTable {
    inner: Arc<RwLock<Inner>>,
}

impl InodeTable {
    /// Creates a table with only the root entry, pre-mounted with no
    /// backend bound (callers attach the root's `MountRecord` separately
    /// via the mount manager during startup).
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        entries.insert(
            ROOT_ID,
            InodeEntry {
                node_id: ROOT_ID,
                parent_id: NO_PARENT,
                name: String::new(),
                kind: EntryKind::Directory,
                lookup_count: AtomicI64::new(1),
                ref_count: AtomicI64::new(0),
                mount: None,
                parent_unreffed: false,
            },
        );
        let mut name_index = HashMap::new();
        name_index.insert((NO_PARENT, String::new()), ROOT_ID);

        Self {
            inner: Arc::new(RwLock::new(Inner {
                entries,
                name_index,
                next_id: ROOT_ID + 1,
                next_synthetic: 1,
            })),
        }
    }

    /// Returns the existing entry for `(parentId, name)`, or allocates a
    /// fresh one. The caller guarantees the backend already confirmed the
    /// name exists; this call never contacts the backend.
    pub fn lookup_or_create(&self, parent_id: u64, name: &str, kind: EntryKind) -> u64 {
        // Fast path: shared lock, bump the atomic counter in place.
        {
            let inner = self.inner.read();
            if let Some(&id) = inner.name_index.get(&(parent_id, name.to_string())) {
                if let Some(entry) = inner.entries.get(&id) {
                    entry.lookup_count.fetch_add(1, Ordering::SeqCst);
                    return id;
                }
            }
        }

        // Slow path: re-check under the exclusive lock to avoid a
        // duplicate allocation race against another writer.
        let mut inner = self.inner.write();
        if let Some(&id) = inner.name_index.get(&(parent_id, name.to_string())) {
            if let Some(entry) = inner.entries.get(&id) {
                entry.lookup_count.fetch_add(1, Ordering::SeqCst);
                return id;
            }
        }

        let node_id = inner.next_id;
        inner.next_id += 1;
        inner.entries.insert(
            node_id,
            InodeEntry {
                node_id,
                parent_id,
                name: name.to_string(),
                kind,
                lookup_count: AtomicI64::new(1),
                ref_count: AtomicI64::new(0),
                mount: None,
                parent_unreffed: false,
            },
        );
        inner
            .name_index
            .insert((parent_id, name.to_string()), node_id);
        if let Some(parent) = inner.entries.get(&parent_id) {
            parent.ref_count.fetch_add(1, Ordering::SeqCst);
        }
        node_id
    }

    /// Runs `f` with a reference to the entry for `nodeId`, under the
    /// shared lock. Fails with `UnknownNode` if absent.
    pub fn with_entry<T>(
        &self,
        node_id: u64,
        f: impl FnOnce(&InodeEntry) -> T,
    ) -> Result<T, UnknownNode> {
        let inner = self.inner.read();
        inner
            .entries
            .get(&node_id)
            .map(f)
            .ok_or(UnknownNode(node_id))
    }

    /// Runs `f` with mutable access to the entry for `nodeId` (used to
    /// attach/detach a mount record), under the exclusive lock.
    pub fn with_entry_mut<T>(
        &self,
        node_id: u64,
        f: impl FnOnce(&mut InodeEntry) -> T,
    ) -> Result<T, UnknownNode> {
        let mut inner = self.inner.write();
        inner
            .entries
            .get_mut(&node_id)
            .map(f)
            .ok_or(UnknownNode(node_id))
    }

    /// Looks up a `NodeId` by `(parentId, name)` without creating one.
    pub fn get_id(&self, parent_id: u64, name: &str) -> Option<u64> {
        let inner = self.inner.read();
        inner.name_index.get(&(parent_id, name.to_string())).copied()
    }

    /// Subtracts `n` from `lookupCount`; removes the entry if the
    /// reachability invariant now allows it. Never fails, never evicts
    /// root.
    pub fn forget(&self, node_id: u64, n: i64) {
        let mut inner = self.inner.write();
        let Some(entry) = inner.entries.get(&node_id) else {
            return;
        };
        entry.lookup_count.fetch_sub(n, Ordering::SeqCst);
        inner.remove_cascading(node_id);
    }

    /// Removes `(parentId, name)` from the name index (not the id
    /// index) and unrefs the parent. The entry persists, just unreachable
    /// by name, until its lookup count also drains.
    ///
    /// The parent is unreffed right here, not when the entry is finally
    /// collected, so the entry is marked `parent_unreffed` in the same
    /// stroke: its stale `parent_id` field is left untouched (path
    /// resolution for an already-unlinked-but-still-looked-up node still
    /// walks it, and the backend will report the now-missing path itself),
    /// but a later cascading removal of this entry — triggered by a
    /// matching `forget` once it's no longer looked up — must not
    /// decrement that same parent a second time.
    pub fn unlink(&self, parent_id: u64, name: &str) {
        let mut inner = self.inner.write();
        let Some(node_id) = inner.name_index.remove(&(parent_id, name.to_string())) else {
            return;
        };
        if let Some(parent) = inner.entries.get(&parent_id) {
            parent.ref_count.fetch_sub(1, Ordering::SeqCst);
        }
        if let Some(entry) = inner.entries.get_mut(&node_id) {
            entry.parent_unreffed = true;
        }
        inner.remove_cascading(node_id);
        inner.remove_cascading(parent_id);
    }

    /// Reparents `(oldParentId, oldName)` to `(newParentId, newName)`.
    ///
    /// Silently returns if the source is absent (a stale kernel
    /// notification race). If the destination is already occupied, the
    /// victim is reparented under the root with a synthetic name so its
    /// `NodeId` survives for any in-flight operation still holding it.
    pub fn rename(
        &self,
        old_parent_id: u64,
        old_name: &str,
        new_parent_id: u64,
        new_name: &str,
    ) {
        let mut inner = self.inner.write();

        let Some(&node_id) = inner
            .name_index
            .get(&(old_parent_id, old_name.to_string()))
        else {
            return;
        };

        if old_parent_id == new_parent_id && old_name == new_name {
            // Rename(a, x, a, x): observably a no-op.
            return;
        }

        if let Some(victim_id) = inner
            .name_index
            .get(&(new_parent_id, new_name.to_string()))
            .copied()
        {
            inner
                .name_index
                .remove(&(new_parent_id, new_name.to_string()));
            let synthetic = inner.next_synthetic;
            inner.next_synthetic += 1;
            let synthetic_name = format!("overwrittenByRename{synthetic}");

            if let Some(victim) = inner.entries.get_mut(&victim_id) {
                if let Some(old_parent) = inner.entries.get(&new_parent_id) {
                    old_parent.ref_count.fetch_sub(1, Ordering::SeqCst);
                }
                victim.parent_id = ROOT_ID;
                victim.name = synthetic_name.clone();
            }
            if let Some(root) = inner.entries.get(&ROOT_ID) {
                root.ref_count.fetch_add(1, Ordering::SeqCst);
            }
            inner
                .name_index
                .insert((ROOT_ID, synthetic_name), victim_id);
        }

        inner
            .name_index
            .remove(&(old_parent_id, old_name.to_string()));
        if let Some(old_parent) = inner.entries.get(&old_parent_id) {
            old_parent.ref_count.fetch_sub(1, Ordering::SeqCst);
        }
        if let Some(new_parent) = inner.entries.get(&new_parent_id) {
            new_parent.ref_count.fetch_add(1, Ordering::SeqCst);
        }
        if let Some(entry) = inner.entries.get_mut(&node_id) {
            entry.parent_id = new_parent_id;
            entry.name = new_name.to_string();
        }
        inner
            .name_index
            .insert((new_parent_id, new_name.to_string()), node_id);

        inner.remove_cascading(old_parent_id);
    }

    /// Total number of entries currently tracked (including the root).
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        false // root always present
    }

    /// Read-only snapshot of every live entry, for diagnostics and tests.
    pub fn debug_snapshot(&self) -> Vec<(u64, u64, String, i64, i64)> {
        let inner = self.inner.read();
        inner
            .entries
            .values()
            .map(|e| {
                (
                    e.node_id,
                    e.parent_id,
                    e.name.clone(),
                    e.lookup_count(),
                    e.ref_count(),
                )
            })
            .collect()
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_exists_and_is_not_removable() {
        let table = InodeTable::new();
        table.with_entry(ROOT_ID, |e| assert!(e.is_root())).unwrap();
        table.forget(ROOT_ID, 1);
        assert!(table.with_entry(ROOT_ID, |_| ()).is_ok());
    }

    #[test]
    fn lookup_or_create_returns_same_id_twice() {
        let table = InodeTable::new();
        let a = table.lookup_or_create(ROOT_ID, "a", EntryKind::Directory);
        let b = table.lookup_or_create(ROOT_ID, "a", EntryKind::Directory);
        assert_eq!(a, b);
        table.with_entry(a, |e| assert_eq!(e.lookup_count(), 2)).unwrap();
    }

    #[test]
    fn lookup_then_forget_restores_empty_state() {
        let table = InodeTable::new();
        let id = table.lookup_or_create(ROOT_ID, "a", EntryKind::Directory);
        table.forget(id, 1);
        assert!(table.with_entry(id, |_| ()).is_err());
        assert_eq!(table.get_id(ROOT_ID, "a"), None);
    }

    #[test]
    fn two_lookups_then_two_forgets_balance() {
        let table = InodeTable::new();
        let id1 = table.lookup_or_create(ROOT_ID, "a", EntryKind::Directory);
        let id2 = table.lookup_or_create(ROOT_ID, "a", EntryKind::Directory);
        assert_eq!(id1, id2);
        table.forget(id1, 1);
        assert!(table.with_entry(id1, |_| ()).is_ok());
        table.forget(id1, 1);
        assert!(table.with_entry(id1, |_| ()).is_err());
    }

    #[test]
    fn forget_with_excess_count_still_removes() {
        let table = InodeTable::new();
        let id = table.lookup_or_create(ROOT_ID, "a", EntryKind::Directory);
        table.forget(id, 100);
        assert!(table.with_entry(id, |_| ()).is_err());
    }

    #[test]
    fn rename_updates_name_index_and_preserves_node_id() {
        let table = InodeTable::new();
        let a = table.lookup_or_create(ROOT_ID, "a", EntryKind::RegularFile);
        table.rename(ROOT_ID, "a", ROOT_ID, "b");
        assert_eq!(table.get_id(ROOT_ID, "a"), None);
        assert_eq!(table.get_id(ROOT_ID, "b"), Some(a));
    }

    #[test]
    fn rename_onto_existing_evicts_victim_under_synthetic_name() {
        let table = InodeTable::new();
        let a = table.lookup_or_create(ROOT_ID, "a", EntryKind::RegularFile);
        let b = table.lookup_or_create(ROOT_ID, "b", EntryKind::RegularFile);
        table.rename(ROOT_ID, "a", ROOT_ID, "b");

        assert_eq!(table.get_id(ROOT_ID, "b"), Some(a));
        assert!(table.with_entry(b, |_| ()).is_ok(), "victim's id still resolves");
        table
            .with_entry(b, |e| {
                assert!(e.name().starts_with("overwrittenByRename"));
                assert_eq!(e.parent_id(), None, "victim reparented under root");
            })
            .unwrap();
    }

    #[test]
    fn rename_no_op_when_source_equals_destination() {
        let table = InodeTable::new();
        let a = table.lookup_or_create(ROOT_ID, "a", EntryKind::RegularFile);
        let ref_before = table.with_entry(ROOT_ID, |e| e.ref_count()).unwrap();
        table.rename(ROOT_ID, "a", ROOT_ID, "a");
        assert_eq!(table.get_id(ROOT_ID, "a"), Some(a));
        let ref_after = table.with_entry(ROOT_ID, |e| e.ref_count()).unwrap();
        assert_eq!(ref_before, ref_after);
    }

    #[test]
    fn rename_of_absent_source_is_silently_absorbed() {
        let table = InodeTable::new();
        // No entry under (ROOT_ID, "missing"); must not panic.
        table.rename(ROOT_ID, "missing", ROOT_ID, "also-missing");
    }

    #[test]
    fn unlink_removes_name_index_but_entry_persists_while_looked_up() {
        let table = InodeTable::new();
        let a = table.lookup_or_create(ROOT_ID, "a", EntryKind::RegularFile);
        table.unlink(ROOT_ID, "a");
        assert_eq!(table.get_id(ROOT_ID, "a"), None);
        // lookup_count is still 1, so the entry itself survives.
        assert!(table.with_entry(a, |_| ()).is_ok());
        table.forget(a, 1);
        assert!(table.with_entry(a, |_| ()).is_err());
    }

    #[test]
    fn ref_count_matches_child_count() {
        let table = InodeTable::new();
        table.lookup_or_create(ROOT_ID, "a", EntryKind::RegularFile);
        table.lookup_or_create(ROOT_ID, "b", EntryKind::RegularFile);
        table.with_entry(ROOT_ID, |e| assert_eq!(e.ref_count(), 2)).unwrap();
    }

    #[test]
    fn cascading_removal_unrefs_parent() {
        let table = InodeTable::new();
        let dir = table.lookup_or_create(ROOT_ID, "dir", EntryKind::Directory);
        let file = table.lookup_or_create(dir, "f", EntryKind::RegularFile);
        table.with_entry(dir, |e| assert_eq!(e.ref_count(), 1)).unwrap();

        table.unlink(dir, "f");
        table.forget(file, 1);
        table.with_entry(dir, |e| assert_eq!(e.ref_count(), 0)).unwrap();

        // dir itself still has lookup_count 1 (from its own lookup_or_create),
        // so it survives until forgotten.
        table.forget(dir, 1);
        assert!(table.with_entry(dir, |_| ()).is_err());
    }

    #[test]
    fn concurrent_lookup_allocates_unique_ids() {
        use std::sync::Arc;
        use std::thread;

        let table = Arc::new(InodeTable::new());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let table = Arc::clone(&table);
                thread::spawn(move || {
                    table.lookup_or_create(ROOT_ID, &format!("f{i}"), EntryKind::RegularFile)
                })
            })
            .collect();

        let mut ids: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 16);
        assert_eq!(table.len(), 17); // root + 16
    }
}
