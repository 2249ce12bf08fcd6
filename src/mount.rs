//! Mount lifecycle: attaching a backend to a directory node, and
//! deciding when it is safe to detach one.
//!
//! A mount is busy if it has open file handles, open directory streams,
//! or live sub-mounts under it. `unmount` on a busy mount does not fail
//! outright — it flips `unmountPending` and waits for the busy counters
//! to drain; the path resolver treats an unmount-pending mount as "no
//! mount" so dispatched operations below it no longer cross into the
//! backend.

use crate::backend::Backend;
use crate::inode::ROOT_ID;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

/// Bookkeeping attached to a mounted directory node.
///
/// Embedded in the owning `InodeEntry` as an `Arc` so the mount registry
/// and the inode table observe the same counters.
pub struct MountRecord {
    backend: Arc<dyn Backend>,
    unmount_pending: AtomicBool,
    open_files: AtomicI64,
    open_dirs: AtomicI64,
    sub_mounts: AtomicI64,
}

impl MountRecord {
    fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            unmount_pending: AtomicBool::new(false),
            open_files: AtomicI64::new(0),
            open_dirs: AtomicI64::new(0),
            sub_mounts: AtomicI64::new(0),
        }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn unmount_pending(&self) -> bool {
        self.unmount_pending.load(Ordering::SeqCst)
    }

    pub fn is_busy(&self) -> bool {
        self.open_files.load(Ordering::SeqCst) > 0
            || self.open_dirs.load(Ordering::SeqCst) > 0
            || self.sub_mounts.load(Ordering::SeqCst) > 0
    }

    pub fn open_file(&self) {
        self.open_files.fetch_add(1, Ordering::SeqCst);
    }

    /// Decrements the open-file counter; tolerates going from zero, since
    /// a release can race an unmount that already observed the mount as
    /// drained.
    pub fn close_file(&self) {
        self.open_files.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn open_dir(&self) {
        self.open_dirs.fetch_add(1, Ordering::SeqCst);
    }

    pub fn close_dir(&self) {
        self.open_dirs.fetch_sub(1, Ordering::SeqCst);
    }

    fn add_sub_mount(&self) {
        self.sub_mounts.fetch_add(1, Ordering::SeqCst);
    }

    fn remove_sub_mount(&self) {
        self.sub_mounts.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Errors specific to mount/unmount requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MountError {
    #[error("a mount is already attached at this node")]
    AlreadyMounted,
    #[error("no mount is attached at this node")]
    NotMounted,
    #[error("the root mount cannot be unmounted")]
    RootMount,
    #[error("mount point has cached children or outstanding opens")]
    Busy,
}

/// Registry of every attached mount, keyed by the `NodeId` of its mount
/// point. Root (`NodeId` 1) is bootstrapped at construction and can never
/// be unmounted.
pub struct MountManager {
    mounts: RwLock<HashMap<u64, Arc<MountRecord>>>,
}

impl MountManager {
    pub fn new(root_backend: Arc<dyn Backend>) -> Self {
        let mut mounts = HashMap::new();
        mounts.insert(ROOT_ID, Arc::new(MountRecord::new(root_backend)));
        Self {
            mounts: RwLock::new(mounts),
        }
    }

    /// Attaches `backend` at `node_id`. Fails if something is already
    /// mounted there. On success, bumps the parent mount's sub-mount
    /// counter (found by walking to the nearest ancestor mount via
    /// `parent_node_id`, which callers already know from the path
    /// resolver).
    pub fn mount(
        &self,
        node_id: u64,
        parent_mount_id: Option<u64>,
        backend: Arc<dyn Backend>,
    ) -> Result<Arc<MountRecord>, MountError> {
        let mut mounts = self.mounts.write();
        if mounts.contains_key(&node_id) {
            return Err(MountError::AlreadyMounted);
        }
        let record = Arc::new(MountRecord::new(backend));
        mounts.insert(node_id, Arc::clone(&record));
        if let Some(parent_id) = parent_mount_id {
            if let Some(parent) = mounts.get(&parent_id) {
                parent.add_sub_mount();
            }
        }
        Ok(record)
    }

    /// Requests unmount of the mount at `node_id`.
    ///
    /// `entry_ref_count` is the mount point `InodeEntry`'s own `refCount`
    /// (live cached children), supplied by the caller since the manager
    /// has no view into the inode table. Two independent conditions
    /// apply, per the design doc:
    ///
    /// - `openFiles + openDirs + subMounts > 0` (the mount's own busy
    ///   counters) is a hard failure: `EBusy`, nothing is changed.
    /// - Otherwise, if the mount point still has cached children
    ///   (`entry_ref_count > 0`), the unmount is accepted but deferred:
    ///   `unmountPending` is set, `backend.unmount()` runs now, and
    ///   `Ok(false)` is returned — the caller (dispatcher) retries the
    ///   removal via `finish_pending_unmount` once those children drain.
    /// - If neither condition holds, the mount is detached immediately
    ///   and `Ok(true)` is returned.
    pub fn unmount(
        &self,
        node_id: u64,
        parent_mount_id: Option<u64>,
        entry_ref_count: i64,
    ) -> Result<bool, MountError> {
        if node_id == ROOT_ID {
            return Err(MountError::RootMount);
        }
        let mut mounts = self.mounts.write();
        let Some(record) = mounts.get(&node_id) else {
            return Err(MountError::NotMounted);
        };
        if record.is_busy() {
            return Err(MountError::Busy);
        }
        if entry_ref_count > 0 {
            record.unmount_pending.store(true, Ordering::SeqCst);
            record.backend.unmount();
            return Ok(false);
        }
        record.backend.unmount();
        mounts.remove(&node_id);
        if let Some(parent_id) = parent_mount_id {
            if let Some(parent) = mounts.get(&parent_id) {
                parent.remove_sub_mount();
            }
        }
        Ok(true)
    }

    /// Called after a busy counter drops or a cached child drains for a
    /// mount that has `unmountPending` set; finishes the removal that
    /// `unmount` deferred.
    ///
    /// `entry_ref_count` is, as in `unmount`, the mount point's own
    /// `InodeEntry::refCount` at the time of the call — the mount cannot
    /// actually be collected while cached children still reference it,
    /// even once its busy counters (open handles, sub-mounts) are clear.
    pub fn finish_pending_unmount(
        &self,
        node_id: u64,
        parent_mount_id: Option<u64>,
        entry_ref_count: i64,
    ) -> bool {
        let mut mounts = self.mounts.write();
        let Some(record) = mounts.get(&node_id) else {
            return false;
        };
        if !record.unmount_pending() || record.is_busy() || entry_ref_count > 0 {
            return false;
        }
        record.backend.unmount();
        mounts.remove(&node_id);
        if let Some(parent_id) = parent_mount_id {
            if let Some(parent) = mounts.get(&parent_id) {
                parent.remove_sub_mount();
            }
        }
        true
    }

    pub fn get(&self, node_id: u64) -> Option<Arc<MountRecord>> {
        self.mounts.read().get(&node_id).cloned()
    }

    pub fn is_mounted(&self, node_id: u64) -> bool {
        self.mounts.read().contains_key(&node_id)
    }

    pub fn mount_count(&self) -> usize {
        self.mounts.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Attr, DirStream, FileHandle, MountContext};
    use crate::error::Status;

    struct NullBackend;

    impl Backend for NullBackend {
        fn mount(&self, _ctx: &MountContext) -> Result<(), Status> {
            Ok(())
        }
        fn unmount(&self) {}
        fn get_attr(&self, _path: &str) -> Result<Attr, Status> {
            Err(Status::ENoSys)
        }
        fn chmod(&self, _path: &str, _mode: u32) -> Result<(), Status> {
            Err(Status::ENoSys)
        }
        fn chown(&self, _path: &str, _uid: Option<u32>, _gid: Option<u32>) -> Result<(), Status> {
            Err(Status::ENoSys)
        }
        fn truncate(&self, _path: &str, _size: u64) -> Result<(), Status> {
            Err(Status::ENoSys)
        }
        fn utimens(
            &self,
            _path: &str,
            _atime_ns: Option<i64>,
            _mtime_ns: Option<i64>,
        ) -> Result<(), Status> {
            Err(Status::ENoSys)
        }
        fn readlink(&self, _path: &str) -> Result<String, Status> {
            Err(Status::ENoSys)
        }
        fn access(&self, _path: &str, _mask: i32) -> Result<(), Status> {
            Ok(())
        }
        fn open(&self, _path: &str, _flags: i32) -> Result<Box<dyn FileHandle>, Status> {
            Err(Status::ENoSys)
        }
        fn open_dir(&self, _path: &str) -> Result<Box<dyn DirStream>, Status> {
            Err(Status::ENoSys)
        }
        fn create(
            &self,
            _path: &str,
            _flags: i32,
            _mode: u32,
        ) -> Result<(Box<dyn FileHandle>, Attr), Status> {
            Err(Status::ENoSys)
        }
        fn mknod(&self, _path: &str, _mode: u32, _rdev: u32) -> Result<(), Status> {
            Err(Status::ENoSys)
        }
        fn mkdir(&self, _path: &str, _mode: u32) -> Result<(), Status> {
            Err(Status::ENoSys)
        }
        fn unlink(&self, _path: &str) -> Result<(), Status> {
            Err(Status::ENoSys)
        }
        fn rmdir(&self, _path: &str) -> Result<(), Status> {
            Err(Status::ENoSys)
        }
        fn symlink(&self, _target: &str, _link_path: &str) -> Result<(), Status> {
            Err(Status::ENoSys)
        }
        fn rename(&self, _old: &str, _new: &str) -> Result<(), Status> {
            Err(Status::ENoSys)
        }
        fn link(&self, _old_path: &str, _new_path: &str) -> Result<(), Status> {
            Err(Status::ENoSys)
        }
    }

    fn null() -> Arc<dyn Backend> {
        Arc::new(NullBackend)
    }

    #[test]
    fn root_is_bootstrapped_and_cannot_be_unmounted() {
        let manager = MountManager::new(null());
        assert!(manager.is_mounted(ROOT_ID));
        assert_eq!(manager.unmount(ROOT_ID, None, 0), Err(MountError::RootMount));
    }

    #[test]
    fn mount_then_unmount_idle_removes_immediately() {
        let manager = MountManager::new(null());
        manager.mount(42, Some(ROOT_ID), null()).unwrap();
        assert!(manager.is_mounted(42));
        assert_eq!(manager.unmount(42, Some(ROOT_ID), 0), Ok(true));
        assert!(!manager.is_mounted(42));
    }

    #[test]
    fn double_mount_at_same_node_fails() {
        let manager = MountManager::new(null());
        manager.mount(42, Some(ROOT_ID), null()).unwrap();
        assert_eq!(
            manager.mount(42, Some(ROOT_ID), null()).unwrap_err(),
            MountError::AlreadyMounted
        );
    }

    #[test]
    fn open_handles_hard_fail_unmount() {
        let manager = MountManager::new(null());
        manager.mount(42, Some(ROOT_ID), null()).unwrap();
        let record = manager.get(42).unwrap();
        record.open_file();

        assert_eq!(manager.unmount(42, Some(ROOT_ID), 0), Err(MountError::Busy));
        assert!(manager.is_mounted(42), "still mounted, unmount outright refused");
        assert!(!record.unmount_pending());
    }

    #[test]
    fn cached_children_defer_unmount_until_drained() {
        let manager = MountManager::new(null());
        manager.mount(42, Some(ROOT_ID), null()).unwrap();
        let record = manager.get(42).unwrap();

        assert_eq!(manager.unmount(42, Some(ROOT_ID), 1), Ok(false));
        assert!(manager.is_mounted(42), "still mounted while children remain cached");
        assert!(record.unmount_pending());

        // A cached child is still outstanding: finishing must not collect
        // the mount yet, even though no busy counters are set.
        assert!(!manager.finish_pending_unmount(42, Some(ROOT_ID), 1));
        assert!(manager.is_mounted(42), "still mounted until the cached child drains");

        // The child has since been forgotten and refCount reached zero.
        assert!(manager.finish_pending_unmount(42, Some(ROOT_ID), 0));
        assert!(!manager.is_mounted(42));
    }

    #[test]
    fn unmount_of_unknown_node_fails() {
        let manager = MountManager::new(null());
        assert_eq!(manager.unmount(99, None, 0), Err(MountError::NotMounted));
    }
}
