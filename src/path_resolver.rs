//! Reconstructs a backend-facing path for a `NodeId` by walking the
//! inode table's parent chain, stopping at the nearest enclosing mount.
//!
//! The reconstructed path is always relative to that mount's root, never
//! to the filesystem root: a backend only ever sees paths inside its own
//! namespace.

use crate::error::Status;
use crate::inode::{InodeTable, UnknownNode, ROOT_ID};
use crate::mount::{MountManager, MountRecord};
use std::sync::Arc;
use tracing::error;

/// Resolution result: the path inside the owning mount, the mount
/// itself, and the `NodeId` at which that mount is attached (needed by
/// callers that must re-derive the parent mount for busy-counter bumps).
pub struct Resolved {
    pub path: String,
    pub mount: Arc<MountRecord>,
    pub mount_node_id: u64,
}

/// Walks from `node_id` up to the nearest mount point, rebuilding the
/// path along the way.
///
/// Returns `Status::ENoEnt` if the nearest enclosing mount has
/// `unmountPending` set (the design's convention for "this subtree is
/// being torn down, behave as if unmounted"). An inode chain that
/// terminates without ever reaching a mounted node is an internal
/// invariant violation — every chain must bottom out at the root, which
/// is always mounted — and is logged as an error before returning
/// `ENoEnt` rather than panicking the connector.
pub struct PathResolver<'a> {
    inodes: &'a InodeTable,
    mounts: &'a MountManager,
}

impl<'a> PathResolver<'a> {
    pub fn new(inodes: &'a InodeTable, mounts: &'a MountManager) -> Self {
        Self { inodes, mounts }
    }

    pub fn resolve(&self, node_id: u64) -> Result<Resolved, Status> {
        let mut segments: Vec<String> = Vec::new();
        let mut current = node_id;

        loop {
            if let Some(record) = self.mounts.get(current) {
                if record.unmount_pending() {
                    return Err(Status::ENoEnt);
                }
                segments.reverse();
                let path = if segments.is_empty() {
                    String::new()
                } else {
                    segments.join("/")
                };
                return Ok(Resolved {
                    path,
                    mount: record,
                    mount_node_id: current,
                });
            }

            let (parent_id, name) = match self.inodes.with_entry(current, |e| {
                (e.parent_id(), e.name().to_string())
            }) {
                Ok(v) => v,
                Err(UnknownNode(id)) => {
                    error!(node_id = id, "path resolution hit an unknown node");
                    return Err(Status::ENoEnt);
                }
            };

            segments.push(name);

            match parent_id {
                Some(parent) => current = parent,
                None => {
                    // Reached a parentless node that is not mounted: the
                    // root is always mounted, so this can only happen if
                    // the table's root entry lost its mount record.
                    error!(
                        node_id = current,
                        "chain terminated above root without finding a mount"
                    );
                    return Err(Status::ENoEnt);
                }
            }
        }
    }

    /// Resolves a `/`-separated path to the `NodeId` of the entry it
    /// names, descending from the root and looking up each component
    /// under the current entry's id.
    ///
    /// This is the human-facing counterpart to `resolve`: used only by
    /// the `Mount`/`Unmount` administrative surface, which addresses
    /// directories by path rather than by a kernel-assigned `NodeId`.
    /// Every component must already be a cached entry (i.e. previously
    /// looked up); this never consults a backend itself.
    pub fn resolve_by_path(&self, path: &str) -> Result<u64, Status> {
        let mut current = ROOT_ID;
        for component in path.split('/').filter(|s| !s.is_empty()) {
            current = self
                .inodes
                .get_id(current, component)
                .ok_or(Status::ENoEnt)?;
        }
        Ok(current)
    }

    /// Resolves a `NodeId` to the nearest enclosing mount's `NodeId`
    /// without materializing the full path. Used to find the parent
    /// mount when attaching a new one.
    pub fn nearest_mount(&self, node_id: u64) -> Result<u64, Status> {
        let mut current = node_id;
        loop {
            if self.mounts.is_mounted(current) {
                return Ok(current);
            }
            let parent_id = match self.inodes.with_entry(current, |e| e.parent_id()) {
                Ok(v) => v,
                Err(UnknownNode(id)) => {
                    error!(node_id = id, "nearest_mount hit an unknown node");
                    return Err(Status::ENoEnt);
                }
            };
            match parent_id {
                Some(parent) => current = parent,
                None => return Ok(ROOT_ID),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Attr, DirStream, EntryKind, FileHandle, MountContext};
    use std::sync::Arc;

    struct NullBackend;

    impl crate::backend::Backend for NullBackend {
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

    fn null() -> Arc<dyn crate::backend::Backend> {
        Arc::new(NullBackend)
    }

    #[test]
    fn root_resolves_to_empty_path() {
        let inodes = InodeTable::new();
        let mounts = crate::mount::MountManager::new(null());
        let resolver = PathResolver::new(&inodes, &mounts);
        let resolved = resolver.resolve(ROOT_ID).unwrap();
        assert_eq!(resolved.path, "");
        assert_eq!(resolved.mount_node_id, ROOT_ID);
    }

    #[test]
    fn nested_entry_resolves_to_joined_path() {
        let inodes = InodeTable::new();
        let mounts = crate::mount::MountManager::new(null());
        let dir = inodes.lookup_or_create(ROOT_ID, "a", EntryKind::Directory);
        let file = inodes.lookup_or_create(dir, "b", EntryKind::RegularFile);

        let resolver = PathResolver::new(&inodes, &mounts);
        let resolved = resolver.resolve(file).unwrap();
        assert_eq!(resolved.path, "a/b");
        assert_eq!(resolved.mount_node_id, ROOT_ID);
    }

    #[test]
    fn resolution_stops_at_inner_mount_and_is_relative_to_it() {
        let inodes = InodeTable::new();
        let mounts = crate::mount::MountManager::new(null());
        let mnt_point = inodes.lookup_or_create(ROOT_ID, "mnt", EntryKind::Directory);
        mounts.mount(mnt_point, Some(ROOT_ID), null()).unwrap();
        inodes
            .with_entry_mut(mnt_point, |e| e.set_mount(mounts.get(mnt_point)))
            .unwrap();

        let inner = inodes.lookup_or_create(mnt_point, "file", EntryKind::RegularFile);
        let resolver = PathResolver::new(&inodes, &mounts);
        let resolved = resolver.resolve(inner).unwrap();
        assert_eq!(resolved.path, "file");
        assert_eq!(resolved.mount_node_id, mnt_point);
    }

    #[test]
    fn resolve_by_path_descends_from_root() {
        let inodes = InodeTable::new();
        let mounts = crate::mount::MountManager::new(null());
        let dir = inodes.lookup_or_create(ROOT_ID, "a", EntryKind::Directory);
        let file = inodes.lookup_or_create(dir, "b", EntryKind::RegularFile);

        let resolver = PathResolver::new(&inodes, &mounts);
        assert_eq!(resolver.resolve_by_path("").unwrap(), ROOT_ID);
        assert_eq!(resolver.resolve_by_path("a").unwrap(), dir);
        assert_eq!(resolver.resolve_by_path("a/b").unwrap(), file);
    }

    #[test]
    fn resolve_by_path_rejects_uncached_component() {
        let inodes = InodeTable::new();
        let mounts = crate::mount::MountManager::new(null());
        let resolver = PathResolver::new(&inodes, &mounts);
        assert_eq!(resolver.resolve_by_path("missing").unwrap_err(), Status::ENoEnt);
    }

    #[test]
    fn unmount_pending_mount_resolves_to_enoent() {
        let inodes = InodeTable::new();
        let mounts = crate::mount::MountManager::new(null());
        let mnt_point = inodes.lookup_or_create(ROOT_ID, "mnt", EntryKind::Directory);
        let record = mounts.mount(mnt_point, Some(ROOT_ID), null()).unwrap();
        inodes
            .with_entry_mut(mnt_point, |e| e.set_mount(Some(Arc::clone(&record))))
            .unwrap();
        // entry_ref_count=1 simulates a cached child under the mount
        // point, which defers (rather than refuses) the unmount.
        assert_eq!(mounts.unmount(mnt_point, Some(ROOT_ID), 1), Ok(false));

        let resolver = PathResolver::new(&inodes, &mounts);
        assert_eq!(resolver.resolve(mnt_point).unwrap_err(), Status::ENoEnt);
    }
}
