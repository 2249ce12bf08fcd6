//! The `fuser::Filesystem` implementation: translates kernel requests
//! into inode-table/mount-manager bookkeeping plus calls into whatever
//! `Backend` owns the resolved path.
//!
//! Every handler follows the same shape: resolve the `NodeId`(s)
//! involved to a path under their mount (dropping the table lock before
//! calling out), invoke the backend, then fold the result back into the
//! table. No lock is ever held across a backend call.

use crate::backend::{Attr, EntryKind};
use crate::config::Config;
use crate::error::Status;
use crate::handles::{HandleTables, OpenDir, OpenFile};
use crate::inode::{InodeTable, ROOT_ID};
use crate::mount::MountManager;
use crate::path_resolver::PathResolver;

use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request,
};
use libc::c_int;
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Generation number handed back with every `ReplyEntry`. The connector
/// never reuses a `NodeId` while it is still reachable, so a constant
/// generation is sufficient — there is no recycling scheme for the
/// kernel to distinguish.
const GENERATION: u64 = 1;

fn decode_name(name: &OsStr) -> Result<&str, Status> {
    name.to_str().ok_or(Status::EInval)
}

/// The connector: owns the inode table, the mount registry, and every
/// open handle, and implements the kernel-facing filesystem trait.
pub struct Connector {
    inodes: InodeTable,
    mounts: MountManager,
    handles: HandleTables,
    config: Config,
}

impl Connector {
    pub fn new(root_backend: Arc<dyn crate::backend::Backend>, config: Config) -> Self {
        let inodes = InodeTable::new();
        let mounts = MountManager::new(root_backend);
        inodes
            .with_entry_mut(ROOT_ID, |e| e.set_mount(mounts.get(ROOT_ID)))
            .expect("root entry always exists");
        Self {
            inodes,
            mounts,
            handles: HandleTables::new(),
            config,
        }
    }

    fn resolver(&self) -> PathResolver<'_> {
        PathResolver::new(&self.inodes, &self.mounts)
    }

    /// Returns a cheaply-cloneable handle to the inode table, for
    /// diagnostics callers that need read access without owning the
    /// connector (see `debug_snapshot`).
    pub fn inodes(&self) -> InodeTable {
        self.inodes.clone()
    }

    /// Resolves `node_id` to `(path, backend)`. Callers match on the
    /// result and reply with the error status themselves, since each
    /// `fuser` reply type is a distinct one-shot object that can't be
    /// driven through a shared closure.
    fn resolve_path(&self, node_id: u64) -> Result<(String, Arc<dyn crate::backend::Backend>), Status> {
        self.resolver()
            .resolve(node_id)
            .map(|resolved| (resolved.path, Arc::clone(resolved.mount.backend())))
    }

    /// Finds the mount enclosing the mount rooted at `mount_node_id`
    /// (i.e. the mount whose `subMounts` counter tracks it), by walking
    /// up from its parent entry.
    fn enclosing_mount_of(&self, mount_node_id: u64) -> Option<u64> {
        let parent_id = self
            .inodes
            .with_entry(mount_node_id, |e| e.parent_id())
            .ok()
            .flatten()?;
        self.resolver().nearest_mount(parent_id).ok()
    }

    /// If `mount_node_id` is `unmountPending`, attempts to finish the
    /// deferred removal now, using the mount point entry's current
    /// `refCount`. A no-op for a mount that isn't pending, or whose own
    /// entry has already been collected (treated as drained).
    fn try_finish_pending_unmount(&self, mount_node_id: u64) {
        let Some(record) = self.mounts.get(mount_node_id) else {
            return;
        };
        if !record.unmount_pending() {
            return;
        }
        let entry_ref_count = self
            .inodes
            .with_entry(mount_node_id, |e| e.ref_count())
            .unwrap_or(0);
        let parent_mount = self.enclosing_mount_of(mount_node_id);
        self.mounts
            .finish_pending_unmount(mount_node_id, parent_mount, entry_ref_count);
    }

    /// Drains `n` from `ino`'s lookup count. If `ino` sits under (or is)
    /// a mount that's waiting on cached children to drain before it can
    /// be collected, this is the forget that may finally let it drop —
    /// the enclosing mount is resolved before the forget so an ancestor
    /// mount can still be found even if `ino` itself is fully removed by
    /// the cascade. Split out from the `Filesystem::forget` trait method
    /// so it's callable without a `fuser::Request`.
    fn do_forget(&self, ino: u64, n: i64) {
        let enclosing_mount = self.resolver().nearest_mount(ino).ok();
        self.inodes.forget(ino, n);
        if let Some(mount_node_id) = enclosing_mount {
            self.try_finish_pending_unmount(mount_node_id);
        }
    }

    fn join(base: &str, name: &str) -> String {
        if base.is_empty() {
            name.to_string()
        } else {
            format!("{base}/{name}")
        }
    }

    fn to_file_attr(node_id: u64, attr: &Attr) -> FileAttr {
        FileAttr {
            ino: node_id,
            size: attr.size,
            blocks: attr.blocks,
            atime: attr.atime,
            mtime: attr.mtime,
            ctime: attr.ctime,
            crtime: attr.crtime,
            kind: attr.kind.to_fuser(),
            perm: attr.perm,
            nlink: attr.nlink,
            uid: attr.uid,
            gid: attr.gid,
            rdev: attr.rdev,
            blksize: attr.blksize,
            flags: attr.flags,
        }
    }

    fn entry_ttl(&self) -> Duration {
        self.config.entry_timeout
    }

    /// A zeroed `FileAttr` used only for negative-entry replies, where
    /// `ino == 0` tells the kernel the name doesn't exist and the
    /// attribute fields are ignored.
    fn negative_attr() -> FileAttr {
        FileAttr {
            ino: 0,
            size: 0,
            blocks: 0,
            atime: std::time::UNIX_EPOCH,
            mtime: std::time::UNIX_EPOCH,
            ctime: std::time::UNIX_EPOCH,
            crtime: std::time::UNIX_EPOCH,
            kind: fuser::FileType::RegularFile,
            perm: 0,
            nlink: 0,
            uid: 0,
            gid: 0,
            rdev: 0,
            blksize: 0,
            flags: 0,
        }
    }

    /// Replies to a `Lookup` whose backend call failed. If negative
    /// caching is enabled and the failure was `ENOENT` (or the parent
    /// resolved to no mount at all, which the design treats the same
    /// way), replies with a cacheable negative entry instead of an
    /// error, per the negative-entry contract.
    fn reply_lookup_failure(&self, status: Status, reply: ReplyEntry) {
        let is_absence = matches!(status, Status::ENoEnt);
        if is_absence && self.config.negative_caching_enabled() {
            reply.entry(&self.config.negative_timeout, &Self::negative_attr(), GENERATION);
        } else {
            reply.error(status.to_errno());
        }
    }

    fn attr_ttl(&self) -> Duration {
        self.config.attr_timeout
    }

    /// Looks up or allocates a `NodeId` for `(parent, name)`, given the
    /// attributes the backend just reported for it.
    fn record_lookup(&self, parent: u64, name: &str, attr: &Attr) -> u64 {
        self.inodes.lookup_or_create(parent, name, attr.kind)
    }
}

impl Filesystem for Connector {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), c_int> {
        tracing::info!("connector initialized");
        Ok(())
    }

    fn destroy(&mut self) {
        tracing::info!("connector destroyed");
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Ok(name) = decode_name(name) else {
            reply.error(libc::EINVAL);
            return;
        };
        trace!(parent, name, "lookup");

        let (base, backend) = match self.resolve_path(parent) {
            Ok(v) => v,
            Err(status) => {
                self.reply_lookup_failure(status, reply);
                return;
            }
        };
        let child_path = Self::join(&base, name);

        match backend.get_attr(&child_path) {
            Ok(attr) => {
                let node_id = self.record_lookup(parent, name, &attr);
                reply.entry(&self.entry_ttl(), &Self::to_file_attr(node_id, &attr), GENERATION);
            }
            Err(status) => self.reply_lookup_failure(status, reply),
        }
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        trace!(ino, nlookup, "forget");
        self.do_forget(ino, nlookup as i64);
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        trace!(ino, "getattr");
        let (path, backend) = match self.resolve_path(ino) {
            Ok(v) => v,
            Err(status) => {
                reply.error(status.to_errno());
                return;
            }
        };
        match backend.get_attr(&path) {
            Ok(attr) => reply.attr(&self.attr_ttl(), &Self::to_file_attr(ino, &attr)),
            Err(status) => reply.error(status.to_errno()),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<fuser::TimeOrNow>,
        mtime: Option<fuser::TimeOrNow>,
        _ctime: Option<std::time::SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<std::time::SystemTime>,
        _chgtime: Option<std::time::SystemTime>,
        _bkuptime: Option<std::time::SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        trace!(ino, "setattr");
        let (path, backend) = match self.resolve_path(ino) {
            Ok(v) => v,
            Err(status) => {
                reply.error(status.to_errno());
                return;
            }
        };

        let to_nanos = |t: fuser::TimeOrNow| match t {
            fuser::TimeOrNow::SpecificTime(st) => st
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos() as i64)
                .unwrap_or(0),
            fuser::TimeOrNow::Now => std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos() as i64)
                .unwrap_or(0),
        };

        // Valid-mask bits are applied in a fixed order — mode, then
        // ownership, then size, then times — but each step is
        // independent of the others: a failure in an earlier step does
        // not skip a later one. (The source this is modeled on instead
        // lets an earlier failure suppress a later truncate; that's
        // judged a bug here, not behavior to preserve — see DESIGN.md.)
        let mut first_error: Option<Status> = None;
        let mut note_err = |r: Result<(), Status>| {
            if let Err(e) = r {
                first_error.get_or_insert(e);
            }
        };

        if let Some(mode) = mode {
            note_err(backend.chmod(&path, mode));
        }
        if uid.is_some() || gid.is_some() {
            note_err(backend.chown(&path, uid, gid));
        }
        if let Some(size) = size {
            note_err(backend.truncate(&path, size));
        }
        if atime.is_some() || mtime.is_some() {
            note_err(backend.utimens(&path, atime.map(to_nanos), mtime.map(to_nanos)));
        }

        if let Some(status) = first_error {
            reply.error(status.to_errno());
            return;
        }
        match backend.get_attr(&path) {
            Ok(attr) => reply.attr(&self.attr_ttl(), &Self::to_file_attr(ino, &attr)),
            Err(status) => reply.error(status.to_errno()),
        }
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: fuser::ReplyData) {
        trace!(ino, "readlink");
        let (path, backend) = match self.resolve_path(ino) {
            Ok(v) => v,
            Err(status) => {
                reply.error(status.to_errno());
                return;
            }
        };
        match backend.readlink(&path) {
            Ok(target) => reply.data(target.as_bytes()),
            Err(status) => reply.error(status.to_errno()),
        }
    }

    fn access(&mut self, _req: &Request<'_>, ino: u64, mask: i32, reply: ReplyEmpty) {
        trace!(ino, mask, "access");
        let (path, backend) = match self.resolve_path(ino) {
            Ok(v) => v,
            Err(status) => {
                reply.error(status.to_errno());
                return;
            }
        };
        match backend.access(&path, mask) {
            Ok(()) => reply.ok(),
            Err(status) => reply.error(status.to_errno()),
        }
    }

    fn mknod(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        rdev: u32,
        reply: ReplyEntry,
    ) {
        let Ok(name) = decode_name(name) else {
            reply.error(libc::EINVAL);
            return;
        };
        trace!(parent, name, "mknod");
        let (base, backend) = match self.resolve_path(parent) {
            Ok(v) => v,
            Err(status) => {
                reply.error(status.to_errno());
                return;
            }
        };
        let child_path = Self::join(&base, name);

        if let Err(status) = backend.mknod(&child_path, mode, rdev) {
            reply.error(status.to_errno());
            return;
        }
        match backend.get_attr(&child_path) {
            Ok(attr) => {
                let node_id = self.record_lookup(parent, name, &attr);
                reply.entry(&self.entry_ttl(), &Self::to_file_attr(node_id, &attr), GENERATION);
            }
            Err(status) => reply.error(status.to_errno()),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let Ok(name) = decode_name(name) else {
            reply.error(libc::EINVAL);
            return;
        };
        trace!(parent, name, "mkdir");
        let (base, backend) = match self.resolve_path(parent) {
            Ok(v) => v,
            Err(status) => {
                reply.error(status.to_errno());
                return;
            }
        };
        let child_path = Self::join(&base, name);

        if let Err(status) = backend.mkdir(&child_path, mode) {
            reply.error(status.to_errno());
            return;
        }
        match backend.get_attr(&child_path) {
            Ok(attr) => {
                let node_id = self.record_lookup(parent, name, &attr);
                reply.entry(&self.entry_ttl(), &Self::to_file_attr(node_id, &attr), GENERATION);
            }
            Err(status) => reply.error(status.to_errno()),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Ok(name) = decode_name(name) else {
            reply.error(libc::EINVAL);
            return;
        };
        trace!(parent, name, "unlink");
        let (base, backend) = match self.resolve_path(parent) {
            Ok(v) => v,
            Err(status) => {
                reply.error(status.to_errno());
                return;
            }
        };
        let child_path = Self::join(&base, name);

        match backend.unlink(&child_path) {
            Ok(()) => {
                self.inodes.unlink(parent, name);
                reply.ok();
            }
            Err(status) => reply.error(status.to_errno()),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Ok(name) = decode_name(name) else {
            reply.error(libc::EINVAL);
            return;
        };
        trace!(parent, name, "rmdir");
        let (base, backend) = match self.resolve_path(parent) {
            Ok(v) => v,
            Err(status) => {
                reply.error(status.to_errno());
                return;
            }
        };
        let child_path = Self::join(&base, name);

        match backend.rmdir(&child_path) {
            Ok(()) => {
                self.inodes.unlink(parent, name);
                reply.ok();
            }
            Err(status) => reply.error(status.to_errno()),
        }
    }

    fn symlink(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        link: &std::path::Path,
        reply: ReplyEntry,
    ) {
        let Ok(name) = decode_name(name) else {
            reply.error(libc::EINVAL);
            return;
        };
        let Some(target) = link.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        trace!(parent, name, target, "symlink");
        let (base, backend) = match self.resolve_path(parent) {
            Ok(v) => v,
            Err(status) => {
                reply.error(status.to_errno());
                return;
            }
        };
        let child_path = Self::join(&base, name);

        if let Err(status) = backend.symlink(target, &child_path) {
            reply.error(status.to_errno());
            return;
        }
        match backend.get_attr(&child_path) {
            Ok(attr) => {
                let node_id = self.record_lookup(parent, name, &attr);
                reply.entry(&self.entry_ttl(), &Self::to_file_attr(node_id, &attr), GENERATION);
            }
            Err(status) => reply.error(status.to_errno()),
        }
    }

    fn link(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: ReplyEntry,
    ) {
        let Ok(newname) = decode_name(newname) else {
            reply.error(libc::EINVAL);
            return;
        };
        trace!(ino, newparent, newname, "link");

        let (old_path, old_backend) = match self.resolve_path(ino) {
            Ok(v) => v,
            Err(status) => {
                reply.error(status.to_errno());
                return;
            }
        };
        let (new_base, new_backend) = match self.resolve_path(newparent) {
            Ok(v) => v,
            Err(status) => {
                reply.error(status.to_errno());
                return;
            }
        };
        if !Arc::ptr_eq(&old_backend, &new_backend) {
            reply.error(Status::EXDev.to_errno());
            return;
        }
        let new_path = Self::join(&new_base, newname);

        if let Err(status) = old_backend.link(&old_path, &new_path) {
            reply.error(status.to_errno());
            return;
        }
        match old_backend.get_attr(&new_path) {
            Ok(attr) => {
                let node_id = self.record_lookup(newparent, newname, &attr);
                reply.entry(&self.entry_ttl(), &Self::to_file_attr(node_id, &attr), GENERATION);
            }
            Err(status) => reply.error(status.to_errno()),
        }
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let Ok(name) = decode_name(name) else {
            reply.error(libc::EINVAL);
            return;
        };
        let Ok(newname) = decode_name(newname) else {
            reply.error(libc::EINVAL);
            return;
        };
        trace!(parent, name, newparent, newname, "rename");

        let (old_base, old_backend) = match self.resolve_path(parent) {
            Ok(v) => v,
            Err(status) => {
                reply.error(status.to_errno());
                return;
            }
        };
        let (new_base, new_backend) = match self.resolve_path(newparent) {
            Ok(v) => v,
            Err(status) => {
                reply.error(status.to_errno());
                return;
            }
        };
        if !Arc::ptr_eq(&old_backend, &new_backend) {
            reply.error(Status::EXDev.to_errno());
            return;
        }

        let old_path = Self::join(&old_base, name);
        let new_path = Self::join(&new_base, newname);

        match old_backend.rename(&old_path, &new_path) {
            Ok(()) => {
                self.inodes.rename(parent, name, newparent, newname);
                reply.ok();
            }
            Err(status) => reply.error(status.to_errno()),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        trace!(ino, flags, "open");
        let (path, backend) = match self.resolve_path(ino) {
            Ok(v) => v,
            Err(status) => {
                reply.error(status.to_errno());
                return;
            }
        };
        match backend.open(&path, flags) {
            Ok(handle) => {
                let fh = self.handles.files.insert_auto(OpenFile { node_id: ino, handle });
                if let Some(mount) = self.resolver().resolve(ino).ok().map(|r| r.mount) {
                    mount.open_file();
                }
                reply.opened(fh, 0);
            }
            Err(status) => reply.error(status.to_errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        trace!(ino, fh, offset, size, "read");
        let Some(open) = self.handles.files.get(&fh) else {
            reply.error(libc::EBADF);
            return;
        };
        match open.handle.read(offset.max(0) as u64, size) {
            Ok(data) => reply.data(&data),
            Err(status) => reply.error(status.to_errno()),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        trace!(ino, fh, offset, len = data.len(), "write");
        let Some(open) = self.handles.files.get(&fh) else {
            reply.error(libc::EBADF);
            return;
        };
        match open.handle.write(offset.max(0) as u64, data) {
            Ok(written) => reply.written(written),
            Err(status) => reply.error(status.to_errno()),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        trace!(ino, fh, "release");
        self.handles.files.remove(&fh);
        if let Ok(resolved) = self.resolver().resolve(ino) {
            resolved.mount.close_file();
            self.try_finish_pending_unmount(resolved.mount_node_id);
        }
        reply.ok();
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        let Ok(name) = decode_name(name) else {
            reply.error(libc::EINVAL);
            return;
        };
        trace!(parent, name, "create");
        let (base, backend) = match self.resolve_path(parent) {
            Ok(v) => v,
            Err(status) => {
                reply.error(status.to_errno());
                return;
            }
        };
        let child_path = Self::join(&base, name);

        match backend.create(&child_path, flags, mode) {
            Ok((handle, attr)) => {
                let node_id = self.record_lookup(parent, name, &attr);
                let fh = self
                    .handles
                    .files
                    .insert_auto(OpenFile { node_id, handle });
                if let Some(mount) = self.resolver().resolve(node_id).ok().map(|r| r.mount) {
                    mount.open_file();
                }
                reply.created(
                    &self.entry_ttl(),
                    &Self::to_file_attr(node_id, &attr),
                    GENERATION,
                    fh,
                    0,
                );
            }
            Err(status) => reply.error(status.to_errno()),
        }
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        trace!(ino, "opendir");
        let (path, backend) = match self.resolve_path(ino) {
            Ok(v) => v,
            Err(status) => {
                reply.error(status.to_errno());
                return;
            }
        };
        match backend.open_dir(&path) {
            Ok(stream) => match stream.entries() {
                Ok(entries) => {
                    let fh = self
                        .handles
                        .dirs
                        .insert_auto(OpenDir { node_id: ino, entries });
                    if let Some(mount) = self.resolver().resolve(ino).ok().map(|r| r.mount) {
                        mount.open_dir();
                    }
                    reply.opened(fh, 0);
                }
                Err(status) => reply.error(status.to_errno()),
            },
            Err(status) => reply.error(status.to_errno()),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        trace!(ino, fh, offset, "readdir");
        let Some(open) = self.handles.dirs.get(&fh) else {
            reply.error(libc::EBADF);
            return;
        };

        let mut index = offset.max(0) as usize;
        if index == 0 {
            if reply.add(ino, 1, FileType::Directory, ".") {
                reply.ok();
                return;
            }
            index += 1;
        }
        if index == 1 {
            if reply.add(ino, 2, FileType::Directory, "..") {
                reply.ok();
                return;
            }
            index += 1;
        }

        for (i, entry) in open.entries.iter().enumerate().skip(index.saturating_sub(2)) {
            let next_offset = (i + 2 + 1) as i64;
            let child_id = self
                .inodes
                .lookup_or_create(ino, &entry.name, entry.kind);
            // Inodes allocated here to satisfy readdir are immediately
            // forgotten; the kernel only holds a real reference once it
            // issues a matching lookup.
            self.inodes.forget(child_id, 1);
            if reply.add(child_id, next_offset, entry.kind.to_fuser(), &entry.name) {
                break;
            }
        }
        reply.ok();
    }

    fn releasedir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        _flags: i32,
        reply: ReplyEmpty,
    ) {
        trace!(ino, fh, "releasedir");
        self.handles.dirs.remove(&fh);
        if let Ok(resolved) = self.resolver().resolve(ino) {
            resolved.mount.close_dir();
            self.try_finish_pending_unmount(resolved.mount_node_id);
        }
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, ino: u64, reply: fuser::ReplyStatfs) {
        trace!(ino, "statfs");
        reply.statfs(0, 0, 0, 0, 0, 512, 255, 0);
    }

    fn getxattr(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _name: &OsStr,
        _size: u32,
        reply: fuser::ReplyXattr,
    ) {
        reply.error(Status::ENoSys.to_errno());
    }

    fn setxattr(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _name: &OsStr,
        _value: &[u8],
        _flags: i32,
        _position: u32,
        reply: ReplyEmpty,
    ) {
        reply.error(Status::ENoSys.to_errno());
    }

    fn bmap(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _blocksize: u32,
        _idx: u64,
        reply: fuser::ReplyBmap,
    ) {
        reply.error(Status::ENoSys.to_errno());
    }

    fn ioctl(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _fh: u64,
        _flags: u32,
        _cmd: u32,
        _in_data: &[u8],
        _out_size: u32,
        reply: fuser::ReplyIoctl,
    ) {
        reply.error(Status::ENoSys.to_errno());
    }
}

/// The human-facing `Mount`/`Unmount` surface (spec §4.2's
/// `PathResolver::resolveByPath`, consumed by §4.3's `MountManager`).
/// Addresses mount points by path rather than by a kernel-assigned
/// `NodeId`, since the caller here is an operator or the CLI, not the
/// kernel protocol peer. Not part of the `Filesystem` trait.
impl Connector {
    pub fn mount(
        &self,
        path: &str,
        backend: Arc<dyn crate::backend::Backend>,
    ) -> Result<(), Status> {
        let node_id = self.resolver().resolve_by_path(path)?;

        let (is_dir, ref_count) = self
            .inodes
            .with_entry(node_id, |e| (e.kind() == EntryKind::Directory, e.ref_count()))
            .map_err(|_| Status::ENoEnt)?;
        if !is_dir {
            return Err(Status::EInval);
        }
        if ref_count > 0 {
            // The mount point already has cached children: refuse rather
            // than graft a backend under entries the kernel still holds.
            return Err(Status::EBusy);
        }
        let parent_mount = self
            .resolver()
            .nearest_mount(node_id)
            .unwrap_or(ROOT_ID);

        let ctx = crate::backend::MountContext {
            mount_path: path.to_string(),
        };
        backend.mount(&ctx).map_err(|_| Status::EInval)?;

        match self.mounts.mount(node_id, Some(parent_mount), backend) {
            Ok(record) => {
                self.inodes
                    .with_entry_mut(node_id, |e| e.set_mount(Some(record)))
                    .map_err(|_| Status::ENoEnt)?;
                Ok(())
            }
            Err(crate::mount::MountError::AlreadyMounted) => Err(Status::EBusy),
            Err(_) => Err(Status::EInval),
        }
    }

    /// Requests unmount of the mount at `path`. Returns `Ok(true)` if
    /// removed immediately, `Ok(false)` if deferred pending drain of the
    /// mount point's cached children.
    pub fn unmount(&self, path: &str) -> Result<bool, Status> {
        let node_id = self.resolver().resolve_by_path(path)?;

        let ref_count = self
            .inodes
            .with_entry(node_id, |e| e.ref_count())
            .map_err(|_| Status::ENoEnt)?;
        let parent_mount = self.resolver().nearest_mount(node_id).ok();
        match self.mounts.unmount(node_id, parent_mount, ref_count) {
            Ok(removed) => {
                if removed {
                    self.inodes
                        .with_entry_mut(node_id, |e| e.set_mount(None))
                        .ok();
                }
                Ok(removed)
            }
            Err(crate::mount::MountError::RootMount) => Err(Status::EInval),
            Err(crate::mount::MountError::NotMounted) => Err(Status::ENoEnt),
            Err(crate::mount::MountError::Busy) => Err(Status::EBusy),
            Err(crate::mount::MountError::AlreadyMounted) => unreachable!(),
        }
    }
}
