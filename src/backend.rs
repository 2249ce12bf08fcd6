//! The abstract backend filesystem capability.
//!
//! Everything in this module is a consumed interface: the wire protocol,
//! the backend's own storage, and directory-stream readback all live on
//! the other side of it. The connector only needs to know it can hand a
//! path to a backend and get attributes, handles, or a status back.

use crate::error::Status;
use std::time::SystemTime;

/// File-type bits the connector tracks for an entry.
///
/// Kept as a small enum rather than a bare mode mask so the dispatcher and
/// inode table can match on it exhaustively; converted to/from the kernel
/// protocol's mode bits at the dispatcher boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Directory,
    RegularFile,
    Symlink,
    CharDevice,
    BlockDevice,
    Fifo,
    Socket,
}

impl EntryKind {
    /// Decodes the file-type bits out of a POSIX `st_mode` value.
    pub fn from_mode(mode: u32) -> Self {
        match mode & libc::S_IFMT {
            libc::S_IFDIR => EntryKind::Directory,
            libc::S_IFLNK => EntryKind::Symlink,
            libc::S_IFCHR => EntryKind::CharDevice,
            libc::S_IFBLK => EntryKind::BlockDevice,
            libc::S_IFIFO => EntryKind::Fifo,
            libc::S_IFSOCK => EntryKind::Socket,
            _ => EntryKind::RegularFile,
        }
    }

    pub fn is_directory(self) -> bool {
        matches!(self, EntryKind::Directory)
    }

    pub fn to_fuser(self) -> fuser::FileType {
        match self {
            EntryKind::Directory => fuser::FileType::Directory,
            EntryKind::RegularFile => fuser::FileType::RegularFile,
            EntryKind::Symlink => fuser::FileType::Symlink,
            EntryKind::CharDevice => fuser::FileType::CharDevice,
            EntryKind::BlockDevice => fuser::FileType::BlockDevice,
            EntryKind::Fifo => fuser::FileType::NamedPipe,
            EntryKind::Socket => fuser::FileType::Socket,
        }
    }
}

/// Attributes a backend reports for a path.
///
/// `ino` is deliberately absent: the connector always overwrites the
/// inode field with its own assigned `NodeId` before replying to the
/// kernel, overriding whatever the backend would have put there.
#[derive(Debug, Clone, Copy)]
pub struct Attr {
    pub size: u64,
    pub blocks: u64,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    pub crtime: SystemTime,
    pub kind: EntryKind,
    pub perm: u16,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u32,
    pub blksize: u32,
    pub flags: u32,
}

/// One entry yielded while listing a directory.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
}

/// An open file. Read/write never touch the inode table: the handle
/// already encapsulates everything needed to service them.
pub trait FileHandle: Send + Sync {
    fn read(&self, offset: u64, size: u32) -> Result<Vec<u8>, Status>;
    fn write(&self, offset: u64, data: &[u8]) -> Result<u32, Status>;
}

/// An open directory stream. Listing it is out of scope for the
/// connector's bookkeeping; the dispatcher only allocates inodes for the
/// names it yields.
pub trait DirStream: Send + Sync {
    fn entries(&self) -> Result<Vec<DirEntry>, Status>;
}

/// Passed to a backend's `mount` so it can reach back into the connector
/// if it needs to (e.g. to invalidate kernel caches on out-of-band
/// changes). Opaque from the backend's point of view.
pub struct MountContext {
    pub mount_path: String,
}

/// The backend filesystem capability the connector forwards all
/// path-addressed operations to.
///
/// `chmod`/`chown`/`truncate`/`utimens` are kept as four independent
/// methods, matching the external-interface list the design doc gives
/// for `SetAttr`, rather than one composite call: the dispatcher applies
/// only the fields the kernel's valid-mask actually requested, in a
/// fixed order, and each call's success or failure is independent of
/// the others (see `OperationDispatcher::setattr`).
pub trait Backend: Send + Sync {
    fn mount(&self, ctx: &MountContext) -> Result<(), Status>;
    fn unmount(&self);

    fn get_attr(&self, path: &str) -> Result<Attr, Status>;
    fn chmod(&self, path: &str, mode: u32) -> Result<(), Status>;
    fn chown(&self, path: &str, uid: Option<u32>, gid: Option<u32>) -> Result<(), Status>;
    fn truncate(&self, path: &str, size: u64) -> Result<(), Status>;
    fn utimens(&self, path: &str, atime_ns: Option<i64>, mtime_ns: Option<i64>) -> Result<(), Status>;
    fn readlink(&self, path: &str) -> Result<String, Status>;
    fn access(&self, path: &str, mask: i32) -> Result<(), Status>;

    fn open(&self, path: &str, flags: i32) -> Result<Box<dyn FileHandle>, Status>;
    fn open_dir(&self, path: &str) -> Result<Box<dyn DirStream>, Status>;
    fn create(
        &self,
        path: &str,
        flags: i32,
        mode: u32,
    ) -> Result<(Box<dyn FileHandle>, Attr), Status>;

    fn mknod(&self, path: &str, mode: u32, rdev: u32) -> Result<(), Status>;
    fn mkdir(&self, path: &str, mode: u32) -> Result<(), Status>;
    fn unlink(&self, path: &str) -> Result<(), Status>;
    fn rmdir(&self, path: &str) -> Result<(), Status>;
    fn symlink(&self, target: &str, link_path: &str) -> Result<(), Status>;
    fn rename(&self, old: &str, new: &str) -> Result<(), Status>;
    fn link(&self, old_path: &str, new_path: &str) -> Result<(), Status>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_kind_from_mode() {
        assert_eq!(EntryKind::from_mode(libc::S_IFDIR | 0o755), EntryKind::Directory);
        assert_eq!(EntryKind::from_mode(libc::S_IFREG | 0o644), EntryKind::RegularFile);
        assert_eq!(EntryKind::from_mode(libc::S_IFLNK | 0o777), EntryKind::Symlink);
    }

    #[test]
    fn entry_kind_is_directory() {
        assert!(EntryKind::Directory.is_directory());
        assert!(!EntryKind::RegularFile.is_directory());
    }
}
