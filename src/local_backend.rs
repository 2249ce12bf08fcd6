//! A disk-backed [`Backend`] rooted at a real directory on the host.
//!
//! This is the connector binary's own reference implementation of the
//! "backend filesystem capability" the library treats as an external
//! collaborator (see the crate's module docs): it exists so `pathfsd`
//! has something concrete to graft onto a mount point, not as part of
//! the connector's public surface. Library consumers are expected to
//! bring their own `Backend`.

use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::{symlink as unix_symlink, FileExt, MetadataExt, PermissionsExt};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use pathfs_connector::{Attr, Backend, DirEntry, DirStream, EntryKind, FileHandle, MountContext, Status};

/// Forwards every operation to the real filesystem under `root`.
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn full_path(&self, path: &str) -> PathBuf {
        if path.is_empty() {
            self.root.clone()
        } else {
            self.root.join(path)
        }
    }

    fn attr_from_metadata(meta: &fs::Metadata) -> Attr {
        let to_time = |secs: i64, nanos: i64| {
            UNIX_EPOCH + Duration::from_secs(secs.max(0) as u64) + Duration::from_nanos(nanos.max(0) as u64)
        };
        Attr {
            size: meta.len(),
            blocks: meta.blocks(),
            atime: to_time(meta.atime(), meta.atime_nsec()),
            mtime: to_time(meta.mtime(), meta.mtime_nsec()),
            ctime: to_time(meta.ctime(), meta.ctime_nsec()),
            crtime: SystemTime::now(),
            kind: EntryKind::from_mode(meta.mode()),
            perm: (meta.mode() & 0o7777) as u16,
            nlink: meta.nlink() as u32,
            uid: meta.uid(),
            gid: meta.gid(),
            rdev: meta.rdev() as u32,
            blksize: meta.blksize() as u32,
            flags: 0,
        }
    }
}

fn map_io_err(e: std::io::Error) -> Status {
    Status::from_io_error(&e)
}

fn map_nix_err(e: nix::Error) -> Status {
    Status::Errno(e as i32)
}

struct LocalFileHandle {
    file: Mutex<File>,
}

impl FileHandle for LocalFileHandle {
    fn read(&self, offset: u64, size: u32) -> Result<Vec<u8>, Status> {
        let file = self.file.lock().unwrap();
        let mut buf = vec![0u8; size as usize];
        let read = file.read_at(&mut buf, offset).map_err(map_io_err)?;
        buf.truncate(read);
        Ok(buf)
    }

    fn write(&self, offset: u64, data: &[u8]) -> Result<u32, Status> {
        let file = self.file.lock().unwrap();
        file.write_at(data, offset).map_err(map_io_err)?;
        Ok(data.len() as u32)
    }
}

struct LocalDirStream {
    path: PathBuf,
}

impl DirStream for LocalDirStream {
    fn entries(&self) -> Result<Vec<DirEntry>, Status> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.path).map_err(map_io_err)? {
            let entry = entry.map_err(map_io_err)?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            let kind = entry
                .metadata()
                .map(|m| EntryKind::from_mode(m.mode()))
                .unwrap_or(EntryKind::RegularFile);
            out.push(DirEntry { name, kind });
        }
        Ok(out)
    }
}

impl Backend for LocalBackend {
    fn mount(&self, _ctx: &MountContext) -> Result<(), Status> {
        if !self.root.is_dir() {
            return Err(Status::EInval);
        }
        Ok(())
    }

    fn unmount(&self) {}

    fn get_attr(&self, path: &str) -> Result<Attr, Status> {
        let meta = fs::symlink_metadata(self.full_path(path)).map_err(map_io_err)?;
        Ok(Self::attr_from_metadata(&meta))
    }

    fn chmod(&self, path: &str, mode: u32) -> Result<(), Status> {
        fs::set_permissions(self.full_path(path), fs::Permissions::from_mode(mode)).map_err(map_io_err)
    }

    fn chown(&self, path: &str, uid: Option<u32>, gid: Option<u32>) -> Result<(), Status> {
        nix::unistd::chown(
            &self.full_path(path),
            uid.map(nix::unistd::Uid::from_raw),
            gid.map(nix::unistd::Gid::from_raw),
        )
        .map_err(map_nix_err)
    }

    fn truncate(&self, path: &str, size: u64) -> Result<(), Status> {
        let file = OpenOptions::new().write(true).open(self.full_path(path)).map_err(map_io_err)?;
        file.set_len(size).map_err(map_io_err)
    }

    fn utimens(&self, path: &str, atime_ns: Option<i64>, mtime_ns: Option<i64>) -> Result<(), Status> {
        use nix::sys::stat::{utimensat, UtimensatFlags};
        use nix::sys::time::TimeSpec;

        let full = self.full_path(path);
        let current = fs::symlink_metadata(&full).map_err(map_io_err)?;
        let atime = atime_ns.unwrap_or(current.atime_nsec() + current.atime() * 1_000_000_000);
        let mtime = mtime_ns.unwrap_or(current.mtime_nsec() + current.mtime() * 1_000_000_000);

        utimensat(
            None,
            &full,
            &TimeSpec::new(atime / 1_000_000_000, atime % 1_000_000_000),
            &TimeSpec::new(mtime / 1_000_000_000, mtime % 1_000_000_000),
            UtimensatFlags::NoFollowSymlink,
        )
        .map_err(map_nix_err)
    }

    fn readlink(&self, path: &str) -> Result<String, Status> {
        let target = fs::read_link(self.full_path(path)).map_err(map_io_err)?;
        target.to_str().map(str::to_string).ok_or(Status::EInval)
    }

    fn access(&self, path: &str, mask: i32) -> Result<(), Status> {
        let flags = nix::unistd::AccessFlags::from_bits_truncate(mask);
        nix::unistd::access(&self.full_path(path), flags).map_err(map_nix_err)
    }

    fn open(&self, path: &str, _flags: i32) -> Result<Box<dyn FileHandle>, Status> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(self.full_path(path))
            .map_err(map_io_err)?;
        Ok(Box::new(LocalFileHandle { file: Mutex::new(file) }))
    }

    fn open_dir(&self, path: &str) -> Result<Box<dyn DirStream>, Status> {
        let full = self.full_path(path);
        if !full.is_dir() {
            return Err(Status::ENoEnt);
        }
        Ok(Box::new(LocalDirStream { path: full }))
    }

    fn create(&self, path: &str, _flags: i32, mode: u32) -> Result<(Box<dyn FileHandle>, Attr), Status> {
        let full = self.full_path(path);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .mode(mode)
            .open(&full)
            .map_err(map_io_err)?;
        let meta = file.metadata().map_err(map_io_err)?;
        let attr = Self::attr_from_metadata(&meta);
        Ok((Box::new(LocalFileHandle { file: Mutex::new(file) }), attr))
    }

    fn mknod(&self, path: &str, mode: u32, rdev: u32) -> Result<(), Status> {
        use nix::sys::stat::{mknod, Mode, SFlag};
        let kind = SFlag::from_bits_truncate(mode & libc::S_IFMT);
        let perm = Mode::from_bits_truncate(mode & 0o7777);
        mknod(&self.full_path(path), kind, perm, u64::from(rdev)).map_err(map_nix_err)
    }

    fn mkdir(&self, path: &str, mode: u32) -> Result<(), Status> {
        fs::create_dir(self.full_path(path)).map_err(map_io_err)?;
        fs::set_permissions(self.full_path(path), fs::Permissions::from_mode(mode)).map_err(map_io_err)
    }

    fn unlink(&self, path: &str) -> Result<(), Status> {
        fs::remove_file(self.full_path(path)).map_err(map_io_err)
    }

    fn rmdir(&self, path: &str) -> Result<(), Status> {
        fs::remove_dir(self.full_path(path)).map_err(map_io_err)
    }

    fn symlink(&self, target: &str, link_path: &str) -> Result<(), Status> {
        unix_symlink(target, self.full_path(link_path)).map_err(map_io_err)
    }

    fn rename(&self, old: &str, new: &str) -> Result<(), Status> {
        fs::rename(self.full_path(old), self.full_path(new)).map_err(map_io_err)
    }

    fn link(&self, old_path: &str, new_path: &str) -> Result<(), Status> {
        fs::hard_link(self.full_path(old_path), self.full_path(new_path)).map_err(map_io_err)
    }
}
