//! In-memory reference backend for driving connector tests without a
//! real kernel or disk.
//!
//! `MemBackend` implements [`Backend`] over a `HashMap<String, Node>`
//! keyed by full path, protected by a single mutex — adequate for tests,
//! nowhere near what a production backend would use.

use crate::backend::{Attr, Backend, DirEntry, DirStream, EntryKind, FileHandle, MountContext};
use crate::error::Status;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

#[derive(Clone)]
enum NodeData {
    Directory,
    File(Vec<u8>),
    Symlink(String),
}

#[derive(Clone)]
struct Node {
    data: NodeData,
    mode: u32,
    uid: u32,
    gid: u32,
}

impl Node {
    fn kind(&self) -> EntryKind {
        match &self.data {
            NodeData::Directory => EntryKind::Directory,
            NodeData::File(_) => EntryKind::RegularFile,
            NodeData::Symlink(_) => EntryKind::Symlink,
        }
    }

    fn size(&self) -> u64 {
        match &self.data {
            NodeData::File(bytes) => bytes.len() as u64,
            NodeData::Symlink(target) => target.len() as u64,
            NodeData::Directory => 0,
        }
    }
}

struct Inner {
    nodes: HashMap<String, Node>,
}

impl Inner {
    fn child_exists_under(&self, dir: &str) -> bool {
        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{dir}/")
        };
        self.nodes
            .keys()
            .any(|p| !p.is_empty() && p != dir && p.starts_with(&prefix))
    }
}

/// An in-memory filesystem usable as a `Backend`. The empty string `""`
/// denotes its own root.
///
/// Storage lives behind its own `Arc` (rather than requiring `MemBackend`
/// itself to be wrapped in one) so open file handles can share it
/// directly without needing to recover an `Arc<Self>` from `&self`.
pub struct MemBackend {
    inner: Arc<Mutex<Inner>>,
}

impl MemBackend {
    pub fn new() -> Arc<Self> {
        let mut nodes = HashMap::new();
        nodes.insert(
            String::new(),
            Node {
                data: NodeData::Directory,
                mode: 0o755,
                uid: 0,
                gid: 0,
            },
        );
        Arc::new(Self {
            inner: Arc::new(Mutex::new(Inner { nodes })),
        })
    }

    fn attr_for(node: &Node) -> Attr {
        let now = SystemTime::now();
        Attr {
            size: node.size(),
            blocks: node.size().div_ceil(512),
            atime: now,
            mtime: now,
            ctime: now,
            crtime: now,
            kind: node.kind(),
            perm: (node.mode & 0o7777) as u16,
            nlink: 1,
            uid: node.uid,
            gid: node.gid,
            rdev: 0,
            blksize: 512,
            flags: 0,
        }
    }

    /// Pre-seeds a directory at `path`, for test setup convenience.
    pub fn seed_dir(&self, path: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.nodes.insert(
            path.to_string(),
            Node {
                data: NodeData::Directory,
                mode: 0o755,
                uid: 0,
                gid: 0,
            },
        );
    }

    /// Pre-seeds a file at `path` with `content`, for test setup
    /// convenience.
    pub fn seed_file(&self, path: &str, content: &[u8]) {
        let mut inner = self.inner.lock().unwrap();
        inner.nodes.insert(
            path.to_string(),
            Node {
                data: NodeData::File(content.to_vec()),
                mode: 0o644,
                uid: 0,
                gid: 0,
            },
        );
    }
}

struct MemFileHandle {
    inner: Arc<Mutex<Inner>>,
    path: String,
}

impl FileHandle for MemFileHandle {
    fn read(&self, offset: u64, size: u32) -> Result<Vec<u8>, Status> {
        let inner = self.inner.lock().unwrap();
        let node = inner.nodes.get(&self.path).ok_or(Status::ENoEnt)?;
        let NodeData::File(bytes) = &node.data else {
            return Err(Status::EInval);
        };
        let start = (offset as usize).min(bytes.len());
        let end = (start + size as usize).min(bytes.len());
        Ok(bytes[start..end].to_vec())
    }

    fn write(&self, offset: u64, data: &[u8]) -> Result<u32, Status> {
        let mut inner = self.inner.lock().unwrap();
        let node = inner.nodes.get_mut(&self.path).ok_or(Status::ENoEnt)?;
        let NodeData::File(bytes) = &mut node.data else {
            return Err(Status::EInval);
        };
        let start = offset as usize;
        if bytes.len() < start + data.len() {
            bytes.resize(start + data.len(), 0);
        }
        bytes[start..start + data.len()].copy_from_slice(data);
        Ok(data.len() as u32)
    }
}

struct MemDirStream {
    entries: Vec<DirEntry>,
}

impl DirStream for MemDirStream {
    fn entries(&self) -> Result<Vec<DirEntry>, Status> {
        Ok(self.entries.clone())
    }
}

impl Backend for MemBackend {
    fn mount(&self, _ctx: &MountContext) -> Result<(), Status> {
        Ok(())
    }

    fn unmount(&self) {}

    fn get_attr(&self, path: &str) -> Result<Attr, Status> {
        let inner = self.inner.lock().unwrap();
        inner.nodes.get(path).map(Self::attr_for).ok_or(Status::ENoEnt)
    }

    fn chmod(&self, path: &str, mode: u32) -> Result<(), Status> {
        let mut inner = self.inner.lock().unwrap();
        let node = inner.nodes.get_mut(path).ok_or(Status::ENoEnt)?;
        node.mode = mode;
        Ok(())
    }

    fn chown(&self, path: &str, uid: Option<u32>, gid: Option<u32>) -> Result<(), Status> {
        let mut inner = self.inner.lock().unwrap();
        let node = inner.nodes.get_mut(path).ok_or(Status::ENoEnt)?;
        if let Some(uid) = uid {
            node.uid = uid;
        }
        if let Some(gid) = gid {
            node.gid = gid;
        }
        Ok(())
    }

    fn truncate(&self, path: &str, size: u64) -> Result<(), Status> {
        let mut inner = self.inner.lock().unwrap();
        let node = inner.nodes.get_mut(path).ok_or(Status::ENoEnt)?;
        match &mut node.data {
            NodeData::File(bytes) => {
                bytes.resize(size as usize, 0);
                Ok(())
            }
            _ => Err(Status::EInval),
        }
    }

    fn utimens(&self, path: &str, _atime_ns: Option<i64>, _mtime_ns: Option<i64>) -> Result<(), Status> {
        let inner = self.inner.lock().unwrap();
        if inner.nodes.contains_key(path) {
            Ok(())
        } else {
            Err(Status::ENoEnt)
        }
    }

    fn readlink(&self, path: &str) -> Result<String, Status> {
        let inner = self.inner.lock().unwrap();
        match inner.nodes.get(path) {
            Some(Node { data: NodeData::Symlink(target), .. }) => Ok(target.clone()),
            Some(_) => Err(Status::EInval),
            None => Err(Status::ENoEnt),
        }
    }

    fn access(&self, path: &str, _mask: i32) -> Result<(), Status> {
        let inner = self.inner.lock().unwrap();
        if inner.nodes.contains_key(path) {
            Ok(())
        } else {
            Err(Status::ENoEnt)
        }
    }

    fn open(&self, path: &str, _flags: i32) -> Result<Box<dyn FileHandle>, Status> {
        let inner = self.inner.lock().unwrap();
        if !inner.nodes.contains_key(path) {
            return Err(Status::ENoEnt);
        }
        drop(inner);
        Ok(Box::new(MemFileHandle {
            inner: Arc::clone(&self.inner),
            path: path.to_string(),
        }))
    }

    fn open_dir(&self, path: &str) -> Result<Box<dyn DirStream>, Status> {
        let inner = self.inner.lock().unwrap();
        if !matches!(
            inner.nodes.get(path),
            Some(Node { data: NodeData::Directory, .. })
        ) {
            return Err(Status::ENoEnt);
        }
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{path}/")
        };
        let entries = inner
            .nodes
            .iter()
            .filter_map(|(p, node)| {
                let rest = p.strip_prefix(&prefix)?;
                if rest.is_empty() || rest.contains('/') {
                    return None;
                }
                Some(DirEntry {
                    name: rest.to_string(),
                    kind: node.kind(),
                })
            })
            .collect();
        Ok(Box::new(MemDirStream { entries }))
    }

    fn create(
        &self,
        path: &str,
        _flags: i32,
        mode: u32,
    ) -> Result<(Box<dyn FileHandle>, Attr), Status> {
        let mut inner = self.inner.lock().unwrap();
        if inner.nodes.contains_key(path) {
            return Err(Status::Errno(libc::EEXIST));
        }
        let node = Node {
            data: NodeData::File(Vec::new()),
            mode,
            uid: 0,
            gid: 0,
        };
        let attr = Self::attr_for(&node);
        inner.nodes.insert(path.to_string(), node);
        drop(inner);
        Ok((
            Box::new(MemFileHandle {
                inner: Arc::clone(&self.inner),
                path: path.to_string(),
            }),
            attr,
        ))
    }

    fn mknod(&self, path: &str, mode: u32, _rdev: u32) -> Result<(), Status> {
        let mut inner = self.inner.lock().unwrap();
        if inner.nodes.contains_key(path) {
            return Err(Status::Errno(libc::EEXIST));
        }
        inner.nodes.insert(
            path.to_string(),
            Node {
                data: NodeData::File(Vec::new()),
                mode,
                uid: 0,
                gid: 0,
            },
        );
        Ok(())
    }

    fn mkdir(&self, path: &str, mode: u32) -> Result<(), Status> {
        let mut inner = self.inner.lock().unwrap();
        if inner.nodes.contains_key(path) {
            return Err(Status::Errno(libc::EEXIST));
        }
        inner.nodes.insert(
            path.to_string(),
            Node {
                data: NodeData::Directory,
                mode,
                uid: 0,
                gid: 0,
            },
        );
        Ok(())
    }

    fn unlink(&self, path: &str) -> Result<(), Status> {
        let mut inner = self.inner.lock().unwrap();
        match inner.nodes.get(path) {
            Some(Node { data: NodeData::Directory, .. }) => Err(Status::EInval),
            Some(_) => {
                inner.nodes.remove(path);
                Ok(())
            }
            None => Err(Status::ENoEnt),
        }
    }

    fn rmdir(&self, path: &str) -> Result<(), Status> {
        let mut inner = self.inner.lock().unwrap();
        match inner.nodes.get(path) {
            Some(Node { data: NodeData::Directory, .. }) => {
                if inner.child_exists_under(path) {
                    return Err(Status::Errno(libc::ENOTEMPTY));
                }
                inner.nodes.remove(path);
                Ok(())
            }
            Some(_) => Err(Status::Errno(libc::ENOTDIR)),
            None => Err(Status::ENoEnt),
        }
    }

    fn symlink(&self, target: &str, link_path: &str) -> Result<(), Status> {
        let mut inner = self.inner.lock().unwrap();
        if inner.nodes.contains_key(link_path) {
            return Err(Status::Errno(libc::EEXIST));
        }
        inner.nodes.insert(
            link_path.to_string(),
            Node {
                data: NodeData::Symlink(target.to_string()),
                mode: 0o777,
                uid: 0,
                gid: 0,
            },
        );
        Ok(())
    }

    fn rename(&self, old: &str, new: &str) -> Result<(), Status> {
        let mut inner = self.inner.lock().unwrap();
        let Some(node) = inner.nodes.remove(old) else {
            return Err(Status::ENoEnt);
        };
        inner.nodes.insert(new.to_string(), node);
        Ok(())
    }

    fn link(&self, old_path: &str, new_path: &str) -> Result<(), Status> {
        let mut inner = self.inner.lock().unwrap();
        let Some(node) = inner.nodes.get(old_path).cloned() else {
            return Err(Status::ENoEnt);
        };
        inner.nodes.insert(new_path.to_string(), node);
        Ok(())
    }
}
