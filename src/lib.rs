//! A path-based filesystem connector.
//!
//! Bridges a kernel-style, `NodeId`-addressed protocol (modeled on
//! FUSE) to backend filesystems addressed by string paths. The crate's
//! hard problem is bookkeeping, not I/O: tracking which `NodeId`s the
//! kernel still holds references to, reconstructing paths by walking
//! parent links, and deciding when a mount point is safe to detach.
//!
//! # Usage
//!
//! ```ignore
//! use pathfs_connector::{Config, Connector};
//!
//! let connector = Connector::new(root_backend, Config::default());
//! fuser::mount2(connector, &mountpoint, &[])?;
//! ```

pub mod backend;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handles;
pub mod inode;
pub mod mount;
pub mod path_resolver;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use backend::{Attr, Backend, DirEntry, DirStream, EntryKind, FileHandle, MountContext};
pub use config::Config;
pub use dispatcher::Connector;
pub use error::Status;
pub use handles::{HandleTable, HandleTables, OpenDir, OpenFile};
pub use inode::{InodeEntry, InodeTable, UnknownNode, ROOT_ID};
pub use mount::{MountError, MountManager, MountRecord};
pub use path_resolver::{PathResolver, Resolved};
