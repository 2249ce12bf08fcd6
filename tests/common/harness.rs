//! Test mount harness for FUSE integration tests.
//!
//! Spawns a real kernel FUSE mount backed by the in-memory [`MemBackend`]
//! reference backend, so tests exercise the connector end to end through
//! actual `open(2)`/`read(2)`/`rename(2)` syscalls rather than calling the
//! `Filesystem` trait directly.

#![allow(dead_code)]

use fuser::{BackgroundSession, MountOption};
use pathfs_connector::testing::MemBackend;
use pathfs_connector::{Config, Connector};
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const MOUNT_READY_TIMEOUT: Duration = Duration::from_secs(5);
const MOUNT_CHECK_INTERVAL: Duration = Duration::from_millis(50);

/// A connector mounted at a temporary mountpoint, backed by an in-memory
/// filesystem. Unmounts on drop.
pub struct TestMount {
    _session: BackgroundSession,
    mount_path: PathBuf,
    _temp_mount: TempDir,
}

impl TestMount {
    /// Mounts a fresh connector with default cache timeouts over an empty
    /// in-memory backend.
    pub fn new() -> Result<Self, String> {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Result<Self, String> {
        Self::with_config_and_submount(config, None)
    }

    /// Like [`Self::with_config`], but additionally grafts a second
    /// in-memory backend under `submount_path` (a single path component
    /// directly below the root) before the kernel ever sees the mount, so
    /// tests can exercise cross-mount behavior without racing a real
    /// `Lookup` against the admin `mount` call.
    pub fn with_submount(submount_path: &str) -> Result<(Self, Arc<MemBackend>), String> {
        let sub_backend = MemBackend::new();
        let backend_handle: Arc<dyn pathfs_connector::Backend> = sub_backend.clone();
        let mount = Self::with_config_and_submount(
            Config::default(),
            Some((submount_path, backend_handle)),
        )?;
        Ok((mount, sub_backend))
    }

    fn with_config_and_submount(
        config: Config,
        submount: Option<(&str, Arc<dyn pathfs_connector::Backend>)>,
    ) -> Result<Self, String> {
        let temp_mount = TempDir::new().map_err(|e| format!("failed to create temp dir: {e}"))?;
        let mount_path = temp_mount.path().join("mnt");
        fs::create_dir(&mount_path).map_err(|e| format!("failed to create mount point: {e}"))?;

        let connector = Connector::new(MemBackend::new(), config);
        if let Some((path, backend)) = submount {
            let name = path.trim_start_matches('/');
            connector
                .inodes()
                .lookup_or_create(pathfs_connector::ROOT_ID, name, pathfs_connector::EntryKind::Directory);
            connector
                .mount(path, backend)
                .map_err(|e| format!("failed to pre-mount {path}: {e:?}"))?;
        }

        let options = vec![
            MountOption::FSName("pathfs-test".to_string()),
            MountOption::AutoUnmount,
        ];
        let session = fuser::spawn_mount2(connector, &mount_path, &options)
            .map_err(|e| format!("failed to mount: {e}"))?;

        Self::wait_for_mount(&mount_path)?;

        Ok(Self {
            _session: session,
            mount_path,
            _temp_mount: temp_mount,
        })
    }

    fn wait_for_mount(mount_path: &Path) -> Result<(), String> {
        let parent_dev = fs::metadata(mount_path.parent().ok_or("mount path has no parent")?)
            .map_err(|e| format!("failed to stat parent: {e}"))?
            .dev();

        let deadline = Instant::now() + MOUNT_READY_TIMEOUT;
        while Instant::now() < deadline {
            if let Ok(meta) = fs::metadata(mount_path) {
                if meta.dev() != parent_dev {
                    return Ok(());
                }
            }
            thread::sleep(MOUNT_CHECK_INTERVAL);
        }
        Err("mount did not become ready in time".to_string())
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.mount_path.join(relative.trim_start_matches('/'))
    }
}

/// Whether this system has a usable FUSE device.
pub fn fuse_available() -> bool {
    #[cfg(target_os = "linux")]
    {
        Path::new("/dev/fuse").exists()
    }
    #[cfg(not(target_os = "linux"))]
    {
        false
    }
}

/// Skip the current test if FUSE isn't available on this machine.
#[macro_export]
macro_rules! skip_if_no_fuse {
    () => {
        if !$crate::common::harness::fuse_available() {
            eprintln!("skipping test: FUSE not available on this system");
            return;
        }
    };
}

/// Skip the current test if mounting fails (common in unprivileged CI).
#[macro_export]
macro_rules! require_mount {
    ($mount_result:expr) => {
        match $mount_result {
            Ok(m) => m,
            Err(e) => {
                eprintln!("skipping test: {e}");
                return;
            }
        }
    };
}
