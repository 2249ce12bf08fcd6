//! pathfsd - Mount a directory tree through the path-based connector.
//!
//! Usage: pathfsd --root <path> --mount <mountpoint>

mod local_backend;

use anyhow::{Context, Result};
use clap::Parser;
use local_backend::LocalBackend;
use pathfs_connector::{Config, Connector, InodeTable};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "pathfsd")]
#[command(about = "Bridge a path-addressed directory tree through a NodeId-based FUSE connector")]
#[command(version)]
struct Cli {
    /// Directory to serve as the root backend
    #[arg(short, long)]
    root: PathBuf,

    /// Mountpoint to attach the filesystem at
    #[arg(short, long)]
    mount: PathBuf,

    /// Run in foreground (don't auto-unmount on exit)
    #[arg(short, long)]
    foreground: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Load connector configuration (entry/attr/negative timeouts) from a JSON file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let Some(path) = path else {
        return Ok(Config::default());
    };
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parsing config file {}", path.display()))
}

/// Spawns a background thread that dumps the inode table to stderr every
/// time the process receives `SIGUSR1` — useful for diagnosing a stuck
/// unmount or a lookup-count leak without attaching a debugger.
///
/// `SIGUSR1` is blocked on the calling thread first, via `sigwait` rather
/// than an `extern "C"` handler, so the dump can safely take the table's
/// lock and format text instead of being confined to async-signal-safe
/// calls.
fn spawn_diagnostics_thread(inodes: InodeTable) -> Result<()> {
    use nix::sys::signal::{SigSet, Signal};

    let mut mask = SigSet::empty();
    mask.add(Signal::SIGUSR1);
    mask.thread_block().context("blocking SIGUSR1 on the main thread")?;

    std::thread::Builder::new()
        .name("diagnostics".to_string())
        .spawn(move || loop {
            if mask.wait().is_err() {
                return;
            }
            info!("SIGUSR1 received, dumping inode table");
            for (id, parent, name, lookups, refs) in inodes.debug_snapshot() {
                eprintln!(
                    "inode {id} parent={parent} name={name:?} lookup_count={lookups} ref_count={refs}"
                );
            }
        })
        .context("spawning diagnostics thread")?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    if !cli.root.is_dir() {
        anyhow::bail!("root path is not a directory: {}", cli.root.display());
    }
    if !cli.mount.exists() {
        anyhow::bail!("mountpoint does not exist: {}", cli.mount.display());
    }

    let config = load_config(cli.config.as_ref())?;
    let backend = Arc::new(LocalBackend::new(cli.root.clone()));
    let connector = Connector::new(backend, config);

    spawn_diagnostics_thread(connector.inodes())?;

    let mut options = vec![
        fuser::MountOption::FSName("pathfs".to_string()),
        fuser::MountOption::Subtype("pathfsd".to_string()),
    ];
    if !cli.foreground {
        options.push(fuser::MountOption::AutoUnmount);
    }

    info!(root = %cli.root.display(), mount = %cli.mount.display(), "mounting filesystem");

    let session = fuser::spawn_mount2(connector, &cli.mount, &options)
        .context("failed to mount filesystem")?;

    let (tx, rx) = std::sync::mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("installing Ctrl+C handler")?;

    info!("mounted (press Ctrl+C to unmount)");
    if rx.recv().is_err() {
        error!("shutdown signal channel closed unexpectedly");
    }

    info!("unmounting");
    drop(session);
    Ok(())
}
