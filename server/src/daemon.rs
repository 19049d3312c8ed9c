//! Daemon lifecycle: single-instance PID locking, socket hygiene, and
//! graceful shutdown wiring.
//!
//! The daemon is a process singleton enforced by the PID file, not by any
//! in-language construct. Startup refuses to proceed while a live owner
//! holds the PID file; a dead owner's record is treated as stale and
//! overwritten. Socket and PID cleanup on exit is best-effort and never
//! blocks the exit path.

use crate::compact::CompactionManager;
use crate::registry::ProjectRegistry;
use crate::rpc::{RpcServer, DEFAULT_GRACE};
use amanmcp_core::config::Config;
use amanmcp_core::embed::{Embedder, HashEmbedder};
use anyhow::{bail, Context};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// PID file
// ---------------------------------------------------------------------------

/// Owned PID record. Removing it on drop is best-effort.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Acquire the PID file at `path`. Refuses when the recorded process
    /// is still alive; stale records are overwritten.
    pub fn acquire(path: PathBuf) -> anyhow::Result<PidFile> {
        if let Ok(text) = fs::read_to_string(&path) {
            if let Ok(pid) = text.trim().parse::<i32>() {
                if pid > 0 && process_alive(pid) {
                    bail!("daemon already running (pid {pid}, {})", path.display());
                }
                warn!(pid, "stale pid file, taking over");
            }
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating runtime dir {}", parent.display()))?;
        }
        fs::write(&path, format!("{}\n", std::process::id()))
            .with_context(|| format!("writing pid file {}", path.display()))?;
        Ok(PidFile { path })
    }

    /// Remove the record. Failure is logged, never fatal.
    pub fn release(&self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "could not remove pid file");
            }
        }
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        self.release();
    }
}

/// Null-signal liveness probe.
fn process_alive(pid: i32) -> bool {
    unsafe { libc::kill(pid, 0) == 0 }
}

// ---------------------------------------------------------------------------
// Embedder wiring
// ---------------------------------------------------------------------------

/// Resolve the configured embeddings provider to a capability handle.
/// Model-server providers resolve to the capability interface only; when
/// no client is wired in, search degrades to keyword-only.
pub fn build_embedder(config: &Config) -> Option<Arc<dyn Embedder>> {
    match config.embeddings_provider.as_str() {
        "hash" => Some(Arc::new(HashEmbedder::default())),
        "disabled" => None,
        other => {
            warn!(provider = other, "no embedder client available, keyword-only search");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Daemon run loop
// ---------------------------------------------------------------------------

/// Run the daemon until `shutdown` is cancelled. Binds the socket, starts
/// the RPC server and compaction manager, and tears everything down in
/// order on the way out.
pub async fn run(
    runtime_dir: PathBuf,
    config: Config,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    fs::create_dir_all(&runtime_dir)
        .with_context(|| format!("creating runtime dir {}", runtime_dir.display()))?;

    let pid_file = PidFile::acquire(crate::pid_path(&runtime_dir))?;

    // Stale socket recovery: a previous crash can leave the socket behind.
    let socket = crate::socket_path(&runtime_dir);
    match fs::remove_file(&socket) {
        Ok(()) => warn!(path = %socket.display(), "removed stale socket"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => bail!("cannot remove stale socket {}: {e}", socket.display()),
    }

    let listener = UnixListener::bind(&socket)
        .with_context(|| format!("binding socket {}", socket.display()))?;

    let registry = Arc::new(ProjectRegistry::new(config.max_projects));
    let compaction = CompactionManager::new(
        Arc::clone(&registry),
        config.compaction.clone(),
        shutdown.clone(),
    );
    let embedder = build_embedder(&config);
    let server = RpcServer::new(Arc::clone(&registry), compaction, embedder, config);

    info!(socket = %socket.display(), pid = std::process::id(), "daemon ready");

    server.serve(listener, shutdown.clone(), DEFAULT_GRACE).await;

    // Shutdown order: handlers drained by serve, compaction observed the
    // shared token, now persist and release state.
    registry.close_all();
    remove_socket(&socket);
    pid_file.release();
    info!("daemon stopped");
    Ok(())
}

fn remove_socket(socket: &Path) {
    if let Err(e) = fs::remove_file(socket) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %socket.display(), error = %e, "could not remove socket");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pid_acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.pid");
        let pid_file = PidFile::acquire(path.clone()).unwrap();
        let recorded: i32 =
            fs::read_to_string(&path).unwrap().trim().parse().unwrap();
        assert_eq!(recorded, std::process::id() as i32);
        pid_file.release();
        assert!(!path.exists());
    }

    #[test]
    fn test_live_pid_refuses_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.pid");
        // This test process is definitely alive.
        fs::write(&path, format!("{}\n", std::process::id())).unwrap();
        let err = PidFile::acquire(path).unwrap_err();
        assert!(err.to_string().contains("already running"));
    }

    #[test]
    fn test_stale_pid_taken_over() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.pid");
        // A pid far beyond pid_max on any sane box.
        fs::write(&path, "999999999\n").unwrap();
        let _pid_file = PidFile::acquire(path.clone()).unwrap();
        let recorded: i32 =
            fs::read_to_string(&path).unwrap().trim().parse().unwrap();
        assert_eq!(recorded, std::process::id() as i32);
    }

    #[test]
    fn test_garbage_pid_file_taken_over() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.pid");
        fs::write(&path, "not a pid\n").unwrap();
        PidFile::acquire(path).unwrap();
    }

    #[test]
    fn test_build_embedder_by_provider() {
        let mut config = Config::default();
        assert_eq!(build_embedder(&config).unwrap().name(), "hash");
        config.embeddings_provider = "disabled".to_string();
        assert!(build_embedder(&config).is_none());
        config.embeddings_provider = "ollama".to_string();
        assert!(build_embedder(&config).is_none(), "no bundled client");
    }
}
