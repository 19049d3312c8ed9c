//! amanmcp daemon — resident hybrid code-search service.
//!
//! The binary in `main.rs` is a thin shell; everything testable lives
//! here: the project registry with its LRU lifecycle, the loopback
//! JSON-RPC server, the single-instance daemon plumbing, the lazy
//! compaction manager, and the offline indexing pipeline.

pub mod compact;
pub mod daemon;
pub mod indexer;
pub mod registry;
pub mod rpc;

use std::path::PathBuf;

/// Runtime directory holding the daemon socket and PID file.
/// Default: `~/.amanmcp/`.
pub fn runtime_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".amanmcp"))
}

/// Socket path inside a runtime directory.
pub fn socket_path(runtime_dir: &std::path::Path) -> PathBuf {
    runtime_dir.join("daemon.sock")
}

/// PID-file path inside a runtime directory.
pub fn pid_path(runtime_dir: &std::path::Path) -> PathBuf {
    runtime_dir.join("daemon.pid")
}
