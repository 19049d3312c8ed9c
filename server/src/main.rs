//! amanmcp binary — thin CLI shell over the [`amanmcp_server`] library crate.

use clap::Parser;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use amanmcp_core::config;
use amanmcp_server::daemon;

// ---------------------------------------------------------------------------
// CLI definition (clap derive)
// ---------------------------------------------------------------------------

/// Resident hybrid code-search daemon serving loopback JSON-RPC.
#[derive(Parser)]
#[command(name = "amanmcp", version, about, long_about = None)]
struct Cli {
    /// Runtime directory for the socket and PID file (default: ~/.amanmcp)
    #[arg(long)]
    runtime_dir: Option<PathBuf>,

    /// User-scope config file (default: ~/.amanmcp/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Project root whose project-scope config joins the merge
    #[arg(long)]
    root: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Signal wiring
// ---------------------------------------------------------------------------

/// Route termination signals into the daemon's cancellation token; the
/// run loop drains handlers and removes its runtime files once cancelled.
fn spawn_signal_listener(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let signal = wait_for_termination().await;
        info!(signal, "shutdown requested");
        shutdown.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_termination() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => "SIGINT",
                _ = sigterm.recv() => "SIGTERM",
            }
        }
        Err(e) => {
            warn!(error = %e, "could not register SIGTERM handler, SIGINT only");
            let _ = tokio::signal::ctrl_c().await;
            "SIGINT"
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "ctrl-c"
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match config::resolve(cli.config.as_deref(), cli.root.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    // Initialize structured logging; the resolved log level feeds the
    // default directive, RUST_LOG still wins when set.
    let directive = format!("amanmcp={}", config.log_level)
        .parse()
        .unwrap_or_else(|_| "amanmcp=info".parse().expect("static directive parses"));
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(directive))
        .with_target(false)
        .init();

    let runtime_dir = match cli.runtime_dir.or_else(amanmcp_server::runtime_dir) {
        Some(d) => d,
        None => {
            eprintln!("Error: could not determine a runtime directory. Use --runtime-dir <path>");
            std::process::exit(1);
        }
    };

    let shutdown = CancellationToken::new();
    spawn_signal_listener(shutdown.clone());

    if let Err(e) = daemon::run(runtime_dir, config, shutdown).await {
        error!(error = %e, "daemon exited with error");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
