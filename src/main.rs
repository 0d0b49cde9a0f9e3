//! pollkv server binary.

use pollkv::config::Config;
use pollkv::runtime;
use pollkv::storage::Storage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        runtime = ?config.runtime,
        max_connections = config.max_connections,
        poll_timeout_ms = config.poll_timeout_ms,
        "Starting pollkv server"
    );

    // Listener setup failures are fatal before the loop starts
    let listener = runtime::listener::bind(config.listen, config.backlog)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    spawn_signal_watcher(Arc::clone(&shutdown))?;

    let mut storage = Storage::new();
    runtime::run(listener, &config, &mut storage, &shutdown)?;

    info!(items = storage.len(), "Server stopped");
    Ok(())
}

/// Flip `shutdown` on Ctrl-C or SIGTERM.
///
/// The watcher runs on its own thread with a current-thread tokio runtime
/// and never touches connections or the store.
fn spawn_signal_watcher(shutdown: Arc<AtomicBool>) -> std::io::Result<()> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    thread::Builder::new()
        .name("signal-watcher".to_string())
        .spawn(move || {
            rt.block_on(wait_for_signal());
            info!("Shutdown signal received");
            shutdown.store(true, Ordering::Relaxed);
        })?;

    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
