//! Frontline Server
//!
//! Frontend server for a legacy game client. Accepts mux connections,
//! decrypts session tokens and walks clients through the grouping
//! bootstrap sequence.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use frontline_server::config::ServerConfig;
use frontline_server::net::handler::ConnectionHandler;
use frontline_server::protocol::blobs::DirectoryBlobStore;
use frontline_server::state::AppState;
use frontline_server::VERSION;

/// Time allowed for open connections to close on shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = ServerConfig::load().await?;

    // Initialize logging
    init_logging(&config.log_format);

    info!("╔══════════════════════════════════════════════╗");
    info!("║        Frontline Server v{}                  ║", VERSION);
    info!("╚══════════════════════════════════════════════╝");
    if config.loaded_from_file {
        info!(
            "Configuration loaded from: {}",
            config.config_path.display()
        );
    } else {
        warn!(
            "Config file not found at {}, using defaults",
            config.config_path.display()
        );
    }

    // Load canned response blobs
    let blobs = DirectoryBlobStore::load(&config.data_path)
        .await
        .with_context(|| format!("Failed to load blobs from {}", config.data_path.display()))?;
    if blobs.is_empty() {
        warn!(
            "No blobs found in {}, canned responses will fail",
            config.data_path.display()
        );
    } else {
        info!("Loaded {} blobs from {}", blobs.len(), blobs.root().display());
    }

    // Create shutdown channel
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let session_key = config.session_key()?;
    let state = Arc::new(AppState::new(
        config.clone(),
        session_key,
        Arc::new(blobs),
        shutdown_tx.clone(),
    ));
    info!("Application state initialized");

    // Start TCP listener for frontend connections
    let addr: SocketAddr = config
        .listen_address()
        .parse()
        .with_context(|| format!("Invalid listen address {}", config.listen_address()))?;
    let listener = TcpListener::bind(addr).await?;
    info!("Frontend listening on: {}", addr);

    // Spawn connection acceptor
    let accept_state = state.clone();
    let mut accept_shutdown_rx = shutdown_tx.subscribe();
    let accept_handle = tokio::spawn(async move {
        accept_connections(listener, accept_state, &mut accept_shutdown_rx).await;
    });

    info!("{} is ready for connections", config.server_name);

    // Wait for shutdown signal
    wait_for_shutdown(shutdown_tx.clone()).await;

    info!("Shutting down server...");

    let _ = accept_handle.await;

    // Connections close on the same broadcast; wait for them to drain
    let drain = async {
        while state.session_manager.count() > 0 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        warn!(
            "Dropping {} sessions still open after {:?}",
            state.session_manager.count(),
            SHUTDOWN_GRACE
        );
    }
    state.session_manager.clear();
    info!("All sessions closed");

    info!("Server shutdown complete. Goodbye!");
    Ok(())
}

/// Initialize the logging/tracing system
fn init_logging(format: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,frontline_server=debug"));

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_level(true);

    if format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Accept incoming frontend (TCP) connections
async fn accept_connections(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown_rx: &mut broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        info!("New frontend connection from: {}", addr);
                        let handler = ConnectionHandler::new(state.clone());
                        tokio::spawn(async move {
                            if let Err(e) = handler.handle_tcp(stream, addr).await {
                                warn!("Connection error from {}: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Connection acceptor shutting down");
                break;
            }
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn wait_for_shutdown(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    // Signal all tasks to shut down
    let _ = shutdown_tx.send(());
}
