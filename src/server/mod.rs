//! Key server: HTTP surface, startup and shutdown.

pub mod handler;
pub mod router;

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::auth::SystemClock;
use crate::config::Config;
use crate::key_store::KeyStore;
use crate::{Error, Result};

pub use router::{AppState, MetricsEndpoint, create_router};

/// HLS key server
pub struct KeyServer {
    /// Configuration
    config: Config,
    /// Key cache shared with every handler
    key_store: Arc<KeyStore>,
}

impl KeyServer {
    /// Validate configuration and perform the initial key load.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let key_store = Arc::new(KeyStore::open(config.keys.directory.clone()).await?);
        if key_store.is_empty() {
            warn!(directory = %config.keys.directory.display(), "No keys loaded");
        }

        Ok(Self { config, key_store })
    }

    /// Serve until SIGINT/SIGTERM, then drain in-flight requests for at most
    /// `server.shutdown_timeout`.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let state = Arc::new(AppState::from_config(
            &self.config,
            Arc::clone(&self.key_store),
            Arc::new(SystemClock),
        )?);
        let app = create_router(state);

        let listener = TcpListener::bind(addr).await?;

        info!(
            version = env!("CARGO_PKG_VERSION"),
            host = %self.config.server.host,
            port = self.config.server.port,
            mode = %self.config.app.mode,
            keys = self.key_store.len(),
            directory = %self.config.keys.directory.display(),
            "HLS key server listening"
        );

        let (shutdown_tx, _) = broadcast::channel(1);

        tokio::spawn(reload_on_hangup(
            Arc::clone(&self.key_store),
            shutdown_tx.subscribe(),
        ));

        let mut drain_rx = shutdown_tx.subscribe();
        let drain_timeout = self.config.server.shutdown_timeout;

        let serve = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(shutdown_tx))
            .into_future();
        tokio::pin!(serve);

        tokio::select! {
            result = &mut serve => {
                result.map_err(|e| Error::Internal(e.to_string()))?;
            }
            () = async {
                let _ = drain_rx.recv().await;
                tokio::time::sleep(drain_timeout).await;
            } => {
                warn!(timeout = ?drain_timeout, "Shutdown timeout elapsed, abandoning in-flight requests");
            }
        }

        Ok(())
    }
}

/// Reload the key cache on every SIGHUP until shutdown.
#[cfg(unix)]
async fn reload_on_hangup(key_store: Arc<KeyStore>, mut shutdown_rx: broadcast::Receiver<()>) {
    let mut hangup = match signal::unix::signal(signal::unix::SignalKind::hangup()) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "Failed to install SIGHUP handler, signal reload disabled");
            return;
        }
    };

    loop {
        tokio::select! {
            received = hangup.recv() => {
                if received.is_none() {
                    break;
                }
                info!("SIGHUP received, reloading keys");
                match key_store.reload().await {
                    Ok(summary) => info!(
                        count = summary.loaded,
                        skipped = summary.skipped,
                        "Keys reloaded on SIGHUP"
                    ),
                    Err(e) => error!(error = %e, "Key reload failed, previous keys remain in force"),
                }
            }
            _ = shutdown_rx.recv() => break,
        }
    }
}

#[cfg(not(unix))]
async fn reload_on_hangup(_key_store: Arc<KeyStore>, _shutdown_rx: broadcast::Receiver<()>) {}

/// Shutdown signal handler
async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received, draining connections");
    let _ = shutdown_tx.send(());
}
