//! HTTP server with graceful shutdown.

use crate::error::ServerError;
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

/// Time in-flight requests get after the first shutdown signal.
const GRACEFUL_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpServer {
    router: Router,
    /// Host to bind to
    host: String,
    /// Port to bind to
    port: u16,
}

impl HttpServer {
    pub fn new(router: Router, host: impl Into<String>, port: u16) -> Self {
        Self {
            router,
            host: host.into(),
            port,
        }
    }

    /// Get the bind address.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Serve until SIGINT/SIGTERM.
    ///
    /// After the first signal open requests get [`GRACEFUL_TIMEOUT`] to
    /// finish; a second signal exits immediately.
    pub async fn run(self) -> Result<(), ServerError> {
        let bind_addr = self.bind_addr();
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: bind_addr.clone(),
                source,
            })?;
        info!("OpenTransfer API listening on {}", bind_addr);

        let shutdown_notify = Arc::new(tokio::sync::Notify::new());
        let shutdown_notify_clone = shutdown_notify.clone();

        let on_signal = async move {
            let signal = shutdown_signal().await;
            info!(signal, "Shutdown requested; no new requests accepted");
            shutdown_notify_clone.notify_one();
        };

        let server = axum::serve(listener, self.router).with_graceful_shutdown(on_signal);

        tokio::select! {
            result = server => {
                match result {
                    Ok(()) => info!("HTTP server stopped"),
                    Err(e) => {
                        error!(error = %e, "HTTP server error");
                        return Err(ServerError::Serve(e));
                    }
                }
            }
            _ = async {
                shutdown_notify.notified().await;
                info!(
                    timeout_secs = GRACEFUL_TIMEOUT.as_secs(),
                    "Draining in-flight gateway calls; signal again to abandon them"
                );

                tokio::select! {
                    _ = tokio::time::sleep(GRACEFUL_TIMEOUT) => {
                        warn!("Gateway calls still running after the drain period; exiting");
                    }
                    signal = shutdown_signal() => {
                        warn!(signal, "Second signal; abandoning in-flight gateway calls");
                    }
                }
            } => {}
        }

        Ok(())
    }
}

/// Resolves with the name of the first SIGINT/SIGTERM received. A handler
/// that cannot be installed never fires; the other one still does.
async fn shutdown_signal() -> &'static str {
    let interrupt = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "SIGINT handler unavailable; only SIGTERM stops the API");
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
                error!(error = %e, "SIGTERM handler unavailable; only SIGINT stops the API");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}
