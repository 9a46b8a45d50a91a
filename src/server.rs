//! Binding, serving and graceful shutdown.

use crate::api::{self, AppState};
use crate::config::ServerConfig;
use crate::error::ToolifyError;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Run the server until Ctrl-C or SIGTERM.
pub async fn serve(config: ServerConfig) -> Result<(), ToolifyError> {
    let addr = format!("{}:{}", config.host, config.port);
    let state = AppState::new(config)?;
    let app = api::router(state);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| ToolifyError::io(format!("bind {addr}"), e))?;
    let local = listener
        .local_addr()
        .map_err(|e| ToolifyError::io("read listener address", e))?;
    info!("Server running on http://{}", local);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| ToolifyError::io("serve HTTP", e))?;

    info!("HTTP server closed");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
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
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down gracefully..."),
        _ = terminate => info!("Received SIGTERM, shutting down gracefully..."),
    }
}
