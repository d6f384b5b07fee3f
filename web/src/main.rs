//! Bookwell HTTP and WebSocket server.
//!
//! Booking lifecycle over HTTP, real-time booking events over WebSocket.

use bookwell_runtime::metrics::MetricsServer;
use bookwell_web::{AppState, Config, build_router, metrics::register_business_metrics};
use std::future::IntoFuture;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine
    let _ = dotenvy::dotenv();

    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.server.log_level))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Bookwell server");
    info!(
        address = %config.server.addr(),
        tokens = config.tokens.len(),
        max_connections = config.websocket.max_connections,
        "Configuration loaded"
    );
    if config.tokens.is_empty() {
        warn!("BOOKWELL_TOKENS is empty; every request will be rejected with 401");
    }

    match config.server.metrics_addr() {
        Some(addr) => {
            MetricsServer::new(addr).start()?;
            register_business_metrics();
        },
        None => info!("Metrics exporter disabled"),
    }

    let state = AppState::in_memory(&config);
    let app = build_router(state);

    let addr = config.server.addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    let grace = Duration::from_secs(config.server.shutdown_timeout);
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .into_future();

    // Open sockets keep graceful shutdown waiting; cap it.
    tokio::select! {
        result = server => result?,
        () = async {
            shutdown_signal().await;
            tokio::time::sleep(grace).await;
        } => warn!(timeout_secs = grace.as_secs(), "Graceful shutdown timed out"),
    }

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}
