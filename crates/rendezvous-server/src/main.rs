//! Rendezvous Server
//!
//! Two-party WebRTC signaling rendezvous over WebSocket.
//!
//! # Endpoints
//!
//! A single listener (default: 0.0.0.0:8000) serves:
//! - `GET /apiv1/stream` - WebSocket signaling stream
//! - `GET /health`, `GET /ready` - liveness and readiness checks
//! - `GET /metrics` - Prometheus exposition
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Spawn the registry actor
//! 4. Bind the listener and mark ready
//! 5. Serve until Ctrl+C / SIGTERM, then close every connection

#![warn(clippy::pedantic)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use rendezvous_server::actors::ActorMetrics;
use rendezvous_server::config::Config;
use rendezvous_server::errors::RendezvousError;
use rendezvous_server::observability::{init_metrics_recorder, HealthState};
use rendezvous_server::server::{build_router, AppState};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Time allowed for connection actors to finish their disconnect cascade.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rendezvous_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Rendezvous Server");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        RendezvousError::Config(e.to_string())
    })?;

    info!(
        instance_id = %config.instance_id,
        bind_address = %config.bind_address,
        stream_path = %config.stream_path,
        session_timeout_seconds = config.session_timeout_seconds,
        connection_buffer = config.connection_buffer,
        "Configuration loaded successfully"
    );

    // This must happen before any metrics are recorded
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;
    info!("Prometheus metrics recorder initialized");

    let health_state = Arc::new(HealthState::new());
    let shutdown_token = CancellationToken::new();

    let state = AppState::new(&config, ActorMetrics::new(), shutdown_token.child_token());
    info!("Registry actor started");

    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );

    let app = build_router(state, &config.stream_path, Arc::clone(&health_state))
        .merge(metrics_router);

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.bind_address, "Invalid bind address");
        RendezvousError::Config(format!("Invalid bind address: {e}"))
    })?;

    // Bind listener BEFORE spawning to fail fast on bind errors
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!(error = %e, addr = %addr, "Failed to bind listener");
        RendezvousError::Transport(format!("Failed to bind listener to {addr}: {e}"))
    })?;

    let server_shutdown_token = shutdown_token.child_token();
    let server = tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            server_shutdown_token.cancelled().await;
            info!("HTTP server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "HTTP server failed");
        }
    });

    health_state.set_ready();
    info!(addr = %addr, "Rendezvous Server running - press Ctrl+C to shutdown");

    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");

    // Mark as not ready immediately so load balancers stop sending traffic
    health_state.set_not_ready();

    // Closes every connection, the registry, and the listener
    shutdown_token.cancel();

    if tokio::time::timeout(SHUTDOWN_GRACE, server).await.is_err() {
        warn!(
            grace_secs = SHUTDOWN_GRACE.as_secs(),
            "HTTP server did not stop within grace period"
        );
    }

    info!("Rendezvous Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This is acceptable because
/// without signal handlers, we cannot gracefully shut down the service.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
