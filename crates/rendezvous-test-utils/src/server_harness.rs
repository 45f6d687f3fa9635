//! Test server harness for E2E testing
//!
//! Provides `TestRendezvousServer` for spawning real rendezvous server
//! instances in tests.

use rendezvous_server::actors::{ActorMetrics, PairingRegistryHandle};
use rendezvous_server::config::Config;
use rendezvous_server::observability::HealthState;
use rendezvous_server::server::{build_router, AppState};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Test harness for spawning the rendezvous server in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_health_flow_e2e() -> Result<(), anyhow::Error> {
///     let server = TestRendezvousServer::spawn().await?;
///     let mut peer = TestPeer::connect(&server.ws_url()).await?;
///     peer.emit("server-init", vec![]).await?;
///     Ok(())
/// }
/// ```
pub struct TestRendezvousServer {
    addr: SocketAddr,
    config: Config,
    state: AppState,
    health: Arc<HealthState>,
    _handle: JoinHandle<()>,
}

impl TestRendezvousServer {
    /// Spawn a server with default settings.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with_vars(HashMap::new()).await
    }

    /// Spawn a server whose sessions close `seconds` after connecting.
    pub async fn spawn_with_timeout(seconds: u64) -> Result<Self, anyhow::Error> {
        Self::spawn_with_vars(HashMap::from([(
            "RENDEZVOUS_SESSION_TIMEOUT_SECONDS".to_string(),
            seconds.to_string(),
        )]))
        .await
    }

    /// Spawn a new test server instance.
    ///
    /// The server will:
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Start the HTTP/WebSocket server in the background
    ///
    /// `vars` are applied on top of the test defaults.
    pub async fn spawn_with_vars(vars: HashMap<String, String>) -> Result<Self, anyhow::Error> {
        let mut all_vars = HashMap::from([
            ("RENDEZVOUS_BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
            (
                "RENDEZVOUS_INSTANCE_ID".to_string(),
                "rendezvous-test".to_string(),
            ),
        ]);
        all_vars.extend(vars);

        let config = Config::from_vars(&all_vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let state = AppState::new(&config, ActorMetrics::new(), CancellationToken::new());
        let health = Arc::new(HealthState::new());
        let app = build_router(state.clone(), &config.stream_path, Arc::clone(&health));

        // Bind to random port
        let listener = tokio::net::TcpListener::bind(&config.bind_address)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        // Spawn server in background
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("Test server error: {}", e);
            }
        });
        health.set_ready();

        Ok(Self {
            addr,
            config,
            state,
            health,
            _handle: handle,
        })
    }

    /// Get the base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the WebSocket URL of the signaling stream.
    pub fn ws_url(&self) -> String {
        format!("ws://{}{}", self.addr, self.config.stream_path)
    }

    /// Get the socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get reference to the server configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Registry handle, for asserting on room counts.
    pub fn registry(&self) -> &PairingRegistryHandle {
        self.state.registry()
    }

    pub fn health(&self) -> &HealthState {
        &self.health
    }

    /// Close every connection, as on server shutdown.
    pub fn shutdown(&self) {
        self.state.shutdown.cancel();
    }
}

impl Drop for TestRendezvousServer {
    fn drop(&mut self) {
        // Stop the actors and the listener when the test completes.
        self.state.shutdown.cancel();
        self._handle.abort();
    }
}
