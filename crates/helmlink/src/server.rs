//! `HelmlinkServer` builder and server loop.
//!
//! This is the entry point for running a Helmlink server. It ties the
//! layers together: transport → protocol → session → procedure, plus
//! the HTTP one-shot endpoints.

use std::sync::Arc;

use helmlink_procedure::Router;
use helmlink_pubsub::PubSub;
use helmlink_session::SessionConfig;
use helmlink_transport::{Transport, WebSocketTransport};
use tokio::net::TcpListener;

use crate::HelmlinkError;
use crate::handler::handle_connection;
use crate::http::http_router;

/// Shared server state passed to each connection handler task and every
/// HTTP request.
///
/// The pubsub bus is injected, not created here: it is the one piece of
/// process-wide state, and whoever owns the domain procedures owns its
/// lifecycle (and can hand a fresh one to every test).
pub(crate) struct ServerState {
    pub(crate) router: Router,
    pub(crate) pubsub: Arc<PubSub>,
    pub(crate) session_config: SessionConfig,
}

/// Builder for configuring and starting a Helmlink server.
pub struct HelmlinkServerBuilder {
    ws_addr: String,
    http_addr: String,
    session_config: SessionConfig,
}

impl HelmlinkServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            ws_addr: "127.0.0.1:8080".to_string(),
            http_addr: "127.0.0.1:8081".to_string(),
            session_config: SessionConfig::default(),
        }
    }

    /// Sets the WebSocket listen address.
    pub fn bind_ws(mut self, addr: &str) -> Self {
        self.ws_addr = addr.to_string();
        self
    }

    /// Sets the HTTP listen address.
    pub fn bind_http(mut self, addr: &str) -> Self {
        self.http_addr = addr.to_string();
        self
    }

    /// Sets the session configuration.
    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    /// Binds both listeners and assembles the server.
    pub async fn build(
        self,
        router: Router,
        pubsub: Arc<PubSub>,
    ) -> Result<HelmlinkServer, HelmlinkError> {
        let transport = WebSocketTransport::bind(&self.ws_addr).await?;
        let http_listener = TcpListener::bind(&self.http_addr).await?;
        tracing::info!(addr = %self.http_addr, "HTTP endpoints listening");

        let state = Arc::new(ServerState {
            router,
            pubsub,
            session_config: self.session_config,
        });

        Ok(HelmlinkServer {
            transport,
            http_listener,
            state,
        })
    }
}

impl Default for HelmlinkServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running Helmlink server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct HelmlinkServer {
    transport: WebSocketTransport,
    http_listener: TcpListener,
    state: Arc<ServerState>,
}

impl HelmlinkServer {
    /// Creates a new builder.
    pub fn builder() -> HelmlinkServerBuilder {
        HelmlinkServerBuilder::new()
    }

    /// Returns the local WebSocket address.
    pub fn ws_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// Returns the local HTTP address.
    pub fn http_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.http_listener.local_addr()
    }

    /// Runs the accept loop and the HTTP server until the process is
    /// terminated.
    ///
    /// Each accepted WebSocket connection gets its own handler task; a
    /// handler failing never affects the accept loop or other
    /// connections.
    pub async fn run(self) -> Result<(), HelmlinkError> {
        tracing::info!("Helmlink server running");

        let Self {
            mut transport,
            http_listener,
            state,
        } = self;

        let http_state = Arc::clone(&state);
        let http = async move {
            axum::serve(http_listener, http_router(http_state)).await
        };

        let accept_loop = async move {
            loop {
                match transport.accept().await {
                    Ok(conn) => {
                        let state = Arc::clone(&state);
                        tokio::spawn(async move {
                            if let Err(e) =
                                handle_connection(conn, state).await
                            {
                                tracing::debug!(
                                    error = %e,
                                    "connection ended with error"
                                );
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                    }
                }
            }
        };

        tokio::select! {
            result = http => result.map_err(HelmlinkError::Http),
            _ = accept_loop => Ok(()),
        }
    }
}
