use crate::{
    error::Error,
    registry::PeerRegistry,
    sweeper::{spawn_sweeper, LivenessPolicy},
    upgrade::{upgrade_filter, ws_handler, SignalingContext},
};
use axum::{
    http::StatusCode, middleware, response::IntoResponse, routing::get, Router,
};
use std::{net::SocketAddr, time::Duration};
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultOnResponse, TraceLayer},
    LatencyUnit,
};
use tracing::{info, Level};

/// Default size of each websocket's read and write buffers.
pub const DEFAULT_BUFFER_SIZE: usize = 100 * 1024;

/// Builder for [`SignalingServer`]s.
///
/// Begin with [`SignalingServer::builder`] and adjust parameters before calling
/// [`SignalingServerBuilder::build`].
#[derive(Debug)]
pub struct SignalingServerBuilder {
    /// The socket address to listen on
    socket_addr: SocketAddr,
    liveness: LivenessPolicy,
    buffer_size: usize,
    cors: bool,
    trace: bool,
}

impl SignalingServerBuilder {
    pub fn new(socket_addr: impl Into<SocketAddr>) -> Self {
        Self {
            socket_addr: socket_addr.into(),
            liveness: LivenessPolicy::default(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            cors: false,
            trace: false,
        }
    }

    /// How long a peer may go without sending any frame before it is evicted.
    pub fn liveness_window(mut self, window: Duration) -> Self {
        self.liveness.window = window;
        self
    }

    /// How often silent peers are looked for.
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.liveness.sweep_interval = interval;
        self
    }

    pub fn buffer_size(mut self, bytes: usize) -> Self {
        self.buffer_size = bytes;
        self
    }

    /// Apply permissive CORS middleware.
    pub fn cors(mut self) -> Self {
        self.cors = true;
        self
    }

    /// Apply a default tracing middleware layer for debug purposes.
    pub fn trace(mut self) -> Self {
        self.trace = true;
        self
    }

    /// Create a [`SignalingServer`]. Nothing is bound until [`SignalingServer::bind`]
    /// or [`SignalingServer::serve`].
    pub fn build(self) -> SignalingServer {
        let registry = PeerRegistry::default();
        let shutdown = CancellationToken::new();
        let context = SignalingContext {
            registry: registry.clone(),
            shutdown: shutdown.clone(),
            buffer_size: self.buffer_size,
        };

        // Any path upgrades, like a catch-all `/` mount would.
        let signaling = Router::new()
            .route("/", get(ws_handler))
            .route("/{*path}", get(ws_handler))
            .route_layer(middleware::from_fn(upgrade_filter));
        let mut router = Router::new()
            .route("/health", get(health_handler))
            .merge(signaling)
            .with_state(context);

        if self.cors {
            router = router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            );
        }
        if self.trace {
            router = router.layer(
                // Middleware for logging from tower-http
                TraceLayer::new_for_http().on_response(
                    DefaultOnResponse::new()
                        .level(Level::INFO)
                        .latency_unit(LatencyUnit::Micros),
                ),
            );
        }

        SignalingServer {
            requested_addr: self.socket_addr,
            router,
            listener: None,
            registry,
            shutdown,
            liveness: self.liveness,
        }
    }
}

/// Contains the interface end of a signaling server
#[derive(Debug)]
pub struct SignalingServer {
    /// The socket configured for this server
    requested_addr: SocketAddr,
    router: Router,
    listener: Option<std::net::TcpListener>,
    registry: PeerRegistry,
    shutdown: CancellationToken,
    liveness: LivenessPolicy,
}

impl SignalingServer {
    /// Creates a new builder for a [`SignalingServer`].
    pub fn builder(socket_addr: impl Into<SocketAddr>) -> SignalingServerBuilder {
        SignalingServerBuilder::new(socket_addr)
    }

    /// Returns the local address this server is bound to
    ///
    /// The server needs to [`bind`](Self::bind) first
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener
            .as_ref()
            .and_then(|listener| listener.local_addr().ok())
    }

    /// Binds the server to a socket
    ///
    /// Optional: Will happen automatically on [`serve`](Self::serve)
    pub fn bind(&mut self) -> Result<SocketAddr, Error> {
        let listener = std::net::TcpListener::bind(self.requested_addr).map_err(Error::Bind)?;
        listener.set_nonblocking(true).map_err(Error::Bind)?;
        let addr = listener.local_addr().map_err(Error::Bind)?;
        self.listener = Some(listener);
        Ok(addr)
    }

    /// Handle on the peers and rooms of this server.
    pub fn registry(&self) -> PeerRegistry {
        self.registry.clone()
    }

    /// Cancelling the returned token stops the server: the listener, the liveness
    /// sweeper and every open connection.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Serve the signaling server until the shutdown token is cancelled
    ///
    /// Will bind if not already bound
    pub async fn serve(mut self) -> Result<(), Error> {
        let listener = match self.listener.take() {
            Some(listener) => listener,
            None => {
                self.bind()?;
                self.listener.take().ok_or_else(|| {
                    Error::Bind(std::io::Error::other("listener missing after bind"))
                })?
            }
        };
        let listener = tokio::net::TcpListener::from_std(listener).map_err(Error::Bind)?;
        info!(
            "signaling server listening on {}",
            listener.local_addr().map_err(Error::Bind)?
        );

        let sweeper = spawn_sweeper(self.registry, self.liveness, self.shutdown.clone());
        let shutdown = self.shutdown.clone();
        let result = axum::serve(
            listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(Error::Serve);

        self.shutdown.cancel();
        _ = sweeper.await;
        info!("signaling server stopped");
        result
    }
}

pub async fn health_handler() -> impl IntoResponse {
    StatusCode::OK
}
