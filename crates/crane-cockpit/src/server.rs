//! [`CockpitServer`] – HTTP + WebSocket front door for the crane API.
//!
//! Listens on `0.0.0.0:3000` (configurable via [`CockpitServer::with_port`]).
//!
//! * WebSocket upgrades (any path, conventionally `/updates`) → one
//!   [`RealtimeChannel`][crane_twin::RealtimeChannel] per client.
//! * Everything else → the [`routes`][crate::routes] JSON API.
//!
//! Every response carries `Access-Control-Allow-Origin: *`, a trailing `/`
//! is ignored when matching paths, and a request that takes longer than
//! [`REQUEST_TIMEOUT`] (body upload included) gets a 408.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{FromRequestParts, Request, State};
use axum::http::{HeaderMap, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::{Router, ServiceExt};
use crane_twin::RealtimeFanout;
use crane_types::CraneError;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::normalize_path::NormalizePath;
use tower_http::timeout::TimeoutLayer;
use tracing::{debug, info, warn};

use crate::routes::{self, ApiContext};

/// Default TCP port for the API server.
pub const DEFAULT_PORT: u16 = 3000;

/// Upper bound on reading and answering one HTTP request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// CockpitServer
// ---------------------------------------------------------------------------

pub struct CockpitServer {
    api: ApiContext,
    fanout: Arc<RealtimeFanout>,
    port: u16,
}

impl CockpitServer {
    /// Create a server on the [`DEFAULT_PORT`].
    pub fn new(api: ApiContext, fanout: Arc<RealtimeFanout>) -> Self {
        Self {
            api,
            fanout,
            port: DEFAULT_PORT,
        }
    }

    /// Override the listening port (builder-style).
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The complete service: JSON routes, realtime upgrades, CORS, timeout
    /// and trailing-slash handling.
    pub fn app(&self) -> NormalizePath<Router> {
        let router = routes::router(self.api.clone())
            .layer(middleware::from_fn_with_state(
                Arc::clone(&self.fanout),
                realtime_upgrade,
            ))
            .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            );
        NormalizePath::trim_trailing_slash(router)
    }

    /// Bind the configured port and serve until `shutdown` flips to `true`.
    ///
    /// # Errors
    ///
    /// Returns [`CraneError::Io`] if the listener cannot bind or the server
    /// fails.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<(), CraneError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| CraneError::Io(format!("bind error on {addr}: {e}")))?;
        info!(port = self.port, "API listening on http://localhost:{}", self.port);
        self.serve(listener, shutdown).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), CraneError> {
        let app = ServiceExt::<Request>::into_make_service(self.app());
        axum::serve(listener, app)
            .with_graceful_shutdown(stop_requested(shutdown))
            .await
            .map_err(|e| CraneError::Io(format!("API server error: {e}")))
    }
}

/// Resolves once `shutdown` reads `true` or its sender is gone.
async fn stop_requested(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            break;
        }
    }
    info!("API server stopping");
}

// ---------------------------------------------------------------------------
// WebSocket: realtime twin updates
// ---------------------------------------------------------------------------

fn wants_websocket(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.eq_ignore_ascii_case("websocket"))
}

/// Take over WebSocket upgrade requests on any path before routing.
async fn realtime_upgrade(
    State(fanout): State<Arc<RealtimeFanout>>,
    request: Request,
    next: Next,
) -> Response {
    if !wants_websocket(request.headers()) {
        return next.run(request).await;
    }
    let (mut parts, _body) = request.into_parts();
    match WebSocketUpgrade::from_request_parts(&mut parts, &fanout).await {
        Ok(ws) => ws.on_upgrade(move |socket| bridge(socket, fanout)),
        Err(rejection) => {
            debug!(uri = %parts.uri, "rejected WebSocket upgrade");
            rejection.into_response()
        }
    }
}

/// Forward realtime frames to one client until either side goes away.
async fn bridge(socket: WebSocket, fanout: Arc<RealtimeFanout>) {
    let mut channel = match fanout.connect() {
        Ok(channel) => channel,
        Err(e) => {
            warn!(error = %e, "could not open realtime channel");
            return;
        }
    };
    let id = channel.id();
    let (mut ws_tx, mut ws_rx) = socket.split();
    debug!(channel = id, "realtime client attached");

    loop {
        tokio::select! {
            frame = channel.recv() => match frame {
                Some(frame) => match serde_json::to_string(&*frame) {
                    Ok(json) => {
                        if ws_tx.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(channel = id, error = %e, "frame serialization error"),
                },
                // Fanout closed the channel (shutdown).
                None => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            },
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }

    fanout.disconnect(id);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
