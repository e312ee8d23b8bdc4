//! `crane-cockpit` – the operator-facing API server
//!
//! Boots an `axum` HTTP + WebSocket server (default port `3000`) that:
//!
//! 1. **Accepts** operator commands as JSON `POST`s under `/api` and hands
//!    them to the [`CommandPublisher`].
//!
//! 2. **Answers** `GET /api/state` and `GET /api/health` through the
//!    [`QueryFacade`].
//!
//! 3. **Streams** every digital-twin update to connected browsers over a
//!    WebSocket, starting with the current snapshot.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use crane_cockpit::{ApiContext, CockpitServer, QueryFacade};
//! use crane_middleware::{CommandPublisher, LoopbackBus};
//! use crane_twin::{DigitalTwinStore, RealtimeFanout, DEFAULT_CHANNEL_CAPACITY};
//!
//! #[tokio::main]
//! async fn main() {
//!     let bus = Arc::new(LoopbackBus::default());
//!     let store = Arc::new(DigitalTwinStore::new());
//!     let fanout = Arc::new(RealtimeFanout::new(Arc::clone(&store), DEFAULT_CHANNEL_CAPACITY));
//!     let api = ApiContext {
//!         publisher: CommandPublisher::new(bus.clone(), "lights/cmd"),
//!         query: QueryFacade::new(store, bus),
//!     };
//!     let (_tx, shutdown) = tokio::sync::watch::channel(false);
//!     CockpitServer::new(api, fanout)
//!         .run(shutdown)
//!         .await
//!         .expect("API server failed");
//! }
//! ```
//!
//! [`CommandPublisher`]: crane_middleware::CommandPublisher

pub mod query;
pub mod routes;
pub mod server;

pub use query::QueryFacade;
pub use routes::{ApiContext, ApiError, router};
pub use server::{CockpitServer, DEFAULT_PORT, REQUEST_TIMEOUT};
