//! `sensordash-cockpit` – the dashboard web server.
//!
//! Boots one HTTP + WebSocket listener (default port `8080`) that:
//!
//! 1. **Serves** the embedded dashboard page at `GET /`.
//! 2. **Streams** every frame published on the [`FrameBus`] to each browser
//!    connected on `/ws`, starting with the latest one.
//! 3. **Accepts** motion samples at `POST /api/sensor_ingest` and appends
//!    them to the shared [`SampleStore`].
//! 4. **Answers** `GET /api/frame` with the latest frame as JSON.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sensordash_cockpit::CockpitServer;
//! use sensordash_runtime::FrameBus;
//! use sensordash_store::SqliteSampleStore;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = Arc::new(SqliteSampleStore::open_in_memory().unwrap());
//!     let (_stop_tx, stop_rx) = tokio::sync::watch::channel(false);
//!     CockpitServer::new(store, FrameBus::default())
//!         .run(stop_rx)
//!         .await
//!         .expect("cockpit server failed");
//! }
//! ```
//!
//! [`FrameBus`]: sensordash_runtime::FrameBus
//! [`SampleStore`]: sensordash_store::SampleStore

pub mod http;
pub mod server;

pub use http::{MAX_BODY_BYTES, Request, RequestError, Response};
pub use server::{CockpitServer, DEFAULT_PORT, DEFAULT_REQUEST_TIMEOUT, ingest};
