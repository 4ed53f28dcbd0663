//! [`CockpitServer`] – HTTP + WebSocket server for the dashboard.
//!
//! Listens on `0.0.0.0:8080` (configurable via [`CockpitServer::with_port`]).
//!
//! | Request | Response |
//! |---|---|
//! | WebSocket upgrade on `/ws` | frame stream from the [`FrameBus`] |
//! | `GET /` | embedded dashboard page |
//! | `GET /api/frame` | latest frame as JSON |
//! | `POST /api/sensor_ingest` | store one sample; `200` or `500 Error: …` |
//! | anything else | `404` |
//!
//! A client gets [`DEFAULT_REQUEST_TIMEOUT`] (see
//! [`CockpitServer::with_request_timeout`]) to deliver its request head and
//! body; a connection that stays silent longer is closed without a reply.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use sensordash_runtime::{DashboardFrame, FrameBus};
use sensordash_store::SampleStore;
use sensordash_types::{Sample, SensorError};
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::http::{Request, RequestError, Response, read_request};

/// Default TCP port for the dashboard server.
pub const DEFAULT_PORT: u16 = 8080;

/// How long a client may take to send a complete request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const INGEST_ROUTE: &str = "/api/sensor_ingest";

/// The compiled-in dashboard page (HTML + JS, Plotly from a CDN).
const DASHBOARD_HTML: &str = include_str!("dashboard.html");

const INGEST_OK: &str = "Data stored successfully.";

// ---------------------------------------------------------------------------
// CockpitServer
// ---------------------------------------------------------------------------

/// Serves the dashboard, streams frames and accepts samples.
///
/// The store handle is the same one the refresh scheduler reads from.
pub struct CockpitServer {
    store: Arc<dyn SampleStore>,
    bus: FrameBus,
    port: u16,
    request_timeout: Duration,
}

#[derive(Clone)]
struct Shared {
    store: Arc<dyn SampleStore>,
    bus: FrameBus,
    request_timeout: Duration,
}

impl CockpitServer {
    /// Create a server on the [`DEFAULT_PORT`].
    pub fn new(store: Arc<dyn SampleStore>, bus: FrameBus) -> Self {
        Self {
            store,
            bus,
            port: DEFAULT_PORT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Override the listening port (builder-style).  `0` picks a free port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Override how long a client may take to send its request.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Bind the listener without serving yet.
    ///
    /// # Errors
    ///
    /// Returns [`SensorError::Bind`] if the port is unavailable.
    pub async fn bind(&self) -> Result<TcpListener, SensorError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        TcpListener::bind(addr).await.map_err(|e| SensorError::Bind {
            addr: addr.to_string(),
            details: e.to_string(),
        })
    }

    /// Bind and serve until `shutdown` turns `true`.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<(), SensorError> {
        let listener = self.bind().await?;
        self.serve(listener, shutdown).await;
        Ok(())
    }

    /// Accept connections on `listener` until `shutdown` turns `true` (or its
    /// sender is dropped).  Connections already being handled are left to
    /// finish on their own.
    pub async fn serve(self, listener: TcpListener, mut shutdown: watch::Receiver<bool>) {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "dashboard listening on http://localhost:{}", addr.port());
        }
        let shared = Shared {
            store: self.store,
            bus: self.bus,
            request_timeout: self.request_timeout,
        };

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let shared = shared.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, peer, shared).await {
                                debug!(%peer, error = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "accept error"),
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("dashboard server stopped");
    }
}

// ---------------------------------------------------------------------------
// Per-connection handler
// ---------------------------------------------------------------------------

/// Path of the request line in `head`, without its query string.
fn request_route(head: &str) -> Option<&str> {
    head.lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|path| path.split('?').next())
}

/// `true` when the peeked request head is a WebSocket upgrade for `/ws`.
fn is_frame_stream_upgrade(head: &str) -> bool {
    let path_ok = request_route(head) == Some("/ws");
    let upgrade = head.lines().any(|line| {
        let line = line.to_ascii_lowercase();
        line.starts_with("upgrade:") && line.contains("websocket")
    });
    path_ok && upgrade
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    shared: Shared,
) -> Result<(), SensorError> {
    // `peek` leaves the bytes in the socket, so tungstenite's handshake still
    // sees the full request.
    let mut buf = [0u8; 1024];
    let n = tokio::time::timeout(shared.request_timeout, stream.peek(&mut buf))
        .await
        .map_err(|_| SensorError::Io(format!("{peer} sent nothing within {:?}", shared.request_timeout)))?
        .map_err(|e| SensorError::Io(format!("peek error from {peer}: {e}")))?;

    let head = String::from_utf8_lossy(&buf[..n]);
    if is_frame_stream_upgrade(&head) {
        handle_ws(stream, peer, shared.bus).await
    } else {
        let ingesting = request_route(&head) == Some(INGEST_ROUTE);
        handle_http(stream, peer, &shared, ingesting).await
    }
}

/// Serve one HTTP request.  `ingesting` is set when the request line targets
/// the ingestion route; broken framing there is answered like any other
/// malformed sample.
async fn handle_http(
    stream: TcpStream,
    peer: SocketAddr,
    shared: &Shared,
    ingesting: bool,
) -> Result<(), SensorError> {
    let mut reader = BufReader::new(stream);
    let read = tokio::time::timeout(shared.request_timeout, read_request(&mut reader))
        .await
        .map_err(|_| SensorError::Io(format!("request from {peer} incomplete after {:?}", shared.request_timeout)))?;
    let response = match read {
        Ok(request) => {
            debug!(%peer, method = %request.method, path = %request.path, "request");
            route(shared, &request).await
        }
        Err(RequestError::Closed) => return Ok(()),
        Err(e) if ingesting || matches!(e, RequestError::TooLarge(_)) => {
            warn!(%peer, error = %e, "sample rejected");
            Response::text(500, format!("Error: {e}"))
        }
        Err(e) => Response::text(400, format!("Error: {e}")),
    };
    response
        .write_to(reader.get_mut())
        .await
        .map_err(|e| SensorError::Io(format!("HTTP write error to {peer}: {e}")))
}

async fn route(shared: &Shared, request: &Request) -> Response {
    match (request.method.as_str(), request.route()) {
        ("GET", "/" | "/index.html") => Response::html(DASHBOARD_HTML),
        ("GET", "/api/frame") => latest_frame_json(&shared.bus),
        ("POST", INGEST_ROUTE) => ingest(shared.store.as_ref(), &request.body).await,
        (_, INGEST_ROUTE) => Response::method_not_allowed("POST"),
        _ => Response::not_found(),
    }
}

fn latest_frame_json(bus: &FrameBus) -> Response {
    match serde_json::to_vec(bus.latest_or_empty().as_ref()) {
        Ok(body) => Response::json(body),
        Err(e) => Response::text(500, format!("Error: {e}")),
    }
}

/// Decode one posted sample and append it to `store`.
///
/// `200 Data stored successfully.` on success; `500 Error: <reason>` for a
/// malformed document or a store failure.
pub async fn ingest(store: &dyn SampleStore, body: &[u8]) -> Response {
    let sample = match Sample::from_json(body) {
        Ok(sample) => sample,
        Err(e) => {
            warn!(error = %e, "sample rejected");
            return Response::text(500, format!("Error: {e}"));
        }
    };
    match store.insert(&sample).await {
        Ok(()) => {
            debug!(user = %sample.user_id, timestamp = %sample.timestamp, "sample ingested");
            Response::text(200, INGEST_OK)
        }
        Err(e) => {
            warn!(error = %e, "sample could not be stored");
            Response::text(500, format!("Error: {e}"))
        }
    }
}

// ---------------------------------------------------------------------------
// WebSocket: frame stream
// ---------------------------------------------------------------------------

fn frame_message(frame: &DashboardFrame) -> Option<Message> {
    match serde_json::to_string(frame) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            warn!(error = %e, "frame serialisation failed");
            None
        }
    }
}

async fn handle_ws(stream: TcpStream, peer: SocketAddr, bus: FrameBus) -> Result<(), SensorError> {
    let ws_stream = accept_async(stream)
        .await
        .map_err(|e| SensorError::Io(format!("WS handshake from {peer}: {e}")))?;
    info!(%peer, "dashboard client connected");

    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let mut bus_rx = bus.subscribe();

    // Draw something immediately instead of waiting for the next tick.
    if let Some(msg) = frame_message(&bus.latest_or_empty()) {
        if ws_tx.send(msg).await.is_err() {
            return Ok(());
        }
    }

    loop {
        tokio::select! {
            result = bus_rx.recv() => match result {
                Ok(frame) => {
                    if let Some(msg) = frame_message(&frame) {
                        if ws_tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(%peer, skipped = n, "dashboard client lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                // The page never sends anything meaningful upstream.
                Some(Ok(_)) => {}
            },
        }
    }

    info!(%peer, "dashboard client disconnected");
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
