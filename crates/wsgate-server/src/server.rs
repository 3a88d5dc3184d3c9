//! Core server: accepts WebSocket clients and runs one request loop each.
//!
//! Owns the token authority and the router, plus the table of live
//! connections used for server-initiated broadcast. Every connection is
//! inserted into that table when its loop starts and removed when the loop
//! exits, on every path.

use crate::backend::Registry;
use crate::config::ServerConfig;
use crate::dispatch::{self, Router};
use crate::transport::websocket::{self, Inbound, WebSocketConnection};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, info, warn};
use wsgate_core::messages::Notice;
use wsgate_core::{encode_response, GatewayError, GatewayResult, Response, TokenAuthority};

/// Queue depth for server-initiated messages per connection.
const OUTBOUND_CAPACITY: usize = 64;

/// How long `serve` waits for connections to finish closing on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Closing,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Live-set entry: where to push messages for one connection.
struct ConnectionHandle {
    remote_addr: SocketAddr,
    outbound: mpsc::Sender<String>,
}

type ConnectionTable = Arc<RwLock<HashMap<u64, ConnectionHandle>>>;

/// Removes its connection from the live set when dropped.
struct Registered {
    conn_id: u64,
    table: ConnectionTable,
}

impl Drop for Registered {
    fn drop(&mut self) {
        if let Some(handle) = self.table.write().remove(&self.conn_id) {
            debug!(conn_id = self.conn_id, remote = %handle.remote_addr, "connection deregistered");
        }
    }
}

/// The gateway server instance.
pub struct GatewayServer {
    config: ServerConfig,
    authority: Arc<TokenAuthority>,
    router: Router,
    connections: ConnectionTable,
    next_conn_id: AtomicU64,
    shutdown_tx: broadcast::Sender<()>,
}

impl GatewayServer {
    pub fn new(config: ServerConfig, registry: Registry, authority: TokenAuthority) -> Self {
        Self {
            config,
            authority: Arc::new(authority),
            router: Router::new(Arc::new(registry)),
            connections: Arc::new(RwLock::new(HashMap::new())),
            next_conn_id: AtomicU64::new(1),
            shutdown_tx: broadcast::channel(1).0,
        }
    }

    /// Number of connections currently in the live set.
    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Queue `text` for every live connection.
    ///
    /// Delivery is attempted independently per connection; a full or closed
    /// queue counts as a failure for that connection only.
    pub fn broadcast(&self, text: &str) -> BroadcastReport {
        let connections = self.connections.read();
        let mut report = BroadcastReport::default();
        for (conn_id, handle) in connections.iter() {
            match handle.outbound.try_send(text.to_string()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(
                        conn_id,
                        remote = %handle.remote_addr,
                        error = %e,
                        "broadcast delivery failed"
                    );
                    report.failed += 1;
                }
            }
        }
        debug!(delivered = report.delivered, failed = report.failed, "broadcast complete");
        report
    }

    pub fn broadcast_notice(&self, notice: &Notice) -> GatewayResult<BroadcastReport> {
        let text = serde_json::to_string(notice)
            .map_err(|e| GatewayError::Other(format!("encode failed: {e}")))?;
        Ok(self.broadcast(&text))
    }

    /// Tell every connection loop to say goodbye and close.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Bind the configured address and serve until `shutdown` resolves.
    pub async fn run<F>(self: Arc<Self>, shutdown: F) -> GatewayResult<()>
    where
        F: Future<Output = ()> + Send,
    {
        let listener = websocket::bind(&self.config.bind_addr()).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already-bound listener until `shutdown` resolves.
    pub async fn serve<F>(self: Arc<Self>, listener: TcpListener, shutdown: F) -> GatewayResult<()>
    where
        F: Future<Output = ()> + Send,
    {
        let local_addr = listener.local_addr()?;
        let mut ws_rx = websocket::start_listener(listener);
        info!(addr = %local_addr, "wsgate-server ready");

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    break;
                }
                Some(ws_conn) = ws_rx.recv() => self.spawn_connection(ws_conn),
                else => {
                    info!("listener closed, shutting down");
                    break;
                }
            }
        }

        // Connections already upgraded but not yet picked up still get the
        // shutdown notice.
        ws_rx.close();
        while let Some(ws_conn) = ws_rx.recv().await {
            self.spawn_connection(ws_conn);
        }

        info!(connections = self.connection_count(), "closing connected clients");
        self.shutdown();
        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while self.connection_count() > 0 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                remaining = self.connection_count(),
                "connections still open after shutdown grace"
            );
        }
        Ok(())
    }

    /// Subscribe to shutdown before the task exists, so a signal sent while
    /// the task is starting is not missed.
    fn spawn_connection(self: &Arc<Self>, ws_conn: WebSocketConnection) {
        let shutdown_rx = self.shutdown_tx.subscribe();
        let srv = self.clone();
        tokio::spawn(async move {
            srv.handle_websocket(ws_conn, shutdown_rx).await;
        });
    }

    async fn handle_websocket(
        &self,
        mut conn: WebSocketConnection,
        shutdown_rx: broadcast::Receiver<()>,
    ) {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let remote = conn.remote_addr;
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);

        self.connections.write().insert(
            conn_id,
            ConnectionHandle {
                remote_addr: remote,
                outbound: outbound_tx,
            },
        );
        let _registered = Registered {
            conn_id,
            table: self.connections.clone(),
        };
        info!(conn_id, remote = %remote, "client connected");

        let mut state = ConnectionState::Open;
        if let Err(e) = self
            .connection_loop(&mut conn, &mut state, outbound_rx, shutdown_rx)
            .await
        {
            warn!(conn_id, remote = %remote, error = %e, "connection failed");
            if state == ConnectionState::Open {
                websocket::ws_close(&mut conn.ws_stream, CloseCode::Error, "internal error").await;
            }
        }
        debug!(conn_id, from = %state, to = %ConnectionState::Closed, "connection state change");
        info!(conn_id, remote = %remote, "client disconnected");
    }

    /// Strictly alternating receive/respond loop for one client, interleaved
    /// with server-initiated pushes.
    ///
    /// While a request is being dispatched the socket is still watched, so a
    /// client that closes or disappears ends the loop at once. Calls already
    /// running are left to finish on their own and their results dropped.
    async fn connection_loop(
        &self,
        conn: &mut WebSocketConnection,
        state: &mut ConnectionState,
        mut outbound_rx: mpsc::Receiver<String>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> GatewayResult<()> {
        let max_frame_size = self.config.max_frame_size;
        // A frame that arrived while the previous request was in flight.
        let mut deferred: Option<Inbound> = None;

        loop {
            let inbound = match deferred.take() {
                Some(inbound) => inbound,
                None => tokio::select! {
                    _ = shutdown_rx.recv() => {
                        say_goodbye(conn, state).await;
                        return Ok(());
                    }
                    Some(text) = outbound_rx.recv() => {
                        websocket::ws_send_text(&mut conn.ws_stream, text).await?;
                        continue;
                    }
                    inbound = websocket::ws_recv_text(&mut conn.ws_stream, max_frame_size) => {
                        inbound?
                    }
                },
            };

            let response = match inbound {
                Inbound::Text(text) => {
                    let processing =
                        dispatch::process_message(&text, &self.authority, &self.router);
                    tokio::pin!(processing);
                    loop {
                        tokio::select! {
                            response = &mut processing => break response,
                            _ = shutdown_rx.recv() => {
                                say_goodbye(conn, state).await;
                                return Ok(());
                            }
                            next = websocket::ws_recv_text(&mut conn.ws_stream, max_frame_size),
                                if deferred.is_none() =>
                            {
                                match next? {
                                    Inbound::Close(frame) => {
                                        debug!(?frame, "client closed during dispatch");
                                        *state = ConnectionState::Closing;
                                        websocket::ws_echo_close(&mut conn.ws_stream).await;
                                        return Ok(());
                                    }
                                    Inbound::Ended => {
                                        debug!("client went away during dispatch");
                                        return Ok(());
                                    }
                                    other => deferred = Some(other),
                                }
                            }
                        }
                    }
                }
                Inbound::Invalid(e) => {
                    debug!(error = %e, "unusable frame");
                    Response::rejected(None, "response".into(), &e)
                }
                Inbound::Close(frame) => {
                    debug!(?frame, "client initiated close");
                    *state = ConnectionState::Closing;
                    websocket::ws_echo_close(&mut conn.ws_stream).await;
                    return Ok(());
                }
                Inbound::Ended => {
                    debug!("stream ended without close frame");
                    return Ok(());
                }
            };
            let frame = encode_response(&response)?;
            websocket::ws_send_text(&mut conn.ws_stream, frame).await?;
        }
    }
}

/// Send a shutdown notice, then close with 1001 (going away).
async fn say_goodbye(conn: &mut WebSocketConnection, state: &mut ConnectionState) {
    debug!("shutdown signal received, notifying WebSocket client");
    *state = ConnectionState::Closing;
    let notice = Notice::new("shutdown", "server shutdown");
    if let Ok(text) = serde_json::to_string(&notice) {
        let _ = websocket::ws_send_text(&mut conn.ws_stream, text).await;
    }
    websocket::ws_close(&mut conn.ws_stream, CloseCode::Away, "server shutdown").await;
}
