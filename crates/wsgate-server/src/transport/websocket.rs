//! WebSocket listener using tokio-tungstenite.
//!
//! Plain HTTP requests that do not ask for a WebSocket upgrade are answered
//! with `400 Bad Request` and closed before any handshake is attempted.

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};
use wsgate_core::{GatewayError, GatewayResult};

pub type WsStream = WebSocketStream<TcpStream>;

/// A handle to an accepted WebSocket connection.
pub struct WebSocketConnection {
    pub ws_stream: WsStream,
    pub remote_addr: SocketAddr,
}

/// What the next inbound frame turned out to be.
#[derive(Debug)]
pub enum Inbound {
    /// A complete text (or UTF-8 binary) message.
    Text(String),
    /// A frame that arrived intact but cannot be used as a request.
    Invalid(GatewayError),
    /// The peer started the close handshake.
    Close(Option<CloseFrame<'static>>),
    /// The stream ended without a close frame.
    Ended,
}

const UPGRADE_PEEK_LIMIT: usize = 8192;
const UPGRADE_PEEK_TIMEOUT: Duration = Duration::from_secs(5);
const CLOSE_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

const BAD_REQUEST: &[u8] = b"HTTP/1.1 400 Bad Request\r\n\
Content-Type: text/plain\r\n\
Content-Length: 28\r\n\
Connection: close\r\n\
\r\n\
WebSocket upgrade required\r\n";

/// Bind the TCP listener for the gateway.
pub async fn bind(addr: &str) -> GatewayResult<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| GatewayError::Transport(format!("WS bind failed on {addr}: {e}")))
}

/// Start accepting on `tcp_listener`.
///
/// Returns a receiver that yields upgraded connections. The accept loop
/// stops once the receiver is dropped.
pub fn start_listener(tcp_listener: TcpListener) -> mpsc::Receiver<WebSocketConnection> {
    if let Ok(addr) = tcp_listener.local_addr() {
        info!(addr = %addr, "WebSocket listener started");
    }

    let (tx, rx) = mpsc::channel::<WebSocketConnection>(64);

    tokio::spawn(async move {
        loop {
            let accepted = tokio::select! {
                _ = tx.closed() => break,
                accepted = tcp_listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, addr)) => {
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        if !is_upgrade_request(&stream).await {
                            debug!(remote = %addr, "rejecting non-upgrade request");
                            reject_non_upgrade(stream).await;
                            return;
                        }
                        match tokio_tungstenite::accept_async(stream).await {
                            Ok(ws_stream) => {
                                debug!(remote = %addr, "WebSocket connection accepted");
                                let conn = WebSocketConnection {
                                    ws_stream,
                                    remote_addr: addr,
                                };
                                if tx.send(conn).await.is_err() {
                                    warn!("WebSocket connection channel closed");
                                }
                            }
                            Err(e) => {
                                warn!(remote = %addr, error = %e, "WebSocket handshake failed");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "TCP accept failed");
                }
            }
        }
        debug!("WebSocket accept loop stopped");
    });

    rx
}

/// Peek at the request head and check for `Upgrade: websocket`.
async fn is_upgrade_request(stream: &TcpStream) -> bool {
    let peeked = tokio::time::timeout(UPGRADE_PEEK_TIMEOUT, async {
        let mut buf = vec![0u8; UPGRADE_PEEK_LIMIT];
        loop {
            let n = match stream.peek(&mut buf).await {
                Ok(0) | Err(_) => return None,
                Ok(n) => n,
            };
            let head = &buf[..n];
            if head.windows(4).any(|w| w == b"\r\n\r\n") || n == buf.len() {
                return Some(head.to_vec());
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    match peeked {
        Ok(Some(head)) => head_requests_websocket(&head),
        _ => false,
    }
}

fn head_requests_websocket(head: &[u8]) -> bool {
    let text = String::from_utf8_lossy(head);
    text.lines().skip(1).any(|line| {
        line.split_once(':').is_some_and(|(name, value)| {
            name.trim().eq_ignore_ascii_case("upgrade")
                && value
                    .split(',')
                    .any(|v| v.trim().eq_ignore_ascii_case("websocket"))
        })
    })
}

async fn reject_non_upgrade(mut stream: TcpStream) {
    // Consume the peeked head so closing does not reset the connection.
    let mut head = vec![0u8; UPGRADE_PEEK_LIMIT];
    let _ = stream.try_read(&mut head);
    if let Err(e) = stream.write_all(BAD_REQUEST).await {
        debug!(error = %e, "failed to write 400 response");
    }
    let _ = stream.shutdown().await;
}

/// Send a text message over a WebSocket.
pub async fn ws_send_text(ws: &mut WsStream, text: String) -> GatewayResult<()> {
    ws.send(Message::Text(text.into()))
        .await
        .map_err(|e| GatewayError::Transport(format!("WS send failed: {e}")))
}

/// Receive the next request-bearing frame.
///
/// Pings are answered automatically. Frames larger than `max_frame_size`
/// and binary frames that are not UTF-8 come back as [`Inbound::Invalid`].
pub async fn ws_recv_text(ws: &mut WsStream, max_frame_size: usize) -> GatewayResult<Inbound> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                if text.len() > max_frame_size {
                    return Ok(Inbound::Invalid(oversized(text.len(), max_frame_size)));
                }
                return Ok(Inbound::Text(text.to_string()));
            }
            Some(Ok(Message::Binary(data))) => {
                if data.len() > max_frame_size {
                    return Ok(Inbound::Invalid(oversized(data.len(), max_frame_size)));
                }
                return Ok(match String::from_utf8(data.to_vec()) {
                    Ok(text) => Inbound::Text(text),
                    Err(_) => Inbound::Invalid(GatewayError::Decode(
                        "binary frame is not valid UTF-8".into(),
                    )),
                });
            }
            Some(Ok(Message::Close(frame))) => return Ok(Inbound::Close(frame)),
            Some(Ok(Message::Ping(payload))) => {
                let _ = ws.send(Message::Pong(payload)).await;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                return Err(GatewayError::Transport(format!("WS recv failed: {e}")));
            }
            None => return Ok(Inbound::Ended),
        }
    }
}

fn oversized(len: usize, max: usize) -> GatewayError {
    GatewayError::Decode(format!("frame too large: {len} bytes (max {max})"))
}

/// Close with an explicit code and reason, ignoring transport failures.
pub async fn ws_close(ws: &mut WsStream, code: CloseCode, reason: &str) {
    let frame = CloseFrame {
        code,
        reason: reason.to_string().into(),
    };
    if let Err(e) = ws.close(Some(frame)).await {
        debug!(error = %e, "WS close failed");
    }
}

/// Finish a peer-initiated close.
///
/// tungstenite has already queued the echo of the peer's close frame when
/// it was read; this flushes it out and drains the stream to its end.
pub async fn ws_echo_close(ws: &mut WsStream) {
    if let Err(e) = ws.flush().await {
        debug!(error = %e, "WS close echo flush ended");
    }
    let drained = tokio::time::timeout(CLOSE_DRAIN_TIMEOUT, async {
        while let Some(Ok(_)) = ws.next().await {}
    })
    .await;
    if drained.is_err() {
        debug!("peer kept the stream open after close");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_upgrade_header() {
        let head = b"GET / HTTP/1.1\r\nHost: x\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\r\n";
        assert!(head_requests_websocket(head));

        let head = b"GET / HTTP/1.1\r\nHost: x\r\nupgrade: h2c, WebSocket\r\n\r\n";
        assert!(head_requests_websocket(head));
    }

    #[test]
    fn plain_get_is_not_upgrade() {
        let head = b"GET /upgrade: websocket HTTP/1.1\r\nHost: x\r\nAccept: */*\r\n\r\n";
        assert!(!head_requests_websocket(head));
    }
}
