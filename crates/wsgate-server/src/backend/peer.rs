//! Peer-socket relay: forwards a call over a fresh outbound WebSocket and
//! returns the peer's first reply.

use super::{Backend, BackendKind};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;
use url::Url;
use wsgate_core::{FunctionCall, GatewayError, GatewayResult};

pub struct PeerRelay {
    /// `ws://` or `wss://` endpoint used when the call names none.
    target: Option<String>,
}

impl PeerRelay {
    pub fn new(target: Option<String>) -> Self {
        Self { target }
    }

    fn target_for(&self, call_name: &str, call: &FunctionCall) -> GatewayResult<String> {
        let from_call = call
            .url
            .as_deref()
            .and_then(|u| Url::parse(u).ok())
            .filter(|u| matches!(u.scheme(), "ws" | "wss"));
        match from_call {
            Some(url) => Ok(url.to_string()),
            None => self.target.clone().ok_or_else(|| {
                GatewayError::Argument(format!("call '{call_name}' has no peer endpoint"))
            }),
        }
    }
}

fn parse_reply(text: String) -> Value {
    match serde_json::from_str(&text) {
        Ok(value) => value,
        Err(_) => Value::String(text),
    }
}

#[async_trait]
impl Backend for PeerRelay {
    fn kind(&self) -> BackendKind {
        BackendKind::PeerRelay
    }

    async fn invoke(&self, call_name: &str, call: &FunctionCall) -> GatewayResult<Value> {
        let target = self.target_for(call_name, call)?;
        let (mut ws, _) = tokio_tungstenite::connect_async(target.as_str())
            .await
            .map_err(|e| GatewayError::Invocation(format!("connecting to peer {target}: {e}")))?;
        debug!(peer = %target, call = call_name, "relaying to peer");

        let frame = json!({
            "call": call_name,
            "url": call.url,
            "parameters": call.parameters,
        });
        ws.send(Message::Text(frame.to_string()))
            .await
            .map_err(|e| GatewayError::Invocation(format!("sending to peer {target}: {e}")))?;

        let reply = loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => break parse_reply(text.to_string()),
                Some(Ok(Message::Binary(data))) => {
                    let text = String::from_utf8(data.to_vec()).map_err(|_| {
                        GatewayError::Invocation(format!(
                            "peer {target} replied with non-UTF-8 data"
                        ))
                    })?;
                    break parse_reply(text);
                }
                Some(Ok(Message::Close(_))) | None => {
                    return Err(GatewayError::Invocation(format!(
                        "peer {target} closed before replying"
                    )));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    return Err(GatewayError::Invocation(format!(
                        "receiving from peer {target}: {e}"
                    )));
                }
            }
        };

        if let Err(e) = ws.close(None).await {
            debug!(peer = %target, error = %e, "peer close failed");
        }
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use wsgate_core::ErrorKind;

    /// Accepts one connection, reads one frame and hands it to `reply`.
    async fn peer<F>(reply: F) -> String
    where
        F: FnOnce(Value) -> Option<String> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let Some(Ok(Message::Text(text))) = ws.next().await else {
                return;
            };
            let received: Value = serde_json::from_str(&text).unwrap();
            match reply(received) {
                Some(out) => {
                    ws.send(Message::Text(out)).await.unwrap();
                    let _ = ws.next().await;
                }
                None => {
                    let _ = ws.close(None).await;
                }
            }
        });
        format!("ws://{addr}")
    }

    #[tokio::test]
    async fn relays_call_and_returns_first_reply() {
        let target = peer(|frame| Some(json!({"echo": frame}).to_string())).await;
        let relay = PeerRelay::new(Some(target));

        let out = relay
            .invoke("lookup", &FunctionCall::with_parameters(["a", "b"]))
            .await
            .unwrap();
        assert_eq!(
            out,
            json!({"echo": {"call": "lookup", "url": null, "parameters": ["a", "b"]}})
        );
    }

    #[tokio::test]
    async fn non_json_reply_is_returned_as_string() {
        let target = peer(|_| Some("pong".to_string())).await;
        let out = PeerRelay::new(None)
            .invoke("ping", &FunctionCall::with_url(target))
            .await
            .unwrap();
        assert_eq!(out, json!("pong"));
    }

    #[tokio::test]
    async fn peer_closing_without_reply_is_invocation_error() {
        let target = peer(|_| None).await;
        let err = PeerRelay::new(Some(target))
            .invoke("x", &FunctionCall::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invocation);
    }

    #[tokio::test]
    async fn no_endpoint_is_argument_error() {
        let err = PeerRelay::new(None)
            .invoke("x", &FunctionCall::with_url("http://example.com"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Argument);
    }
}
