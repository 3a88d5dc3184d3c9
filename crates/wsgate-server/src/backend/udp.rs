//! Fire-and-forget UDP handler.
//!
//! Each call becomes one datagram carrying `{"call": ..., "parameters": [...]}`.
//! No reply is awaited; success means the datagram left the socket.

use super::{Backend, BackendKind};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tracing::debug;
use url::Url;
use wsgate_core::{FunctionCall, GatewayError, GatewayResult};

pub struct UdpSend {
    /// `host:port` used when the call names no `udp://` URL.
    target: Option<String>,
}

impl UdpSend {
    pub fn new(target: Option<String>) -> Self {
        Self { target }
    }

    fn target_for(&self, call_name: &str, call: &FunctionCall) -> GatewayResult<String> {
        if let Some(url) = call.url.as_deref().and_then(|u| Url::parse(u).ok()) {
            if url.scheme() == "udp" {
                if let (Some(host), Some(port)) = (url.host_str(), url.port()) {
                    return Ok(format!("{host}:{port}"));
                }
            }
        }
        self.target.clone().ok_or_else(|| {
            GatewayError::Argument(format!("call '{call_name}' has no UDP target"))
        })
    }
}

async fn resolve(target: &str) -> GatewayResult<SocketAddr> {
    tokio::net::lookup_host(target)
        .await
        .map_err(|e| GatewayError::Invocation(format!("cannot resolve {target}: {e}")))?
        .next()
        .ok_or_else(|| GatewayError::Invocation(format!("{target} resolved to no address")))
}

#[async_trait]
impl Backend for UdpSend {
    fn kind(&self) -> BackendKind {
        BackendKind::UdpSend
    }

    async fn invoke(&self, call_name: &str, call: &FunctionCall) -> GatewayResult<Value> {
        let target = self.target_for(call_name, call)?;
        let addr = resolve(&target).await?;

        let local = if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|e| GatewayError::Invocation(format!("UDP bind failed: {e}")))?;

        let payload = serde_json::to_vec(&json!({
            "call": call_name,
            "parameters": call.parameters,
        }))
        .map_err(|e| GatewayError::Invocation(format!("encoding datagram: {e}")))?;

        let sent = socket
            .send_to(&payload, addr)
            .await
            .map_err(|e| GatewayError::Invocation(format!("UDP send to {addr} failed: {e}")))?;
        debug!(target = %addr, bytes = sent, "datagram sent");

        Ok(json!({ "sent": sent, "target": addr.to_string() }))
    }
}
