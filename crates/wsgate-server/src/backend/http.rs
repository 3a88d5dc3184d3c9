//! HTTP fetch handler: one GET per call.

use super::{Backend, BackendKind};
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;
use url::Url;
use wsgate_core::{FunctionCall, GatewayError, GatewayResult};

/// Parse `url` if it is an absolute `http`/`https` URL with a host.
pub fn fetchable_url(url: Option<&str>) -> Option<Url> {
    let parsed = Url::parse(url?).ok()?;
    match parsed.scheme() {
        "http" | "https" if parsed.has_host() => Some(parsed),
        _ => None,
    }
}

pub struct HttpFetch {
    client: reqwest::Client,
}

impl HttpFetch {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// GET `url`. A 2xx JSON body is returned as-is; any other 2xx body is
    /// returned as a JSON string.
    pub async fn fetch(&self, url: Url) -> GatewayResult<Value> {
        debug!(url = %url, "fetching");
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| GatewayError::Invocation(format!("GET {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Invocation(format!(
                "GET {url} returned status {}",
                status.as_u16()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| GatewayError::Invocation(format!("GET {url}: reading body failed: {e}")))?;
        match serde_json::from_str(&body) {
            Ok(value) => Ok(value),
            Err(_) => Ok(Value::String(body)),
        }
    }
}

#[async_trait]
impl Backend for HttpFetch {
    fn kind(&self) -> BackendKind {
        BackendKind::HttpFetch
    }

    async fn invoke(&self, call_name: &str, call: &FunctionCall) -> GatewayResult<Value> {
        let raw = call.url.as_deref().ok_or_else(|| {
            GatewayError::Argument(format!("call '{call_name}' has no URL to fetch"))
        })?;
        let url = fetchable_url(Some(raw)).ok_or_else(|| {
            GatewayError::Argument(format!("call '{call_name}': '{raw}' is not an http(s) URL"))
        })?;
        self.fetch(url).await
    }
}
