//! Per-backend handshake run once per request entry, before any of the
//! entry's calls are dispatched.

use tracing::debug;
use url::Url;
use wsgate_core::{GatewayError, GatewayResult};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Handshake {
    /// Always passes.
    #[default]
    Open,
    /// POST to `url` with `Authorization: Bearer <session token>`; any 2xx
    /// status passes.
    Http { url: String },
}

impl Handshake {
    pub fn from_url(url: Option<String>) -> GatewayResult<Self> {
        match url {
            None => Ok(Handshake::Open),
            Some(url) => {
                Url::parse(&url).map_err(|e| {
                    GatewayError::Config(format!("invalid handshake_url '{url}': {e}"))
                })?;
                Ok(Handshake::Http { url })
            }
        }
    }

    pub async fn perform(
        &self,
        client: &reqwest::Client,
        backend: &str,
        token: &str,
    ) -> GatewayResult<()> {
        let url = match self {
            Handshake::Open => return Ok(()),
            Handshake::Http { url } => url,
        };

        let response = client
            .post(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| {
                GatewayError::Handshake(format!("handshake with '{backend}' failed: {e}"))
            })?;

        let status = response.status();
        debug!(backend, status = status.as_u16(), "handshake answered");
        if status.is_success() {
            Ok(())
        } else {
            Err(GatewayError::Handshake(format!(
                "backend '{backend}' refused handshake (status {})",
                status.as_u16()
            )))
        }
    }
}
