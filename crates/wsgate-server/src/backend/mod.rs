//! Backend handler registry.
//!
//! Every backend a request can name is a [`Registration`]: an invocation
//! capability implementing [`Backend`] plus the [`Handshake`] that must pass
//! before any of its calls run. Names are unique and matched exactly.
//!
//! # Handlers
//!
//! - **[`http`]**: one GET per call against the call's URL.
//! - **[`udp`]**: fire-and-forget datagram to a target endpoint.
//! - **[`peer`]**: one fresh WebSocket per call, one reply frame.
//! - **[`service`]**: in-process [`NamedService`] with a declared,
//!   typed operation table; [`builtin`] holds the stock services.
//!
//! # Selection
//!
//! A call carrying an absolute `http`/`https` URL is served by the shared
//! HTTP fetcher unless the backend is the reserved in-process marker
//! ([`IN_PROCESS_MARKER`]); every other call goes to the registered backend.

pub mod builtin;
pub mod http;
pub mod peer;
pub mod service;
pub mod udp;

pub use http::HttpFetch;
pub use peer::PeerRelay;
pub use service::{Arg, Args, NamedService, ParamType};
pub use udp::UdpSend;

use crate::config::{BackendKindConfig, BackendSection};
use crate::handshake::Handshake;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::info;
use wsgate_core::{FunctionCall, GatewayError, GatewayResult};

/// Backend name that always routes to its registered in-process handler,
/// even when a call carries an HTTP URL.
pub const IN_PROCESS_MARKER: &str = "web3";

/// Which family of handler a backend belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    HttpFetch,
    UdpSend,
    PeerRelay,
    NamedService,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BackendKind::HttpFetch => "http",
            BackendKind::UdpSend => "udp",
            BackendKind::PeerRelay => "peer",
            BackendKind::NamedService => "service",
        };
        f.write_str(s)
    }
}

/// One invocation capability.
///
/// `invoke` returns the call's success payload; any error it returns is
/// scoped to that single call by the router.
#[async_trait]
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    async fn invoke(&self, call_name: &str, call: &FunctionCall) -> GatewayResult<Value>;
}

/// A named entry in the [`Registry`].
#[derive(Clone)]
pub struct Registration {
    pub backend: Arc<dyn Backend>,
    pub handshake: Handshake,
}

/// Name → backend table shared by every connection.
pub struct Registry {
    entries: HashMap<String, Registration>,
    http: Arc<HttpFetch>,
    client: reqwest::Client,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// An empty registry with its own HTTP client.
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            entries: HashMap::new(),
            http: Arc::new(HttpFetch::new(client.clone())),
            client,
        }
    }

    /// Build the registry described by the `[[backends]]` config entries.
    pub fn from_config(backends: &[BackendSection]) -> GatewayResult<Self> {
        let mut registry = Self::new();
        for section in backends {
            let backend: Arc<dyn Backend> = match section.kind {
                BackendKindConfig::Http => registry.http.clone(),
                BackendKindConfig::Udp => Arc::new(UdpSend::new(section.target.clone())),
                BackendKindConfig::Peer => Arc::new(PeerRelay::new(section.target.clone())),
                BackendKindConfig::Service => {
                    let service = builtin::service(&section.name).ok_or_else(|| {
                        GatewayError::Config(format!(
                            "no builtin service named '{}' (available: {})",
                            section.name,
                            builtin::SERVICES.join(", ")
                        ))
                    })?;
                    Arc::new(service)
                }
            };
            let handshake = Handshake::from_url(section.handshake_url.clone())?;
            registry.register(&section.name, backend, handshake)?;
        }
        Ok(registry)
    }

    /// Register `backend` under `name`. Names must be unique.
    pub fn register(
        &mut self,
        name: &str,
        backend: Arc<dyn Backend>,
        handshake: Handshake,
    ) -> GatewayResult<()> {
        if self.entries.contains_key(name) {
            return Err(GatewayError::Config(format!(
                "backend '{name}' is already registered"
            )));
        }
        info!(backend = %name, kind = %backend.kind(), "registered backend");
        self.entries
            .insert(name.to_string(), Registration { backend, handshake });
        Ok(())
    }

    /// Exact, case-sensitive lookup.
    pub fn resolve(&self, name: &str) -> Option<&Registration> {
        self.entries.get(name)
    }

    /// Pick the handler that serves `call` on the resolved backend `name`.
    pub fn handler_for(
        &self,
        name: &str,
        registration: &Registration,
        call: &FunctionCall,
    ) -> Arc<dyn Backend> {
        if name != IN_PROCESS_MARKER && http::fetchable_url(call.url.as_deref()).is_some() {
            self.http.clone()
        } else {
            registration.backend.clone()
        }
    }

    /// Client used for handshakes and HTTP fetches.
    pub fn http_client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }
}
