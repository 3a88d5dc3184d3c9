use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced by the gateway.
///
/// Decode and auth errors reject a whole request; resolution, argument,
/// type, handshake and invocation errors are scoped to a single call and
/// surface inside the response `data`; transport errors end a connection.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("decode error: {0}")]
    Decode(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    Resolution(String),

    #[error("argument error: {0}")]
    Argument(String),

    #[error("type error: {0}")]
    Type(String),

    #[error("invocation failed: {0}")]
    Invocation(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        GatewayError::Decode(e.to_string())
    }
}

impl GatewayError {
    /// The wire-level category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Decode(_) => ErrorKind::Decode,
            GatewayError::Auth(_) => ErrorKind::Auth,
            GatewayError::Resolution(_) => ErrorKind::Resolution,
            GatewayError::Argument(_) => ErrorKind::Argument,
            GatewayError::Type(_) => ErrorKind::Type,
            GatewayError::Handshake(_) => ErrorKind::Handshake,
            GatewayError::Transport(_) => ErrorKind::Transport,
            GatewayError::Invocation(_)
            | GatewayError::Config(_)
            | GatewayError::Io(_)
            | GatewayError::Other(_) => ErrorKind::Invocation,
        }
    }

    /// The bare message, without the category prefix added by `Display`.
    pub fn message(&self) -> String {
        match self {
            GatewayError::Decode(m)
            | GatewayError::Auth(m)
            | GatewayError::Resolution(m)
            | GatewayError::Argument(m)
            | GatewayError::Type(m)
            | GatewayError::Invocation(m)
            | GatewayError::Handshake(m)
            | GatewayError::Transport(m)
            | GatewayError::Config(m)
            | GatewayError::Other(m) => m.clone(),
            GatewayError::Io(e) => e.to_string(),
        }
    }
}

/// Error category carried on the wire inside `Error(kind, message)` results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Decode,
    Auth,
    Resolution,
    Argument,
    Type,
    Invocation,
    Handshake,
    Transport,
}

pub type GatewayResult<T> = Result<T, GatewayError>;
