//! wsgate-core: Shared protocol library for the wsgate fan-out gateway.
//!
//! Provides the JSON request/response envelope, its codec, HMAC-signed
//! session tokens, and the gateway error taxonomy.

pub mod codec;
pub mod error;
pub mod messages;
pub mod token;

// Re-export commonly used items at crate root.
pub use codec::{decode_request, decode_response, encode_request, encode_response};
pub use error::{ErrorKind, GatewayError, GatewayResult};
pub use messages::{
    BackendCall, CallResult, FunctionCall, Request, Response, ResponseData, Status,
};
pub use token::{Claims, SessionToken, TokenAuthority, TOKEN_TTL_SECS};
