//! JSON text-frame codec for the gateway envelope.

use crate::error::{GatewayError, GatewayResult};
use crate::messages::{Request, Response};

/// Parse an inbound text frame into a [`Request`].
///
/// Unknown fields are ignored and missing optional fields take their empty
/// defaults. Anything that is not a JSON object matching the request schema
/// is a [`GatewayError::Decode`].
pub fn decode_request(text: &str) -> GatewayResult<Request> {
    serde_json::from_str(text).map_err(|e| GatewayError::Decode(format!("invalid request: {e}")))
}

/// Serialize a [`Response`] into a text frame.
pub fn encode_response(response: &Response) -> GatewayResult<String> {
    serde_json::to_string(response).map_err(|e| GatewayError::Other(format!("encode failed: {e}")))
}

pub fn decode_response(text: &str) -> GatewayResult<Response> {
    serde_json::from_str(text).map_err(|e| GatewayError::Decode(format!("invalid response: {e}")))
}

pub fn encode_request(request: &Request) -> GatewayResult<String> {
    serde_json::to_string(request).map_err(|e| GatewayError::Other(format!("encode failed: {e}")))
}
