//! Wire envelope types.
//!
//! Requests and responses travel as JSON text frames with camelCase field
//! names. Every optional request field defaults to empty so that sparse
//! clients decode cleanly; unknown fields are ignored.

use crate::error::{ErrorKind, GatewayError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// An inbound client request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<RequestMetadata>,
    #[serde(default)]
    pub requests: Vec<BackendCall>,
}

/// Credentials presented by the client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMetadata {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub request_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// One request entry: a backend and the operations to invoke on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendCall {
    pub backend: String,
    #[serde(default)]
    pub functions: BTreeMap<String, FunctionCall>,
}

/// One named operation invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub parameters: Vec<String>,
}

impl FunctionCall {
    pub fn with_parameters<I, S>(parameters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            url: None,
            parameters: parameters.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            parameters: Vec::new(),
        }
    }
}

/// Outcome of a single call: `{"success": payload}` or
/// `{"error": {"kind": ..., "message": ...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallResult {
    Success(Value),
    Error(ErrorBody),
}

impl CallResult {
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        CallResult::Error(ErrorBody {
            kind,
            message: message.into(),
        })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CallResult::Success(_))
    }
}

impl From<GatewayError> for CallResult {
    fn from(e: GatewayError) -> Self {
        CallResult::error(e.kind(), e.message())
    }
}

impl From<Result<Value, GatewayError>> for CallResult {
    fn from(r: Result<Value, GatewayError>) -> Self {
        match r {
            Ok(v) => CallResult::Success(v),
            Err(e) => e.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// Results keyed by backend name, then by call name.
pub type ResponseData = BTreeMap<String, BTreeMap<String, CallResult>>;

/// The aggregated reply to one [`Request`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub id: String,
    #[serde(rename = "type")]
    pub response_type: String,
    pub status: Status,
    #[serde(default)]
    pub data: ResponseData,
    pub metadata: ResponseMetadata,
    pub auth: ResponseAuth,
    /// Set only when the whole request was rejected (decode or auth).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    pub timestamp: String,
    pub response_id: String,
}

impl ResponseMetadata {
    /// Fresh metadata stamped with the current UTC time and a new id.
    pub fn now() -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            response_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseAuth {
    pub session_id: String,
    pub user_id: String,
}

/// Response `type` for a request: `<metadata.type>_response`, or plain
/// `response` when the client sent no type.
pub fn response_type_for(request: &Request) -> String {
    match request
        .metadata
        .as_ref()
        .and_then(|m| m.request_type.as_deref())
    {
        Some(t) if !t.is_empty() => format!("{t}_response"),
        _ => "response".to_string(),
    }
}

impl Response {
    /// Build a top-level rejection: no dispatch happened.
    pub fn rejected(id: Option<&str>, response_type: String, err: &GatewayError) -> Self {
        Self {
            id: id.unwrap_or_default().to_string(),
            response_type,
            status: Status::Error,
            data: ResponseData::new(),
            metadata: ResponseMetadata::now(),
            auth: ResponseAuth::default(),
            error: Some(ErrorBody {
                kind: err.kind(),
                message: err.message(),
            }),
        }
    }
}

/// Server-initiated message pushed to every live connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notice {
    #[serde(rename = "type")]
    pub notice_type: String,
    pub message: String,
    pub timestamp: String,
}

impl Notice {
    pub fn new(notice_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            notice_type: notice_type.into(),
            message: message.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn call_result_wire_shape() {
        let ok = serde_json::to_value(CallResult::Success(json!(42))).unwrap();
        assert_eq!(ok, json!({"success": 42}));

        let err = serde_json::to_value(CallResult::error(ErrorKind::Type, "bad int")).unwrap();
        assert_eq!(err, json!({"error": {"kind": "type", "message": "bad int"}}));
    }

    #[test]
    fn response_type_uses_metadata() {
        let mut req = Request::default();
        assert_eq!(response_type_for(&req), "response");
        req.metadata = Some(RequestMetadata {
            request_type: Some("web2".into()),
            ..Default::default()
        });
        assert_eq!(response_type_for(&req), "web2_response");
    }

    #[test]
    fn rejected_response_has_error_and_empty_data() {
        let err = GatewayError::Auth("token expired".into());
        let resp = Response::rejected(Some("r1"), "response".into(), &err);
        assert_eq!(resp.status, Status::Error);
        assert!(resp.data.is_empty());
        let body = resp.error.unwrap();
        assert_eq!(body.kind, ErrorKind::Auth);
        assert_eq!(body.message, "token expired");
    }
}
