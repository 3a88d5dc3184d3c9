//! Request pipeline: decode, authenticate, route.

pub mod router;

pub use router::Router;

use crate::auth;
use tracing::debug;
use wsgate_core::messages::response_type_for;
use wsgate_core::{decode_request, Response, TokenAuthority};

/// Turn one inbound text frame into exactly one response.
///
/// Decode and authentication failures produce a top-level rejection
/// without dispatching anything.
pub async fn process_message(text: &str, authority: &TokenAuthority, router: &Router) -> Response {
    let request = match decode_request(text) {
        Ok(request) => request,
        Err(e) => {
            debug!(error = %e, "rejecting undecodable request");
            return Response::rejected(salvage_id(text).as_deref(), "response".into(), &e);
        }
    };

    let response_type = response_type_for(&request);
    let session = match auth::authenticate(authority, &request) {
        Ok(session) => session,
        Err(e) => {
            debug!(error = %e, "rejecting unauthenticated request");
            return Response::rejected(request.id.as_deref(), response_type, &e);
        }
    };

    debug!(user_id = %session.user_id, issued = session.issued, "session resolved");
    router.route(&request, &session).await
}

/// Best-effort recovery of the `id` from a frame that failed to decode.
fn salvage_id(text: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    value.get("id")?.as_str().map(String::from)
}
