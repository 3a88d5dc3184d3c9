//! Per-request session resolution.

use tracing::debug;
use wsgate_core::{GatewayError, GatewayResult, Request, TokenAuthority};

/// The identity a request runs under, with the token to echo back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    pub token: String,
    /// True when the token was minted for this request.
    pub issued: bool,
}

/// Resolve the session for `request`.
///
/// A presented `sessionId` must validate, and if `userId` is also given it
/// must match the token's identity. Without a `sessionId` a fresh token is
/// issued for `userId` (or an anonymous identity) and validated before use.
/// Empty strings count as absent.
pub fn authenticate(authority: &TokenAuthority, request: &Request) -> GatewayResult<Session> {
    let auth = request.auth.as_ref();
    let claimed_user = auth
        .and_then(|a| a.user_id.as_deref())
        .filter(|u| !u.is_empty());
    let presented = auth
        .and_then(|a| a.session_id.as_deref())
        .filter(|s| !s.is_empty());

    match presented {
        Some(token) => {
            let claims = authority.validate(token)?;
            if let Some(user) = claimed_user {
                if user != claims.user_id {
                    return Err(GatewayError::Auth(format!(
                        "session token does not belong to '{user}'"
                    )));
                }
            }
            Ok(Session {
                user_id: claims.user_id,
                token: token.to_string(),
                issued: false,
            })
        }
        None => {
            let issued = authority.issue(claimed_user.unwrap_or_default())?;
            let claims = authority.validate(&issued.token)?;
            debug!(user_id = %claims.user_id, "issued session token");
            Ok(Session {
                user_id: claims.user_id,
                token: issued.token,
                issued: true,
            })
        }
    }
}
