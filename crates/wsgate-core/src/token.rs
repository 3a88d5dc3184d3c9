//! Signed session tokens.
//!
//! Format: `base64url(header).base64url(claims).base64url(HMAC-SHA256)` where
//! the MAC covers `header '.' claims`. Tokens are stateless: validity is the
//! signature plus the embedded expiry, checked against a secret generated
//! once per process. A restart invalidates every outstanding token.

use crate::error::{GatewayError, GatewayResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ring::hmac;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Lifetime of an issued token.
pub const TOKEN_TTL_SECS: u64 = 3600;

/// The only accepted signing algorithm.
pub const SIGNING_ALGORITHM: &str = "HS256";

const SECRET_LEN: usize = 32;

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    #[serde(default)]
    typ: Option<String>,
}

/// Claims embedded in a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub user_id: String,
    pub iat: u64,
    pub exp: u64,
}

/// A freshly issued token together with the identity it names.
#[derive(Debug, Clone)]
pub struct SessionToken {
    pub token: String,
    pub user_id: String,
}

/// Issues and validates session tokens with a process-wide secret.
pub struct TokenAuthority {
    key: hmac::Key,
}

impl std::fmt::Debug for TokenAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenAuthority").finish_non_exhaustive()
    }
}

impl TokenAuthority {
    /// Create an authority with a freshly generated random secret.
    pub fn new() -> GatewayResult<Self> {
        let secret = generate_secret()?;
        Ok(Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, &secret),
        })
    }

    /// Issue a token for `identity`, substituting a fresh anonymous identity
    /// when it is empty.
    pub fn issue(&self, identity: &str) -> GatewayResult<SessionToken> {
        self.issue_at(identity, unix_now())
    }

    pub fn issue_at(&self, identity: &str, now: u64) -> GatewayResult<SessionToken> {
        let user_id = if identity.is_empty() {
            anonymous_identity()
        } else {
            identity.to_string()
        };

        let header = Header {
            alg: SIGNING_ALGORITHM.to_string(),
            typ: Some("JWT".to_string()),
        };
        let claims = Claims {
            user_id: user_id.clone(),
            iat: now,
            exp: now + TOKEN_TTL_SECS,
        };

        let mut token = encode_segment(&header)?;
        token.push('.');
        token.push_str(&encode_segment(&claims)?);

        let tag = hmac::sign(&self.key, token.as_bytes());
        token.push('.');
        token.push_str(&URL_SAFE_NO_PAD.encode(tag.as_ref()));

        Ok(SessionToken {
            token,
            user_id,
        })
    }

    /// Validate a token and return its claims.
    pub fn validate(&self, token: &str) -> GatewayResult<Claims> {
        self.validate_at(token, unix_now())
    }

    pub fn validate_at(&self, token: &str, now: u64) -> GatewayResult<Claims> {
        if token.is_empty() {
            return Err(GatewayError::Auth("empty session token".into()));
        }

        let segments: Vec<&str> = token.split('.').collect();
        let [header_b64, claims_b64, sig_b64] = segments[..] else {
            return Err(GatewayError::Auth(format!(
                "malformed session token: expected 3 segments, got {}",
                segments.len()
            )));
        };

        let header: Header = decode_segment(header_b64)?;
        if header.alg != SIGNING_ALGORITHM {
            return Err(GatewayError::Auth(format!(
                "unsupported signing algorithm: {}",
                header.alg
            )));
        }

        let signature = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|_| GatewayError::Auth("malformed token signature".into()))?;
        let signed_len = header_b64.len() + 1 + claims_b64.len();
        hmac::verify(&self.key, token[..signed_len].as_bytes(), &signature)
            .map_err(|_| GatewayError::Auth("invalid token signature".into()))?;

        let claims: Claims = decode_segment(claims_b64)?;
        if now > claims.exp {
            return Err(GatewayError::Auth("session token expired".into()));
        }
        if claims.user_id.is_empty() {
            return Err(GatewayError::Auth("session token has no identity".into()));
        }

        Ok(claims)
    }
}

/// Generate a random server secret (32 bytes).
pub fn generate_secret() -> GatewayResult<Vec<u8>> {
    use ring::rand::{SecureRandom, SystemRandom};
    let rng = SystemRandom::new();
    let mut secret = vec![0u8; SECRET_LEN];
    rng.fill(&mut secret)
        .map_err(|_| GatewayError::Other("secure random source unavailable".into()))?;
    Ok(secret)
}

/// A unique identity for clients that did not name themselves.
pub fn anonymous_identity() -> String {
    format!("anon-{}", uuid::Uuid::new_v4())
}

fn encode_segment<T: Serialize>(value: &T) -> GatewayResult<String> {
    let json = serde_json::to_vec(value)
        .map_err(|e| GatewayError::Other(format!("token encode failed: {e}")))?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

fn decode_segment<T: DeserializeOwned>(segment: &str) -> GatewayResult<T> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| GatewayError::Auth("malformed token segment".into()))?;
    serde_json::from_slice(&bytes).map_err(|_| GatewayError::Auth("malformed token segment".into()))
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
