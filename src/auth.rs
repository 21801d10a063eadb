//! Bearer-token gate for authenticated controllers and HS256 token issuing.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde_json::{json, Value};
use thiserror::Error;

use crate::response::Message;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("missing token")]
    MissingToken,
    #[error("token expired")]
    Expired,
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("claims must be a JSON object")]
    InvalidClaims,
    #[error("failed to issue token: {0}")]
    Issue(String),
}

/// Decoded token payload, visible to handlers as `req.user` and
/// `res.locals.jwtPayload`.
#[derive(Clone, Debug)]
pub struct Claims(pub Value);

pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<Value, AuthError>;
}

#[derive(Clone)]
pub struct JwtVerifier {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expires_in: Duration,
}

impl JwtVerifier {
    pub fn new(secret: &str, expires_in: Duration) -> Self {
        JwtVerifier {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            expires_in,
        }
    }

    /// Sign `claims` (an object) with `iat` and `exp` added.
    pub fn issue(&self, claims: Value) -> Result<String, AuthError> {
        let Value::Object(mut fields) = claims else {
            return Err(AuthError::InvalidClaims);
        };
        let now = chrono::Utc::now().timestamp();
        let exp = i64::try_from(self.expires_in.as_secs())
            .ok()
            .and_then(|secs| now.checked_add(secs))
            .ok_or_else(|| AuthError::Issue("token lifetime out of range".into()))?;
        fields.insert("iat".into(), Value::from(now));
        fields.insert("exp".into(), Value::from(exp));
        encode(&Header::default(), &Value::Object(fields), &self.encoding_key)
            .map_err(|e| AuthError::Issue(e.to_string()))
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<Value, AuthError> {
        let validation = Validation::default();
        decode::<Value>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidToken(e.to_string()),
            })
    }
}

/// `x-access-token` wins over `authorization`; a `Bearer ` prefix is optional.
pub fn token_from_headers(headers: &HeaderMap) -> Option<&str> {
    let raw = headers
        .get("x-access-token")
        .or_else(|| headers.get("authorization"))
        .and_then(|v| v.to_str().ok())?
        .trim();
    let token = raw.strip_prefix("Bearer ").unwrap_or(raw).trim();
    (!token.is_empty()).then_some(token)
}

pub fn unauthorized() -> Response {
    let message = Message::new(
        "Invalid token",
        "Your session is invalid or has expired. Please sign in again.",
    );
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "messageCode": 401, "message": message })),
    )
        .into_response()
}

/// Middleware: verify the token and stash its claims, or answer 401.
pub async fn auth_gate(
    State(verifier): State<Arc<dyn TokenVerifier>>,
    mut request: Request,
    next: Next,
) -> Response {
    let verified = match token_from_headers(request.headers()) {
        Some(token) => verifier.verify(token),
        None => Err(AuthError::MissingToken),
    };
    match verified {
        Ok(claims) => {
            request.extensions_mut().insert(Claims(claims));
            next.run(request).await
        }
        Err(e) => {
            tracing::debug!(error = %e, path = %request.uri().path(), "rejected token");
            unauthorized()
        }
    }
}
