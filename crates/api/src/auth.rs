//! Bearer-token authentication for the backend.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::Authorization;
use axum_extra::TypedHeader;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid authorization header")]
    MissingToken,
    #[error("Invalid authentication credentials")]
    InvalidToken,
    #[error("Token does not identify a user")]
    MissingUserId,
    #[error("Unsupported JWT algorithm '{0}'")]
    UnsupportedAlgorithm(String),
}

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(rename = "userId", default)]
    user_id: Option<Value>,
    #[serde(default)]
    sub: Option<Value>,
}

/// Verifies tokens issued by the journal web application.
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    /// Shared-secret verifier. Only the HMAC family is accepted.
    pub fn new(secret: &str, algorithm: &str) -> Result<Self, AuthError> {
        let alg = Algorithm::from_str(algorithm)
            .map_err(|_| AuthError::UnsupportedAlgorithm(algorithm.to_string()))?;
        if !matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
            return Err(AuthError::UnsupportedAlgorithm(algorithm.to_string()));
        }

        let mut validation = Validation::new(alg);
        // `exp` is checked when present; the web app does not always set it.
        validation.required_spec_claims = HashSet::new();
        validation.validate_aud = false;

        Ok(Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }

    /// User id carried by `token`: the `userId` claim, else a numeric `sub`.
    pub fn verify(&self, token: &str) -> Result<i64, AuthError> {
        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| {
            tracing::debug!(error = %e, "Token rejected");
            AuthError::InvalidToken
        })?;

        data.claims
            .user_id
            .as_ref()
            .and_then(user_id_from)
            .or_else(|| data.claims.sub.as_ref().and_then(user_id_from))
            .ok_or(AuthError::MissingUserId)
    }
}

fn user_id_from(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// The authenticated caller.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub user_id: i64,
}

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| AuthError::MissingToken)?;

        let user_id = state.auth.verify(bearer.token())?;
        Ok(AuthUser { user_id })
    }
}
