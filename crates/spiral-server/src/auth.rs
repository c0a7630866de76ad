//! Bearer JWT verification for the metrics/explorer surface (spec §4.H, §6).
//!
//! A missing or invalid token on an authenticated route is always a `401`; the body
//! never reveals which check failed, matching the no-backend-detail policy of spec §7.

use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::AppState;

/// Minimal claim set. `exp` is validated by `jsonwebtoken`; anything else in the
/// token is ignored.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

/// Extracted once a request's bearer token has verified against `metrics_jwt_secret`.
/// Routes that take this as an argument are authenticated by construction.
pub struct Authenticated;

impl FromRequestParts<AppState> for Authenticated {
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        verify_bearer(&parts.headers, state).map(|_| Authenticated)
    }
}

/// Verify the `Authorization: Bearer <jwt>` header against `state`'s signing secret.
/// A server with no `metrics_jwt_secret` configured treats every route as authenticated
/// `NotInitialized`-style startup refusal belongs in `Config::validate`, not here: an
/// operator who deliberately runs without a secret has opted into an open metrics port.
pub fn verify_bearer(headers: &HeaderMap, state: &AppState) -> Result<(), StatusCode> {
    let Some(secret) = &state.jwt_secret else {
        return Ok(());
    };
    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(StatusCode::UNAUTHORIZED)?;

    decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &Validation::default())
        .map(|_| ())
        .map_err(|_| StatusCode::UNAUTHORIZED)
}

/// `axum::middleware::from_fn_with_state`-style check used by the WebSocket upgrade,
/// which needs the headers before the protocol switches and can't use an extractor
/// (the upgrade response must stay a plain `Response`, not `impl IntoResponse` + auth).
pub fn require_bearer(State(state): State<AppState>, headers: &HeaderMap) -> Result<(), StatusCode> {
    verify_bearer(headers, &state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token(secret: &str, exp: usize) -> String {
        let claims = Claims { sub: "test".to_string(), exp };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    fn headers_with_bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            format!("Bearer {token}").parse().unwrap(),
        );
        headers
    }

    #[test]
    fn rejects_missing_header_when_secret_configured() {
        let state = crate::test_state_with_secret(Some("secret".to_string()));
        assert_eq!(verify_bearer(&HeaderMap::new(), &state), Err(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn accepts_valid_token() {
        let state = crate::test_state_with_secret(Some("secret".to_string()));
        let exp = (chrono::Utc::now().timestamp() + 3600) as usize;
        let headers = headers_with_bearer(&token("secret", exp));
        assert_eq!(verify_bearer(&headers, &state), Ok(()));
    }

    #[test]
    fn rejects_token_signed_with_wrong_secret() {
        let state = crate::test_state_with_secret(Some("secret".to_string()));
        let exp = (chrono::Utc::now().timestamp() + 3600) as usize;
        let headers = headers_with_bearer(&token("wrong-secret", exp));
        assert_eq!(verify_bearer(&headers, &state), Err(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn rejects_expired_token() {
        let state = crate::test_state_with_secret(Some("secret".to_string()));
        let headers = headers_with_bearer(&token("secret", 1));
        assert_eq!(verify_bearer(&headers, &state), Err(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn no_secret_configured_allows_all_requests() {
        let state = crate::test_state_with_secret(None);
        assert_eq!(verify_bearer(&HeaderMap::new(), &state), Ok(()));
    }
}
