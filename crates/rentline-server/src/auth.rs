//! Bearer-token authentication.
//!
//! Tokens come from the `Authorization: Bearer` header or, for websocket
//! handshakes where browsers cannot set headers, from the `access_token`
//! query parameter.

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};
use rentline_shared::constants::ACCESS_TOKEN_QUERY_PARAM;
use rentline_shared::token::TokenVerifier;
use rentline_shared::types::Principal;
use tracing::debug;

use crate::error::ServerError;
use crate::state::AppState;

/// Pull the raw token out of a request, header first.
pub fn bearer_token<'a>(headers: &'a HeaderMap, query: Option<&'a str>) -> Option<&'a str> {
    if let Some(value) = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(token) = value.strip_prefix("Bearer ") {
            let token = token.trim();
            if !token.is_empty() {
                return Some(token);
            }
        }
    }

    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == ACCESS_TOKEN_QUERY_PARAM)
        .map(|(_, value)| value)
        .filter(|value| !value.is_empty())
}

pub fn authenticate(
    verifier: &TokenVerifier,
    headers: &HeaderMap,
    query: Option<&str>,
) -> Result<Principal, ServerError> {
    let token = bearer_token(headers, query)
        .ok_or_else(|| ServerError::Unauthorized("missing access token".into()))?;

    verifier
        .verify(token)
        .map(|claims| claims.principal())
        .map_err(|e| {
            debug!(error = %e, "Rejected access token");
            ServerError::Unauthorized(e.to_string())
        })
}

/// Extractor for handlers that need an authenticated caller.
pub struct AuthUser(pub Principal);

impl AuthUser {
    pub fn require_staff(&self) -> Result<(), ServerError> {
        if self.0.role.is_staff() {
            Ok(())
        } else {
            Err(ServerError::Forbidden("staff role required".into()))
        }
    }

    pub fn require_admin(&self) -> Result<(), ServerError> {
        if self.0.role.is_admin() {
            Ok(())
        } else {
            Err(ServerError::Forbidden("admin role required".into()))
        }
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        authenticate(&state.verifier, &parts.headers, parts.uri.query()).map(AuthUser)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use chrono::Duration;
    use rentline_shared::token::TokenSigner;
    use rentline_shared::types::{Role, UserId};

    #[test]
    fn test_header_wins_over_query() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer from-header"));
        assert_eq!(
            bearer_token(&headers, Some("access_token=from-query")),
            Some("from-header")
        );
    }

    #[test]
    fn test_query_parameter_fallback() {
        let headers = HeaderMap::new();
        assert_eq!(
            bearer_token(&headers, Some("v=2&access_token=abc.def")),
            Some("abc.def")
        );
        assert_eq!(bearer_token(&headers, Some("access_token=")), None);
        assert_eq!(bearer_token(&headers, None), None);
    }

    #[test]
    fn test_authenticate() {
        let signer = TokenSigner::from_seed(&[3u8; 32]);
        let principal = Principal::new(UserId::new(), "Ola", Role::Admin);
        let token = signer.issue(&principal, Duration::minutes(5)).unwrap();

        let query = format!("access_token={token}");
        let resolved = authenticate(&signer.verifier(), &HeaderMap::new(), Some(&query)).unwrap();
        assert_eq!(resolved, principal);

        assert!(matches!(
            authenticate(&signer.verifier(), &HeaderMap::new(), None),
            Err(ServerError::Unauthorized(_))
        ));
        assert!(matches!(
            authenticate(&signer.verifier(), &HeaderMap::new(), Some("access_token=junk")),
            Err(ServerError::Unauthorized(_))
        ));
    }
}
