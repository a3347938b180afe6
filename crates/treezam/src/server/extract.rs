//! Request extractors.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use chrono::Utc;

use super::{ApiError, AppState};
use crate::auth;
use crate::model::User;

/// The user behind a valid `Authorization: Bearer <token>` header.
///
/// Rejects with 401 "Please authenticate" when the header is missing,
/// malformed, or names an unknown or expired session.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// The signed-in user.
    pub user: User,
    /// The presented session token.
    pub token: String,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or_else(ApiError::please_authenticate)?;

        let lookup = token.clone();
        let user = state
            .with_storage(move |s| auth::authenticate(s, &lookup, Utc::now()))
            .await?
            .ok_or_else(ApiError::please_authenticate)?;

        Ok(Self { user, token })
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then(|| token.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token(&headers("Bearer abc123")).as_deref(), Some("abc123"));
        assert_eq!(bearer_token(&headers("bearer  abc123 ")).as_deref(), Some("abc123"));
        assert_eq!(bearer_token(&headers("Basic abc123")), None);
        assert_eq!(bearer_token(&headers("Bearer ")), None);
        assert_eq!(bearer_token(&headers("abc123")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }
}
