//! Session token transport adapters and the authenticated-caller extractor.
//!
//! A token may arrive as `Authorization: Bearer <token>`, in the `token`
//! cookie, or as a `?token=` query parameter (browser WebSocket clients
//! cannot set headers). All three feed the same verification path.

use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, Uri};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;

use civic_shared::constants::SESSION_COOKIE;
use civic_shared::session::{bearer_token, SessionClaims};
use civic_shared::types::Role;
use civic_store::Profile;

use crate::error::ServerError;
use crate::state::AppState;

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// The first token found in header, cookie, then query string.
pub fn presented_token(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    if let Some(token) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token)
    {
        return Some(token.to_string());
    }

    if let Some(cookie) = CookieJar::from_headers(headers).get(SESSION_COOKIE) {
        if !cookie.value().is_empty() {
            return Some(cookie.value().to_string());
        }
    }

    Query::<TokenQuery>::try_from_uri(uri)
        .ok()
        .and_then(|Query(q)| q.token)
        .filter(|t| !t.is_empty())
}

/// An authenticated caller with their current profile.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub profile: Profile,
    pub claims: SessionClaims,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = presented_token(&parts.headers, &parts.uri);
        let auth = state.sessions.authenticate(token.as_deref()).await?;
        Ok(AuthUser {
            profile: auth.profile,
            claims: auth.claims,
        })
    }
}

/// Reject callers whose current role is not in `allowed`.
pub fn require_role(user: &AuthUser, allowed: &[Role]) -> Result<(), ServerError> {
    if allowed.contains(&user.profile.role) {
        Ok(())
    } else {
        Err(ServerError::Forbidden(format!(
            "Role {} is not permitted",
            user.profile.role
        )))
    }
}
