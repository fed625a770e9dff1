//! `/admin/*` handlers behind the `ADMIN_TOKEN` bearer.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderMap},
    Json,
};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::info;

use civic_shared::protocol::ProfileSnapshot;
use civic_shared::session::bearer_token;
use civic_shared::types::{AccountStatus, ProfileId, Role};
use civic_store::StoreError;

use super::json_body;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::state::AppState;

fn verify_admin_token(headers: &HeaderMap, config: &ServerConfig) -> Result<(), ServerError> {
    let Some(expected) = config.admin_token.as_deref() else {
        return Err(ServerError::Forbidden(
            "Admin API is disabled (no ADMIN_TOKEN configured)".into(),
        ));
    };

    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token)
        .unwrap_or("");

    // Length is not secret; the content comparison must be constant time.
    let matches = presented.len() == expected.len()
        && bool::from(presented.as_bytes().ct_eq(expected.as_bytes()));
    if !matches {
        return Err(ServerError::Forbidden("Invalid admin token".into()));
    }
    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct StatusResponse {
    version: &'static str,
    uptime_secs: u64,
    active_rooms: usize,
    subscriptions: usize,
    tracked_clients: usize,
    tracked_phones: usize,
    expose_otp: bool,
}

pub(super) async fn status(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<StatusResponse>, ServerError> {
    verify_admin_token(&headers, &state.config)?;

    Ok(Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started_at.elapsed().as_secs(),
        active_rooms: state.gateway.hub().list_rooms().await.len(),
        subscriptions: state.gateway.hub().subscription_count().await,
        tracked_clients: state.rate_limiter.tracked().await,
        tracked_phones: state.auth.phone_limiter().tracked().await,
        expose_otp: state.config.expose_otp,
    }))
}

#[derive(Deserialize)]
pub(super) struct RoleRequest {
    role: String,
}

#[derive(Deserialize)]
pub(super) struct StatusRequest {
    status: String,
}

#[derive(Serialize)]
pub(super) struct ProfileResponse {
    success: bool,
    profile: ProfileSnapshot,
}

fn parse_profile_id(raw: &str) -> Result<ProfileId, ServerError> {
    ProfileId::parse(raw).map_err(|_| ServerError::NotFound("Profile not found".into()))
}

fn profile_not_found(e: StoreError) -> ServerError {
    match e {
        StoreError::NotFound => ServerError::NotFound("Profile not found".into()),
        other => other.into(),
    }
}

pub(super) async fn set_role(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<RoleRequest>, JsonRejection>,
) -> Result<Json<ProfileResponse>, ServerError> {
    verify_admin_token(&headers, &state.config)?;
    let id = parse_profile_id(&id)?;
    let role: Role = json_body(payload)?
        .role
        .parse()
        .map_err(|e: civic_shared::ParseError| ServerError::BadRequest(e.to_string()))?;

    let profile = state
        .db
        .call(move |db| db.set_profile_role(id, role))
        .await
        .map_err(profile_not_found)?;

    info!(profile = %id, role = %role, "Admin changed role");
    Ok(Json(ProfileResponse {
        success: true,
        profile: profile.snapshot(),
    }))
}

pub(super) async fn set_status(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<StatusRequest>, JsonRejection>,
) -> Result<Json<ProfileResponse>, ServerError> {
    verify_admin_token(&headers, &state.config)?;
    let id = parse_profile_id(&id)?;
    let status: AccountStatus = json_body(payload)?
        .status
        .parse()
        .map_err(|e: civic_shared::ParseError| ServerError::BadRequest(e.to_string()))?;

    let profile = state
        .db
        .call(move |db| db.set_account_status(id, status))
        .await
        .map_err(profile_not_found)?;

    info!(profile = %id, status = status.as_str(), "Admin changed account status");
    Ok(Json(ProfileResponse {
        success: true,
        profile: profile.snapshot(),
    }))
}
