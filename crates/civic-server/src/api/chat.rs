//! `/chat` handlers: group creation, listings and message history.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use civic_shared::protocol::MessageView;
use civic_shared::types::Role;
use civic_store::Group;

use super::json_body;
use crate::error::ServerError;
use crate::extract::{require_role, AuthUser};
use crate::state::AppState;

const ORGANIZERS: &[Role] = &[Role::Candidate, Role::Admin];
const VOLUNTEERS: &[Role] = &[Role::Volunteer, Role::Admin];

#[derive(Deserialize)]
pub(super) struct CreateGroupRequest {
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    members: Vec<String>,
}

#[derive(Serialize)]
pub(super) struct GroupResponse {
    success: bool,
    group: Group,
}

#[derive(Serialize)]
pub(super) struct GroupListResponse {
    success: bool,
    groups: Vec<Group>,
}

pub(super) async fn create_group(
    State(state): State<AppState>,
    user: AuthUser,
    payload: Result<Json<CreateGroupRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<GroupResponse>), ServerError> {
    require_role(&user, ORGANIZERS)?;
    let req = json_body(payload)?;

    let group = state
        .chat
        .create_group(&user.profile, &req.name, &req.description, &req.members)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(GroupResponse {
            success: true,
            group,
        }),
    ))
}

pub(super) async fn list_created(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<GroupListResponse>, ServerError> {
    require_role(&user, ORGANIZERS)?;
    let groups = state.chat.list_created_by(user.profile.id).await?;
    Ok(Json(GroupListResponse {
        success: true,
        groups,
    }))
}

pub(super) async fn list_for_volunteer(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<GroupListResponse>, ServerError> {
    require_role(&user, VOLUNTEERS)?;
    let groups = state.chat.list_for_member(&user.profile.phone).await?;
    Ok(Json(GroupListResponse {
        success: true,
        groups,
    }))
}

#[derive(Deserialize)]
pub(super) struct HistoryQuery {
    before: Option<i64>,
    limit: Option<u32>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct HistoryResponse {
    success: bool,
    messages: Vec<MessageView>,
    next_cursor: Option<i64>,
}

pub(super) async fn list_messages(
    State(state): State<AppState>,
    user: AuthUser,
    Path(group_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ServerError> {
    let group = state.chat.authorize(&group_id, &user.profile).await?;
    let limit = query.limit.unwrap_or(state.config.history_page_size);
    let page = state.chat.history_page(group.id, query.before, limit).await?;

    Ok(Json(HistoryResponse {
        success: true,
        messages: page.messages,
        next_cursor: page.next_cursor,
    }))
}
