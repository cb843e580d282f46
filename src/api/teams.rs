//! Team and chat API endpoints.

use axum::{
    extract::{Path, State},
    Extension, Json,
};

use super::{current_revision, error, success, ApiResult};
use crate::gateway::TeamCleanup;
use crate::identity::SessionContext;
use crate::models::{CreateTeamRequest, Message, RenameTeamRequest, SendMessageRequest, Team};
use crate::AppState;

/// POST /api/teams - Create a team.
pub async fn create_team(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Json(request): Json<CreateTeamRequest>,
) -> ApiResult<Team> {
    let revision_id = current_revision(&state).await;

    match state.gateway.create_team(&session.identity, &request.name).await {
        Ok(team) => success(team, current_revision(&state).await),
        Err(e) => error(e, revision_id),
    }
}

/// PUT /api/teams/:id - Rename a team.
pub async fn rename_team(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Path(id): Path<String>,
    Json(request): Json<RenameTeamRequest>,
) -> ApiResult<Team> {
    let revision_id = current_revision(&state).await;

    match state
        .gateway
        .rename_team(&session.identity, &id, &request.name)
        .await
    {
        Ok(team) => success(team, current_revision(&state).await),
        Err(e) => error(e, revision_id),
    }
}

/// DELETE /api/teams/:id - Delete a team with its memberships, restrictions and channel.
pub async fn delete_team(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Path(id): Path<String>,
) -> ApiResult<TeamCleanup> {
    let revision_id = current_revision(&state).await;

    match state.gateway.delete_team(&session.identity, &id).await {
        Ok(cleanup) => success(cleanup, current_revision(&state).await),
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/teams/:id/messages - Post in a team channel.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Path(id): Path<String>,
    Json(request): Json<SendMessageRequest>,
) -> ApiResult<Message> {
    let revision_id = current_revision(&state).await;

    match state
        .gateway
        .send_message(&session.identity, &id, &request.text)
        .await
    {
        Ok(message) => success(message, current_revision(&state).await),
        Err(e) => error(e, revision_id),
    }
}
