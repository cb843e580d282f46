//! User management API endpoints.

use axum::{
    extract::{Path, State},
    Extension,
};

use super::{current_revision, error, success, ApiResult};
use crate::identity::SessionContext;
use crate::models::UserProfile;
use crate::AppState;

/// PUT /api/users/:id/teams/:team - Add a user to a team.
pub async fn add_team_member(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Path((id, team)): Path<(String, String)>,
) -> ApiResult<UserProfile> {
    let revision_id = current_revision(&state).await;

    match state
        .gateway
        .add_team_member(&session.identity, &id, &team)
        .await
    {
        Ok(profile) => success(profile, current_revision(&state).await),
        Err(e) => error(e, revision_id),
    }
}

/// DELETE /api/users/:id/teams/:team - Remove a user from a team.
pub async fn remove_team_member(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Path((id, team)): Path<(String, String)>,
) -> ApiResult<UserProfile> {
    let revision_id = current_revision(&state).await;

    match state
        .gateway
        .remove_team_member(&session.identity, &id, &team)
        .await
    {
        Ok(profile) => success(profile, current_revision(&state).await),
        Err(e) => error(e, revision_id),
    }
}

/// DELETE /api/users/:id - Remove a user's profile, sessions and credentials.
pub async fn delete_user(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Path(id): Path<String>,
) -> ApiResult<()> {
    let revision_id = current_revision(&state).await;

    if let Err(e) = state.gateway.delete_user(&session.identity, &id).await {
        return error(e, revision_id);
    }

    let new_revision = current_revision(&state).await;
    match state.sessions.remove_account(&id).await {
        Ok(()) => success((), new_revision),
        Err(e) => error(e, new_revision),
    }
}
