//! Roster API endpoints: services, role slots and role restrictions.

use axum::{
    extract::{Path, State},
    Extension, Json,
};

use super::{current_revision, error, success, ApiResult};
use crate::identity::SessionContext;
use crate::models::{CreateServiceRequest, RoleRestriction, Service, SetRestrictionRequest};
use crate::AppState;

/// POST /api/services - Create a service.
pub async fn create_service(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Json(request): Json<CreateServiceRequest>,
) -> ApiResult<Service> {
    let revision_id = current_revision(&state).await;

    match state.gateway.create_service(&session.identity, request).await {
        Ok(service) => success(service, current_revision(&state).await),
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/services/:id/roles/:role - Volunteer for a role.
pub async fn volunteer(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Path((id, role)): Path<(String, String)>,
) -> ApiResult<Service> {
    let revision_id = current_revision(&state).await;

    match state.gateway.volunteer(&session.identity, &id, &role).await {
        Ok(service) => success(service, current_revision(&state).await),
        Err(e) => error(e, revision_id),
    }
}

/// DELETE /api/services/:id/roles/:role - Give up or clear a role.
pub async fn cancel_role(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Path((id, role)): Path<(String, String)>,
) -> ApiResult<Service> {
    let revision_id = current_revision(&state).await;

    match state.gateway.cancel_role(&session.identity, &id, &role).await {
        Ok(service) => success(service, current_revision(&state).await),
        Err(e) => error(e, revision_id),
    }
}

/// PUT /api/restrictions/:role - Restrict a role to one team.
pub async fn set_restriction(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Path(role): Path<String>,
    Json(request): Json<SetRestrictionRequest>,
) -> ApiResult<RoleRestriction> {
    let revision_id = current_revision(&state).await;

    match state
        .gateway
        .set_role_restriction(&session.identity, &role, &request.team_id)
        .await
    {
        Ok(restriction) => success(restriction, current_revision(&state).await),
        Err(e) => error(e, revision_id),
    }
}

/// DELETE /api/restrictions/:role - Open a role to everyone again.
pub async fn clear_restriction(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Path(role): Path<String>,
) -> ApiResult<()> {
    let revision_id = current_revision(&state).await;

    match state
        .gateway
        .clear_role_restriction(&session.identity, &role)
        .await
    {
        Ok(()) => success((), current_revision(&state).await),
        Err(e) => error(e, revision_id),
    }
}
