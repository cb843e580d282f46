//! Event API endpoints.

use axum::{
    extract::{Path, State},
    Extension, Json,
};

use super::{current_revision, error, success, ApiResult};
use crate::identity::SessionContext;
use crate::models::{CreateEventRequest, Event, RsvpRequest};
use crate::AppState;

/// POST /api/events - Create an event.
pub async fn create_event(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Json(request): Json<CreateEventRequest>,
) -> ApiResult<Event> {
    let revision_id = current_revision(&state).await;

    match state.gateway.create_event(&session.identity, request).await {
        Ok(event) => success(event, current_revision(&state).await),
        Err(e) => error(e, revision_id),
    }
}

/// DELETE /api/events/:id - Delete an event.
pub async fn delete_event(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Path(id): Path<String>,
) -> ApiResult<()> {
    let revision_id = current_revision(&state).await;

    match state.gateway.delete_event(&session.identity, &id).await {
        Ok(()) => success((), current_revision(&state).await),
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/events/:id/rsvp - Join, decline or leave an event.
pub async fn rsvp_event(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Path(id): Path<String>,
    Json(request): Json<RsvpRequest>,
) -> ApiResult<Event> {
    let revision_id = current_revision(&state).await;

    match state
        .gateway
        .rsvp(&session.identity, &id, request.response)
        .await
    {
        Ok(event) => success(event, current_revision(&state).await),
        Err(e) => error(e, revision_id),
    }
}
