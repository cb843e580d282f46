//! Live view endpoints.
//!
//! Each view is served two ways: `GET /api/views/<name>` mounts it, renders
//! once and unmounts; `GET /api/views/<name>/stream` keeps it mounted and
//! pushes a `snapshot` event on every change until the client disconnects.

use axum::{
    extract::{Query, State},
    response::{IntoResponse, Response},
    Extension,
};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;

use super::{current_revision, error, success, ApiResult};
use crate::errors::{AppError, AppErrorWithRevision};
use crate::identity::SessionContext;
use crate::views::{
    into_sse, AdminState, AdminView, DashboardState, DashboardView, EventsState, EventsView,
    LiveView, RosterState, RosterView, TeamsState, TeamsView,
};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct RosterParams {
    /// Any day of the wanted week, defaults to today
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct TeamsParams {
    pub team: Option<String>,
}

async fn once<V: LiveView>(state: &AppState, mounted: Result<V, AppError>) -> ApiResult<V::Output> {
    match mounted {
        Ok(view) => success(view.render(), view.revision()),
        Err(e) => error(e, current_revision(state).await),
    }
}

async fn stream<V: LiveView + 'static>(state: &AppState, mounted: Result<V, AppError>) -> Response {
    match mounted {
        Ok(view) => into_sse(view).into_response(),
        Err(e) => AppErrorWithRevision {
            error: e,
            revision_id: current_revision(state).await,
        }
        .into_response(),
    }
}

async fn mount_dashboard(state: &AppState, session: SessionContext) -> Result<DashboardView, AppError> {
    DashboardView::mount(&state.subscriptions, session.identity).await
}

async fn mount_events(state: &AppState, session: SessionContext) -> Result<EventsView, AppError> {
    EventsView::mount(&state.subscriptions, &state.sweeper, session.identity).await
}

async fn mount_roster(
    state: &AppState,
    session: SessionContext,
    params: RosterParams,
) -> Result<RosterView, AppError> {
    let date = params.date.unwrap_or_else(|| Utc::now().date_naive());
    RosterView::mount(&state.subscriptions, &state.gateway, session.identity, date).await
}

async fn mount_teams(
    state: &AppState,
    session: SessionContext,
    params: TeamsParams,
) -> Result<TeamsView, AppError> {
    TeamsView::mount(&state.subscriptions, &state.sweeper, session.identity, params.team).await
}

async fn mount_admin(state: &AppState, session: SessionContext) -> Result<AdminView, AppError> {
    AdminView::mount(&state.subscriptions, &session.identity).await
}

/// GET /api/views/dashboard
pub async fn dashboard_view(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
) -> ApiResult<DashboardState> {
    let mounted = mount_dashboard(&state, session).await;
    once(&state, mounted).await
}

/// GET /api/views/dashboard/stream
pub async fn dashboard_stream(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
) -> Response {
    let mounted = mount_dashboard(&state, session).await;
    stream(&state, mounted).await
}

/// GET /api/views/events
pub async fn events_view(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
) -> ApiResult<EventsState> {
    let mounted = mount_events(&state, session).await;
    once(&state, mounted).await
}

/// GET /api/views/events/stream
pub async fn events_stream(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
) -> Response {
    let mounted = mount_events(&state, session).await;
    stream(&state, mounted).await
}

/// GET /api/views/roster?date=YYYY-MM-DD
pub async fn roster_view(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Query(params): Query<RosterParams>,
) -> ApiResult<RosterState> {
    let mounted = mount_roster(&state, session, params).await;
    once(&state, mounted).await
}

/// GET /api/views/roster/stream?date=YYYY-MM-DD
pub async fn roster_stream(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Query(params): Query<RosterParams>,
) -> Response {
    let mounted = mount_roster(&state, session, params).await;
    stream(&state, mounted).await
}

/// GET /api/views/teams?team=<id>
pub async fn teams_view(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Query(params): Query<TeamsParams>,
) -> ApiResult<TeamsState> {
    let mounted = mount_teams(&state, session, params).await;
    once(&state, mounted).await
}

/// GET /api/views/teams/stream?team=<id>
pub async fn teams_stream(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Query(params): Query<TeamsParams>,
) -> Response {
    let mounted = mount_teams(&state, session, params).await;
    stream(&state, mounted).await
}

/// GET /api/views/admin
pub async fn admin_view(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
) -> ApiResult<AdminState> {
    let mounted = mount_admin(&state, session).await;
    once(&state, mounted).await
}

/// GET /api/views/admin/stream
pub async fn admin_stream(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
) -> Response {
    let mounted = mount_admin(&state, session).await;
    stream(&state, mounted).await
}
