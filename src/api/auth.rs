//! Session API endpoints.

use axum::{extract::State, Extension, Json};

use super::{current_revision, error, success, ApiResult};
use crate::identity::SessionContext;
use crate::models::{Identity, SessionResponse, SignInRequest, SignUpRequest, UpdateProfileRequest};
use crate::AppState;

fn session_response(session: SessionContext) -> SessionResponse {
    SessionResponse {
        token: session.token,
        identity: session.identity,
        expires_at: session.expires_at,
    }
}

/// POST /api/auth/signup - Create an account and sign in.
pub async fn sign_up(
    State(state): State<AppState>,
    Json(request): Json<SignUpRequest>,
) -> ApiResult<SessionResponse> {
    let revision_id = current_revision(&state).await;

    match state
        .sessions
        .sign_up(&request.email, &request.password, &request.display_name)
        .await
    {
        Ok(session) => {
            let new_revision = current_revision(&state).await;
            success(session_response(session), new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/auth/signin - Sign in with email and password.
pub async fn sign_in(
    State(state): State<AppState>,
    Json(request): Json<SignInRequest>,
) -> ApiResult<SessionResponse> {
    let revision_id = current_revision(&state).await;

    match state.sessions.sign_in(&request.email, &request.password).await {
        Ok(session) => success(session_response(session), current_revision(&state).await),
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/auth/signout - End the current session.
pub async fn sign_out(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
) -> ApiResult<()> {
    let revision_id = current_revision(&state).await;

    match state.sessions.sign_out(&session.token).await {
        Ok(()) => success((), revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/auth/me - The signed-in identity.
pub async fn current_identity(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
) -> ApiResult<Identity> {
    success(session.identity, current_revision(&state).await)
}

/// PUT /api/auth/me - Change the display name.
pub async fn update_profile(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Json(request): Json<UpdateProfileRequest>,
) -> ApiResult<Identity> {
    let revision_id = current_revision(&state).await;

    match state
        .sessions
        .update_display_name(&session, &request.display_name)
        .await
    {
        Ok(identity) => success(identity, current_revision(&state).await),
        Err(e) => error(e, revision_id),
    }
}
