// Watch-tracking endpoints.
//
// Routes:
//   POST /v1/webinars/{webinar_id}/watch-sessions                           — open a session
//   POST /v1/webinars/{webinar_id}/watch-sessions/{session_id}/progress     — advance position
//   POST /v1/webinars/{webinar_id}/watch-sessions/{session_id}/end         — close a session
//   POST /v1/webinars/{webinar_id}/watch-sessions/{session_id}/beacon      — unload-time flush, always 204
//
// Progress is monotonic and milestone claims are atomic in the store, so a
// client replaying stale positions can neither rewind a session nor earn a
// milestone twice.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    middleware,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use super::{
    require_watchable, require_webinar_scope, try_record_engagement, webinar_context, ApiError,
    AppState,
};
use crate::auth::{
    jwt::JwtAccessTokenService,
    middleware::{require_bearer_auth, AuthenticatedRegistrant},
};
use crate::validation::ValidatedJson;
use greenroom_common::types::{EngagementKind, WatchSession};

#[derive(Deserialize)]
pub struct CreateWatchSessionRequest {
    duration_seconds: i32,
}

#[derive(Deserialize)]
pub struct WatchProgressRequest {
    position_seconds: i32,
}

#[derive(Serialize)]
struct WatchSessionEnvelope {
    session: WatchSession,
}

#[derive(Serialize)]
struct WatchProgressEnvelope {
    session: WatchSession,
    percent_watched: u8,
    newly_hit: Vec<u8>,
}

pub fn router(state: AppState, jwt_service: Arc<JwtAccessTokenService>) -> Router {
    Router::new()
        .route("/v1/webinars/{webinar_id}/watch-sessions", post(create_watch_session))
        .route(
            "/v1/webinars/{webinar_id}/watch-sessions/{session_id}/progress",
            post(record_progress),
        )
        .route("/v1/webinars/{webinar_id}/watch-sessions/{session_id}/end", post(end_session))
        .route("/v1/webinars/{webinar_id}/watch-sessions/{session_id}/beacon", post(beacon))
        .with_state(state)
        .route_layer(middleware::from_fn_with_state(jwt_service, require_bearer_auth))
}

async fn create_watch_session(
    State(state): State<AppState>,
    Extension(actor): Extension<AuthenticatedRegistrant>,
    Path(webinar_id): Path<Uuid>,
    ValidatedJson(payload): ValidatedJson<CreateWatchSessionRequest>,
) -> Result<(StatusCode, Json<WatchSessionEnvelope>), ApiError> {
    require_webinar_scope(&actor, webinar_id)?;
    let context = webinar_context(&state.directory, webinar_id).await?;
    require_watchable(&context)?;

    if payload.duration_seconds <= 0 {
        return Err(ApiError::bad_request("duration_seconds must be positive"));
    }

    let session = state
        .store
        .create_watch_session(webinar_id, actor.registration_id, payload.duration_seconds)
        .await
        .map_err(ApiError::internal)?;

    Ok((StatusCode::CREATED, Json(WatchSessionEnvelope { session })))
}

async fn record_progress(
    State(state): State<AppState>,
    Extension(actor): Extension<AuthenticatedRegistrant>,
    Path((webinar_id, session_id)): Path<(Uuid, Uuid)>,
    ValidatedJson(payload): ValidatedJson<WatchProgressRequest>,
) -> Result<Json<WatchProgressEnvelope>, ApiError> {
    require_webinar_scope(&actor, webinar_id)?;
    webinar_context(&state.directory, webinar_id).await?;

    if payload.position_seconds < 0 {
        return Err(ApiError::bad_request("position_seconds must not be negative"));
    }

    let outcome = state
        .store
        .record_watch_progress(webinar_id, session_id, actor.registration_id, payload.position_seconds)
        .await
        .map_err(ApiError::internal)?
        .ok_or(ApiError::NotFound { message: "watch session does not exist or has ended" })?;

    // The store has already claimed these milestones for this session, so
    // each ledger append happens at most once per (session, milestone).
    for milestone in &outcome.newly_hit {
        let Some(kind) = EngagementKind::for_milestone(*milestone) else { continue };
        try_record_engagement(
            &state,
            webinar_id,
            actor.registration_id,
            kind,
            json!({ "session_id": session_id, "milestone": milestone }),
        )
        .await;
    }

    Ok(Json(WatchProgressEnvelope {
        session: outcome.session,
        percent_watched: outcome.percent,
        newly_hit: outcome.newly_hit,
    }))
}

async fn end_session(
    State(state): State<AppState>,
    Extension(actor): Extension<AuthenticatedRegistrant>,
    Path((webinar_id, session_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<WatchSessionEnvelope>, ApiError> {
    require_webinar_scope(&actor, webinar_id)?;

    let session = state
        .store
        .end_watch_session(webinar_id, session_id, actor.registration_id)
        .await
        .map_err(ApiError::internal)?
        .ok_or(ApiError::NotFound { message: "watch session does not exist" })?;

    Ok(Json(WatchSessionEnvelope { session }))
}

/// Unload-time flush sent via `navigator.sendBeacon`: advance to the final
/// position, then close. The browser never reads the response, so failures
/// are logged and the handler answers 204 unconditionally.
async fn beacon(
    State(state): State<AppState>,
    Extension(actor): Extension<AuthenticatedRegistrant>,
    Path((webinar_id, session_id)): Path<(Uuid, Uuid)>,
    ValidatedJson(payload): ValidatedJson<WatchProgressRequest>,
) -> Result<StatusCode, ApiError> {
    require_webinar_scope(&actor, webinar_id)?;

    if payload.position_seconds >= 0 {
        match state
            .store
            .record_watch_progress(webinar_id, session_id, actor.registration_id, payload.position_seconds)
            .await
        {
            Ok(Some(outcome)) => {
                for milestone in &outcome.newly_hit {
                    let Some(kind) = EngagementKind::for_milestone(*milestone) else { continue };
                    try_record_engagement(
                        &state,
                        webinar_id,
                        actor.registration_id,
                        kind,
                        json!({ "session_id": session_id, "milestone": milestone }),
                    )
                    .await;
                }
            }
            Ok(None) => {}
            Err(error) => {
                tracing::warn!(error = ?error, session_id = %session_id, "beacon progress failed");
            }
        }
    }

    if let Err(error) = state
        .store
        .end_watch_session(webinar_id, session_id, actor.registration_id)
        .await
    {
        tracing::warn!(error = ?error, session_id = %session_id, "beacon end failed");
    }

    Ok(StatusCode::NO_CONTENT)
}
