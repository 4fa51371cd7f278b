// Reaction endpoints.
//
// Routes:
//   POST /v1/webinars/{webinar_id}/reactions          — react with a palette emoji
//   GET  /v1/webinars/{webinar_id}/reactions/counts   — aggregate counts
//
// Reactions are accepted while the webinar is live, and during replay when
// the replay flag is on. The emoji must come from the fixed palette.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use super::{
    require_reactions_allowed, require_webinar_scope, try_record_engagement, webinar_context,
    ApiError, AppState,
};
use crate::auth::{
    jwt::JwtAccessTokenService,
    middleware::{require_bearer_auth, AuthenticatedRegistrant},
};
use crate::validation::ValidatedJson;
use greenroom_common::protocol::ws::{ChangeOp, ChangeTable};
use greenroom_common::types::{validate_emoji, EngagementKind, Reaction};

#[derive(Deserialize)]
pub struct SendReactionRequest {
    emoji: String,
}

#[derive(Serialize)]
struct ReactionEnvelope {
    reaction: Reaction,
}

#[derive(Serialize)]
struct ReactionCount {
    emoji: String,
    count: i64,
}

#[derive(Serialize)]
struct ReactionCountsEnvelope {
    items: Vec<ReactionCount>,
}

pub fn router(state: AppState, jwt_service: Arc<JwtAccessTokenService>) -> Router {
    Router::new()
        .route("/v1/webinars/{webinar_id}/reactions", post(send_reaction))
        .route("/v1/webinars/{webinar_id}/reactions/counts", get(reaction_counts))
        .with_state(state)
        .route_layer(middleware::from_fn_with_state(jwt_service, require_bearer_auth))
}

async fn send_reaction(
    State(state): State<AppState>,
    Extension(actor): Extension<AuthenticatedRegistrant>,
    Path(webinar_id): Path<Uuid>,
    ValidatedJson(payload): ValidatedJson<SendReactionRequest>,
) -> Result<(StatusCode, Json<ReactionEnvelope>), ApiError> {
    require_webinar_scope(&actor, webinar_id)?;
    let context = webinar_context(&state.directory, webinar_id).await?;
    require_reactions_allowed(&context)?;
    validate_emoji(&payload.emoji).map_err(|error| ApiError::bad_request(error.to_string()))?;

    let record = state
        .store
        .create_reaction(webinar_id, actor.registration_id, payload.emoji)
        .await
        .map_err(ApiError::internal)?;

    state
        .live
        .broadcast_change(webinar_id, ChangeTable::Reactions, ChangeOp::Insert, &record)
        .await;
    try_record_engagement(
        &state,
        webinar_id,
        actor.registration_id,
        EngagementKind::Reaction,
        json!({ "emoji": record.emoji }),
    )
    .await;

    Ok((StatusCode::CREATED, Json(ReactionEnvelope { reaction: record })))
}

async fn reaction_counts(
    State(state): State<AppState>,
    Extension(actor): Extension<AuthenticatedRegistrant>,
    Path(webinar_id): Path<Uuid>,
) -> Result<Json<ReactionCountsEnvelope>, ApiError> {
    require_webinar_scope(&actor, webinar_id)?;
    webinar_context(&state.directory, webinar_id).await?;

    let items = state
        .store
        .reaction_counts(webinar_id)
        .await
        .map_err(ApiError::internal)?
        .into_iter()
        .map(|(emoji, count)| ReactionCount { emoji, count })
        .collect();

    Ok(Json(ReactionCountsEnvelope { items }))
}
