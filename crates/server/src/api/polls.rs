// Poll endpoints.
//
// Routes:
//   POST /v1/webinars/{webinar_id}/polls                        — create draft (host)
//   GET  /v1/webinars/{webinar_id}/polls                        — list, viewer-shaped
//   POST /v1/webinars/{webinar_id}/polls/{poll_id}/activate     — activate, closing any other active poll (host)
//   POST /v1/webinars/{webinar_id}/polls/{poll_id}/close        — close (host)
//   POST /v1/webinars/{webinar_id}/polls/{poll_id}/responses    — vote (viewer, once)
//
// Result visibility: viewers see tallies only while `show_results_live` is on
// for an active poll, or once the poll is closed. Hosts always see tallies.

use std::collections::HashMap;
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
    require_host, require_interactive, require_webinar_scope, try_record_engagement, webinar_context,
    ApiError, AppState,
};
use crate::auth::{
    jwt::{ActorRole, JwtAccessTokenService},
    middleware::{require_bearer_auth, AuthenticatedRegistrant},
};
use crate::store::{polls::PollDraft, VoteOutcome};
use crate::validation::ValidatedJson;
use greenroom_common::protocol::ws::{ChangeOp, ChangeTable};
use greenroom_common::types::{EngagementKind, Poll, PollOption, PollResponse, PollStatus};

#[derive(Deserialize)]
pub struct CreatePollRequest {
    question: String,
    options: Vec<PollOption>,
    #[serde(default)]
    allow_multiple: bool,
    #[serde(default = "default_show_results_live")]
    show_results_live: bool,
}

fn default_show_results_live() -> bool {
    true
}

#[derive(Deserialize)]
pub struct SubmitResponseRequest {
    selected_options: Vec<String>,
}

#[derive(Serialize)]
struct PollEnvelope {
    poll: Poll,
}

#[derive(Serialize)]
struct ActivationEnvelope {
    poll: Poll,
    closed: Vec<Poll>,
}

#[derive(Serialize)]
struct VoteEnvelope {
    response: Option<PollResponse>,
    already_voted: bool,
}

/// A poll as seen by one caller: tallies only when visible to them, plus
/// their own recorded vote.
#[derive(Serialize)]
struct PollView {
    #[serde(flatten)]
    poll: Poll,
    results: Option<PollResultsView>,
    my_response: Option<Vec<String>>,
}

#[derive(Serialize)]
struct PollResultsView {
    counts: HashMap<String, i64>,
    respondents: i64,
}

#[derive(Serialize)]
struct PollsEnvelope {
    items: Vec<PollView>,
}

pub fn router(state: AppState, jwt_service: Arc<JwtAccessTokenService>) -> Router {
    Router::new()
        .route("/v1/webinars/{webinar_id}/polls", post(create_poll).get(list_polls))
        .route("/v1/webinars/{webinar_id}/polls/{poll_id}/activate", post(activate_poll))
        .route("/v1/webinars/{webinar_id}/polls/{poll_id}/close", post(close_poll))
        .route("/v1/webinars/{webinar_id}/polls/{poll_id}/responses", post(submit_response))
        .with_state(state)
        .route_layer(middleware::from_fn_with_state(jwt_service, require_bearer_auth))
}

async fn create_poll(
    State(state): State<AppState>,
    Extension(actor): Extension<AuthenticatedRegistrant>,
    Path(webinar_id): Path<Uuid>,
    ValidatedJson(payload): ValidatedJson<CreatePollRequest>,
) -> Result<(StatusCode, Json<PollEnvelope>), ApiError> {
    require_webinar_scope(&actor, webinar_id)?;
    require_host(&actor)?;

    let question = payload.question.trim().to_string();
    if question.is_empty() {
        return Err(ApiError::bad_request("poll question must not be empty"));
    }
    Poll::validate_options(&payload.options)
        .map_err(|error| ApiError::bad_request(error.to_string()))?;

    // Drafts are host-side staging; no change frame goes out until activation.
    let poll = state
        .store
        .create_poll(
            webinar_id,
            PollDraft {
                question,
                options: payload.options,
                allow_multiple: payload.allow_multiple,
                show_results_live: payload.show_results_live,
            },
        )
        .await
        .map_err(ApiError::internal)?;

    Ok((StatusCode::CREATED, Json(PollEnvelope { poll })))
}

async fn activate_poll(
    State(state): State<AppState>,
    Extension(actor): Extension<AuthenticatedRegistrant>,
    Path((webinar_id, poll_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ActivationEnvelope>, ApiError> {
    require_webinar_scope(&actor, webinar_id)?;
    require_host(&actor)?;
    let context = webinar_context(&state.directory, webinar_id).await?;
    require_interactive(&context, context.flags.polls_enabled, "polls are disabled")?;

    let activation = state
        .store
        .activate_poll(webinar_id, poll_id)
        .await
        .map_err(ApiError::internal)?
        .ok_or(ApiError::NotFound { message: "poll does not exist" })?;

    for closed in &activation.closed {
        state
            .live
            .broadcast_change(webinar_id, ChangeTable::Polls, ChangeOp::Update, closed)
            .await;
    }
    state
        .live
        .broadcast_change(webinar_id, ChangeTable::Polls, ChangeOp::Update, &activation.activated)
        .await;

    Ok(Json(ActivationEnvelope { poll: activation.activated, closed: activation.closed }))
}

async fn close_poll(
    State(state): State<AppState>,
    Extension(actor): Extension<AuthenticatedRegistrant>,
    Path((webinar_id, poll_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<PollEnvelope>, ApiError> {
    require_webinar_scope(&actor, webinar_id)?;
    require_host(&actor)?;

    let poll = state
        .store
        .close_poll(webinar_id, poll_id)
        .await
        .map_err(ApiError::internal)?
        .ok_or(ApiError::NotFound { message: "poll does not exist" })?;

    state
        .live
        .broadcast_change(webinar_id, ChangeTable::Polls, ChangeOp::Update, &poll)
        .await;

    Ok(Json(PollEnvelope { poll }))
}

async fn submit_response(
    State(state): State<AppState>,
    Extension(actor): Extension<AuthenticatedRegistrant>,
    Path((webinar_id, poll_id)): Path<(Uuid, Uuid)>,
    ValidatedJson(payload): ValidatedJson<SubmitResponseRequest>,
) -> Result<(StatusCode, Json<VoteEnvelope>), ApiError> {
    require_webinar_scope(&actor, webinar_id)?;
    let context = webinar_context(&state.directory, webinar_id).await?;
    require_interactive(&context, context.flags.polls_enabled, "polls are disabled")?;

    let poll = state
        .store
        .get_poll(webinar_id, poll_id)
        .await
        .map_err(ApiError::internal)?
        .ok_or(ApiError::NotFound { message: "poll does not exist" })?;
    if poll.status != PollStatus::Active {
        return Err(ApiError::bad_request("poll is not accepting responses"));
    }
    poll.validate_selection(&payload.selected_options)
        .map_err(|error| ApiError::bad_request(error.to_string()))?;

    let outcome = state
        .store
        .submit_poll_response(webinar_id, poll_id, actor.registration_id, payload.selected_options)
        .await
        .map_err(ApiError::internal)?
        .ok_or(ApiError::NotFound { message: "poll does not exist" })?;

    match outcome {
        VoteOutcome::Recorded(response) => {
            state
                .live
                .broadcast_change(webinar_id, ChangeTable::PollResponses, ChangeOp::Insert, &response)
                .await;
            try_record_engagement(
                &state,
                webinar_id,
                actor.registration_id,
                EngagementKind::PollResponse,
                json!({ "poll_id": poll_id }),
            )
            .await;
            Ok((
                StatusCode::CREATED,
                Json(VoteEnvelope { response: Some(response), already_voted: false }),
            ))
        }
        // First answer stands; repeats are acknowledged without points.
        VoteOutcome::AlreadyVoted => {
            let response = state
                .store
                .poll_response_of(poll_id, actor.registration_id)
                .await
                .map_err(ApiError::internal)?;
            Ok((StatusCode::OK, Json(VoteEnvelope { response, already_voted: true })))
        }
    }
}

async fn list_polls(
    State(state): State<AppState>,
    Extension(actor): Extension<AuthenticatedRegistrant>,
    Path(webinar_id): Path<Uuid>,
) -> Result<Json<PollsEnvelope>, ApiError> {
    require_webinar_scope(&actor, webinar_id)?;
    webinar_context(&state.directory, webinar_id).await?;

    let is_host = actor.role.allows(ActorRole::Host);
    let polls = state.store.list_polls(webinar_id).await.map_err(ApiError::internal)?;

    let mut items = Vec::with_capacity(polls.len());
    for poll in polls {
        if poll.status == PollStatus::Draft && !is_host {
            continue;
        }

        let results_visible = is_host
            || poll.status == PollStatus::Closed
            || (poll.status == PollStatus::Active && poll.show_results_live);
        let results = if results_visible {
            state
                .store
                .poll_results(webinar_id, poll.id)
                .await
                .map_err(ApiError::internal)?
                .map(|results| PollResultsView {
                    counts: results.counts,
                    respondents: results.respondents,
                })
        } else {
            None
        };

        let my_response = state
            .store
            .poll_response_of(poll.id, actor.registration_id)
            .await
            .map_err(ApiError::internal)?
            .map(|response| response.selected_options);

        items.push(PollView { poll, results, my_response });
    }

    Ok(Json(PollsEnvelope { items }))
}
