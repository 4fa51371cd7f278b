// Q&A endpoints.
//
// Routes:
//   POST   /v1/webinars/{webinar_id}/questions                            — submit (viewer)
//   GET    /v1/webinars/{webinar_id}/questions                            — list with per-caller upvote state
//   PUT    /v1/webinars/{webinar_id}/questions/{question_id}/upvote       — upvote (idempotent)
//   DELETE /v1/webinars/{webinar_id}/questions/{question_id}/upvote       — retract upvote
//   POST   /v1/webinars/{webinar_id}/questions/{question_id}/answer       — answer (host)
//   POST   /v1/webinars/{webinar_id}/questions/{question_id}/highlight    — highlight (host)
//   POST   /v1/webinars/{webinar_id}/questions/{question_id}/hide         — hide (host)
//   POST   /v1/webinars/{webinar_id}/questions/recount                    — repair stored counts (host)

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    middleware,
    routing::{post, put},
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
use crate::store::{RemoveUpvoteOutcome, UpvoteOutcome};
use crate::validation::ValidatedJson;
use greenroom_common::protocol::ws::{ChangeOp, ChangeTable};
use greenroom_common::types::{EngagementKind, QaQuestion};

#[derive(Deserialize)]
pub struct SubmitQuestionRequest {
    question: String,
}

#[derive(Deserialize)]
pub struct AnswerQuestionRequest {
    answer: String,
}

#[derive(Deserialize)]
pub struct SetHighlightedRequest {
    highlighted: bool,
}

#[derive(Deserialize)]
pub struct SetHiddenRequest {
    hidden: bool,
}

#[derive(Serialize)]
struct QuestionEnvelope {
    question: QaQuestion,
}

/// A question as seen by one caller: the shared record plus whether this
/// registrant has upvoted it.
#[derive(Serialize)]
struct QuestionView {
    #[serde(flatten)]
    question: QaQuestion,
    has_upvoted: bool,
}

#[derive(Serialize)]
struct QuestionsEnvelope {
    items: Vec<QuestionView>,
}

pub fn router(state: AppState, jwt_service: Arc<JwtAccessTokenService>) -> Router {
    Router::new()
        .route(
            "/v1/webinars/{webinar_id}/questions",
            post(submit_question).get(list_questions),
        )
        .route(
            "/v1/webinars/{webinar_id}/questions/{question_id}/upvote",
            put(upvote_question).delete(remove_upvote),
        )
        .route("/v1/webinars/{webinar_id}/questions/{question_id}/answer", post(answer_question))
        .route("/v1/webinars/{webinar_id}/questions/{question_id}/highlight", post(set_highlighted))
        .route("/v1/webinars/{webinar_id}/questions/{question_id}/hide", post(set_hidden))
        .route("/v1/webinars/{webinar_id}/questions/recount", post(recount_upvotes))
        .with_state(state)
        .route_layer(middleware::from_fn_with_state(jwt_service, require_bearer_auth))
}

async fn submit_question(
    State(state): State<AppState>,
    Extension(actor): Extension<AuthenticatedRegistrant>,
    Path(webinar_id): Path<Uuid>,
    ValidatedJson(payload): ValidatedJson<SubmitQuestionRequest>,
) -> Result<(StatusCode, Json<QuestionEnvelope>), ApiError> {
    require_webinar_scope(&actor, webinar_id)?;
    let context = webinar_context(&state.directory, webinar_id).await?;
    require_interactive(&context, context.flags.qa_enabled, "q&a is disabled")?;

    let question = payload.question.trim().to_string();
    if question.is_empty() {
        return Err(ApiError::bad_request("question must not be empty"));
    }

    let record = state
        .store
        .create_question(webinar_id, actor.registration_id, question)
        .await
        .map_err(ApiError::internal)?;

    state
        .live
        .broadcast_change(webinar_id, ChangeTable::QaQuestions, ChangeOp::Insert, &record)
        .await;
    try_record_engagement(
        &state,
        webinar_id,
        actor.registration_id,
        EngagementKind::QaSubmit,
        json!({ "question_id": record.id }),
    )
    .await;

    Ok((StatusCode::CREATED, Json(QuestionEnvelope { question: record })))
}

async fn list_questions(
    State(state): State<AppState>,
    Extension(actor): Extension<AuthenticatedRegistrant>,
    Path(webinar_id): Path<Uuid>,
) -> Result<Json<QuestionsEnvelope>, ApiError> {
    require_webinar_scope(&actor, webinar_id)?;
    webinar_context(&state.directory, webinar_id).await?;

    let include_hidden = actor.role.allows(ActorRole::Host);
    let questions = state
        .store
        .list_questions(webinar_id, include_hidden)
        .await
        .map_err(ApiError::internal)?;
    let upvoted = state
        .store
        .upvoted_question_ids(webinar_id, actor.registration_id)
        .await
        .map_err(ApiError::internal)?;

    let items = questions
        .into_iter()
        .map(|question| {
            let has_upvoted = upvoted.contains(&question.id);
            QuestionView { question, has_upvoted }
        })
        .collect();

    Ok(Json(QuestionsEnvelope { items }))
}

async fn upvote_question(
    State(state): State<AppState>,
    Extension(actor): Extension<AuthenticatedRegistrant>,
    Path((webinar_id, question_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<QuestionEnvelope>, ApiError> {
    require_webinar_scope(&actor, webinar_id)?;
    let context = webinar_context(&state.directory, webinar_id).await?;
    require_interactive(&context, context.flags.qa_enabled, "q&a is disabled")?;

    let outcome = state
        .store
        .upvote_question(webinar_id, question_id, actor.registration_id)
        .await
        .map_err(ApiError::internal)?
        .ok_or(ApiError::NotFound { message: "question does not exist" })?;

    // Only the first upvote mutates the record and earns points; a repeat is
    // acknowledged with the current state.
    let record = match outcome {
        UpvoteOutcome::Added(record) => {
            state
                .live
                .broadcast_change(webinar_id, ChangeTable::QaQuestions, ChangeOp::Update, &record)
                .await;
            try_record_engagement(
                &state,
                webinar_id,
                actor.registration_id,
                EngagementKind::QaUpvote,
                json!({ "question_id": question_id }),
            )
            .await;
            record
        }
        UpvoteOutcome::AlreadyUpvoted(record) => record,
    };

    Ok(Json(QuestionEnvelope { question: record }))
}

async fn remove_upvote(
    State(state): State<AppState>,
    Extension(actor): Extension<AuthenticatedRegistrant>,
    Path((webinar_id, question_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<QuestionEnvelope>, ApiError> {
    require_webinar_scope(&actor, webinar_id)?;
    let context = webinar_context(&state.directory, webinar_id).await?;
    require_interactive(&context, context.flags.qa_enabled, "q&a is disabled")?;

    let outcome = state
        .store
        .remove_upvote(webinar_id, question_id, actor.registration_id)
        .await
        .map_err(ApiError::internal)?
        .ok_or(ApiError::NotFound { message: "question does not exist" })?;

    let record = match outcome {
        RemoveUpvoteOutcome::Removed(record) => {
            state
                .live
                .broadcast_change(webinar_id, ChangeTable::QaQuestions, ChangeOp::Update, &record)
                .await;
            record
        }
        RemoveUpvoteOutcome::NotUpvoted(record) => record,
    };

    Ok(Json(QuestionEnvelope { question: record }))
}

async fn answer_question(
    State(state): State<AppState>,
    Extension(actor): Extension<AuthenticatedRegistrant>,
    Path((webinar_id, question_id)): Path<(Uuid, Uuid)>,
    ValidatedJson(payload): ValidatedJson<AnswerQuestionRequest>,
) -> Result<Json<QuestionEnvelope>, ApiError> {
    require_webinar_scope(&actor, webinar_id)?;
    require_host(&actor)?;

    let answer = payload.answer.trim().to_string();
    if answer.is_empty() {
        return Err(ApiError::bad_request("answer must not be empty"));
    }

    let record = state
        .store
        .answer_question(webinar_id, question_id, answer)
        .await
        .map_err(ApiError::internal)?
        .ok_or(ApiError::NotFound { message: "question does not exist" })?;

    state
        .live
        .broadcast_change(webinar_id, ChangeTable::QaQuestions, ChangeOp::Update, &record)
        .await;

    Ok(Json(QuestionEnvelope { question: record }))
}

async fn set_highlighted(
    State(state): State<AppState>,
    Extension(actor): Extension<AuthenticatedRegistrant>,
    Path((webinar_id, question_id)): Path<(Uuid, Uuid)>,
    ValidatedJson(payload): ValidatedJson<SetHighlightedRequest>,
) -> Result<Json<QuestionEnvelope>, ApiError> {
    require_webinar_scope(&actor, webinar_id)?;
    require_host(&actor)?;

    let record = state
        .store
        .set_question_highlighted(webinar_id, question_id, payload.highlighted)
        .await
        .map_err(ApiError::internal)?
        .ok_or(ApiError::NotFound { message: "question does not exist" })?;

    state
        .live
        .broadcast_change(webinar_id, ChangeTable::QaQuestions, ChangeOp::Update, &record)
        .await;

    Ok(Json(QuestionEnvelope { question: record }))
}

async fn set_hidden(
    State(state): State<AppState>,
    Extension(actor): Extension<AuthenticatedRegistrant>,
    Path((webinar_id, question_id)): Path<(Uuid, Uuid)>,
    ValidatedJson(payload): ValidatedJson<SetHiddenRequest>,
) -> Result<Json<QuestionEnvelope>, ApiError> {
    require_webinar_scope(&actor, webinar_id)?;
    require_host(&actor)?;

    let record = state
        .store
        .set_question_hidden(webinar_id, question_id, payload.hidden)
        .await
        .map_err(ApiError::internal)?
        .ok_or(ApiError::NotFound { message: "question does not exist" })?;

    state
        .live
        .broadcast_change(webinar_id, ChangeTable::QaQuestions, ChangeOp::Update, &record)
        .await;

    Ok(Json(QuestionEnvelope { question: record }))
}

#[derive(Serialize)]
struct RecountEnvelope {
    repaired: Vec<QaQuestion>,
}

async fn recount_upvotes(
    State(state): State<AppState>,
    Extension(actor): Extension<AuthenticatedRegistrant>,
    Path(webinar_id): Path<Uuid>,
) -> Result<Json<RecountEnvelope>, ApiError> {
    require_webinar_scope(&actor, webinar_id)?;
    require_host(&actor)?;

    let repaired = state.store.recount_upvotes(webinar_id).await.map_err(ApiError::internal)?;
    for record in &repaired {
        state
            .live
            .broadcast_change(webinar_id, ChangeTable::QaQuestions, ChangeOp::Update, record)
            .await;
    }

    Ok(Json(RecountEnvelope { repaired }))
}
