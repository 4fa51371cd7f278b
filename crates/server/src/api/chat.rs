// Chat endpoints.
//
// Routes:
//   POST   /v1/webinars/{webinar_id}/chat-messages                    — send (viewer)
//   GET    /v1/webinars/{webinar_id}/chat-messages                    — list (hidden rows host-only)
//   POST   /v1/webinars/{webinar_id}/chat-messages/{message_id}/pin   — pin/unpin (host)
//   POST   /v1/webinars/{webinar_id}/chat-messages/{message_id}/hide  — hide/unhide (host)
//   DELETE /v1/webinars/{webinar_id}/chat-messages/{message_id}       — delete (host)

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    middleware,
    routing::{delete, post},
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
use crate::validation::ValidatedJson;
use greenroom_common::protocol::ws::{ChangeOp, ChangeTable};
use greenroom_common::types::{validate_chat_message, ChatMessage, EngagementKind};

#[derive(Deserialize)]
pub struct SendChatMessageRequest {
    message: String,
}

#[derive(Deserialize)]
pub struct SetPinnedRequest {
    pinned: bool,
}

#[derive(Deserialize)]
pub struct SetHiddenRequest {
    hidden: bool,
}

#[derive(Serialize)]
struct ChatMessageEnvelope {
    message: ChatMessage,
}

#[derive(Serialize)]
struct ChatMessagesEnvelope {
    items: Vec<ChatMessage>,
}

pub fn router(state: AppState, jwt_service: Arc<JwtAccessTokenService>) -> Router {
    Router::new()
        .route(
            "/v1/webinars/{webinar_id}/chat-messages",
            post(send_chat_message).get(list_chat_messages),
        )
        .route("/v1/webinars/{webinar_id}/chat-messages/{message_id}/pin", post(set_pinned))
        .route("/v1/webinars/{webinar_id}/chat-messages/{message_id}/hide", post(set_hidden))
        .route(
            "/v1/webinars/{webinar_id}/chat-messages/{message_id}",
            delete(delete_chat_message),
        )
        .with_state(state)
        .route_layer(middleware::from_fn_with_state(jwt_service, require_bearer_auth))
}

async fn send_chat_message(
    State(state): State<AppState>,
    Extension(actor): Extension<AuthenticatedRegistrant>,
    Path(webinar_id): Path<Uuid>,
    ValidatedJson(payload): ValidatedJson<SendChatMessageRequest>,
) -> Result<(StatusCode, Json<ChatMessageEnvelope>), ApiError> {
    require_webinar_scope(&actor, webinar_id)?;
    let context = webinar_context(&state.directory, webinar_id).await?;
    require_interactive(&context, context.flags.chat_enabled, "chat is disabled")?;

    let message = payload.message.trim().to_string();
    validate_chat_message(&message).map_err(|error| ApiError::bad_request(error.to_string()))?;

    let record = state
        .store
        .create_chat_message(webinar_id, actor.registration_id, message)
        .await
        .map_err(ApiError::internal)?;

    state
        .live
        .broadcast_change(webinar_id, ChangeTable::ChatMessages, ChangeOp::Insert, &record)
        .await;
    try_record_engagement(
        &state,
        webinar_id,
        actor.registration_id,
        EngagementKind::ChatMessage,
        json!({ "message_id": record.id }),
    )
    .await;

    Ok((StatusCode::CREATED, Json(ChatMessageEnvelope { message: record })))
}

async fn list_chat_messages(
    State(state): State<AppState>,
    Extension(actor): Extension<AuthenticatedRegistrant>,
    Path(webinar_id): Path<Uuid>,
) -> Result<Json<ChatMessagesEnvelope>, ApiError> {
    require_webinar_scope(&actor, webinar_id)?;
    webinar_context(&state.directory, webinar_id).await?;

    let include_hidden = actor.role.allows(ActorRole::Host);
    let items = state
        .store
        .list_chat_messages(webinar_id, include_hidden)
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(ChatMessagesEnvelope { items }))
}

async fn set_pinned(
    State(state): State<AppState>,
    Extension(actor): Extension<AuthenticatedRegistrant>,
    Path((webinar_id, message_id)): Path<(Uuid, Uuid)>,
    ValidatedJson(payload): ValidatedJson<SetPinnedRequest>,
) -> Result<Json<ChatMessageEnvelope>, ApiError> {
    require_webinar_scope(&actor, webinar_id)?;
    require_host(&actor)?;

    let record = state
        .store
        .set_chat_pinned(webinar_id, message_id, payload.pinned)
        .await
        .map_err(ApiError::internal)?
        .ok_or(ApiError::NotFound { message: "chat message does not exist" })?;

    state
        .live
        .broadcast_change(webinar_id, ChangeTable::ChatMessages, ChangeOp::Update, &record)
        .await;

    Ok(Json(ChatMessageEnvelope { message: record }))
}

async fn set_hidden(
    State(state): State<AppState>,
    Extension(actor): Extension<AuthenticatedRegistrant>,
    Path((webinar_id, message_id)): Path<(Uuid, Uuid)>,
    ValidatedJson(payload): ValidatedJson<SetHiddenRequest>,
) -> Result<Json<ChatMessageEnvelope>, ApiError> {
    require_webinar_scope(&actor, webinar_id)?;
    require_host(&actor)?;

    let record = state
        .store
        .set_chat_hidden(webinar_id, message_id, payload.hidden)
        .await
        .map_err(ApiError::internal)?
        .ok_or(ApiError::NotFound { message: "chat message does not exist" })?;

    state
        .live
        .broadcast_change(webinar_id, ChangeTable::ChatMessages, ChangeOp::Update, &record)
        .await;

    Ok(Json(ChatMessageEnvelope { message: record }))
}

async fn delete_chat_message(
    State(state): State<AppState>,
    Extension(actor): Extension<AuthenticatedRegistrant>,
    Path((webinar_id, message_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    require_webinar_scope(&actor, webinar_id)?;
    require_host(&actor)?;

    let record = state
        .store
        .delete_chat_message(webinar_id, message_id)
        .await
        .map_err(ApiError::internal)?
        .ok_or(ApiError::NotFound { message: "chat message does not exist" })?;

    state
        .live
        .broadcast_change(webinar_id, ChangeTable::ChatMessages, ChangeOp::Delete, &record)
        .await;

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::router;
    use crate::api::testing::{bearer, jwt_service, memory_state, seed_live_webinar};
    use crate::auth::jwt::ActorRole;
    use crate::webinars::WebinarContext;
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use greenroom_common::types::{FeatureFlags, WebinarStatus};
    use tower::ServiceExt;
    use uuid::Uuid;

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should be readable");
        serde_json::from_slice(&bytes).expect("body should be json")
    }

    fn post_message(webinar_id: Uuid, auth: &str, message: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(format!("/v1/webinars/{webinar_id}/chat-messages"))
            .header(header::AUTHORIZATION, auth)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::json!({ "message": message }).to_string()))
            .expect("request should build")
    }

    #[tokio::test]
    async fn viewer_sends_and_lists_messages() {
        let state = memory_state();
        let jwt = jwt_service();
        let webinar_id = seed_live_webinar(&state).await;
        let registrant = Uuid::new_v4();
        let auth = bearer(&jwt, registrant, webinar_id, ActorRole::Viewer);

        let response = router(state.clone(), jwt.clone())
            .oneshot(post_message(webinar_id, &auth, "hello everyone"))
            .await
            .expect("request should return a response");
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert_eq!(body["message"]["message"], "hello everyone");
        assert_eq!(body["message"]["is_pinned"], false);

        let response = router(state, jwt)
            .oneshot(
                Request::builder()
                    .uri(format!("/v1/webinars/{webinar_id}/chat-messages"))
                    .header(header::AUTHORIZATION, &auth)
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should return a response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["items"].as_array().expect("items").len(), 1);
    }

    #[tokio::test]
    async fn oversized_messages_are_rejected() {
        let state = memory_state();
        let jwt = jwt_service();
        let webinar_id = seed_live_webinar(&state).await;
        let auth = bearer(&jwt, Uuid::new_v4(), webinar_id, ActorRole::Viewer);

        let long = "x".repeat(501);
        let response = router(state, jwt)
            .oneshot(post_message(webinar_id, &auth, &long))
            .await
            .expect("request should return a response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn chat_requires_the_feature_flag_and_live_status() {
        let state = memory_state();
        let jwt = jwt_service();

        let disabled = Uuid::new_v4();
        state
            .directory
            .set_for_tests(
                disabled,
                WebinarContext::live(FeatureFlags { chat_enabled: false, ..FeatureFlags::default() }),
            )
            .await;
        let auth = bearer(&jwt, Uuid::new_v4(), disabled, ActorRole::Viewer);
        let response = router(state.clone(), jwt.clone())
            .oneshot(post_message(disabled, &auth, "hi"))
            .await
            .expect("request should return a response");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let ended = Uuid::new_v4();
        state
            .directory
            .set_for_tests(
                ended,
                crate::webinars::WebinarContext {
                    status: WebinarStatus::Ended,
                    flags: FeatureFlags::default(),
                },
            )
            .await;
        let auth = bearer(&jwt, Uuid::new_v4(), ended, ActorRole::Viewer);
        let response = router(state, jwt)
            .oneshot(post_message(ended, &auth, "hi"))
            .await
            .expect("request should return a response");
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn moderation_is_host_only() {
        let state = memory_state();
        let jwt = jwt_service();
        let webinar_id = seed_live_webinar(&state).await;
        let viewer_auth = bearer(&jwt, Uuid::new_v4(), webinar_id, ActorRole::Viewer);
        let host_auth = bearer(&jwt, Uuid::new_v4(), webinar_id, ActorRole::Host);

        let response = router(state.clone(), jwt.clone())
            .oneshot(post_message(webinar_id, &viewer_auth, "pin me"))
            .await
            .expect("request should return a response");
        let message_id = body_json(response).await["message"]["id"]
            .as_str()
            .expect("id")
            .to_string();

        let pin = |auth: String| {
            Request::builder()
                .method("POST")
                .uri(format!("/v1/webinars/{webinar_id}/chat-messages/{message_id}/pin"))
                .header(header::AUTHORIZATION, auth)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::json!({ "pinned": true }).to_string()))
                .expect("request should build")
        };

        let response = router(state.clone(), jwt.clone())
            .oneshot(pin(viewer_auth))
            .await
            .expect("request should return a response");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = router(state.clone(), jwt.clone())
            .oneshot(pin(host_auth.clone()))
            .await
            .expect("request should return a response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["message"]["is_pinned"], true);

        let response = router(state, jwt)
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/v1/webinars/{webinar_id}/chat-messages/{message_id}"))
                    .header(header::AUTHORIZATION, host_auth)
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should return a response");
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn hidden_messages_are_invisible_to_viewers_but_not_hosts() {
        let state = memory_state();
        let jwt = jwt_service();
        let webinar_id = seed_live_webinar(&state).await;
        let viewer_auth = bearer(&jwt, Uuid::new_v4(), webinar_id, ActorRole::Viewer);
        let host_auth = bearer(&jwt, Uuid::new_v4(), webinar_id, ActorRole::Host);

        let response = router(state.clone(), jwt.clone())
            .oneshot(post_message(webinar_id, &viewer_auth, "spam"))
            .await
            .expect("request should return a response");
        let message_id = body_json(response).await["message"]["id"]
            .as_str()
            .expect("id")
            .to_string();

        let response = router(state.clone(), jwt.clone())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/v1/webinars/{webinar_id}/chat-messages/{message_id}/hide"))
                    .header(header::AUTHORIZATION, &host_auth)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(serde_json::json!({ "hidden": true }).to_string()))
                    .expect("request should build"),
            )
            .await
            .expect("request should return a response");
        assert_eq!(response.status(), StatusCode::OK);

        let list = |auth: String| {
            Request::builder()
                .uri(format!("/v1/webinars/{webinar_id}/chat-messages"))
                .header(header::AUTHORIZATION, auth)
                .body(Body::empty())
                .expect("request should build")
        };

        let response = router(state.clone(), jwt.clone())
            .oneshot(list(viewer_auth))
            .await
            .expect("request should return a response");
        assert_eq!(body_json(response).await["items"].as_array().expect("items").len(), 0);

        let response = router(state, jwt)
            .oneshot(list(host_auth))
            .await
            .expect("request should return a response");
        assert_eq!(body_json(response).await["items"].as_array().expect("items").len(), 1);
    }
}
