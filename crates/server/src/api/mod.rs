pub mod chat;
pub mod engagement;
pub mod polls;
pub mod qa;
pub mod reactions;
pub mod watch;

use std::sync::Arc;

use axum::response::{IntoResponse, Response};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    auth::{jwt::ActorRole, middleware::AuthenticatedRegistrant},
    error::{ErrorCode, ServerError},
    scoring::PointTable,
    store::EventStore,
    webinars::{WebinarContext, WebinarDirectory},
    ws::LiveSessionStore,
};
use greenroom_common::types::{EngagementKind, WebinarStatus};

/// Shared state for every engagement API router.
#[derive(Clone)]
pub struct AppState {
    pub store: EventStore,
    pub directory: WebinarDirectory,
    pub live: Arc<LiveSessionStore>,
}

// ── Error ────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub(crate) enum ApiError {
    BadRequest { message: String },
    Forbidden { message: &'static str },
    NotFound { message: &'static str },
    FeatureDisabled { message: &'static str },
    NotLive { message: &'static str },
    Internal(anyhow::Error),
}

impl ApiError {
    pub(crate) fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest { message: message.into() }
    }

    pub(crate) fn internal(error: anyhow::Error) -> Self {
        Self::Internal(error)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        Self::Internal(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::BadRequest { message } => {
                ServerError::new(ErrorCode::ValidationFailed, message).into_response()
            }
            Self::Forbidden { message } => {
                ServerError::new(ErrorCode::AuthForbidden, message).into_response()
            }
            Self::NotFound { message } => {
                ServerError::new(ErrorCode::NotFound, message).into_response()
            }
            Self::FeatureDisabled { message } => {
                ServerError::new(ErrorCode::FeatureDisabled, message).into_response()
            }
            Self::NotLive { message } => {
                ServerError::new(ErrorCode::WebinarNotLive, message).into_response()
            }
            Self::Internal(error) => {
                tracing::error!(error = ?error, "engagement api internal error");
                ServerError::from_code(ErrorCode::InternalError).into_response()
            }
        }
    }
}

// ── Gating helpers ───────────────────────────────────────────────────────────

/// Tokens are scoped to a single webinar; the path must agree with the token.
pub(crate) fn require_webinar_scope(
    actor: &AuthenticatedRegistrant,
    webinar_id: Uuid,
) -> Result<(), ApiError> {
    if actor.webinar_id == webinar_id {
        Ok(())
    } else {
        Err(ApiError::Forbidden { message: "webinar mismatch" })
    }
}

pub(crate) fn require_host(actor: &AuthenticatedRegistrant) -> Result<(), ApiError> {
    if actor.role.allows(ActorRole::Host) {
        Ok(())
    } else {
        Err(ApiError::Forbidden { message: "caller lacks host role" })
    }
}

pub(crate) async fn webinar_context(
    directory: &WebinarDirectory,
    webinar_id: Uuid,
) -> Result<WebinarContext, ApiError> {
    match directory.lookup(webinar_id).await {
        Ok(Some(context)) => Ok(context),
        Ok(None) => Err(ApiError::NotFound { message: "webinar does not exist" }),
        Err(error) => Err(ApiError::internal(error)),
    }
}

/// Interactive writes (chat, Q&A, polls) require the feature flag and a live
/// broadcast.
pub(crate) fn require_interactive(
    context: &WebinarContext,
    enabled: bool,
    feature: &'static str,
) -> Result<(), ApiError> {
    if !enabled {
        return Err(ApiError::FeatureDisabled { message: feature });
    }
    if context.status != WebinarStatus::Live {
        return Err(ApiError::NotLive { message: "webinar is not live" });
    }
    Ok(())
}

/// Reactions also flow during replay when the replay flag is on.
pub(crate) fn require_reactions_allowed(context: &WebinarContext) -> Result<(), ApiError> {
    match context.status {
        WebinarStatus::Live => Ok(()),
        WebinarStatus::Ended if context.flags.replay_enabled => Ok(()),
        _ => Err(ApiError::NotLive { message: "webinar is not accepting reactions" }),
    }
}

/// Watch tracking covers live viewing and replay, but never drafts or
/// cancelled webinars.
pub(crate) fn require_watchable(context: &WebinarContext) -> Result<(), ApiError> {
    match context.status {
        WebinarStatus::Draft | WebinarStatus::Cancelled => {
            Err(ApiError::NotLive { message: "webinar is not watchable" })
        }
        _ => Ok(()),
    }
}

// ── Engagement ledger helpers ────────────────────────────────────────────────

pub(crate) async fn point_table(
    store: &EventStore,
    webinar_id: Uuid,
) -> anyhow::Result<PointTable> {
    Ok(PointTable::from_weights(store.engagement_weights(webinar_id).await?))
}

/// Appends to the engagement ledger after an accepted write. Ledger failures
/// are logged, never surfaced: the primary write already succeeded.
pub(crate) async fn try_record_engagement(
    state: &AppState,
    webinar_id: Uuid,
    registration_id: Uuid,
    kind: EngagementKind,
    payload: Value,
) {
    let result = async {
        let table = point_table(&state.store, webinar_id).await?;
        state
            .store
            .record_engagement_event(
                webinar_id,
                registration_id,
                kind,
                payload,
                table.points_for(kind),
            )
            .await
    }
    .await;

    if let Err(error) = result {
        tracing::error!(
            error = ?error,
            webinar_id = %webinar_id,
            registration_id = %registration_id,
            kind = kind.as_str(),
            "failed to append engagement event"
        );
    }
}
