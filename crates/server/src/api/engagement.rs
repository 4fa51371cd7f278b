// Engagement ledger, scoring configuration, and host reports.
//
// Routes:
//   POST /v1/webinars/{webinar_id}/cta-clicks            — log a call-to-action click
//   GET  /v1/webinars/{webinar_id}/reports/engagement    — score summary (host)
//   GET  /v1/webinars/{webinar_id}/reports/leaderboard   — ranked registrants (host)
//   GET  /v1/webinars/{webinar_id}/reports/watch         — watch-time aggregates (host)
//   GET  /v1/webinars/{webinar_id}/engagement-config     — current point weights (host)
//   PUT  /v1/webinars/{webinar_id}/engagement-config     — replace point weights (host)

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use super::{
    point_table, require_host, require_webinar_scope, webinar_context, ApiError, AppState,
};
use crate::auth::{
    jwt::JwtAccessTokenService,
    middleware::{require_bearer_auth, AuthenticatedRegistrant},
};
use crate::scoring::{self, EngagementSummary, LeaderboardEntry, PointTable};
use crate::validation::ValidatedJson;
use greenroom_common::types::{EngagementEvent, EngagementKind, WATCH_MILESTONES};

const DEFAULT_LEADERBOARD_LIMIT: usize = 20;
const MAX_LEADERBOARD_LIMIT: usize = 200;

#[derive(Deserialize)]
pub struct CtaClickRequest {
    cta_id: String,
}

#[derive(Serialize)]
struct EngagementEventEnvelope {
    event: EngagementEvent,
}

#[derive(Deserialize)]
pub struct LeaderboardQuery {
    limit: Option<usize>,
}

#[derive(Serialize)]
struct LeaderboardEnvelope {
    items: Vec<LeaderboardEntry>,
}

#[derive(Serialize)]
struct WatchReport {
    session_count: usize,
    registrant_count: usize,
    total_watch_seconds: i64,
    /// Fraction of sessions that reached the 100% milestone; 0 when there
    /// are no sessions.
    completion_rate: f64,
    /// Sessions that reached each milestone, keyed "25" through "100".
    milestone_counts: HashMap<String, usize>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct EngagementConfigBody {
    weights: HashMap<String, i32>,
}

#[derive(Serialize)]
struct EngagementConfigView {
    /// Effective per-kind weights after applying any custom table.
    weights: HashMap<String, i32>,
    is_custom: bool,
}

pub fn router(state: AppState, jwt_service: Arc<JwtAccessTokenService>) -> Router {
    Router::new()
        .route("/v1/webinars/{webinar_id}/cta-clicks", post(log_cta_click))
        .route("/v1/webinars/{webinar_id}/reports/engagement", get(engagement_report))
        .route("/v1/webinars/{webinar_id}/reports/leaderboard", get(leaderboard_report))
        .route("/v1/webinars/{webinar_id}/reports/watch", get(watch_report))
        .route(
            "/v1/webinars/{webinar_id}/engagement-config",
            get(get_engagement_config).put(set_engagement_config),
        )
        .with_state(state)
        .route_layer(middleware::from_fn_with_state(jwt_service, require_bearer_auth))
}

/// CTA clicks have no backing record of their own, so unlike the other
/// surfaces the ledger append is the primary write and its failure surfaces.
async fn log_cta_click(
    State(state): State<AppState>,
    Extension(actor): Extension<AuthenticatedRegistrant>,
    Path(webinar_id): Path<Uuid>,
    ValidatedJson(payload): ValidatedJson<CtaClickRequest>,
) -> Result<(StatusCode, Json<EngagementEventEnvelope>), ApiError> {
    require_webinar_scope(&actor, webinar_id)?;
    webinar_context(&state.directory, webinar_id).await?;

    let cta_id = payload.cta_id.trim().to_string();
    if cta_id.is_empty() {
        return Err(ApiError::bad_request("cta_id must not be empty"));
    }

    let table = point_table(&state.store, webinar_id).await.map_err(ApiError::internal)?;
    let event = state
        .store
        .record_engagement_event(
            webinar_id,
            actor.registration_id,
            EngagementKind::CtaClick,
            json!({ "cta_id": cta_id }),
            table.points_for(EngagementKind::CtaClick),
        )
        .await
        .map_err(ApiError::internal)?;

    Ok((StatusCode::CREATED, Json(EngagementEventEnvelope { event })))
}

async fn engagement_report(
    State(state): State<AppState>,
    Extension(actor): Extension<AuthenticatedRegistrant>,
    Path(webinar_id): Path<Uuid>,
) -> Result<Json<EngagementSummary>, ApiError> {
    require_webinar_scope(&actor, webinar_id)?;
    require_host(&actor)?;
    webinar_context(&state.directory, webinar_id).await?;

    let events =
        state.store.list_engagement_events(webinar_id).await.map_err(ApiError::internal)?;
    Ok(Json(scoring::summarize(&events)))
}

async fn leaderboard_report(
    State(state): State<AppState>,
    Extension(actor): Extension<AuthenticatedRegistrant>,
    Path(webinar_id): Path<Uuid>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<LeaderboardEnvelope>, ApiError> {
    require_webinar_scope(&actor, webinar_id)?;
    require_host(&actor)?;
    webinar_context(&state.directory, webinar_id).await?;

    let limit = query.limit.unwrap_or(DEFAULT_LEADERBOARD_LIMIT).min(MAX_LEADERBOARD_LIMIT);
    let events =
        state.store.list_engagement_events(webinar_id).await.map_err(ApiError::internal)?;

    Ok(Json(LeaderboardEnvelope { items: scoring::leaderboard(&events, limit) }))
}

async fn watch_report(
    State(state): State<AppState>,
    Extension(actor): Extension<AuthenticatedRegistrant>,
    Path(webinar_id): Path<Uuid>,
) -> Result<Json<WatchReport>, ApiError> {
    require_webinar_scope(&actor, webinar_id)?;
    require_host(&actor)?;
    webinar_context(&state.directory, webinar_id).await?;

    let sessions = state.store.list_watch_sessions(webinar_id).await.map_err(ApiError::internal)?;

    let mut registrants = std::collections::HashSet::new();
    let mut total_watch_seconds: i64 = 0;
    let mut milestone_counts: HashMap<String, usize> =
        WATCH_MILESTONES.iter().map(|milestone| (milestone.to_string(), 0)).collect();
    let mut completed_sessions = 0usize;
    for session in &sessions {
        registrants.insert(session.registration_id);
        total_watch_seconds += i64::from(session.last_position_seconds.max(0));
        if session.milestones_hit.contains(&100) {
            completed_sessions += 1;
        }
        for milestone in &session.milestones_hit {
            if let Some(count) = milestone_counts.get_mut(&milestone.to_string()) {
                *count += 1;
            }
        }
    }

    let completion_rate = if sessions.is_empty() {
        0.0
    } else {
        completed_sessions as f64 / sessions.len() as f64
    };

    Ok(Json(WatchReport {
        session_count: sessions.len(),
        registrant_count: registrants.len(),
        total_watch_seconds,
        completion_rate,
        milestone_counts,
    }))
}

async fn get_engagement_config(
    State(state): State<AppState>,
    Extension(actor): Extension<AuthenticatedRegistrant>,
    Path(webinar_id): Path<Uuid>,
) -> Result<Json<EngagementConfigView>, ApiError> {
    require_webinar_scope(&actor, webinar_id)?;
    require_host(&actor)?;
    webinar_context(&state.directory, webinar_id).await?;

    let table = point_table(&state.store, webinar_id).await.map_err(ApiError::internal)?;
    let is_custom = matches!(table, PointTable::Custom(_));
    let weights = EngagementKind::ALL
        .iter()
        .map(|kind| (kind.as_str().to_string(), table.points_for(*kind)))
        .collect();

    Ok(Json(EngagementConfigView { weights, is_custom }))
}

/// Replaces the whole weight table. Kinds absent from a custom table score
/// zero; events already in the ledger keep the points they were awarded.
async fn set_engagement_config(
    State(state): State<AppState>,
    Extension(actor): Extension<AuthenticatedRegistrant>,
    Path(webinar_id): Path<Uuid>,
    ValidatedJson(payload): ValidatedJson<EngagementConfigBody>,
) -> Result<Json<EngagementConfigBody>, ApiError> {
    require_webinar_scope(&actor, webinar_id)?;
    require_host(&actor)?;
    webinar_context(&state.directory, webinar_id).await?;

    for (kind, points) in &payload.weights {
        if EngagementKind::from_db_value(kind).is_none() {
            return Err(ApiError::bad_request(format!("unknown engagement kind '{kind}'")));
        }
        if *points < 0 {
            return Err(ApiError::bad_request("weights must not be negative"));
        }
    }

    state
        .store
        .set_engagement_weights(webinar_id, payload.weights.clone())
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(payload))
}

#[cfg(test)]
mod tests {
    use super::router;
    use crate::api::testing::{bearer, jwt_service, memory_state, seed_live_webinar};
    use crate::auth::jwt::ActorRole;
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use greenroom_common::types::EngagementKind;
    use tower::ServiceExt;
    use uuid::Uuid;

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should be readable");
        serde_json::from_slice(&bytes).expect("body should be json")
    }

    fn cta(webinar_id: Uuid, auth: &str, cta_id: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(format!("/v1/webinars/{webinar_id}/cta-clicks"))
            .header(header::AUTHORIZATION, auth)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::json!({ "cta_id": cta_id }).to_string()))
            .expect("request should build")
    }

    fn get(webinar_id: Uuid, auth: &str, path: &str) -> Request<Body> {
        Request::builder()
            .uri(format!("/v1/webinars/{webinar_id}/{path}"))
            .header(header::AUTHORIZATION, auth)
            .body(Body::empty())
            .expect("request should build")
    }

    #[tokio::test]
    async fn cta_clicks_earn_default_points() {
        let state = memory_state();
        let jwt = jwt_service();
        let webinar_id = seed_live_webinar(&state).await;
        let auth = bearer(&jwt, Uuid::new_v4(), webinar_id, ActorRole::Viewer);

        let response = router(state, jwt)
            .oneshot(cta(webinar_id, &auth, "pricing-page"))
            .await
            .expect("request should return a response");
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert_eq!(body["event"]["kind"], "cta_click");
        assert_eq!(body["event"]["points_awarded"], 5);
    }

    #[tokio::test]
    async fn custom_weights_apply_to_later_events_only() {
        let state = memory_state();
        let jwt = jwt_service();
        let webinar_id = seed_live_webinar(&state).await;
        let registrant = Uuid::new_v4();
        let viewer = bearer(&jwt, registrant, webinar_id, ActorRole::Viewer);
        let host = bearer(&jwt, Uuid::new_v4(), webinar_id, ActorRole::Host);

        router(state.clone(), jwt.clone())
            .oneshot(cta(webinar_id, &viewer, "first"))
            .await
            .expect("request should return a response");

        let response = router(state.clone(), jwt.clone())
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri(format!("/v1/webinars/{webinar_id}/engagement-config"))
                    .header(header::AUTHORIZATION, &host)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        serde_json::json!({ "weights": { "cta_click": 10 } }).to_string(),
                    ))
                    .expect("request should build"),
            )
            .await
            .expect("request should return a response");
        assert_eq!(response.status(), StatusCode::OK);

        let response = router(state.clone(), jwt.clone())
            .oneshot(cta(webinar_id, &viewer, "second"))
            .await
            .expect("request should return a response");
        assert_eq!(body_json(response).await["event"]["points_awarded"], 10);

        // Already-logged events keep their original points: 5 + 10.
        let events = state.store.list_engagement_events(webinar_id).await.expect("events");
        let total: i32 = events.iter().map(|event| event.points_awarded).sum();
        assert_eq!(total, 15);
    }

    #[tokio::test]
    async fn custom_tables_zero_out_missing_kinds() {
        let state = memory_state();
        let jwt = jwt_service();
        let webinar_id = seed_live_webinar(&state).await;
        let host = bearer(&jwt, Uuid::new_v4(), webinar_id, ActorRole::Host);

        router(state.clone(), jwt.clone())
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri(format!("/v1/webinars/{webinar_id}/engagement-config"))
                    .header(header::AUTHORIZATION, &host)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        serde_json::json!({ "weights": { "chat_message": 2 } }).to_string(),
                    ))
                    .expect("request should build"),
            )
            .await
            .expect("request should return a response");

        let response = router(state, jwt)
            .oneshot(get(webinar_id, &host, "engagement-config"))
            .await
            .expect("request should return a response");
        let body = body_json(response).await;
        assert_eq!(body["is_custom"], true);
        assert_eq!(body["weights"]["chat_message"], 2);
        assert_eq!(body["weights"]["cta_click"], 0);
    }

    #[tokio::test]
    async fn unknown_weight_kinds_are_rejected() {
        let state = memory_state();
        let jwt = jwt_service();
        let webinar_id = seed_live_webinar(&state).await;
        let host = bearer(&jwt, Uuid::new_v4(), webinar_id, ActorRole::Host);

        let response = router(state, jwt)
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri(format!("/v1/webinars/{webinar_id}/engagement-config"))
                    .header(header::AUTHORIZATION, &host)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        serde_json::json!({ "weights": { "retweet": 3 } }).to_string(),
                    ))
                    .expect("request should build"),
            )
            .await
            .expect("request should return a response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn reports_are_host_only() {
        let state = memory_state();
        let jwt = jwt_service();
        let webinar_id = seed_live_webinar(&state).await;
        let viewer = bearer(&jwt, Uuid::new_v4(), webinar_id, ActorRole::Viewer);

        for path in ["reports/engagement", "reports/leaderboard", "reports/watch"] {
            let response = router(state.clone(), jwt.clone())
                .oneshot(get(webinar_id, &viewer, path))
                .await
                .expect("request should return a response");
            assert_eq!(response.status(), StatusCode::FORBIDDEN, "{path}");
        }
    }

    #[tokio::test]
    async fn leaderboard_ranks_by_score_with_limit() {
        let state = memory_state();
        let jwt = jwt_service();
        let webinar_id = seed_live_webinar(&state).await;
        let host = bearer(&jwt, Uuid::new_v4(), webinar_id, ActorRole::Host);

        let low = Uuid::new_v4();
        let high = Uuid::new_v4();
        for (registrant, points) in [(low, 1), (high, 9), (high, 9)] {
            state
                .store
                .record_engagement_event(
                    webinar_id,
                    registrant,
                    EngagementKind::ChatMessage,
                    serde_json::json!({}),
                    points,
                )
                .await
                .expect("record should succeed");
        }

        let response = router(state, jwt)
            .oneshot(get(webinar_id, &host, "reports/leaderboard?limit=1"))
            .await
            .expect("request should return a response");
        let body = body_json(response).await;
        let items = body["items"].as_array().expect("items");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["registration_id"], high.to_string());
        assert_eq!(items[0]["rank"], 1);
        assert_eq!(items[0]["score"], 18);
    }

    #[tokio::test]
    async fn watch_report_aggregates_sessions_and_milestones() {
        let state = memory_state();
        let jwt = jwt_service();
        let webinar_id = seed_live_webinar(&state).await;
        let host = bearer(&jwt, Uuid::new_v4(), webinar_id, ActorRole::Host);

        let partial = Uuid::new_v4();
        let session =
            state.store.create_watch_session(webinar_id, partial, 1000).await.expect("session");
        state
            .store
            .record_watch_progress(webinar_id, session.id, partial, 600)
            .await
            .expect("progress should succeed");

        let finisher = Uuid::new_v4();
        let finished =
            state.store.create_watch_session(webinar_id, finisher, 1000).await.expect("session");
        state
            .store
            .record_watch_progress(webinar_id, finished.id, finisher, 1000)
            .await
            .expect("progress should succeed");

        let response = router(state, jwt)
            .oneshot(get(webinar_id, &host, "reports/watch"))
            .await
            .expect("request should return a response");
        let body = body_json(response).await;
        assert_eq!(body["session_count"], 2);
        assert_eq!(body["registrant_count"], 2);
        assert_eq!(body["total_watch_seconds"], 1600);
        assert_eq!(body["milestone_counts"]["25"], 2);
        assert_eq!(body["milestone_counts"]["50"], 2);
        assert_eq!(body["milestone_counts"]["75"], 1);
        assert_eq!(body["milestone_counts"]["100"], 1);
        // One of two sessions reached the 100% milestone.
        assert_eq!(body["completion_rate"], 0.5);
    }

    #[tokio::test]
    async fn watch_report_for_an_empty_webinar_is_all_zeroes() {
        let state = memory_state();
        let jwt = jwt_service();
        let webinar_id = seed_live_webinar(&state).await;
        let host = bearer(&jwt, Uuid::new_v4(), webinar_id, ActorRole::Host);

        let response = router(state, jwt)
            .oneshot(get(webinar_id, &host, "reports/watch"))
            .await
            .expect("request should return a response");
        let body = body_json(response).await;
        assert_eq!(body["session_count"], 0);
        assert_eq!(body["completion_rate"], 0.0);
        assert_eq!(body["milestone_counts"]["100"], 0);
    }
}
