mod api;
mod auth;
mod config;
mod db;
mod error;
mod presence;
mod scoring;
mod store;
mod validation;
mod webinars;
mod ws;

use anyhow::Context;
use axum::{
    body::Body,
    extract::DefaultBodyLimit,
    http::{header::HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::{sync::Arc, time::Instant};
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::api::AppState;
use crate::auth::jwt::JwtAccessTokenService;
use crate::config::ServerConfig;
use crate::error::REQUEST_ID_HEADER;
use crate::presence::PresenceStore;
use crate::store::EventStore;
use crate::validation::MAX_REST_BODY_BYTES;
use crate::webinars::WebinarDirectory;
use crate::ws::LiveSessionStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_filter)),
        )
        .json()
        .init();

    if config.is_dev_jwt_secret() {
        warn!("using the development JWT secret; set GREENROOM_SERVER_JWT_SECRET in production");
    }

    let jwt_service =
        Arc::new(JwtAccessTokenService::new(&config.jwt_secret).context("invalid JWT secret")?);

    let (store, directory) = match &config.database_url {
        Some(database_url) => {
            let pool = db::pool::create_pg_pool(database_url, db::pool::PoolConfig::from_env())
                .await
                .context("failed to connect to PostgreSQL")?;
            db::migrations::run_migrations(&pool)
                .await
                .context("failed to run database migrations")?;
            db::pool::check_pool_health(&pool).await?;
            info!("connected to PostgreSQL");
            (EventStore::Postgres(pool.clone()), WebinarDirectory::Postgres(pool))
        }
        None => {
            warn!("GREENROOM_SERVER_DATABASE_URL is unset; using in-memory stores");
            (EventStore::memory(), WebinarDirectory::memory())
        }
    };

    let live = Arc::new(LiveSessionStore::default());
    let presence = Arc::new(PresenceStore::default());
    let state = AppState { store, directory: directory.clone(), live: Arc::clone(&live) };

    let app = build_router(
        state,
        jwt_service,
        live,
        presence,
        directory,
        config.ws_base_url.clone(),
        config.cors_origins.as_deref(),
    );

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind listener on {}", config.listen_addr))?;

    info!(listen_addr = %config.listen_addr, "starting engagement server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("engagement server exited unexpectedly")
}

#[allow(clippy::too_many_arguments)]
fn build_router(
    state: AppState,
    jwt_service: Arc<JwtAccessTokenService>,
    live: Arc<LiveSessionStore>,
    presence: Arc<PresenceStore>,
    directory: WebinarDirectory,
    ws_base_url: String,
    cors_origins: Option<&str>,
) -> Router {
    let router = Router::new()
        .route("/healthz", get(healthz))
        .merge(ws::router(Arc::clone(&jwt_service), live, presence, directory, ws_base_url))
        .merge(api::chat::router(state.clone(), Arc::clone(&jwt_service)))
        .merge(api::qa::router(state.clone(), Arc::clone(&jwt_service)))
        .merge(api::polls::router(state.clone(), Arc::clone(&jwt_service)))
        .merge(api::reactions::router(state.clone(), Arc::clone(&jwt_service)))
        .merge(api::watch::router(state.clone(), Arc::clone(&jwt_service)))
        .merge(api::engagement::router(state, jwt_service));

    apply_middleware(router, cors_origins)
}

fn apply_middleware(router: Router, cors_origins: Option<&str>) -> Router {
    router
        .layer(cors_layer(cors_origins))
        .layer(DefaultBodyLimit::max(MAX_REST_BODY_BYTES))
        .layer(middleware::from_fn(request_context_middleware))
        .layer(middleware::from_fn(panic_handler))
}

fn cors_layer(origins: Option<&str>) -> CorsLayer {
    match origins {
        None => CorsLayer::new(),
        Some("*") => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
        Some(origins) => {
            let parsed: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|origin| HeaderValue::from_str(origin.trim()).ok())
                .collect();
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(parsed))
                .allow_methods(Any)
                .allow_headers(Any)
        }
    }
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}

async fn panic_handler(request: Request<Body>, next: Next) -> Response {
    match tokio::spawn(async move { next.run(request).await }).await {
        Ok(response) => response,
        Err(join_error) => {
            error!(?join_error, "request handling panicked");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn request_context_middleware(request: Request<Body>, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started_at = Instant::now();

    let mut response =
        error::with_request_id_scope(request_id.clone(), next.run(request)).await;

    if let Ok(request_id_header) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, request_id_header);
    }

    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = started_at.elapsed().as_millis() as u64,
        "request completed"
    );

    response
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{Method, Request, StatusCode},
        routing::{get, post},
        Router,
    };
    use tower::ServiceExt;

    use super::{apply_middleware, build_router, MAX_REST_BODY_BYTES};
    use crate::api::testing::{jwt_service, memory_state};
    use crate::presence::PresenceStore;

    fn test_router() -> Router {
        let state = memory_state();
        let live = state.live.clone();
        let directory = state.directory.clone();
        build_router(
            state,
            jwt_service(),
            live,
            Arc::new(PresenceStore::default()),
            directory,
            "ws://localhost:8080".to_string(),
            None,
        )
    }

    #[tokio::test]
    async fn health_check_has_request_id_header() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .body(Body::empty())
                    .expect("healthz request should build"),
            )
            .await
            .expect("healthz request should succeed");

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn unauthenticated_api_requests_are_rejected() {
        let webinar_id = uuid::Uuid::new_v4();
        let response = test_router()
            .oneshot(
                Request::builder()
                    .uri(format!("/v1/webinars/{webinar_id}/chat-messages"))
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should return a response");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn panic_handler_returns_internal_server_error() {
        async fn panic_route() -> &'static str {
            panic!("test panic");
        }

        let app = apply_middleware(Router::new().route("/panic", get(panic_route)), None);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/panic")
                    .body(Body::empty())
                    .expect("panic request should build"),
            )
            .await
            .expect("panic request should return a response");

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn request_body_limit_is_enforced() {
        async fn echo(body: String) -> String {
            body
        }

        let oversized_body = "a".repeat(MAX_REST_BODY_BYTES + 1);
        let app = apply_middleware(Router::new().route("/echo", post(echo)), None);

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/echo")
                    .header("content-type", "text/plain")
                    .body(Body::from(oversized_body))
                    .expect("echo request should build"),
            )
            .await
            .expect("echo request should return a response");

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
