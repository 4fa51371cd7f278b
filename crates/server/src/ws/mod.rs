// Live fanout plumbing.
//
// A client first mints a live session over REST (bearer-authenticated), then
// opens the websocket and claims it with the session token:
//
//   POST /v1/webinars/{webinar_id}/live-sessions   — mint session + token
//   GET  /v1/live/{session_id}                     — websocket upgrade
//
// Over the socket: hello → hello_ack, subscribe → presence_sync, then change
// and presence frames until disconnect.

mod session;

pub use session::{CreateLiveSessionResponse, LiveSessionStore};

use std::sync::Arc;

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Extension, Path, State,
    },
    http::{HeaderMap, StatusCode},
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use greenroom_common::protocol::{ws::WsMessage, CURRENT_PROTOCOL_VERSION};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::warn;
use uuid::Uuid;

use crate::auth::{
    jwt::JwtAccessTokenService,
    middleware::{require_bearer_auth, AuthenticatedRegistrant},
};
use crate::error::{
    current_request_id, request_id_from_headers_or_generate, with_request_id_scope, ErrorCode,
    ServerError,
};
use crate::presence::PresenceStore;
use crate::validation::MAX_WS_FRAME_BYTES;
use crate::webinars::WebinarDirectory;
use greenroom_common::types::WebinarStatus;
use session::{
    CreateLiveSessionRequest, SessionTokenValidation, HEARTBEAT_INTERVAL_MS, HEARTBEAT_TIMEOUT_MS,
};

const MAX_DISPLAY_NAME_CHARS: usize = 80;

#[derive(Clone)]
struct LiveRouterState {
    session_store: Arc<LiveSessionStore>,
    presence_store: Arc<PresenceStore>,
    directory: WebinarDirectory,
    ws_base_url: Arc<str>,
}

pub fn router(
    jwt_service: Arc<JwtAccessTokenService>,
    session_store: Arc<LiveSessionStore>,
    presence_store: Arc<PresenceStore>,
    directory: WebinarDirectory,
    ws_base_url: String,
) -> Router {
    let state = LiveRouterState {
        session_store,
        presence_store,
        directory,
        ws_base_url: Arc::<str>::from(ws_base_url),
    };
    let auth_layer = middleware::from_fn_with_state(jwt_service, require_bearer_auth);

    Router::new()
        .route(
            "/v1/webinars/{webinar_id}/live-sessions",
            post(create_live_session).route_layer(auth_layer),
        )
        .route("/v1/live/{session_id}", get(ws_upgrade))
        .with_state(state)
}

fn require_supported_protocol(protocol: &str) -> Result<(), ServerError> {
    if protocol == CURRENT_PROTOCOL_VERSION {
        Ok(())
    } else {
        Err(ServerError::new(
            ErrorCode::UpgradeRequired,
            format!("unsupported protocol '{protocol}', expected '{CURRENT_PROTOCOL_VERSION}'"),
        ))
    }
}

async fn create_live_session(
    Path(webinar_id): Path<Uuid>,
    Extension(actor): Extension<AuthenticatedRegistrant>,
    State(state): State<LiveRouterState>,
    Json(payload): Json<CreateLiveSessionRequest>,
) -> impl IntoResponse {
    if let Err(upgrade_error) = require_supported_protocol(&payload.protocol) {
        return upgrade_error.into_response();
    }

    if webinar_id != actor.webinar_id {
        return ServerError::new(ErrorCode::AuthForbidden, "webinar mismatch").into_response();
    }

    let context = match state.directory.lookup(webinar_id).await {
        Ok(Some(context)) => context,
        Ok(None) => return ServerError::from_code(ErrorCode::NotFound).into_response(),
        Err(error) => {
            tracing::error!(error = ?error, webinar_id = %webinar_id, "failed to look up webinar for live session");
            return ServerError::from_code(ErrorCode::InternalError).into_response();
        }
    };

    // Live viewers connect during the broadcast; replay viewers still get a
    // socket after the fact when replay is on.
    let connectable = matches!(context.status, WebinarStatus::Live)
        || matches!(context.status, WebinarStatus::Ended if context.flags.replay_enabled);
    if !connectable {
        return ServerError::new(
            ErrorCode::WebinarNotLive,
            "webinar is not accepting live connections",
        )
        .into_response();
    }

    let session_id = Uuid::new_v4();
    let session_token = Uuid::new_v4().to_string();
    let ws_url = format!("{}/v1/live/{}", state.ws_base_url, session_id);

    state
        .session_store
        .create_session(
            session_id,
            webinar_id,
            actor.registration_id,
            actor.role,
            session_token.clone(),
        )
        .await;

    (
        StatusCode::CREATED,
        Json(CreateLiveSessionResponse {
            session_id,
            session_token,
            ws_url,
            heartbeat_interval_ms: HEARTBEAT_INTERVAL_MS,
            max_frame_bytes: MAX_WS_FRAME_BYTES as u32,
        }),
    )
        .into_response()
}

async fn ws_upgrade(
    Path(session_id): Path<Uuid>,
    State(state): State<LiveRouterState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    if !state.session_store.session_exists(session_id).await {
        return ServerError::from_code(ErrorCode::NotFound).into_response();
    }

    let session_store = state.session_store.clone();
    let presence_store = state.presence_store.clone();
    let request_id = request_id_from_headers_or_generate(&headers);
    ws.max_frame_size(MAX_WS_FRAME_BYTES).on_upgrade(move |socket| async move {
        with_request_id_scope(
            request_id,
            handle_socket(session_store, presence_store, session_id, socket),
        )
        .await;
    })
}

// ── Frame helpers ────────────────────────────────────────────────────────────

fn decode_message(raw: &str) -> Result<WsMessage, serde_json::Error> {
    serde_json::from_str::<WsMessage>(raw)
}

fn encode_message(message: &WsMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}

async fn send_ws_message(socket: &mut WebSocket, message: &WsMessage) -> Result<(), ()> {
    let encoded = encode_message(message).map_err(|_| ())?;
    socket.send(Message::Text(encoded.into())).await.map_err(|_| ())
}

fn frame_size_exceeded_reason() -> String {
    format!("websocket frame exceeds maximum size of {MAX_WS_FRAME_BYTES} bytes")
}

fn is_frame_size_violation(error: &axum::Error) -> bool {
    let message = error.to_string().to_ascii_lowercase();
    message.contains("message too long")
        || message.contains("frame too long")
        || message.contains("too large")
        || message.contains("too big")
        || message.contains("size limit")
}

async fn close_frame_too_large(socket: &mut WebSocket) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code::SIZE,
            reason: frame_size_exceeded_reason().into(),
        })))
        .await;
}

// ── Socket lifecycle ─────────────────────────────────────────────────────────

async fn handle_socket(
    session_store: Arc<LiveSessionStore>,
    presence_store: Arc<PresenceStore>,
    session_id: Uuid,
    mut socket: WebSocket,
) {
    let request_id = current_request_id().unwrap_or_else(|| "unknown".to_string());

    if !session_store.mark_connected(session_id).await {
        return;
    }

    // The first frame must be a hello carrying the session token.
    let display_name = match socket.recv().await {
        Some(Ok(Message::Text(raw_message))) => {
            if raw_message.len() > MAX_WS_FRAME_BYTES {
                close_frame_too_large(&mut socket).await;
                session_store.mark_disconnected(session_id).await;
                return;
            }

            match decode_message(&raw_message) {
                Ok(WsMessage::Hello { session_token, display_name }) => {
                    match handle_hello_message(&session_store, session_id, session_token, display_name)
                        .await
                    {
                        Ok(display_name) => display_name,
                        Err(error_message) => {
                            let _ = send_ws_message(&mut socket, &error_message).await;
                            let _ = socket.send(Message::Close(None)).await;
                            session_store.mark_disconnected(session_id).await;
                            return;
                        }
                    }
                }
                _ => {
                    let _ = send_ws_message(
                        &mut socket,
                        &WsMessage::Error {
                            code: "LIVE_HELLO_REQUIRED".to_string(),
                            message: "first websocket message must be a hello frame".to_string(),
                            retryable: false,
                        },
                    )
                    .await;
                    let _ = socket.send(Message::Close(None)).await;
                    session_store.mark_disconnected(session_id).await;
                    return;
                }
            }
        }
        Some(Err(error)) if is_frame_size_violation(&error) => {
            close_frame_too_large(&mut socket).await;
            session_store.mark_disconnected(session_id).await;
            return;
        }
        _ => {
            session_store.mark_disconnected(session_id).await;
            return;
        }
    };

    let Some(actor) = session_store.actor_for_session(session_id).await else {
        session_store.mark_disconnected(session_id).await;
        return;
    };

    let hello_ack = WsMessage::HelloAck {
        server_time: Utc::now().to_rfc3339(),
        viewer_count: presence_store.viewer_count(actor.webinar_id).await,
    };
    if send_ws_message(&mut socket, &hello_ack).await.is_err() {
        session_store.mark_disconnected(session_id).await;
        return;
    }

    let (outbound_sender, mut outbound_receiver) = mpsc::unbounded_channel::<WsMessage>();
    if !session_store.register_outbound(session_id, outbound_sender).await {
        session_store.mark_disconnected(session_id).await;
        return;
    }

    // Heartbeat: server pings every HEARTBEAT_INTERVAL_MS, disconnects if no
    // pong arrives within HEARTBEAT_TIMEOUT_MS.
    let mut heartbeat_interval =
        tokio::time::interval(std::time::Duration::from_millis(HEARTBEAT_INTERVAL_MS as u64));
    heartbeat_interval.reset(); // skip immediate first tick
    let mut last_pong = Instant::now();
    let heartbeat_timeout = std::time::Duration::from_millis(HEARTBEAT_TIMEOUT_MS);
    let mut joined_presence = false;

    loop {
        tokio::select! {
            _ = heartbeat_interval.tick() => {
                if last_pong.elapsed() > heartbeat_timeout {
                    warn!(
                        session_id = %session_id,
                        request_id = %request_id,
                        "heartbeat timeout, disconnecting"
                    );
                    break;
                }
                if socket.send(Message::Ping(vec![].into())).await.is_err() {
                    break;
                }
            }
            maybe_outbound = outbound_receiver.recv() => {
                match maybe_outbound {
                    Some(outbound_message) => {
                        if send_ws_message(&mut socket, &outbound_message).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            maybe_message = socket.recv() => {
                let Some(message) = maybe_message else {
                    break;
                };

                match message {
                    Ok(Message::Text(raw_message)) => {
                        if raw_message.len() > MAX_WS_FRAME_BYTES {
                            close_frame_too_large(&mut socket).await;
                            break;
                        }

                        let inbound = match decode_message(&raw_message) {
                            Ok(message) => message,
                            Err(_) => {
                                if send_ws_message(
                                    &mut socket,
                                    &WsMessage::Error {
                                        code: "LIVE_INVALID_MESSAGE".to_string(),
                                        message: "invalid websocket frame payload".to_string(),
                                        retryable: false,
                                    },
                                )
                                .await
                                .is_err()
                                {
                                    break;
                                }
                                continue;
                            }
                        };

                        match inbound {
                            WsMessage::Subscribe { webinar_id } => {
                                match handle_subscribe_message(
                                    &session_store,
                                    &presence_store,
                                    session_id,
                                    webinar_id,
                                    display_name.clone(),
                                )
                                .await
                                {
                                    Ok(subscribed) => {
                                        joined_presence = true;
                                        if send_ws_message(&mut socket, &subscribed.sync).await.is_err() {
                                            break;
                                        }
                                        let _ = session_store
                                            .broadcast_excluding(
                                                webinar_id,
                                                subscribed.join_broadcast,
                                                session_id,
                                            )
                                            .await;
                                    }
                                    Err(error_message) => {
                                        if send_ws_message(&mut socket, &error_message).await.is_err() {
                                            break;
                                        }
                                    }
                                }
                            }
                            _ => {
                                if send_ws_message(
                                    &mut socket,
                                    &WsMessage::Error {
                                        code: "LIVE_UNSUPPORTED_MESSAGE".to_string(),
                                        message: "message type is not supported over this socket"
                                            .to_string(),
                                        retryable: false,
                                    },
                                )
                                .await
                                .is_err()
                                {
                                    break;
                                }
                            }
                        }
                    }
                    Ok(Message::Ping(payload)) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Pong(_)) => {
                        last_pong = Instant::now();
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(error) => {
                        if is_frame_size_violation(&error) {
                            close_frame_too_large(&mut socket).await;
                        }
                        break;
                    }
                }
            }
        }
    }

    if joined_presence {
        if let Some(outcome) = presence_store.leave(actor.webinar_id, session_id).await {
            if !outcome.still_present {
                let _ = session_store
                    .broadcast_excluding(
                        actor.webinar_id,
                        WsMessage::PresenceLeave { registration_id: outcome.registration_id },
                        session_id,
                    )
                    .await;
            }
        }
    }

    session_store.mark_disconnected(session_id).await;
}

async fn handle_hello_message(
    session_store: &LiveSessionStore,
    session_id: Uuid,
    session_token: String,
    display_name: String,
) -> Result<String, WsMessage> {
    let display_name = display_name.trim().to_string();
    if display_name.is_empty() || display_name.chars().count() > MAX_DISPLAY_NAME_CHARS {
        return Err(WsMessage::Error {
            code: "LIVE_INVALID_DISPLAY_NAME".to_string(),
            message: format!("display_name must be 1..={MAX_DISPLAY_NAME_CHARS} characters"),
            retryable: false,
        });
    }

    match session_store.validate_session_token(session_id, &session_token).await {
        SessionTokenValidation::Valid => Ok(display_name),
        SessionTokenValidation::Invalid => Err(WsMessage::Error {
            code: "LIVE_TOKEN_INVALID".to_string(),
            message: "invalid session token".to_string(),
            retryable: false,
        }),
        SessionTokenValidation::Expired => Err(WsMessage::Error {
            code: "LIVE_TOKEN_EXPIRED".to_string(),
            message: "session token expired".to_string(),
            retryable: false,
        }),
    }
}

#[derive(Debug)]
struct SubscribeHandled {
    sync: WsMessage,
    join_broadcast: WsMessage,
}

async fn handle_subscribe_message(
    session_store: &LiveSessionStore,
    presence_store: &PresenceStore,
    session_id: Uuid,
    webinar_id: Uuid,
    display_name: String,
) -> Result<SubscribeHandled, WsMessage> {
    let Some(actor) = session_store.actor_for_session(session_id).await else {
        return Err(WsMessage::Error {
            code: "LIVE_SESSION_INVALID".to_string(),
            message: "session is not available".to_string(),
            retryable: false,
        });
    };

    if actor.webinar_id != webinar_id {
        return Err(WsMessage::Error {
            code: "LIVE_WEBINAR_MISMATCH".to_string(),
            message: "subscribe target does not match this session's webinar".to_string(),
            retryable: false,
        });
    }

    if !session_store.mark_subscribed(session_id).await {
        return Err(WsMessage::Error {
            code: "LIVE_SESSION_INVALID".to_string(),
            message: "session is not available".to_string(),
            retryable: false,
        });
    }

    let entry = presence_store
        .join(webinar_id, session_id, actor.registration_id, display_name)
        .await;
    let entries = presence_store.snapshot(webinar_id).await;

    Ok(SubscribeHandled {
        sync: WsMessage::PresenceSync { entries },
        join_broadcast: WsMessage::PresenceJoin { entry },
    })
}
