use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use greenroom_common::protocol::ws::{ChangeOp, ChangeTable, WsMessage};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::auth::jwt::ActorRole;

pub(crate) const HEARTBEAT_INTERVAL_MS: u32 = 15_000;
pub(crate) const HEARTBEAT_TIMEOUT_MS: u64 = 10_000;
pub(crate) const SESSION_TOKEN_TTL_MINUTES: i64 = 15;

/// Registry of live viewing sessions. A session is minted over REST, then
/// claimed over the websocket with its one-time token. Sessions are
/// in-memory only: a restart drops them and clients re-mint on reconnect.
#[derive(Debug, Clone, Default)]
pub struct LiveSessionStore {
    sessions: Arc<RwLock<HashMap<Uuid, LiveSessionRecord>>>,
}

#[derive(Debug, Clone)]
struct LiveSessionRecord {
    webinar_id: Uuid,
    registration_id: Uuid,
    role: ActorRole,
    session_token: String,
    expires_at: DateTime<Utc>,
    active_connections: usize,
    subscribed: bool,
    outbound: Option<mpsc::UnboundedSender<WsMessage>>,
}

#[derive(Debug, Deserialize)]
pub struct CreateLiveSessionRequest {
    pub protocol: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CreateLiveSessionResponse {
    pub session_id: Uuid,
    pub session_token: String,
    pub ws_url: String,
    pub heartbeat_interval_ms: u32,
    pub max_frame_bytes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SessionTokenValidation {
    Valid,
    Invalid,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SessionActor {
    pub(crate) webinar_id: Uuid,
    pub(crate) registration_id: Uuid,
    #[allow(dead_code)]
    pub(crate) role: ActorRole,
}

impl LiveSessionStore {
    pub(crate) async fn create_session(
        &self,
        session_id: Uuid,
        webinar_id: Uuid,
        registration_id: Uuid,
        role: ActorRole,
        session_token: String,
    ) {
        let mut guard = self.sessions.write().await;
        guard.insert(
            session_id,
            LiveSessionRecord {
                webinar_id,
                registration_id,
                role,
                session_token,
                expires_at: Utc::now() + Duration::minutes(SESSION_TOKEN_TTL_MINUTES),
                active_connections: 0,
                subscribed: false,
                outbound: None,
            },
        );
    }

    pub(crate) async fn session_exists(&self, session_id: Uuid) -> bool {
        self.sessions.read().await.contains_key(&session_id)
    }

    pub(crate) async fn validate_session_token(
        &self,
        session_id: Uuid,
        session_token: &str,
    ) -> SessionTokenValidation {
        let guard = self.sessions.read().await;
        let Some(session) = guard.get(&session_id) else {
            return SessionTokenValidation::Invalid;
        };

        if session.session_token != session_token {
            return SessionTokenValidation::Invalid;
        }

        if Utc::now() > session.expires_at {
            return SessionTokenValidation::Expired;
        }

        SessionTokenValidation::Valid
    }

    pub(crate) async fn mark_connected(&self, session_id: Uuid) -> bool {
        let mut guard = self.sessions.write().await;
        match guard.get_mut(&session_id) {
            Some(session) => {
                session.active_connections += 1;
                true
            }
            None => false,
        }
    }

    pub(crate) async fn mark_disconnected(&self, session_id: Uuid) {
        let mut guard = self.sessions.write().await;
        if let Some(session) = guard.get_mut(&session_id) {
            session.active_connections = session.active_connections.saturating_sub(1);
            if session.active_connections == 0 {
                session.subscribed = false;
                session.outbound = None;
            }
        }
    }

    pub(crate) async fn register_outbound(
        &self,
        session_id: Uuid,
        sender: mpsc::UnboundedSender<WsMessage>,
    ) -> bool {
        let mut guard = self.sessions.write().await;
        match guard.get_mut(&session_id) {
            Some(session) => {
                session.outbound = Some(sender);
                true
            }
            None => false,
        }
    }

    pub(crate) async fn mark_subscribed(&self, session_id: Uuid) -> bool {
        let mut guard = self.sessions.write().await;
        match guard.get_mut(&session_id) {
            Some(session) => {
                session.subscribed = true;
                true
            }
            None => false,
        }
    }

    pub(crate) async fn actor_for_session(&self, session_id: Uuid) -> Option<SessionActor> {
        self.sessions.read().await.get(&session_id).map(|session| SessionActor {
            webinar_id: session.webinar_id,
            registration_id: session.registration_id,
            role: session.role,
        })
    }

    /// Fans a message out to every subscribed session of the webinar.
    /// Returns the number of sessions the message was queued for.
    pub async fn broadcast_to_webinar(&self, webinar_id: Uuid, message: WsMessage) -> usize {
        self.broadcast_internal(webinar_id, message, None).await
    }

    /// Broadcast to all webinar subscribers except the given session.
    pub(crate) async fn broadcast_excluding(
        &self,
        webinar_id: Uuid,
        message: WsMessage,
        excluded_session_id: Uuid,
    ) -> usize {
        self.broadcast_internal(webinar_id, message, Some(excluded_session_id)).await
    }

    /// Convenience wrapper used by the REST handlers after every accepted
    /// write: wraps the record in a change frame and fans it out.
    pub async fn broadcast_change<T: serde::Serialize>(
        &self,
        webinar_id: Uuid,
        table: ChangeTable,
        op: ChangeOp,
        record: &T,
    ) -> usize {
        let record = match serde_json::to_value(record) {
            Ok(record) => record,
            Err(error) => {
                tracing::error!(error = ?error, webinar_id = %webinar_id, "failed to encode change record");
                return 0;
            }
        };

        self.broadcast_to_webinar(webinar_id, WsMessage::Change { table, op, record }).await
    }

    async fn broadcast_internal(
        &self,
        webinar_id: Uuid,
        message: WsMessage,
        excluded_session_id: Option<Uuid>,
    ) -> usize {
        let mut recipients = Vec::new();
        {
            let guard = self.sessions.read().await;
            for (session_id, session) in guard.iter() {
                if session.webinar_id == webinar_id
                    && session.subscribed
                    && Some(*session_id) != excluded_session_id
                {
                    if let Some(sender) = session.outbound.clone() {
                        recipients.push(sender);
                    }
                }
            }
        }

        let mut sent_count = 0;
        for recipient in recipients {
            if recipient.send(message.clone()).is_ok() {
                sent_count += 1;
            }
        }

        sent_count
    }
}
