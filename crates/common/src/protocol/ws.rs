// WebSocket message types for the greenroom-live.v1 protocol.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The Event Store table a change notification refers to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChangeTable {
    ChatMessages,
    QaQuestions,
    Polls,
    PollResponses,
    Reactions,
}

/// Mutation kind carried by a change notification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// One registrant's presence on a webinar's presence topic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresenceEntry {
    pub registration_id: Uuid,
    pub display_name: String,
    pub joined_at: DateTime<Utc>,
}

/// All message types in the greenroom-live.v1 WebSocket protocol.
///
/// `Change.record` is the raw row payload; consumers parse it into the typed
/// entity for the table they care about and silently drop rows they cannot
/// parse, since a fresh snapshot will repair any gap.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    /// Client -> Server: initial handshake.
    Hello {
        session_token: String,
        display_name: String,
    },

    /// Server -> Client: handshake acknowledgement.
    HelloAck {
        server_time: String,
        viewer_count: usize,
    },

    /// Client -> Server: subscribe to a webinar's broadcast + presence topics.
    Subscribe {
        webinar_id: Uuid,
    },

    /// Server -> Client: a row in the Event Store changed.
    Change {
        table: ChangeTable,
        op: ChangeOp,
        record: serde_json::Value,
    },

    /// Server -> Client: full presence membership snapshot (authoritative;
    /// replaces any stale local presence state).
    PresenceSync {
        entries: Vec<PresenceEntry>,
    },

    /// Server -> Client: a registrant joined the presence topic.
    PresenceJoin {
        entry: PresenceEntry,
    },

    /// Server -> Client: a registrant left the presence topic.
    PresenceLeave {
        registration_id: Uuid,
    },

    /// Server -> Client: error.
    Error {
        code: String,
        message: String,
        retryable: bool,
    },
}
