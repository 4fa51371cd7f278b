use chrono::Utc;
use greenroom_common::protocol::ws::{ChangeOp, ChangeTable, PresenceEntry, WsMessage};
use greenroom_common::protocol::CURRENT_PROTOCOL_VERSION;
use uuid::Uuid;

const WS_SESSION_SOURCE: &str = include_str!("../src/ws/session.rs");
const VALIDATION_SOURCE: &str = include_str!("../src/validation.rs");

#[test]
fn websocket_contract_heartbeat_and_timeout() {
    let heartbeat_interval_ms = parse_u64_const(WS_SESSION_SOURCE, "HEARTBEAT_INTERVAL_MS");
    let heartbeat_timeout_ms = parse_u64_const(WS_SESSION_SOURCE, "HEARTBEAT_TIMEOUT_MS");

    assert_eq!(heartbeat_interval_ms, 15_000);
    assert_eq!(heartbeat_timeout_ms, 10_000);
    assert!(
        heartbeat_timeout_ms < heartbeat_interval_ms,
        "pong timeout must be shorter than heartbeat interval",
    );
}

#[test]
fn websocket_contract_frame_size_limit() {
    assert!(
        VALIDATION_SOURCE.contains("pub const MAX_WS_FRAME_BYTES: usize = 64 * 1024"),
        "frame limit must stay at 64 KiB",
    );
}

#[test]
fn websocket_contract_protocol_version_is_greenroom_live_v1() {
    assert_eq!(CURRENT_PROTOCOL_VERSION, "greenroom-live.v1");
}

#[test]
fn websocket_contract_message_shapes() {
    let registration_id = Uuid::new_v4();
    let webinar_id = Uuid::new_v4();
    let entry = PresenceEntry {
        registration_id,
        display_name: "Dana".to_string(),
        joined_at: Utc::now(),
    };

    let samples = [
        (
            WsMessage::Hello {
                session_token: "session-token".to_string(),
                display_name: "Dana".to_string(),
            },
            "hello",
            &["type", "session_token", "display_name"][..],
        ),
        (
            WsMessage::HelloAck {
                server_time: "2026-08-30T00:00:00Z".to_string(),
                viewer_count: 12,
            },
            "hello_ack",
            &["type", "server_time", "viewer_count"][..],
        ),
        (WsMessage::Subscribe { webinar_id }, "subscribe", &["type", "webinar_id"][..]),
        (
            WsMessage::Change {
                table: ChangeTable::ChatMessages,
                op: ChangeOp::Insert,
                record: serde_json::json!({ "id": Uuid::new_v4() }),
            },
            "change",
            &["type", "table", "op", "record"][..],
        ),
        (
            WsMessage::PresenceSync { entries: vec![entry.clone()] },
            "presence_sync",
            &["type", "entries"][..],
        ),
        (WsMessage::PresenceJoin { entry }, "presence_join", &["type", "entry"][..]),
        (
            WsMessage::PresenceLeave { registration_id },
            "presence_leave",
            &["type", "registration_id"][..],
        ),
        (
            WsMessage::Error {
                code: "LIVE_TOKEN_INVALID".to_string(),
                message: "invalid session token".to_string(),
                retryable: false,
            },
            "error",
            &["type", "code", "message", "retryable"][..],
        ),
    ];

    for (message, expected_type, expected_keys) in samples {
        let value = serde_json::to_value(message).expect("ws message should serialize");
        assert_eq!(value["type"], expected_type);
        for key in expected_keys {
            assert!(
                value.get(key).is_some(),
                "serialized `{expected_type}` frame must include `{key}`",
            );
        }
    }
}

#[test]
fn websocket_contract_change_tables_cover_every_broadcast_surface() {
    for (table, expected) in [
        (ChangeTable::ChatMessages, "chat_messages"),
        (ChangeTable::QaQuestions, "qa_questions"),
        (ChangeTable::Polls, "polls"),
        (ChangeTable::PollResponses, "poll_responses"),
        (ChangeTable::Reactions, "reactions"),
    ] {
        let value = serde_json::to_value(table).expect("table should serialize");
        assert_eq!(value, expected);
    }
}

fn parse_u64_const(source: &str, name: &str) -> u64 {
    let needle = format!("const {name}:");
    let index = source.find(&needle).expect("constant must be declared");
    let line = source[index..].lines().next().expect("constant declaration line must exist");
    let raw_value = line
        .split('=')
        .nth(1)
        .expect("constant must have assignment")
        .trim()
        .trim_end_matches(';')
        .replace('_', "");
    raw_value
        .parse::<u64>()
        .unwrap_or_else(|error| panic!("failed to parse `{name}` from `{line}`: {error}"))
}
