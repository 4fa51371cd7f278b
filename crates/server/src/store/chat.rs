use anyhow::{Context, Result};
use chrono::Utc;
use greenroom_common::types::ChatMessage;
use sqlx::PgPool;
use uuid::Uuid;

use super::MemoryState;

const CHAT_COLUMNS: &str =
    "id, webinar_id, registration_id, message, is_pinned, is_hidden, created_at";

#[derive(sqlx::FromRow)]
struct ChatMessageRow {
    id: Uuid,
    webinar_id: Uuid,
    registration_id: Uuid,
    message: String,
    is_pinned: bool,
    is_hidden: bool,
    created_at: chrono::DateTime<Utc>,
}

impl From<ChatMessageRow> for ChatMessage {
    fn from(row: ChatMessageRow) -> Self {
        Self {
            id: row.id,
            webinar_id: row.webinar_id,
            registration_id: row.registration_id,
            message: row.message,
            is_pinned: row.is_pinned,
            is_hidden: row.is_hidden,
            created_at: row.created_at,
        }
    }
}

// ── Postgres ─────────────────────────────────────────────────────────────────

pub(super) async fn create_message_pg(
    pool: &PgPool,
    webinar_id: Uuid,
    registration_id: Uuid,
    message: String,
) -> Result<ChatMessage> {
    let row = sqlx::query_as::<_, ChatMessageRow>(&format!(
        "INSERT INTO chat_messages (id, webinar_id, registration_id, message)
         VALUES ($1, $2, $3, $4)
         RETURNING {CHAT_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(webinar_id)
    .bind(registration_id)
    .bind(message)
    .fetch_one(pool)
    .await
    .context("failed to insert chat message")?;

    Ok(row.into())
}

pub(super) async fn list_messages_pg(
    pool: &PgPool,
    webinar_id: Uuid,
    include_hidden: bool,
) -> Result<Vec<ChatMessage>> {
    let rows = sqlx::query_as::<_, ChatMessageRow>(&format!(
        "SELECT {CHAT_COLUMNS} FROM chat_messages
         WHERE webinar_id = $1 AND (is_hidden = FALSE OR $2)
         ORDER BY created_at ASC"
    ))
    .bind(webinar_id)
    .bind(include_hidden)
    .fetch_all(pool)
    .await
    .context("failed to list chat messages")?;

    Ok(rows.into_iter().map(ChatMessage::from).collect())
}

pub(super) async fn set_pinned_pg(
    pool: &PgPool,
    webinar_id: Uuid,
    message_id: Uuid,
    pinned: bool,
) -> Result<Option<ChatMessage>> {
    let row = sqlx::query_as::<_, ChatMessageRow>(&format!(
        "UPDATE chat_messages SET is_pinned = $3
         WHERE webinar_id = $1 AND id = $2
         RETURNING {CHAT_COLUMNS}"
    ))
    .bind(webinar_id)
    .bind(message_id)
    .bind(pinned)
    .fetch_optional(pool)
    .await
    .context("failed to update chat pin flag")?;

    Ok(row.map(ChatMessage::from))
}

pub(super) async fn set_hidden_pg(
    pool: &PgPool,
    webinar_id: Uuid,
    message_id: Uuid,
    hidden: bool,
) -> Result<Option<ChatMessage>> {
    let row = sqlx::query_as::<_, ChatMessageRow>(&format!(
        "UPDATE chat_messages SET is_hidden = $3
         WHERE webinar_id = $1 AND id = $2
         RETURNING {CHAT_COLUMNS}"
    ))
    .bind(webinar_id)
    .bind(message_id)
    .bind(hidden)
    .fetch_optional(pool)
    .await
    .context("failed to update chat hidden flag")?;

    Ok(row.map(ChatMessage::from))
}

pub(super) async fn delete_message_pg(
    pool: &PgPool,
    webinar_id: Uuid,
    message_id: Uuid,
) -> Result<Option<ChatMessage>> {
    let row = sqlx::query_as::<_, ChatMessageRow>(&format!(
        "DELETE FROM chat_messages
         WHERE webinar_id = $1 AND id = $2
         RETURNING {CHAT_COLUMNS}"
    ))
    .bind(webinar_id)
    .bind(message_id)
    .fetch_optional(pool)
    .await
    .context("failed to delete chat message")?;

    Ok(row.map(ChatMessage::from))
}

// ── Memory ───────────────────────────────────────────────────────────────────

pub(super) fn create_message_mem(
    state: &mut MemoryState,
    webinar_id: Uuid,
    registration_id: Uuid,
    message: String,
) -> ChatMessage {
    let record = ChatMessage {
        id: Uuid::new_v4(),
        webinar_id,
        registration_id,
        message,
        is_pinned: false,
        is_hidden: false,
        created_at: Utc::now(),
    };
    state.chat_messages.push(record.clone());
    record
}

pub(super) fn list_messages_mem(
    state: &MemoryState,
    webinar_id: Uuid,
    include_hidden: bool,
) -> Vec<ChatMessage> {
    let mut messages: Vec<ChatMessage> = state
        .chat_messages
        .iter()
        .filter(|message| message.webinar_id == webinar_id)
        .filter(|message| include_hidden || !message.is_hidden)
        .cloned()
        .collect();
    messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    messages
}

pub(super) fn set_pinned_mem(
    state: &mut MemoryState,
    webinar_id: Uuid,
    message_id: Uuid,
    pinned: bool,
) -> Option<ChatMessage> {
    let message = state
        .chat_messages
        .iter_mut()
        .find(|message| message.webinar_id == webinar_id && message.id == message_id)?;
    message.is_pinned = pinned;
    Some(message.clone())
}

pub(super) fn set_hidden_mem(
    state: &mut MemoryState,
    webinar_id: Uuid,
    message_id: Uuid,
    hidden: bool,
) -> Option<ChatMessage> {
    let message = state
        .chat_messages
        .iter_mut()
        .find(|message| message.webinar_id == webinar_id && message.id == message_id)?;
    message.is_hidden = hidden;
    Some(message.clone())
}

pub(super) fn delete_message_mem(
    state: &mut MemoryState,
    webinar_id: Uuid,
    message_id: Uuid,
) -> Option<ChatMessage> {
    let index = state
        .chat_messages
        .iter()
        .position(|message| message.webinar_id == webinar_id && message.id == message_id)?;
    Some(state.chat_messages.remove(index))
}
