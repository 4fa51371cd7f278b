use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::Utc;
use greenroom_common::types::{EngagementEvent, EngagementKind};
use sqlx::PgPool;
use uuid::Uuid;

use super::MemoryState;

#[derive(sqlx::FromRow)]
struct EngagementEventRow {
    id: Uuid,
    webinar_id: Uuid,
    registration_id: Uuid,
    kind: String,
    payload: serde_json::Value,
    points_awarded: i32,
    created_at: chrono::DateTime<Utc>,
}

impl TryFrom<EngagementEventRow> for EngagementEvent {
    type Error = anyhow::Error;

    fn try_from(row: EngagementEventRow) -> Result<Self> {
        let kind = EngagementKind::from_db_value(&row.kind)
            .with_context(|| format!("unknown engagement kind '{}'", row.kind))?;

        Ok(Self {
            id: row.id,
            webinar_id: row.webinar_id,
            registration_id: row.registration_id,
            kind,
            payload: row.payload,
            points_awarded: row.points_awarded,
            created_at: row.created_at,
        })
    }
}

// ── Postgres ─────────────────────────────────────────────────────────────────

pub(super) async fn record_event_pg(
    pool: &PgPool,
    webinar_id: Uuid,
    registration_id: Uuid,
    kind: EngagementKind,
    payload: serde_json::Value,
    points_awarded: i32,
) -> Result<EngagementEvent> {
    let row = sqlx::query_as::<_, EngagementEventRow>(
        "INSERT INTO engagement_events (id, webinar_id, registration_id, kind, payload, points_awarded)
         VALUES ($1, $2, $3, $4, $5, $6)
         RETURNING id, webinar_id, registration_id, kind, payload, points_awarded, created_at",
    )
    .bind(Uuid::new_v4())
    .bind(webinar_id)
    .bind(registration_id)
    .bind(kind.as_str())
    .bind(payload)
    .bind(points_awarded)
    .fetch_one(pool)
    .await
    .context("failed to insert engagement event")?;

    row.try_into()
}

pub(super) async fn list_events_pg(pool: &PgPool, webinar_id: Uuid) -> Result<Vec<EngagementEvent>> {
    let rows = sqlx::query_as::<_, EngagementEventRow>(
        "SELECT id, webinar_id, registration_id, kind, payload, points_awarded, created_at
         FROM engagement_events
         WHERE webinar_id = $1
         ORDER BY created_at ASC",
    )
    .bind(webinar_id)
    .fetch_all(pool)
    .await
    .context("failed to list engagement events")?;

    rows.into_iter().map(EngagementEvent::try_from).collect()
}

pub(super) async fn weights_pg(
    pool: &PgPool,
    webinar_id: Uuid,
) -> Result<Option<HashMap<String, i32>>> {
    let weights = sqlx::query_scalar::<_, serde_json::Value>(
        "SELECT weights FROM engagement_configs WHERE webinar_id = $1",
    )
    .bind(webinar_id)
    .fetch_optional(pool)
    .await
    .context("failed to fetch engagement weights")?;

    weights
        .map(|value| serde_json::from_value(value).context("stored weights are malformed"))
        .transpose()
}

pub(super) async fn set_weights_pg(
    pool: &PgPool,
    webinar_id: Uuid,
    weights: HashMap<String, i32>,
) -> Result<()> {
    let weights = serde_json::to_value(weights).context("failed to encode weights")?;
    sqlx::query(
        "INSERT INTO engagement_configs (webinar_id, weights)
         VALUES ($1, $2)
         ON CONFLICT (webinar_id) DO UPDATE SET weights = EXCLUDED.weights, updated_at = now()",
    )
    .bind(webinar_id)
    .bind(weights)
    .execute(pool)
    .await
    .context("failed to store engagement weights")?;

    Ok(())
}

// ── Memory ───────────────────────────────────────────────────────────────────

pub(super) fn record_event_mem(
    state: &mut MemoryState,
    webinar_id: Uuid,
    registration_id: Uuid,
    kind: EngagementKind,
    payload: serde_json::Value,
    points_awarded: i32,
) -> EngagementEvent {
    let record = EngagementEvent {
        id: Uuid::new_v4(),
        webinar_id,
        registration_id,
        kind,
        payload,
        points_awarded,
        created_at: Utc::now(),
    };
    state.engagement_events.push(record.clone());
    record
}

pub(super) fn list_events_mem(state: &MemoryState, webinar_id: Uuid) -> Vec<EngagementEvent> {
    let mut events: Vec<EngagementEvent> = state
        .engagement_events
        .iter()
        .filter(|event| event.webinar_id == webinar_id)
        .cloned()
        .collect();
    events.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    events
}

pub(super) fn weights_mem(state: &MemoryState, webinar_id: Uuid) -> Option<HashMap<String, i32>> {
    state.engagement_configs.get(&webinar_id).cloned()
}

pub(super) fn set_weights_mem(
    state: &mut MemoryState,
    webinar_id: Uuid,
    weights: HashMap<String, i32>,
) {
    state.engagement_configs.insert(webinar_id, weights);
}
