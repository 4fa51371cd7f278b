use anyhow::{Context, Result};
use chrono::Utc;
use greenroom_common::types::Reaction;
use sqlx::PgPool;
use uuid::Uuid;

use super::MemoryState;

// ── Postgres ─────────────────────────────────────────────────────────────────

pub(super) async fn create_reaction_pg(
    pool: &PgPool,
    webinar_id: Uuid,
    registration_id: Uuid,
    emoji: String,
) -> Result<Reaction> {
    let row = sqlx::query_as::<_, (Uuid, Uuid, Uuid, String, chrono::DateTime<Utc>)>(
        "INSERT INTO reactions (id, webinar_id, registration_id, emoji)
         VALUES ($1, $2, $3, $4)
         RETURNING id, webinar_id, registration_id, emoji, created_at",
    )
    .bind(Uuid::new_v4())
    .bind(webinar_id)
    .bind(registration_id)
    .bind(emoji)
    .fetch_one(pool)
    .await
    .context("failed to insert reaction")?;

    Ok(Reaction {
        id: row.0,
        webinar_id: row.1,
        registration_id: row.2,
        emoji: row.3,
        created_at: row.4,
    })
}

pub(super) async fn reaction_counts_pg(
    pool: &PgPool,
    webinar_id: Uuid,
) -> Result<Vec<(String, i64)>> {
    sqlx::query_as::<_, (String, i64)>(
        "SELECT emoji, COUNT(*) FROM reactions
         WHERE webinar_id = $1
         GROUP BY emoji
         ORDER BY COUNT(*) DESC, emoji ASC",
    )
    .bind(webinar_id)
    .fetch_all(pool)
    .await
    .context("failed to count reactions")
}

// ── Memory ───────────────────────────────────────────────────────────────────

pub(super) fn create_reaction_mem(
    state: &mut MemoryState,
    webinar_id: Uuid,
    registration_id: Uuid,
    emoji: String,
) -> Reaction {
    let record = Reaction {
        id: Uuid::new_v4(),
        webinar_id,
        registration_id,
        emoji,
        created_at: Utc::now(),
    };
    state.reactions.push(record.clone());
    record
}

pub(super) fn reaction_counts_mem(state: &MemoryState, webinar_id: Uuid) -> Vec<(String, i64)> {
    let mut counts: std::collections::HashMap<String, i64> = std::collections::HashMap::new();
    for reaction in state.reactions.iter().filter(|reaction| reaction.webinar_id == webinar_id) {
        *counts.entry(reaction.emoji.clone()).or_insert(0) += 1;
    }

    let mut sorted: Vec<(String, i64)> = counts.into_iter().collect();
    sorted.sort_by(|(emoji_a, count_a), (emoji_b, count_b)| {
        count_b.cmp(count_a).then(emoji_a.cmp(emoji_b))
    });
    sorted
}
