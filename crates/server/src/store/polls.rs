use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::Utc;
use greenroom_common::types::{Poll, PollOption, PollResponse, PollStatus};
use sqlx::PgPool;
use uuid::Uuid;

use super::MemoryState;

const POLL_COLUMNS: &str = "id, webinar_id, question, options, allow_multiple, \
     show_results_live, status, activated_at, created_at";

/// A poll as submitted by a host, before it gets an id and a status.
#[derive(Debug, Clone)]
pub struct PollDraft {
    pub question: String,
    pub options: Vec<PollOption>,
    pub allow_multiple: bool,
    pub show_results_live: bool,
}

/// Activation closes any other active poll in the same webinar, atomically.
#[derive(Debug, Clone)]
pub struct PollActivation {
    pub activated: Poll,
    pub closed: Vec<Poll>,
}

#[derive(Debug, Clone)]
pub enum VoteOutcome {
    Recorded(PollResponse),
    AlreadyVoted,
}

/// Tallies derived from the response rows, never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollResults {
    pub counts: HashMap<String, i64>,
    pub respondents: i64,
}

#[derive(sqlx::FromRow)]
struct PollRow {
    id: Uuid,
    webinar_id: Uuid,
    question: String,
    options: serde_json::Value,
    allow_multiple: bool,
    show_results_live: bool,
    status: String,
    activated_at: Option<chrono::DateTime<Utc>>,
    created_at: chrono::DateTime<Utc>,
}

impl TryFrom<PollRow> for Poll {
    type Error = anyhow::Error;

    fn try_from(row: PollRow) -> Result<Self> {
        let status = PollStatus::from_db_value(&row.status)
            .with_context(|| format!("unknown poll status '{}'", row.status))?;
        let options: Vec<PollOption> = serde_json::from_value(row.options)
            .context("stored poll options are malformed")?;

        Ok(Self {
            id: row.id,
            webinar_id: row.webinar_id,
            question: row.question,
            options,
            allow_multiple: row.allow_multiple,
            show_results_live: row.show_results_live,
            status,
            activated_at: row.activated_at,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PollResponseRow {
    id: Uuid,
    poll_id: Uuid,
    registration_id: Uuid,
    selected_options: Vec<String>,
    created_at: chrono::DateTime<Utc>,
}

impl From<PollResponseRow> for PollResponse {
    fn from(row: PollResponseRow) -> Self {
        Self {
            id: row.id,
            poll_id: row.poll_id,
            registration_id: row.registration_id,
            selected_options: row.selected_options,
            created_at: row.created_at,
        }
    }
}

// ── Postgres ─────────────────────────────────────────────────────────────────

pub(super) async fn create_poll_pg(
    pool: &PgPool,
    webinar_id: Uuid,
    draft: PollDraft,
) -> Result<Poll> {
    let options = serde_json::to_value(&draft.options).context("failed to encode poll options")?;
    let row = sqlx::query_as::<_, PollRow>(&format!(
        "INSERT INTO polls (id, webinar_id, question, options, allow_multiple, show_results_live)
         VALUES ($1, $2, $3, $4, $5, $6)
         RETURNING {POLL_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(webinar_id)
    .bind(draft.question)
    .bind(options)
    .bind(draft.allow_multiple)
    .bind(draft.show_results_live)
    .fetch_one(pool)
    .await
    .context("failed to insert poll")?;

    row.try_into()
}

pub(super) async fn list_polls_pg(pool: &PgPool, webinar_id: Uuid) -> Result<Vec<Poll>> {
    let rows = sqlx::query_as::<_, PollRow>(&format!(
        "SELECT {POLL_COLUMNS} FROM polls WHERE webinar_id = $1 ORDER BY created_at ASC"
    ))
    .bind(webinar_id)
    .fetch_all(pool)
    .await
    .context("failed to list polls")?;

    rows.into_iter().map(Poll::try_from).collect()
}

pub(super) async fn get_poll_pg(
    pool: &PgPool,
    webinar_id: Uuid,
    poll_id: Uuid,
) -> Result<Option<Poll>> {
    let row = sqlx::query_as::<_, PollRow>(&format!(
        "SELECT {POLL_COLUMNS} FROM polls WHERE webinar_id = $1 AND id = $2"
    ))
    .bind(webinar_id)
    .bind(poll_id)
    .fetch_optional(pool)
    .await
    .context("failed to fetch poll")?;

    row.map(Poll::try_from).transpose()
}

pub(super) async fn activate_poll_pg(
    pool: &PgPool,
    webinar_id: Uuid,
    poll_id: Uuid,
) -> Result<Option<PollActivation>> {
    let mut tx = pool.begin().await.context("failed to begin activation transaction")?;

    let closed_rows = sqlx::query_as::<_, PollRow>(&format!(
        "UPDATE polls SET status = 'closed'
         WHERE webinar_id = $1 AND status = 'active' AND id <> $2
         RETURNING {POLL_COLUMNS}"
    ))
    .bind(webinar_id)
    .bind(poll_id)
    .fetch_all(&mut *tx)
    .await
    .context("failed to close other active polls")?;

    let activated_row = sqlx::query_as::<_, PollRow>(&format!(
        "UPDATE polls SET status = 'active', activated_at = now()
         WHERE webinar_id = $1 AND id = $2
         RETURNING {POLL_COLUMNS}"
    ))
    .bind(webinar_id)
    .bind(poll_id)
    .fetch_optional(&mut *tx)
    .await
    .context("failed to activate poll")?;

    let Some(activated_row) = activated_row else {
        return Ok(None);
    };

    tx.commit().await.context("failed to commit activation transaction")?;

    Ok(Some(PollActivation {
        activated: activated_row.try_into()?,
        closed: closed_rows.into_iter().map(Poll::try_from).collect::<Result<Vec<_>>>()?,
    }))
}

pub(super) async fn close_poll_pg(
    pool: &PgPool,
    webinar_id: Uuid,
    poll_id: Uuid,
) -> Result<Option<Poll>> {
    let row = sqlx::query_as::<_, PollRow>(&format!(
        "UPDATE polls SET status = 'closed'
         WHERE webinar_id = $1 AND id = $2
         RETURNING {POLL_COLUMNS}"
    ))
    .bind(webinar_id)
    .bind(poll_id)
    .fetch_optional(pool)
    .await
    .context("failed to close poll")?;

    row.map(Poll::try_from).transpose()
}

pub(super) async fn submit_response_pg(
    pool: &PgPool,
    webinar_id: Uuid,
    poll_id: Uuid,
    registration_id: Uuid,
    selected_options: Vec<String>,
) -> Result<Option<VoteOutcome>> {
    let exists = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM polls WHERE webinar_id = $1 AND id = $2",
    )
    .bind(webinar_id)
    .bind(poll_id)
    .fetch_one(pool)
    .await
    .context("failed to check poll existence")?;
    if exists == 0 {
        return Ok(None);
    }

    let row = sqlx::query_as::<_, PollResponseRow>(
        "INSERT INTO poll_responses (id, poll_id, registration_id, selected_options)
         VALUES ($1, $2, $3, $4)
         ON CONFLICT (poll_id, registration_id) DO NOTHING
         RETURNING id, poll_id, registration_id, selected_options, created_at",
    )
    .bind(Uuid::new_v4())
    .bind(poll_id)
    .bind(registration_id)
    .bind(&selected_options)
    .fetch_optional(pool)
    .await
    .context("failed to insert poll response")?;

    Ok(Some(match row {
        Some(row) => VoteOutcome::Recorded(row.into()),
        None => VoteOutcome::AlreadyVoted,
    }))
}

pub(super) async fn poll_results_pg(
    pool: &PgPool,
    webinar_id: Uuid,
    poll_id: Uuid,
) -> Result<Option<PollResults>> {
    let Some(poll) = get_poll_pg(pool, webinar_id, poll_id).await? else {
        return Ok(None);
    };

    let tallies = sqlx::query_as::<_, (String, i64)>(
        "SELECT option_id, COUNT(*) FROM poll_responses, unnest(selected_options) AS option_id
         WHERE poll_id = $1
         GROUP BY option_id",
    )
    .bind(poll_id)
    .fetch_all(pool)
    .await
    .context("failed to tally poll responses")?;

    let respondents = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM poll_responses WHERE poll_id = $1",
    )
    .bind(poll_id)
    .fetch_one(pool)
    .await
    .context("failed to count poll respondents")?;

    Ok(Some(results_for(&poll, tallies.into_iter().collect(), respondents)))
}

pub(super) async fn response_of_pg(
    pool: &PgPool,
    poll_id: Uuid,
    registration_id: Uuid,
) -> Result<Option<PollResponse>> {
    let row = sqlx::query_as::<_, PollResponseRow>(
        "SELECT id, poll_id, registration_id, selected_options, created_at
         FROM poll_responses WHERE poll_id = $1 AND registration_id = $2",
    )
    .bind(poll_id)
    .bind(registration_id)
    .fetch_optional(pool)
    .await
    .context("failed to fetch poll response")?;

    Ok(row.map(PollResponse::from))
}

// ── Memory ───────────────────────────────────────────────────────────────────

pub(super) fn create_poll_mem(state: &mut MemoryState, webinar_id: Uuid, draft: PollDraft) -> Poll {
    let record = Poll {
        id: Uuid::new_v4(),
        webinar_id,
        question: draft.question,
        options: draft.options,
        allow_multiple: draft.allow_multiple,
        show_results_live: draft.show_results_live,
        status: PollStatus::Draft,
        activated_at: None,
        created_at: Utc::now(),
    };
    state.polls.push(record.clone());
    record
}

pub(super) fn list_polls_mem(state: &MemoryState, webinar_id: Uuid) -> Vec<Poll> {
    let mut polls: Vec<Poll> =
        state.polls.iter().filter(|poll| poll.webinar_id == webinar_id).cloned().collect();
    polls.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    polls
}

pub(super) fn get_poll_mem(state: &MemoryState, webinar_id: Uuid, poll_id: Uuid) -> Option<Poll> {
    state
        .polls
        .iter()
        .find(|poll| poll.webinar_id == webinar_id && poll.id == poll_id)
        .cloned()
}

pub(super) fn activate_poll_mem(
    state: &mut MemoryState,
    webinar_id: Uuid,
    poll_id: Uuid,
) -> Option<PollActivation> {
    if !state.polls.iter().any(|poll| poll.webinar_id == webinar_id && poll.id == poll_id) {
        return None;
    }

    let mut closed = Vec::new();
    for poll in &mut state.polls {
        if poll.webinar_id == webinar_id && poll.id != poll_id && poll.status == PollStatus::Active
        {
            poll.status = PollStatus::Closed;
            closed.push(poll.clone());
        }
    }

    let poll = state
        .polls
        .iter_mut()
        .find(|poll| poll.webinar_id == webinar_id && poll.id == poll_id)?;
    poll.status = PollStatus::Active;
    poll.activated_at = Some(Utc::now());

    Some(PollActivation { activated: poll.clone(), closed })
}

pub(super) fn close_poll_mem(
    state: &mut MemoryState,
    webinar_id: Uuid,
    poll_id: Uuid,
) -> Option<Poll> {
    let poll = state
        .polls
        .iter_mut()
        .find(|poll| poll.webinar_id == webinar_id && poll.id == poll_id)?;
    poll.status = PollStatus::Closed;
    Some(poll.clone())
}

pub(super) fn submit_response_mem(
    state: &mut MemoryState,
    webinar_id: Uuid,
    poll_id: Uuid,
    registration_id: Uuid,
    selected_options: Vec<String>,
) -> Option<VoteOutcome> {
    if !state.polls.iter().any(|poll| poll.webinar_id == webinar_id && poll.id == poll_id) {
        return None;
    }

    let already = state
        .poll_responses
        .iter()
        .any(|response| response.poll_id == poll_id && response.registration_id == registration_id);
    if already {
        return Some(VoteOutcome::AlreadyVoted);
    }

    let record = PollResponse {
        id: Uuid::new_v4(),
        poll_id,
        registration_id,
        selected_options,
        created_at: Utc::now(),
    };
    state.poll_responses.push(record.clone());
    Some(VoteOutcome::Recorded(record))
}

pub(super) fn poll_results_mem(
    state: &MemoryState,
    webinar_id: Uuid,
    poll_id: Uuid,
) -> Option<PollResults> {
    let poll = get_poll_mem(state, webinar_id, poll_id)?;

    let mut counts: HashMap<String, i64> = HashMap::new();
    let mut respondents = 0;
    for response in state.poll_responses.iter().filter(|response| response.poll_id == poll_id) {
        respondents += 1;
        for option_id in &response.selected_options {
            *counts.entry(option_id.clone()).or_insert(0) += 1;
        }
    }

    Some(results_for(&poll, counts, respondents))
}

pub(super) fn response_of_mem(
    state: &MemoryState,
    poll_id: Uuid,
    registration_id: Uuid,
) -> Option<PollResponse> {
    state
        .poll_responses
        .iter()
        .find(|response| response.poll_id == poll_id && response.registration_id == registration_id)
        .cloned()
}

/// Normalizes tallies so every option of the poll appears, zero-filled.
fn results_for(poll: &Poll, mut counts: HashMap<String, i64>, respondents: i64) -> PollResults {
    let mut normalized = HashMap::new();
    for option in &poll.options {
        normalized
            .insert(option.option_id.clone(), counts.remove(&option.option_id).unwrap_or(0));
    }

    PollResults { counts: normalized, respondents }
}
