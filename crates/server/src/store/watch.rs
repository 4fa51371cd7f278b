use anyhow::{Context, Result};
use chrono::Utc;
use greenroom_common::types::{newly_crossed, percent_watched, WatchSession};
use sqlx::PgPool;
use uuid::Uuid;

use super::MemoryState;

const WATCH_COLUMNS: &str = "id, webinar_id, registration_id, started_at, ended_at, \
     last_position_seconds, duration_seconds, milestones_hit";

/// Result of a progress report. `newly_hit` only ever contains milestones
/// this session had not claimed before; the claim is atomic with the
/// position update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressOutcome {
    pub session: WatchSession,
    pub percent: u8,
    pub newly_hit: Vec<u8>,
}

#[derive(sqlx::FromRow)]
struct WatchSessionRow {
    id: Uuid,
    webinar_id: Uuid,
    registration_id: Uuid,
    started_at: chrono::DateTime<Utc>,
    ended_at: Option<chrono::DateTime<Utc>>,
    last_position_seconds: i32,
    duration_seconds: i32,
    milestones_hit: Vec<i32>,
}

impl From<WatchSessionRow> for WatchSession {
    fn from(row: WatchSessionRow) -> Self {
        Self {
            id: row.id,
            webinar_id: row.webinar_id,
            registration_id: row.registration_id,
            started_at: row.started_at,
            ended_at: row.ended_at,
            last_position_seconds: row.last_position_seconds,
            duration_seconds: row.duration_seconds,
            milestones_hit: row.milestones_hit,
        }
    }
}

// ── Postgres ─────────────────────────────────────────────────────────────────

pub(super) async fn create_session_pg(
    pool: &PgPool,
    webinar_id: Uuid,
    registration_id: Uuid,
    duration_seconds: i32,
) -> Result<WatchSession> {
    let row = sqlx::query_as::<_, WatchSessionRow>(&format!(
        "INSERT INTO watch_sessions (id, webinar_id, registration_id, duration_seconds)
         VALUES ($1, $2, $3, $4)
         RETURNING {WATCH_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(webinar_id)
    .bind(registration_id)
    .bind(duration_seconds)
    .fetch_one(pool)
    .await
    .context("failed to insert watch session")?;

    Ok(row.into())
}

pub(super) async fn record_progress_pg(
    pool: &PgPool,
    webinar_id: Uuid,
    session_id: Uuid,
    registration_id: Uuid,
    position_seconds: i32,
) -> Result<Option<ProgressOutcome>> {
    let mut tx = pool.begin().await.context("failed to begin progress transaction")?;

    // Lock the session row so concurrent progress reports cannot both claim
    // the same milestone.
    let row = sqlx::query_as::<_, WatchSessionRow>(&format!(
        "SELECT {WATCH_COLUMNS} FROM watch_sessions
         WHERE id = $1 AND webinar_id = $2 AND registration_id = $3 AND ended_at IS NULL
         FOR UPDATE"
    ))
    .bind(session_id)
    .bind(webinar_id)
    .bind(registration_id)
    .fetch_optional(&mut *tx)
    .await
    .context("failed to lock watch session")?;

    let Some(row) = row else {
        return Ok(None);
    };

    let session: WatchSession = row.into();
    let (advanced, percent, newly_hit) = advance(&session, position_seconds);

    let newly_hit_i32: Vec<i32> = newly_hit.iter().map(|milestone| i32::from(*milestone)).collect();
    let updated_row = sqlx::query_as::<_, WatchSessionRow>(&format!(
        "UPDATE watch_sessions
         SET last_position_seconds = $2, milestones_hit = milestones_hit || $3
         WHERE id = $1
         RETURNING {WATCH_COLUMNS}"
    ))
    .bind(session_id)
    .bind(advanced)
    .bind(&newly_hit_i32)
    .fetch_one(&mut *tx)
    .await
    .context("failed to update watch session")?;

    tx.commit().await.context("failed to commit progress transaction")?;

    Ok(Some(ProgressOutcome { session: updated_row.into(), percent, newly_hit }))
}

pub(super) async fn end_session_pg(
    pool: &PgPool,
    webinar_id: Uuid,
    session_id: Uuid,
    registration_id: Uuid,
) -> Result<Option<WatchSession>> {
    let row = sqlx::query_as::<_, WatchSessionRow>(&format!(
        "UPDATE watch_sessions SET ended_at = now()
         WHERE id = $1 AND webinar_id = $2 AND registration_id = $3 AND ended_at IS NULL
         RETURNING {WATCH_COLUMNS}"
    ))
    .bind(session_id)
    .bind(webinar_id)
    .bind(registration_id)
    .fetch_optional(pool)
    .await
    .context("failed to end watch session")?;

    Ok(row.map(WatchSession::from))
}

pub(super) async fn list_sessions_pg(pool: &PgPool, webinar_id: Uuid) -> Result<Vec<WatchSession>> {
    let rows = sqlx::query_as::<_, WatchSessionRow>(&format!(
        "SELECT {WATCH_COLUMNS} FROM watch_sessions
         WHERE webinar_id = $1
         ORDER BY started_at ASC"
    ))
    .bind(webinar_id)
    .fetch_all(pool)
    .await
    .context("failed to list watch sessions")?;

    Ok(rows.into_iter().map(WatchSession::from).collect())
}

// ── Memory ───────────────────────────────────────────────────────────────────

pub(super) fn create_session_mem(
    state: &mut MemoryState,
    webinar_id: Uuid,
    registration_id: Uuid,
    duration_seconds: i32,
) -> WatchSession {
    let record = WatchSession {
        id: Uuid::new_v4(),
        webinar_id,
        registration_id,
        started_at: Utc::now(),
        ended_at: None,
        last_position_seconds: 0,
        duration_seconds,
        milestones_hit: Vec::new(),
    };
    state.watch_sessions.push(record.clone());
    record
}

pub(super) fn record_progress_mem(
    state: &mut MemoryState,
    webinar_id: Uuid,
    session_id: Uuid,
    registration_id: Uuid,
    position_seconds: i32,
) -> Option<ProgressOutcome> {
    let session = state.watch_sessions.iter_mut().find(|session| {
        session.id == session_id
            && session.webinar_id == webinar_id
            && session.registration_id == registration_id
            && session.ended_at.is_none()
    })?;

    let (advanced, percent, newly_hit) = advance(session, position_seconds);
    session.last_position_seconds = advanced;
    session.milestones_hit.extend(newly_hit.iter().map(|milestone| i32::from(*milestone)));

    Some(ProgressOutcome { session: session.clone(), percent, newly_hit })
}

pub(super) fn end_session_mem(
    state: &mut MemoryState,
    webinar_id: Uuid,
    session_id: Uuid,
    registration_id: Uuid,
) -> Option<WatchSession> {
    let session = state.watch_sessions.iter_mut().find(|session| {
        session.id == session_id
            && session.webinar_id == webinar_id
            && session.registration_id == registration_id
            && session.ended_at.is_none()
    })?;
    session.ended_at = Some(Utc::now());
    Some(session.clone())
}

pub(super) fn list_sessions_mem(state: &MemoryState, webinar_id: Uuid) -> Vec<WatchSession> {
    let mut sessions: Vec<WatchSession> = state
        .watch_sessions
        .iter()
        .filter(|session| session.webinar_id == webinar_id)
        .cloned()
        .collect();
    sessions.sort_by(|a, b| a.started_at.cmp(&b.started_at));
    sessions
}

/// Position never moves backwards; milestones derive from the furthest
/// position seen.
fn advance(session: &WatchSession, position_seconds: i32) -> (i32, u8, Vec<u8>) {
    let advanced = session.last_position_seconds.max(position_seconds.max(0));
    let percent = percent_watched(advanced, session.duration_seconds);
    let newly_hit = newly_crossed(percent, &session.milestones_hit);
    (advanced, percent, newly_hit)
}

#[cfg(test)]
mod tests {
    use crate::store::EventStore;
    use uuid::Uuid;

    #[tokio::test]
    async fn crossing_several_milestones_in_one_report_claims_them_all() {
        let store = EventStore::memory();
        let webinar_id = Uuid::new_v4();
        let registrant = Uuid::new_v4();
        let session = store
            .create_watch_session(webinar_id, registrant, 2400)
            .await
            .expect("create should succeed");

        // 10 minutes of a 40-minute webinar: 25%.
        let outcome = store
            .record_watch_progress(webinar_id, session.id, registrant, 600)
            .await
            .expect("progress should succeed")
            .expect("session should exist");
        assert_eq!(outcome.percent, 25);
        assert_eq!(outcome.newly_hit, vec![25]);

        // Jump to 30 minutes: 75%, claiming 50 and 75 together.
        let outcome = store
            .record_watch_progress(webinar_id, session.id, registrant, 1800)
            .await
            .expect("progress should succeed")
            .expect("session should exist");
        assert_eq!(outcome.percent, 75);
        assert_eq!(outcome.newly_hit, vec![50, 75]);
        assert_eq!(outcome.session.milestones_hit, vec![25, 50, 75]);
    }

    #[tokio::test]
    async fn milestones_claim_only_once() {
        let store = EventStore::memory();
        let webinar_id = Uuid::new_v4();
        let registrant = Uuid::new_v4();
        let session = store
            .create_watch_session(webinar_id, registrant, 100)
            .await
            .expect("create should succeed");

        store
            .record_watch_progress(webinar_id, session.id, registrant, 30)
            .await
            .expect("progress should succeed");
        let outcome = store
            .record_watch_progress(webinar_id, session.id, registrant, 35)
            .await
            .expect("progress should succeed")
            .expect("session should exist");
        assert!(outcome.newly_hit.is_empty());
    }

    #[tokio::test]
    async fn position_never_moves_backwards() {
        let store = EventStore::memory();
        let webinar_id = Uuid::new_v4();
        let registrant = Uuid::new_v4();
        let session = store
            .create_watch_session(webinar_id, registrant, 100)
            .await
            .expect("create should succeed");

        store
            .record_watch_progress(webinar_id, session.id, registrant, 60)
            .await
            .expect("progress should succeed");
        let outcome = store
            .record_watch_progress(webinar_id, session.id, registrant, 10)
            .await
            .expect("progress should succeed")
            .expect("session should exist");
        assert_eq!(outcome.session.last_position_seconds, 60);
        assert_eq!(outcome.percent, 60);
    }

    #[tokio::test]
    async fn ended_sessions_reject_further_progress() {
        let store = EventStore::memory();
        let webinar_id = Uuid::new_v4();
        let registrant = Uuid::new_v4();
        let session = store
            .create_watch_session(webinar_id, registrant, 100)
            .await
            .expect("create should succeed");

        let ended = store
            .end_watch_session(webinar_id, session.id, registrant)
            .await
            .expect("end should succeed")
            .expect("session should exist");
        assert!(ended.ended_at.is_some());

        let outcome = store
            .record_watch_progress(webinar_id, session.id, registrant, 50)
            .await
            .expect("progress should succeed");
        assert!(outcome.is_none());

        // Ending twice is a miss, not an error.
        let again = store
            .end_watch_session(webinar_id, session.id, registrant)
            .await
            .expect("end should succeed");
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn sessions_are_scoped_to_their_registrant() {
        let store = EventStore::memory();
        let webinar_id = Uuid::new_v4();
        let owner = Uuid::new_v4();
        let session = store
            .create_watch_session(webinar_id, owner, 100)
            .await
            .expect("create should succeed");

        let outcome = store
            .record_watch_progress(webinar_id, session.id, Uuid::new_v4(), 50)
            .await
            .expect("progress should succeed");
        assert!(outcome.is_none());
    }
}
