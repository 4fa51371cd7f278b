use std::collections::HashSet;

use anyhow::{Context, Result};
use chrono::Utc;
use greenroom_common::types::{QaQuestion, QaStatus};
use sqlx::PgPool;
use uuid::Uuid;

use super::MemoryState;

const QA_COLUMNS: &str = "id, webinar_id, registration_id, question, answer, status, \
     is_highlighted, is_hidden, upvote_count, created_at";

/// Result of an upvote attempt. Both arms carry the current question row so
/// the caller can broadcast fresh counts either way.
#[derive(Debug, Clone)]
pub enum UpvoteOutcome {
    Added(QaQuestion),
    AlreadyUpvoted(QaQuestion),
}

#[derive(Debug, Clone)]
pub enum RemoveUpvoteOutcome {
    Removed(QaQuestion),
    NotUpvoted(QaQuestion),
}

#[derive(sqlx::FromRow)]
struct QaQuestionRow {
    id: Uuid,
    webinar_id: Uuid,
    registration_id: Uuid,
    question: String,
    answer: Option<String>,
    status: String,
    is_highlighted: bool,
    is_hidden: bool,
    upvote_count: i32,
    created_at: chrono::DateTime<Utc>,
}

impl TryFrom<QaQuestionRow> for QaQuestion {
    type Error = anyhow::Error;

    fn try_from(row: QaQuestionRow) -> Result<Self> {
        let status = QaStatus::from_db_value(&row.status)
            .with_context(|| format!("unknown question status '{}'", row.status))?;

        Ok(Self {
            id: row.id,
            webinar_id: row.webinar_id,
            registration_id: row.registration_id,
            question: row.question,
            answer: row.answer,
            status,
            is_highlighted: row.is_highlighted,
            is_hidden: row.is_hidden,
            upvote_count: row.upvote_count,
            created_at: row.created_at,
        })
    }
}

// ── Postgres ─────────────────────────────────────────────────────────────────

pub(super) async fn create_question_pg(
    pool: &PgPool,
    webinar_id: Uuid,
    registration_id: Uuid,
    question: String,
) -> Result<QaQuestion> {
    let row = sqlx::query_as::<_, QaQuestionRow>(&format!(
        "INSERT INTO qa_questions (id, webinar_id, registration_id, question)
         VALUES ($1, $2, $3, $4)
         RETURNING {QA_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(webinar_id)
    .bind(registration_id)
    .bind(question)
    .fetch_one(pool)
    .await
    .context("failed to insert question")?;

    row.try_into()
}

pub(super) async fn list_questions_pg(
    pool: &PgPool,
    webinar_id: Uuid,
    include_hidden: bool,
) -> Result<Vec<QaQuestion>> {
    let rows = sqlx::query_as::<_, QaQuestionRow>(&format!(
        "SELECT {QA_COLUMNS} FROM qa_questions
         WHERE webinar_id = $1 AND (is_hidden = FALSE OR $2)
         ORDER BY upvote_count DESC, created_at ASC"
    ))
    .bind(webinar_id)
    .bind(include_hidden)
    .fetch_all(pool)
    .await
    .context("failed to list questions")?;

    rows.into_iter().map(QaQuestion::try_from).collect()
}

pub(super) async fn upvoted_ids_pg(
    pool: &PgPool,
    webinar_id: Uuid,
    registration_id: Uuid,
) -> Result<HashSet<Uuid>> {
    let ids = sqlx::query_scalar::<_, Uuid>(
        "SELECT u.question_id FROM qa_upvotes u
         JOIN qa_questions q ON q.id = u.question_id
         WHERE q.webinar_id = $1 AND u.registration_id = $2",
    )
    .bind(webinar_id)
    .bind(registration_id)
    .fetch_all(pool)
    .await
    .context("failed to list upvoted question ids")?;

    Ok(ids.into_iter().collect())
}

pub(super) async fn upvote_pg(
    pool: &PgPool,
    webinar_id: Uuid,
    question_id: Uuid,
    registration_id: Uuid,
) -> Result<Option<UpvoteOutcome>> {
    let mut tx = pool.begin().await.context("failed to begin upvote transaction")?;

    let exists = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM qa_questions WHERE webinar_id = $1 AND id = $2",
    )
    .bind(webinar_id)
    .bind(question_id)
    .fetch_one(&mut *tx)
    .await
    .context("failed to check question existence")?;
    if exists == 0 {
        return Ok(None);
    }

    let inserted = sqlx::query(
        "INSERT INTO qa_upvotes (question_id, registration_id)
         VALUES ($1, $2)
         ON CONFLICT (question_id, registration_id) DO NOTHING",
    )
    .bind(question_id)
    .bind(registration_id)
    .execute(&mut *tx)
    .await
    .context("failed to insert upvote")?
    .rows_affected();

    let row = if inserted > 0 {
        sqlx::query_as::<_, QaQuestionRow>(&format!(
            "UPDATE qa_questions SET upvote_count = upvote_count + 1
             WHERE id = $1
             RETURNING {QA_COLUMNS}"
        ))
        .bind(question_id)
        .fetch_one(&mut *tx)
        .await
        .context("failed to bump upvote count")?
    } else {
        sqlx::query_as::<_, QaQuestionRow>(&format!(
            "SELECT {QA_COLUMNS} FROM qa_questions WHERE id = $1"
        ))
        .bind(question_id)
        .fetch_one(&mut *tx)
        .await
        .context("failed to reload question")?
    };

    tx.commit().await.context("failed to commit upvote transaction")?;

    let question: QaQuestion = row.try_into()?;
    Ok(Some(if inserted > 0 {
        UpvoteOutcome::Added(question)
    } else {
        UpvoteOutcome::AlreadyUpvoted(question)
    }))
}

pub(super) async fn remove_upvote_pg(
    pool: &PgPool,
    webinar_id: Uuid,
    question_id: Uuid,
    registration_id: Uuid,
) -> Result<Option<RemoveUpvoteOutcome>> {
    let mut tx = pool.begin().await.context("failed to begin unvote transaction")?;

    let exists = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM qa_questions WHERE webinar_id = $1 AND id = $2",
    )
    .bind(webinar_id)
    .bind(question_id)
    .fetch_one(&mut *tx)
    .await
    .context("failed to check question existence")?;
    if exists == 0 {
        return Ok(None);
    }

    let removed = sqlx::query(
        "DELETE FROM qa_upvotes WHERE question_id = $1 AND registration_id = $2",
    )
    .bind(question_id)
    .bind(registration_id)
    .execute(&mut *tx)
    .await
    .context("failed to delete upvote")?
    .rows_affected();

    let row = if removed > 0 {
        sqlx::query_as::<_, QaQuestionRow>(&format!(
            "UPDATE qa_questions SET upvote_count = GREATEST(upvote_count - 1, 0)
             WHERE id = $1
             RETURNING {QA_COLUMNS}"
        ))
        .bind(question_id)
        .fetch_one(&mut *tx)
        .await
        .context("failed to lower upvote count")?
    } else {
        sqlx::query_as::<_, QaQuestionRow>(&format!(
            "SELECT {QA_COLUMNS} FROM qa_questions WHERE id = $1"
        ))
        .bind(question_id)
        .fetch_one(&mut *tx)
        .await
        .context("failed to reload question")?
    };

    tx.commit().await.context("failed to commit unvote transaction")?;

    let question: QaQuestion = row.try_into()?;
    Ok(Some(if removed > 0 {
        RemoveUpvoteOutcome::Removed(question)
    } else {
        RemoveUpvoteOutcome::NotUpvoted(question)
    }))
}

pub(super) async fn answer_question_pg(
    pool: &PgPool,
    webinar_id: Uuid,
    question_id: Uuid,
    answer: String,
) -> Result<Option<QaQuestion>> {
    let row = sqlx::query_as::<_, QaQuestionRow>(&format!(
        "UPDATE qa_questions SET answer = $3, status = 'answered'
         WHERE webinar_id = $1 AND id = $2
         RETURNING {QA_COLUMNS}"
    ))
    .bind(webinar_id)
    .bind(question_id)
    .bind(answer)
    .fetch_optional(pool)
    .await
    .context("failed to answer question")?;

    row.map(QaQuestion::try_from).transpose()
}

pub(super) async fn set_highlighted_pg(
    pool: &PgPool,
    webinar_id: Uuid,
    question_id: Uuid,
    highlighted: bool,
) -> Result<Option<QaQuestion>> {
    let row = sqlx::query_as::<_, QaQuestionRow>(&format!(
        "UPDATE qa_questions SET is_highlighted = $3
         WHERE webinar_id = $1 AND id = $2
         RETURNING {QA_COLUMNS}"
    ))
    .bind(webinar_id)
    .bind(question_id)
    .bind(highlighted)
    .fetch_optional(pool)
    .await
    .context("failed to update highlight flag")?;

    row.map(QaQuestion::try_from).transpose()
}

pub(super) async fn set_question_hidden_pg(
    pool: &PgPool,
    webinar_id: Uuid,
    question_id: Uuid,
    hidden: bool,
) -> Result<Option<QaQuestion>> {
    let row = sqlx::query_as::<_, QaQuestionRow>(&format!(
        "UPDATE qa_questions SET is_hidden = $3
         WHERE webinar_id = $1 AND id = $2
         RETURNING {QA_COLUMNS}"
    ))
    .bind(webinar_id)
    .bind(question_id)
    .bind(hidden)
    .fetch_optional(pool)
    .await
    .context("failed to update hidden flag")?;

    row.map(QaQuestion::try_from).transpose()
}

pub(super) async fn recount_upvotes_pg(pool: &PgPool, webinar_id: Uuid) -> Result<Vec<QaQuestion>> {
    let rows = sqlx::query_as::<_, QaQuestionRow>(&format!(
        "UPDATE qa_questions q
         SET upvote_count = derived.count
         FROM (
             SELECT q2.id, COUNT(u.registration_id)::int AS count
             FROM qa_questions q2
             LEFT JOIN qa_upvotes u ON u.question_id = q2.id
             WHERE q2.webinar_id = $1
             GROUP BY q2.id
         ) AS derived
         WHERE q.id = derived.id AND q.upvote_count <> derived.count
         RETURNING q.{QA_COLUMNS}"
    ))
    .bind(webinar_id)
    .fetch_all(pool)
    .await
    .context("failed to recount upvotes")?;

    rows.into_iter().map(QaQuestion::try_from).collect()
}

// ── Memory ───────────────────────────────────────────────────────────────────

pub(super) fn create_question_mem(
    state: &mut MemoryState,
    webinar_id: Uuid,
    registration_id: Uuid,
    question: String,
) -> QaQuestion {
    let record = QaQuestion {
        id: Uuid::new_v4(),
        webinar_id,
        registration_id,
        question,
        answer: None,
        status: QaStatus::Open,
        is_highlighted: false,
        is_hidden: false,
        upvote_count: 0,
        created_at: Utc::now(),
    };
    state.qa_questions.push(record.clone());
    record
}

pub(super) fn list_questions_mem(
    state: &MemoryState,
    webinar_id: Uuid,
    include_hidden: bool,
) -> Vec<QaQuestion> {
    let mut questions: Vec<QaQuestion> = state
        .qa_questions
        .iter()
        .filter(|question| question.webinar_id == webinar_id)
        .filter(|question| include_hidden || !question.is_hidden)
        .cloned()
        .collect();
    questions.sort_by(|a, b| {
        b.upvote_count.cmp(&a.upvote_count).then(a.created_at.cmp(&b.created_at))
    });
    questions
}

pub(super) fn upvoted_ids_mem(
    state: &MemoryState,
    webinar_id: Uuid,
    registration_id: Uuid,
) -> HashSet<Uuid> {
    state
        .qa_upvotes
        .iter()
        .filter(|(question_id, voter)| {
            *voter == registration_id
                && state
                    .qa_questions
                    .iter()
                    .any(|question| question.id == *question_id && question.webinar_id == webinar_id)
        })
        .map(|(question_id, _)| *question_id)
        .collect()
}

fn find_question_mut<'a>(
    state: &'a mut MemoryState,
    webinar_id: Uuid,
    question_id: Uuid,
) -> Option<&'a mut QaQuestion> {
    state
        .qa_questions
        .iter_mut()
        .find(|question| question.webinar_id == webinar_id && question.id == question_id)
}

pub(super) fn upvote_mem(
    state: &mut MemoryState,
    webinar_id: Uuid,
    question_id: Uuid,
    registration_id: Uuid,
) -> Option<UpvoteOutcome> {
    if find_question_mut(state, webinar_id, question_id).is_none() {
        return None;
    }

    let inserted = state.qa_upvotes.insert((question_id, registration_id));
    let question = find_question_mut(state, webinar_id, question_id)?;
    if inserted {
        question.upvote_count += 1;
        Some(UpvoteOutcome::Added(question.clone()))
    } else {
        Some(UpvoteOutcome::AlreadyUpvoted(question.clone()))
    }
}

pub(super) fn remove_upvote_mem(
    state: &mut MemoryState,
    webinar_id: Uuid,
    question_id: Uuid,
    registration_id: Uuid,
) -> Option<RemoveUpvoteOutcome> {
    if find_question_mut(state, webinar_id, question_id).is_none() {
        return None;
    }

    let removed = state.qa_upvotes.remove(&(question_id, registration_id));
    let question = find_question_mut(state, webinar_id, question_id)?;
    if removed {
        question.upvote_count = (question.upvote_count - 1).max(0);
        Some(RemoveUpvoteOutcome::Removed(question.clone()))
    } else {
        Some(RemoveUpvoteOutcome::NotUpvoted(question.clone()))
    }
}

pub(super) fn answer_question_mem(
    state: &mut MemoryState,
    webinar_id: Uuid,
    question_id: Uuid,
    answer: String,
) -> Option<QaQuestion> {
    let question = find_question_mut(state, webinar_id, question_id)?;
    question.answer = Some(answer);
    question.status = QaStatus::Answered;
    Some(question.clone())
}

pub(super) fn set_highlighted_mem(
    state: &mut MemoryState,
    webinar_id: Uuid,
    question_id: Uuid,
    highlighted: bool,
) -> Option<QaQuestion> {
    let question = find_question_mut(state, webinar_id, question_id)?;
    question.is_highlighted = highlighted;
    Some(question.clone())
}

pub(super) fn set_question_hidden_mem(
    state: &mut MemoryState,
    webinar_id: Uuid,
    question_id: Uuid,
    hidden: bool,
) -> Option<QaQuestion> {
    let question = find_question_mut(state, webinar_id, question_id)?;
    question.is_hidden = hidden;
    Some(question.clone())
}

pub(super) fn recount_upvotes_mem(state: &mut MemoryState, webinar_id: Uuid) -> Vec<QaQuestion> {
    let counts: Vec<(Uuid, i32)> = state
        .qa_questions
        .iter()
        .filter(|question| question.webinar_id == webinar_id)
        .map(|question| {
            let count = state
                .qa_upvotes
                .iter()
                .filter(|(question_id, _)| *question_id == question.id)
                .count() as i32;
            (question.id, count)
        })
        .collect();

    let mut changed = Vec::new();
    for (question_id, count) in counts {
        if let Some(question) = find_question_mut(state, webinar_id, question_id) {
            if question.upvote_count != count {
                question.upvote_count = count;
                changed.push(question.clone());
            }
        }
    }
    changed
}
