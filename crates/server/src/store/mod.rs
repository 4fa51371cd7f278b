// Durable engagement store. Every write surface (chat, Q&A, polls,
// reactions, watch tracking, the engagement ledger) goes through the
// `EventStore` enum: Postgres in production, an in-memory twin for tests and
// local development. Submodules hold the per-surface queries; this module
// holds the dispatch impls.

pub mod chat;
pub mod engagement;
pub mod polls;
pub mod qa;
pub mod reactions;
pub mod watch;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use greenroom_common::types::{
    ChatMessage, EngagementEvent, Poll, PollResponse, QaQuestion, Reaction, WatchSession,
};
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

pub use polls::{PollActivation, PollResults, VoteOutcome};
pub use qa::{RemoveUpvoteOutcome, UpvoteOutcome};
pub use watch::ProgressOutcome;

#[derive(Clone)]
pub enum EventStore {
    Postgres(PgPool),
    Memory(Arc<RwLock<MemoryState>>),
}

#[derive(Default)]
pub struct MemoryState {
    pub(crate) chat_messages: Vec<ChatMessage>,
    pub(crate) qa_questions: Vec<QaQuestion>,
    pub(crate) qa_upvotes: HashSet<(Uuid, Uuid)>,
    pub(crate) polls: Vec<Poll>,
    pub(crate) poll_responses: Vec<PollResponse>,
    pub(crate) reactions: Vec<Reaction>,
    pub(crate) watch_sessions: Vec<WatchSession>,
    pub(crate) engagement_events: Vec<EngagementEvent>,
    pub(crate) engagement_configs: HashMap<Uuid, HashMap<String, i32>>,
}

impl EventStore {
    pub fn memory() -> Self {
        Self::Memory(Arc::new(RwLock::new(MemoryState::default())))
    }

    // ── Chat ─────────────────────────────────────────────────────────────────

    pub async fn create_chat_message(
        &self,
        webinar_id: Uuid,
        registration_id: Uuid,
        message: String,
    ) -> anyhow::Result<ChatMessage> {
        match self {
            Self::Postgres(pool) => {
                chat::create_message_pg(pool, webinar_id, registration_id, message).await
            }
            Self::Memory(state) => Ok(chat::create_message_mem(
                &mut *state.write().await,
                webinar_id,
                registration_id,
                message,
            )),
        }
    }

    pub async fn list_chat_messages(
        &self,
        webinar_id: Uuid,
        include_hidden: bool,
    ) -> anyhow::Result<Vec<ChatMessage>> {
        match self {
            Self::Postgres(pool) => chat::list_messages_pg(pool, webinar_id, include_hidden).await,
            Self::Memory(state) => {
                Ok(chat::list_messages_mem(&*state.read().await, webinar_id, include_hidden))
            }
        }
    }

    pub async fn set_chat_pinned(
        &self,
        webinar_id: Uuid,
        message_id: Uuid,
        pinned: bool,
    ) -> anyhow::Result<Option<ChatMessage>> {
        match self {
            Self::Postgres(pool) => chat::set_pinned_pg(pool, webinar_id, message_id, pinned).await,
            Self::Memory(state) => {
                Ok(chat::set_pinned_mem(&mut *state.write().await, webinar_id, message_id, pinned))
            }
        }
    }

    pub async fn set_chat_hidden(
        &self,
        webinar_id: Uuid,
        message_id: Uuid,
        hidden: bool,
    ) -> anyhow::Result<Option<ChatMessage>> {
        match self {
            Self::Postgres(pool) => chat::set_hidden_pg(pool, webinar_id, message_id, hidden).await,
            Self::Memory(state) => {
                Ok(chat::set_hidden_mem(&mut *state.write().await, webinar_id, message_id, hidden))
            }
        }
    }

    pub async fn delete_chat_message(
        &self,
        webinar_id: Uuid,
        message_id: Uuid,
    ) -> anyhow::Result<Option<ChatMessage>> {
        match self {
            Self::Postgres(pool) => chat::delete_message_pg(pool, webinar_id, message_id).await,
            Self::Memory(state) => {
                Ok(chat::delete_message_mem(&mut *state.write().await, webinar_id, message_id))
            }
        }
    }

    // ── Q&A ──────────────────────────────────────────────────────────────────

    pub async fn create_question(
        &self,
        webinar_id: Uuid,
        registration_id: Uuid,
        question: String,
    ) -> anyhow::Result<QaQuestion> {
        match self {
            Self::Postgres(pool) => {
                qa::create_question_pg(pool, webinar_id, registration_id, question).await
            }
            Self::Memory(state) => Ok(qa::create_question_mem(
                &mut *state.write().await,
                webinar_id,
                registration_id,
                question,
            )),
        }
    }

    pub async fn list_questions(
        &self,
        webinar_id: Uuid,
        include_hidden: bool,
    ) -> anyhow::Result<Vec<QaQuestion>> {
        match self {
            Self::Postgres(pool) => qa::list_questions_pg(pool, webinar_id, include_hidden).await,
            Self::Memory(state) => {
                Ok(qa::list_questions_mem(&*state.read().await, webinar_id, include_hidden))
            }
        }
    }

    pub async fn upvoted_question_ids(
        &self,
        webinar_id: Uuid,
        registration_id: Uuid,
    ) -> anyhow::Result<HashSet<Uuid>> {
        match self {
            Self::Postgres(pool) => qa::upvoted_ids_pg(pool, webinar_id, registration_id).await,
            Self::Memory(state) => {
                Ok(qa::upvoted_ids_mem(&*state.read().await, webinar_id, registration_id))
            }
        }
    }

    pub async fn upvote_question(
        &self,
        webinar_id: Uuid,
        question_id: Uuid,
        registration_id: Uuid,
    ) -> anyhow::Result<Option<UpvoteOutcome>> {
        match self {
            Self::Postgres(pool) => {
                qa::upvote_pg(pool, webinar_id, question_id, registration_id).await
            }
            Self::Memory(state) => Ok(qa::upvote_mem(
                &mut *state.write().await,
                webinar_id,
                question_id,
                registration_id,
            )),
        }
    }

    pub async fn remove_upvote(
        &self,
        webinar_id: Uuid,
        question_id: Uuid,
        registration_id: Uuid,
    ) -> anyhow::Result<Option<RemoveUpvoteOutcome>> {
        match self {
            Self::Postgres(pool) => {
                qa::remove_upvote_pg(pool, webinar_id, question_id, registration_id).await
            }
            Self::Memory(state) => Ok(qa::remove_upvote_mem(
                &mut *state.write().await,
                webinar_id,
                question_id,
                registration_id,
            )),
        }
    }

    pub async fn answer_question(
        &self,
        webinar_id: Uuid,
        question_id: Uuid,
        answer: String,
    ) -> anyhow::Result<Option<QaQuestion>> {
        match self {
            Self::Postgres(pool) => {
                qa::answer_question_pg(pool, webinar_id, question_id, answer).await
            }
            Self::Memory(state) => Ok(qa::answer_question_mem(
                &mut *state.write().await,
                webinar_id,
                question_id,
                answer,
            )),
        }
    }

    pub async fn set_question_highlighted(
        &self,
        webinar_id: Uuid,
        question_id: Uuid,
        highlighted: bool,
    ) -> anyhow::Result<Option<QaQuestion>> {
        match self {
            Self::Postgres(pool) => {
                qa::set_highlighted_pg(pool, webinar_id, question_id, highlighted).await
            }
            Self::Memory(state) => Ok(qa::set_highlighted_mem(
                &mut *state.write().await,
                webinar_id,
                question_id,
                highlighted,
            )),
        }
    }

    pub async fn set_question_hidden(
        &self,
        webinar_id: Uuid,
        question_id: Uuid,
        hidden: bool,
    ) -> anyhow::Result<Option<QaQuestion>> {
        match self {
            Self::Postgres(pool) => {
                qa::set_question_hidden_pg(pool, webinar_id, question_id, hidden).await
            }
            Self::Memory(state) => Ok(qa::set_question_hidden_mem(
                &mut *state.write().await,
                webinar_id,
                question_id,
                hidden,
            )),
        }
    }

    /// Re-derives `upvote_count` from the upvote rows. Returns the questions
    /// whose stored count was stale.
    pub async fn recount_upvotes(&self, webinar_id: Uuid) -> anyhow::Result<Vec<QaQuestion>> {
        match self {
            Self::Postgres(pool) => qa::recount_upvotes_pg(pool, webinar_id).await,
            Self::Memory(state) => {
                Ok(qa::recount_upvotes_mem(&mut *state.write().await, webinar_id))
            }
        }
    }

    // ── Polls ────────────────────────────────────────────────────────────────

    pub async fn create_poll(
        &self,
        webinar_id: Uuid,
        draft: polls::PollDraft,
    ) -> anyhow::Result<Poll> {
        match self {
            Self::Postgres(pool) => polls::create_poll_pg(pool, webinar_id, draft).await,
            Self::Memory(state) => {
                Ok(polls::create_poll_mem(&mut *state.write().await, webinar_id, draft))
            }
        }
    }

    pub async fn list_polls(&self, webinar_id: Uuid) -> anyhow::Result<Vec<Poll>> {
        match self {
            Self::Postgres(pool) => polls::list_polls_pg(pool, webinar_id).await,
            Self::Memory(state) => Ok(polls::list_polls_mem(&*state.read().await, webinar_id)),
        }
    }

    pub async fn get_poll(&self, webinar_id: Uuid, poll_id: Uuid) -> anyhow::Result<Option<Poll>> {
        match self {
            Self::Postgres(pool) => polls::get_poll_pg(pool, webinar_id, poll_id).await,
            Self::Memory(state) => Ok(polls::get_poll_mem(&*state.read().await, webinar_id, poll_id)),
        }
    }

    /// Activates a draft or closed poll. At most one poll is active per
    /// webinar, so any other active poll is closed in the same transaction.
    pub async fn activate_poll(
        &self,
        webinar_id: Uuid,
        poll_id: Uuid,
    ) -> anyhow::Result<Option<PollActivation>> {
        match self {
            Self::Postgres(pool) => polls::activate_poll_pg(pool, webinar_id, poll_id).await,
            Self::Memory(state) => {
                Ok(polls::activate_poll_mem(&mut *state.write().await, webinar_id, poll_id))
            }
        }
    }

    pub async fn close_poll(
        &self,
        webinar_id: Uuid,
        poll_id: Uuid,
    ) -> anyhow::Result<Option<Poll>> {
        match self {
            Self::Postgres(pool) => polls::close_poll_pg(pool, webinar_id, poll_id).await,
            Self::Memory(state) => {
                Ok(polls::close_poll_mem(&mut *state.write().await, webinar_id, poll_id))
            }
        }
    }

    pub async fn submit_poll_response(
        &self,
        webinar_id: Uuid,
        poll_id: Uuid,
        registration_id: Uuid,
        selected_options: Vec<String>,
    ) -> anyhow::Result<Option<VoteOutcome>> {
        match self {
            Self::Postgres(pool) => {
                polls::submit_response_pg(pool, webinar_id, poll_id, registration_id, selected_options)
                    .await
            }
            Self::Memory(state) => Ok(polls::submit_response_mem(
                &mut *state.write().await,
                webinar_id,
                poll_id,
                registration_id,
                selected_options,
            )),
        }
    }

    pub async fn poll_results(
        &self,
        webinar_id: Uuid,
        poll_id: Uuid,
    ) -> anyhow::Result<Option<PollResults>> {
        match self {
            Self::Postgres(pool) => polls::poll_results_pg(pool, webinar_id, poll_id).await,
            Self::Memory(state) => {
                Ok(polls::poll_results_mem(&*state.read().await, webinar_id, poll_id))
            }
        }
    }

    pub async fn poll_response_of(
        &self,
        poll_id: Uuid,
        registration_id: Uuid,
    ) -> anyhow::Result<Option<PollResponse>> {
        match self {
            Self::Postgres(pool) => polls::response_of_pg(pool, poll_id, registration_id).await,
            Self::Memory(state) => {
                Ok(polls::response_of_mem(&*state.read().await, poll_id, registration_id))
            }
        }
    }

    // ── Reactions ────────────────────────────────────────────────────────────

    pub async fn create_reaction(
        &self,
        webinar_id: Uuid,
        registration_id: Uuid,
        emoji: String,
    ) -> anyhow::Result<Reaction> {
        match self {
            Self::Postgres(pool) => {
                reactions::create_reaction_pg(pool, webinar_id, registration_id, emoji).await
            }
            Self::Memory(state) => Ok(reactions::create_reaction_mem(
                &mut *state.write().await,
                webinar_id,
                registration_id,
                emoji,
            )),
        }
    }

    pub async fn reaction_counts(
        &self,
        webinar_id: Uuid,
    ) -> anyhow::Result<Vec<(String, i64)>> {
        match self {
            Self::Postgres(pool) => reactions::reaction_counts_pg(pool, webinar_id).await,
            Self::Memory(state) => {
                Ok(reactions::reaction_counts_mem(&*state.read().await, webinar_id))
            }
        }
    }

    // ── Watch tracking ───────────────────────────────────────────────────────

    pub async fn create_watch_session(
        &self,
        webinar_id: Uuid,
        registration_id: Uuid,
        duration_seconds: i32,
    ) -> anyhow::Result<WatchSession> {
        match self {
            Self::Postgres(pool) => {
                watch::create_session_pg(pool, webinar_id, registration_id, duration_seconds).await
            }
            Self::Memory(state) => Ok(watch::create_session_mem(
                &mut *state.write().await,
                webinar_id,
                registration_id,
                duration_seconds,
            )),
        }
    }

    /// Advances a watch session and atomically claims any newly-crossed
    /// milestones. A milestone can only ever be claimed once per session.
    pub async fn record_watch_progress(
        &self,
        webinar_id: Uuid,
        session_id: Uuid,
        registration_id: Uuid,
        position_seconds: i32,
    ) -> anyhow::Result<Option<ProgressOutcome>> {
        match self {
            Self::Postgres(pool) => {
                watch::record_progress_pg(pool, webinar_id, session_id, registration_id, position_seconds)
                    .await
            }
            Self::Memory(state) => Ok(watch::record_progress_mem(
                &mut *state.write().await,
                webinar_id,
                session_id,
                registration_id,
                position_seconds,
            )),
        }
    }

    pub async fn end_watch_session(
        &self,
        webinar_id: Uuid,
        session_id: Uuid,
        registration_id: Uuid,
    ) -> anyhow::Result<Option<WatchSession>> {
        match self {
            Self::Postgres(pool) => {
                watch::end_session_pg(pool, webinar_id, session_id, registration_id).await
            }
            Self::Memory(state) => Ok(watch::end_session_mem(
                &mut *state.write().await,
                webinar_id,
                session_id,
                registration_id,
            )),
        }
    }

    pub async fn list_watch_sessions(
        &self,
        webinar_id: Uuid,
    ) -> anyhow::Result<Vec<WatchSession>> {
        match self {
            Self::Postgres(pool) => watch::list_sessions_pg(pool, webinar_id).await,
            Self::Memory(state) => Ok(watch::list_sessions_mem(&*state.read().await, webinar_id)),
        }
    }

    // ── Engagement ledger ────────────────────────────────────────────────────

    pub async fn record_engagement_event(
        &self,
        webinar_id: Uuid,
        registration_id: Uuid,
        kind: greenroom_common::types::EngagementKind,
        payload: serde_json::Value,
        points_awarded: i32,
    ) -> anyhow::Result<EngagementEvent> {
        match self {
            Self::Postgres(pool) => {
                engagement::record_event_pg(pool, webinar_id, registration_id, kind, payload, points_awarded)
                    .await
            }
            Self::Memory(state) => Ok(engagement::record_event_mem(
                &mut *state.write().await,
                webinar_id,
                registration_id,
                kind,
                payload,
                points_awarded,
            )),
        }
    }

    pub async fn list_engagement_events(
        &self,
        webinar_id: Uuid,
    ) -> anyhow::Result<Vec<EngagementEvent>> {
        match self {
            Self::Postgres(pool) => engagement::list_events_pg(pool, webinar_id).await,
            Self::Memory(state) => {
                Ok(engagement::list_events_mem(&*state.read().await, webinar_id))
            }
        }
    }

    pub async fn engagement_weights(
        &self,
        webinar_id: Uuid,
    ) -> anyhow::Result<Option<HashMap<String, i32>>> {
        match self {
            Self::Postgres(pool) => engagement::weights_pg(pool, webinar_id).await,
            Self::Memory(state) => Ok(engagement::weights_mem(&*state.read().await, webinar_id)),
        }
    }

    pub async fn set_engagement_weights(
        &self,
        webinar_id: Uuid,
        weights: HashMap<String, i32>,
    ) -> anyhow::Result<()> {
        match self {
            Self::Postgres(pool) => engagement::set_weights_pg(pool, webinar_id, weights).await,
            Self::Memory(state) => {
                engagement::set_weights_mem(&mut *state.write().await, webinar_id, weights);
                Ok(())
            }
        }
    }
}
