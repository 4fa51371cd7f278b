// Poll board: result projections built incrementally from response inserts.
//
// Counts and percentages are a local projection only; the store's detail
// rows remain the source of truth and the REST results endpoint can
// replace the projection wholesale whenever the page refetches.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use serde::Serialize;
use uuid::Uuid;

use greenroom_common::protocol::ws::ChangeOp;
use greenroom_common::types::{Poll, PollResponse, PollStatus, ValidationError};

use crate::optimistic::OptimisticLedger;

/// Per-option tally within a poll projection.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct OptionResult {
    pub option_id: String,
    pub text: String,
    pub count: u32,
    /// `round(count / total_responses * 100)`; 0 while nobody has voted.
    pub percentage: u8,
}

/// One poll plus its incrementally maintained result projection.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PollProjection {
    pub poll: Poll,
    pub total_responses: u32,
    pub results: Vec<OptionResult>,
}

/// Why a vote was rejected before any network call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VoteError {
    #[error("already voted on this poll")]
    AlreadyVoted,
    #[error("poll is not known locally")]
    UnknownPoll,
    #[error("poll is not accepting votes")]
    NotActive,
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// The local poll view for one webinar.
#[derive(Debug, Default)]
pub struct PollBoard {
    polls: Vec<PollProjection>,
    /// Response ids already folded into a projection; makes duplicate
    /// broadcast delivery idempotent.
    seen_responses: HashSet<Uuid>,
    /// The viewer's own vote per poll, checked before any network call.
    my_votes: HashMap<Uuid, Vec<String>>,
    ledger: OptimisticLedger,
}

impl PollBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed polls from the snapshot fetched at page load. Projections
    /// start at zero; the page folds in the snapshot's responses (or a
    /// results refetch) separately.
    pub fn seed(&mut self, snapshot: Vec<Poll>, my_votes: HashMap<Uuid, Vec<String>>) {
        self.polls = snapshot.into_iter().map(zero_projection).collect();
        self.my_votes = my_votes;
    }

    /// Route one broadcast change on the polls table.
    pub fn apply_poll_change(&mut self, op: ChangeOp, record: serde_json::Value) -> Result<()> {
        match op {
            ChangeOp::Insert => self.apply_poll_insert(serde_json::from_value(record)?),
            ChangeOp::Update => self.apply_poll_update(serde_json::from_value(record)?),
            ChangeOp::Delete => {
                let poll: Poll = serde_json::from_value(record)?;
                self.apply_poll_delete(poll.id);
            }
        }
        Ok(())
    }

    /// Route one broadcast change on the poll_responses table. Responses
    /// are insert-only; other operations are ignored.
    pub fn apply_response_change(&mut self, op: ChangeOp, record: serde_json::Value) -> Result<()> {
        if op == ChangeOp::Insert {
            self.apply_response_insert(serde_json::from_value(record)?);
        }
        Ok(())
    }

    /// Insert: append a zero-response projection derived from the option
    /// list. Duplicate delivery merges like an update.
    pub fn apply_poll_insert(&mut self, poll: Poll) {
        match self.position_of(poll.id) {
            Some(_) => self.apply_poll_update(poll),
            None => self.polls.push(zero_projection(poll)),
        }
    }

    /// Update: merge status/metadata into the existing record by id,
    /// keeping accumulated counts for options that survive. An unknown id
    /// is silently dropped.
    pub fn apply_poll_update(&mut self, poll: Poll) {
        let Some(index) = self.position_of(poll.id) else {
            return;
        };
        let projection = &mut self.polls[index];
        let old_counts: HashMap<String, u32> = projection
            .results
            .iter()
            .map(|result| (result.option_id.clone(), result.count))
            .collect();

        projection.results = poll
            .options
            .iter()
            .map(|option| OptionResult {
                option_id: option.option_id.clone(),
                text: option.text.clone(),
                count: old_counts.get(&option.option_id).copied().unwrap_or(0),
                percentage: 0,
            })
            .collect();
        projection.poll = poll;
        recompute_percentages(projection);
    }

    pub fn apply_poll_delete(&mut self, poll_id: Uuid) {
        self.polls.retain(|projection| projection.poll.id != poll_id);
    }

    /// Fold one response into its poll's projection: total + 1, each
    /// selected option's count + 1, then recompute every percentage.
    /// Duplicate delivery (matched by response id) and responses for
    /// unknown polls are silently dropped.
    pub fn apply_response_insert(&mut self, response: PollResponse) {
        if self.seen_responses.contains(&response.id) {
            return;
        }
        let Some(index) = self.position_of(response.poll_id) else {
            return;
        };
        self.seen_responses.insert(response.id);

        let projection = &mut self.polls[index];
        projection.total_responses += 1;
        for result in &mut projection.results {
            if response.selected_options.contains(&result.option_id) {
                result.count += 1;
            }
        }
        recompute_percentages(projection);
    }

    /// Cast the viewer's vote optimistically. Re-votes and invalid
    /// selections are rejected here, before any network call; the
    /// provisional response is folded into the projection immediately.
    pub fn vote_optimistic(
        &mut self,
        poll_id: Uuid,
        selected_options: Vec<String>,
        provisional: PollResponse,
    ) -> Result<(), VoteError> {
        if self.my_votes.contains_key(&poll_id) {
            return Err(VoteError::AlreadyVoted);
        }
        let index = self.position_of(poll_id).ok_or(VoteError::UnknownPoll)?;
        let poll = &self.polls[index].poll;
        if poll.status != PollStatus::Active {
            return Err(VoteError::NotActive);
        }
        poll.validate_selection(&selected_options)?;

        self.my_votes.insert(poll_id, selected_options);
        self.ledger.begin(provisional.id);
        self.apply_response_insert(provisional);
        Ok(())
    }

    /// The vote was accepted; swap the provisional response id for the
    /// server's canonical one so the broadcast echo deduplicates.
    pub fn confirm_vote(&mut self, provisional_id: Uuid, canonical_id: Uuid) {
        self.ledger.confirm(provisional_id);
        if self.seen_responses.remove(&provisional_id) {
            self.seen_responses.insert(canonical_id);
        }
    }

    /// The vote failed: reverse the optimistic projection delta and free
    /// the poll for another attempt.
    pub fn fail_vote(&mut self, poll_id: Uuid, provisional_id: Uuid, reason: impl Into<String>) {
        self.ledger.fail(provisional_id, reason);
        if !self.seen_responses.remove(&provisional_id) {
            return;
        }
        let Some(selected) = self.my_votes.remove(&poll_id) else {
            return;
        };
        let Some(index) = self.position_of(poll_id) else {
            return;
        };
        let projection = &mut self.polls[index];
        projection.total_responses = projection.total_responses.saturating_sub(1);
        for result in &mut projection.results {
            if selected.contains(&result.option_id) {
                result.count = result.count.saturating_sub(1);
            }
        }
        recompute_percentages(projection);
    }

    pub fn has_voted(&self, poll_id: Uuid) -> bool {
        self.my_votes.contains_key(&poll_id)
    }

    /// The poll to feature: the most recently activated among those
    /// currently active.
    pub fn active_poll(&self) -> Option<&PollProjection> {
        self.polls
            .iter()
            .filter(|projection| projection.poll.status == PollStatus::Active)
            .max_by_key(|projection| projection.poll.activated_at)
    }

    pub fn projection(&self, poll_id: Uuid) -> Option<&PollProjection> {
        self.position_of(poll_id).map(|index| &self.polls[index])
    }

    pub fn polls(&self) -> &[PollProjection] {
        &self.polls
    }

    fn position_of(&self, poll_id: Uuid) -> Option<usize> {
        self.polls.iter().position(|projection| projection.poll.id == poll_id)
    }
}

fn zero_projection(poll: Poll) -> PollProjection {
    let results = poll
        .options
        .iter()
        .map(|option| OptionResult {
            option_id: option.option_id.clone(),
            text: option.text.clone(),
            count: 0,
            percentage: 0,
        })
        .collect();
    PollProjection { poll, total_responses: 0, results }
}

fn recompute_percentages(projection: &mut PollProjection) {
    let total = projection.total_responses;
    for result in &mut projection.results {
        result.percentage = if total == 0 {
            0
        } else {
            (f64::from(result.count) / f64::from(total) * 100.0).round() as u8
        };
    }
}
