// Q&A board: sorted question list with local upvote state.
//
// The broadcast payload never carries "has this viewer upvoted" — that is
// per-viewer state the server only exposes via the REST list endpoint —
// so the board keeps its own flag per question and preserves it across
// broadcast updates.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use serde::Serialize;
use uuid::Uuid;

use greenroom_common::protocol::ws::ChangeOp;
use greenroom_common::types::QaQuestion;

use crate::optimistic::OptimisticLedger;

/// One question plus the current viewer's upvote flag.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct QuestionEntry {
    pub question: QaQuestion,
    pub has_upvoted: bool,
}

/// Direction of an in-flight upvote toggle, kept so a failure can reverse
/// exactly the delta that was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpvoteToggle {
    Added,
    Removed,
}

/// The local Q&A view for one webinar.
#[derive(Debug, Default)]
pub struct QaBoard {
    entries: Vec<QuestionEntry>,
    pending_toggles: HashMap<Uuid, UpvoteToggle>,
    ledger: OptimisticLedger,
}

impl QaBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from the snapshot fetched at page load. `upvoted` holds the
    /// ids of questions the current viewer has already upvoted.
    pub fn seed(&mut self, snapshot: Vec<QaQuestion>, upvoted: &HashSet<Uuid>) {
        self.entries = snapshot
            .into_iter()
            .map(|question| {
                let has_upvoted = upvoted.contains(&question.id);
                QuestionEntry { question, has_upvoted }
            })
            .collect();
        self.resort();
    }

    /// Route one broadcast change event into the board.
    pub fn apply_change(&mut self, op: ChangeOp, record: serde_json::Value) -> Result<()> {
        match op {
            ChangeOp::Insert => self.apply_insert(serde_json::from_value(record)?),
            ChangeOp::Update => self.apply_update(serde_json::from_value(record)?),
            ChangeOp::Delete => {
                let question: QaQuestion = serde_json::from_value(record)?;
                self.apply_delete(question.id);
            }
        }
        Ok(())
    }

    /// Insert: append then re-sort. Duplicate delivery replaces in place
    /// and keeps the viewer's local upvote flag.
    pub fn apply_insert(&mut self, question: QaQuestion) {
        match self.position_of(question.id) {
            Some(index) => self.entries[index].question = question,
            None => self.entries.push(QuestionEntry { question, has_upvoted: false }),
        }
        self.resort();
    }

    /// Update: replace by id, preserving the local upvote flag; an unknown
    /// id is silently dropped.
    pub fn apply_update(&mut self, question: QaQuestion) {
        if let Some(index) = self.position_of(question.id) {
            self.entries[index].question = question;
            self.resort();
        }
    }

    pub fn apply_delete(&mut self, question_id: Uuid) {
        self.entries.retain(|entry| entry.question.id != question_id);
        self.pending_toggles.remove(&question_id);
    }

    /// Apply the viewer's own question before network confirmation.
    pub fn submit_optimistic(&mut self, question: QaQuestion) {
        self.ledger.begin(question.id);
        self.apply_insert(question);
    }

    pub fn confirm_submit(&mut self, question_id: Uuid) {
        self.ledger.confirm(question_id);
    }

    pub fn fail_submit(&mut self, question_id: Uuid, reason: impl Into<String>) {
        self.ledger.fail(question_id, reason);
        self.apply_delete(question_id);
    }

    /// Optimistically toggle the viewer's upvote: flip the flag, adjust
    /// the count by ±1, and report which REST call to issue (PUT for
    /// `Added`, DELETE for `Removed`). Returns None for an unknown id or
    /// while a previous toggle on the same question is still unresolved.
    pub fn toggle_upvote(&mut self, question_id: Uuid) -> Option<UpvoteToggle> {
        if self.pending_toggles.contains_key(&question_id) {
            return None;
        }
        let index = self.position_of(question_id)?;
        let entry = &mut self.entries[index];

        let toggle = if entry.has_upvoted {
            entry.has_upvoted = false;
            entry.question.upvote_count -= 1;
            UpvoteToggle::Removed
        } else {
            entry.has_upvoted = true;
            entry.question.upvote_count += 1;
            UpvoteToggle::Added
        };
        self.pending_toggles.insert(question_id, toggle);
        self.resort();
        Some(toggle)
    }

    pub fn confirm_toggle(&mut self, question_id: Uuid) {
        self.pending_toggles.remove(&question_id);
    }

    /// The toggle failed: reverse exactly the optimistic delta. The
    /// operation is not retried automatically; the caller must re-invoke.
    pub fn fail_toggle(&mut self, question_id: Uuid) {
        let Some(toggle) = self.pending_toggles.remove(&question_id) else {
            return;
        };
        let Some(index) = self.position_of(question_id) else {
            return;
        };
        let entry = &mut self.entries[index];
        match toggle {
            UpvoteToggle::Added => {
                entry.has_upvoted = false;
                entry.question.upvote_count -= 1;
            }
            UpvoteToggle::Removed => {
                entry.has_upvoted = true;
                entry.question.upvote_count += 1;
            }
        }
        self.resort();
    }

    /// The rendered view: hidden questions filtered, sorted by upvotes
    /// descending with earlier questions first on ties.
    pub fn visible(&self) -> Vec<&QuestionEntry> {
        self.entries.iter().filter(|entry| !entry.question.is_hidden).collect()
    }

    pub fn entry(&self, question_id: Uuid) -> Option<&QuestionEntry> {
        self.position_of(question_id).map(|index| &self.entries[index])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position_of(&self, question_id: Uuid) -> Option<usize> {
        self.entries.iter().position(|entry| entry.question.id == question_id)
    }

    fn resort(&mut self) {
        self.entries.sort_by(|a, b| {
            b.question
                .upvote_count
                .cmp(&a.question.upvote_count)
                .then(a.question.created_at.cmp(&b.question.created_at))
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn question(text: &str, upvotes: i32) -> QaQuestion {
        QaQuestion {
            id: Uuid::new_v4(),
            webinar_id: Uuid::new_v4(),
            registration_id: Uuid::new_v4(),
            question: text.to_string(),
            answer: None,
            status: greenroom_common::types::QaStatus::Open,
            is_highlighted: false,
            is_hidden: false,
            upvote_count: upvotes,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn upvote_toggle_round_trip_returns_count_to_zero() {
        let mut board = QaBoard::new();
        let asked = question("When is the replay available?", 0);
        board.apply_insert(asked.clone());

        let up = board.toggle_upvote(asked.id).expect("toggle should apply");
        assert_eq!(up, UpvoteToggle::Added);
        board.confirm_toggle(asked.id);

        let entry = board.entry(asked.id).expect("question should exist");
        assert_eq!(entry.question.upvote_count, 1);
        assert!(entry.has_upvoted);

        let down = board.toggle_upvote(asked.id).expect("second toggle should apply");
        assert_eq!(down, UpvoteToggle::Removed);
        board.confirm_toggle(asked.id);

        let entry = board.entry(asked.id).expect("question should exist");
        assert_eq!(entry.question.upvote_count, 0);
        assert!(!entry.has_upvoted);
    }

    #[test]
    fn failed_toggle_reverses_the_optimistic_delta() {
        let mut board = QaBoard::new();
        let asked = question("Will there be slides?", 4);
        board.apply_insert(asked.clone());

        board.toggle_upvote(asked.id).expect("toggle should apply");
        assert_eq!(board.entry(asked.id).unwrap().question.upvote_count, 5);

        board.fail_toggle(asked.id);
        let entry = board.entry(asked.id).expect("question should exist");
        assert_eq!(entry.question.upvote_count, 4);
        assert!(!entry.has_upvoted);

        // Not retried automatically, but a fresh toggle is allowed.
        assert!(board.toggle_upvote(asked.id).is_some());
    }

    #[test]
    fn toggle_is_blocked_while_a_previous_toggle_is_unresolved() {
        let mut board = QaBoard::new();
        let asked = question("Any discount code?", 0);
        board.apply_insert(asked.clone());

        assert_eq!(board.toggle_upvote(asked.id), Some(UpvoteToggle::Added));
        assert_eq!(board.toggle_upvote(asked.id), None);
        assert_eq!(board.entry(asked.id).unwrap().question.upvote_count, 1);
    }

    #[test]
    fn broadcast_update_preserves_local_has_upvoted() {
        let mut board = QaBoard::new();
        let asked = question("How long is the session?", 0);
        board.apply_insert(asked.clone());
        board.toggle_upvote(asked.id).expect("toggle should apply");
        board.confirm_toggle(asked.id);

        // The confirmed write echoes back with the server's count; the
        // payload carries no per-viewer flag.
        let mut echoed = asked.clone();
        echoed.upvote_count = 1;
        board.apply_update(echoed);

        let entry = board.entry(asked.id).expect("question should exist");
        assert_eq!(entry.question.upvote_count, 1);
        assert!(entry.has_upvoted, "local flag must survive broadcast updates");
    }

    #[test]
    fn sort_is_upvotes_descending_then_earliest_first() {
        let mut board = QaBoard::new();
        let mut early = question("early tie", 2);
        early.created_at = Utc::now() - Duration::minutes(10);
        let late = question("late tie", 2);
        let top = question("top", 7);

        board.apply_insert(late.clone());
        board.apply_insert(early.clone());
        board.apply_insert(top.clone());

        let visible = board.visible();
        assert_eq!(visible[0].question.id, top.id);
        assert_eq!(visible[1].question.id, early.id);
        assert_eq!(visible[2].question.id, late.id);
    }

    #[test]
    fn hidden_questions_are_filtered_but_buffered() {
        let mut board = QaBoard::new();
        let mut target = question("spam", 0);
        board.apply_insert(target.clone());

        target.is_hidden = true;
        board.apply_update(target);

        assert_eq!(board.len(), 1);
        assert!(board.visible().is_empty());
    }

    #[test]
    fn update_for_unknown_id_is_dropped() {
        let mut board = QaBoard::new();
        board.apply_update(question("never seen", 3));
        assert!(board.is_empty());
    }

    #[test]
    fn failed_submit_rolls_back() {
        let mut board = QaBoard::new();
        let mine = question("mine", 0);

        board.submit_optimistic(mine.clone());
        assert_eq!(board.len(), 1);

        board.fail_submit(mine.id, "question must not be blank");
        assert!(board.is_empty());
    }

    #[test]
    fn seeding_marks_previously_upvoted_questions() {
        let mut board = QaBoard::new();
        let upvoted = question("upvoted before reload", 3);
        let other = question("other", 1);

        let mine: HashSet<Uuid> = [upvoted.id].into_iter().collect();
        board.seed(vec![upvoted.clone(), other.clone()], &mine);

        assert!(board.entry(upvoted.id).unwrap().has_upvoted);
        assert!(!board.entry(other.id).unwrap().has_upvoted);
    }
}
