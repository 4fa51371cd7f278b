// Chat feed: ordered-by-arrival message list with moderation filtering.

use anyhow::Result;
use uuid::Uuid;

use greenroom_common::protocol::ws::ChangeOp;
use greenroom_common::types::ChatMessage;

use crate::optimistic::OptimisticLedger;

/// The local chat view for one webinar.
#[derive(Debug, Default)]
pub struct ChatFeed {
    /// Arrival order, hidden rows included. The rendered view filters.
    messages: Vec<ChatMessage>,
    ledger: OptimisticLedger,
}

impl ChatFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from the snapshot fetched at page load.
    pub fn seed(&mut self, snapshot: Vec<ChatMessage>) {
        self.messages = snapshot;
    }

    /// Route one broadcast change event into the feed.
    pub fn apply_change(&mut self, op: ChangeOp, record: serde_json::Value) -> Result<()> {
        match op {
            ChangeOp::Insert => self.apply_insert(serde_json::from_value(record)?),
            ChangeOp::Update => self.apply_update(serde_json::from_value(record)?),
            ChangeOp::Delete => {
                let message: ChatMessage = serde_json::from_value(record)?;
                self.apply_delete(message.id);
            }
        }
        Ok(())
    }

    /// Insert: append in arrival order. Duplicate delivery of the same id
    /// replaces in place instead of appending a second entry.
    pub fn apply_insert(&mut self, message: ChatMessage) {
        match self.position_of(message.id) {
            Some(index) => self.messages[index] = message,
            None => self.messages.push(message),
        }
    }

    /// Update: replace by id; an unknown id is silently dropped.
    pub fn apply_update(&mut self, message: ChatMessage) {
        if let Some(index) = self.position_of(message.id) {
            self.messages[index] = message;
        }
    }

    /// Delete: remove by id; an unknown id is a no-op.
    pub fn apply_delete(&mut self, message_id: Uuid) {
        self.messages.retain(|message| message.id != message_id);
    }

    /// Apply the viewer's own message before network confirmation.
    pub fn send_optimistic(&mut self, message: ChatMessage) {
        self.ledger.begin(message.id);
        self.apply_insert(message);
    }

    /// The send succeeded; the broadcast echo will deduplicate by id.
    pub fn confirm_send(&mut self, message_id: Uuid) {
        self.ledger.confirm(message_id);
    }

    /// The send failed; roll the optimistic insert back.
    pub fn fail_send(&mut self, message_id: Uuid, reason: impl Into<String>) {
        self.ledger.fail(message_id, reason);
        self.apply_delete(message_id);
    }

    pub fn is_send_pending(&self, message_id: Uuid) -> bool {
        self.ledger.is_pending(message_id)
    }

    /// The rendered view: arrival order, hidden messages filtered out.
    pub fn visible(&self) -> Vec<&ChatMessage> {
        self.messages.iter().filter(|message| !message.is_hidden).collect()
    }

    /// Buffer length including hidden rows.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn position_of(&self, message_id: Uuid) -> Option<usize> {
        self.messages.iter().position(|message| message.id == message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn message(text: &str) -> ChatMessage {
        ChatMessage {
            id: Uuid::new_v4(),
            webinar_id: Uuid::new_v4(),
            registration_id: Uuid::new_v4(),
            message: text.to_string(),
            is_pinned: false,
            is_hidden: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn duplicate_broadcast_delivery_keeps_one_entry() {
        let mut feed = ChatFeed::new();
        let hello = message("hello");

        feed.apply_insert(hello.clone());
        feed.apply_insert(hello.clone());

        assert_eq!(feed.len(), 1);
        let visible = feed.visible();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, hello.id);
    }

    #[test]
    fn update_for_unknown_id_is_dropped() {
        let mut feed = ChatFeed::new();
        feed.apply_insert(message("first"));

        feed.apply_update(message("never inserted"));
        assert_eq!(feed.len(), 1);
    }

    #[test]
    fn moderation_hides_without_evicting_from_the_buffer() {
        let mut feed = ChatFeed::new();
        let mut target = message("rude");
        feed.apply_insert(target.clone());
        feed.apply_insert(message("fine"));

        target.is_hidden = true;
        feed.apply_update(target.clone());

        assert_eq!(feed.len(), 2, "hidden rows stay in the buffer");
        assert_eq!(feed.visible().len(), 1);

        // Un-hiding re-surfaces it in place.
        target.is_hidden = false;
        feed.apply_update(target);
        assert_eq!(feed.visible().len(), 2);
    }

    #[test]
    fn delete_removes_by_id() {
        let mut feed = ChatFeed::new();
        let gone = message("gone");
        feed.apply_insert(gone.clone());
        feed.apply_insert(message("stays"));

        feed.apply_delete(gone.id);
        assert_eq!(feed.len(), 1);

        // Unknown delete is harmless.
        feed.apply_delete(Uuid::new_v4());
        assert_eq!(feed.len(), 1);
    }

    #[test]
    fn failed_send_rolls_the_optimistic_insert_back() {
        let mut feed = ChatFeed::new();
        let mine = message("mine");

        feed.send_optimistic(mine.clone());
        assert!(feed.is_send_pending(mine.id));
        assert_eq!(feed.visible().len(), 1);

        feed.fail_send(mine.id, "message too long");
        assert!(feed.visible().is_empty());
        assert!(!feed.is_send_pending(mine.id));
    }

    #[test]
    fn confirmed_send_is_deduplicated_against_its_broadcast_echo() {
        let mut feed = ChatFeed::new();
        let mine = message("mine");

        feed.send_optimistic(mine.clone());
        feed.confirm_send(mine.id);
        feed.apply_insert(mine.clone());

        assert_eq!(feed.len(), 1);
    }

    #[test]
    fn change_dispatch_parses_broadcast_records() {
        let mut feed = ChatFeed::new();
        let hello = message("hello");
        let record = serde_json::to_value(&hello).expect("message should serialize");

        feed.apply_change(ChangeOp::Insert, record.clone()).expect("insert should apply");
        feed.apply_change(ChangeOp::Delete, record).expect("delete should apply");
        assert!(feed.is_empty());
    }
}
