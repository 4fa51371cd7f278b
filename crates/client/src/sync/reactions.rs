// Floating reaction buffer: bounded, display-only, self-expiring.
//
// Reactions are never edited or deleted; only inserts arrive. The buffer
// caps how many float on screen at once and each entry expires after a
// fixed display lifetime.

use std::collections::VecDeque;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};

use greenroom_common::protocol::ws::ChangeOp;
use greenroom_common::types::Reaction;

/// How many reactions float on screen at once before the oldest is evicted.
pub const REACTION_BUFFER_CAPACITY: usize = 48;

/// How long a reaction stays on screen.
pub const REACTION_DISPLAY_LIFETIME_SECS: i64 = 4;

/// One on-screen reaction with its scheduled removal time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FloatingReaction {
    pub reaction: Reaction,
    pub expires_at: DateTime<Utc>,
}

/// The local reaction overlay for one webinar.
#[derive(Debug)]
pub struct ReactionOverlay {
    capacity: usize,
    lifetime: Duration,
    entries: VecDeque<FloatingReaction>,
}

impl Default for ReactionOverlay {
    fn default() -> Self {
        Self::new()
    }
}

impl ReactionOverlay {
    pub fn new() -> Self {
        Self::with_capacity(
            REACTION_BUFFER_CAPACITY,
            Duration::seconds(REACTION_DISPLAY_LIFETIME_SECS),
        )
    }

    pub fn with_capacity(capacity: usize, lifetime: Duration) -> Self {
        Self { capacity, lifetime, entries: VecDeque::new() }
    }

    /// Route one broadcast change. Only inserts exist for reactions.
    pub fn apply_change(&mut self, op: ChangeOp, record: serde_json::Value) -> Result<()> {
        if op == ChangeOp::Insert {
            self.push_at(serde_json::from_value(record)?, Utc::now());
        }
        Ok(())
    }

    pub fn push(&mut self, reaction: Reaction) {
        self.push_at(reaction, Utc::now());
    }

    /// Append a reaction, evicting the oldest past capacity. Duplicate
    /// delivery of the same reaction id is dropped.
    pub fn push_at(&mut self, reaction: Reaction, now: DateTime<Utc>) {
        if self.entries.iter().any(|entry| entry.reaction.id == reaction.id) {
            return;
        }
        self.entries.push_back(FloatingReaction { reaction, expires_at: now + self.lifetime });
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// Drop entries whose display lifetime has elapsed.
    pub fn prune_expired(&mut self, now: DateTime<Utc>) {
        self.entries.retain(|entry| entry.expires_at > now);
    }

    /// Reactions currently on screen.
    pub fn visible_at(&self, now: DateTime<Utc>) -> Vec<&Reaction> {
        self.entries
            .iter()
            .filter(|entry| entry.expires_at > now)
            .map(|entry| &entry.reaction)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn reaction(emoji: &str) -> Reaction {
        Reaction {
            id: Uuid::new_v4(),
            webinar_id: Uuid::new_v4(),
            registration_id: Uuid::new_v4(),
            emoji: emoji.to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn oldest_entries_are_evicted_past_capacity() {
        let mut overlay = ReactionOverlay::with_capacity(3, Duration::seconds(4));
        let first = reaction("👍");
        overlay.push(first.clone());
        overlay.push(reaction("🔥"));
        overlay.push(reaction("🎉"));
        overlay.push(reaction("❤️"));

        assert_eq!(overlay.len(), 3);
        let now = Utc::now();
        assert!(
            !overlay.visible_at(now).iter().any(|r| r.id == first.id),
            "oldest reaction should have been evicted",
        );
    }

    #[test]
    fn entries_expire_after_the_display_lifetime() {
        let mut overlay = ReactionOverlay::with_capacity(10, Duration::seconds(4));
        let start = Utc::now();
        overlay.push_at(reaction("👍"), start);

        let before_expiry = start + Duration::seconds(3);
        assert_eq!(overlay.visible_at(before_expiry).len(), 1);

        let after_expiry = start + Duration::seconds(5);
        assert!(overlay.visible_at(after_expiry).is_empty());

        overlay.prune_expired(after_expiry);
        assert!(overlay.is_empty());
    }

    #[test]
    fn duplicate_delivery_is_dropped() {
        let mut overlay = ReactionOverlay::new();
        let cheer = reaction("🎉");
        overlay.push(cheer.clone());
        overlay.push(cheer);

        assert_eq!(overlay.len(), 1);
    }

    #[test]
    fn non_insert_changes_are_ignored() {
        let mut overlay = ReactionOverlay::new();
        let record = serde_json::to_value(reaction("👍")).expect("reaction should serialize");

        overlay.apply_change(ChangeOp::Update, record.clone()).expect("update should be ignored");
        overlay.apply_change(ChangeOp::Delete, record).expect("delete should be ignored");
        assert!(overlay.is_empty());
    }
}
