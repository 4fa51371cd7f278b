// Per-feature synchronization units.
//
// Each unit maintains a coherent, de-duplicated local view by merging:
//   (a) an initial snapshot provided at mount,
//   (b) optimistic local writes by the current viewer,
//   (c) broadcast change events from all viewers (self echoes included).
//
// Shared merge protocol: events are matched by primary id so duplicate
// delivery is idempotent; an update or delete for an id never seen
// locally is silently dropped (the canonical row arrives via insert or a
// later snapshot); hidden entities are filtered out of the rendered view
// but stay in the buffer so a moderation update can re-filter them.

pub mod chat;
pub mod polls;
pub mod qa;
pub mod reactions;

use std::collections::HashMap;

use uuid::Uuid;

use greenroom_common::protocol::ws::PresenceEntry;

/// Local mirror of the presence topic: who is watching right now.
///
/// A fresh `sync` snapshot is authoritative and replaces everything held
/// before it, which is how stale rosters are discarded after a reconnect.
#[derive(Debug, Default)]
pub struct PresenceRoster {
    entries: HashMap<Uuid, PresenceEntry>,
}

impl PresenceRoster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply_sync(&mut self, entries: Vec<PresenceEntry>) {
        self.entries =
            entries.into_iter().map(|entry| (entry.registration_id, entry)).collect();
    }

    pub fn apply_join(&mut self, entry: PresenceEntry) {
        self.entries.insert(entry.registration_id, entry);
    }

    pub fn apply_leave(&mut self, registration_id: Uuid) {
        self.entries.remove(&registration_id);
    }

    pub fn viewer_count(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, registration_id: Uuid) -> bool {
        self.entries.contains_key(&registration_id)
    }

    /// Roster sorted by join time for display.
    pub fn viewers(&self) -> Vec<&PresenceEntry> {
        let mut viewers: Vec<&PresenceEntry> = self.entries.values().collect();
        viewers.sort_by_key(|entry| entry.joined_at);
        viewers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn entry(name: &str) -> PresenceEntry {
        PresenceEntry {
            registration_id: Uuid::new_v4(),
            display_name: name.to_string(),
            joined_at: Utc::now(),
        }
    }

    #[test]
    fn sync_snapshot_replaces_stale_roster() {
        let mut roster = PresenceRoster::new();
        let stale = entry("Stale");
        roster.apply_join(stale.clone());

        let fresh = entry("Fresh");
        roster.apply_sync(vec![fresh.clone()]);

        assert_eq!(roster.viewer_count(), 1);
        assert!(!roster.contains(stale.registration_id));
        assert!(roster.contains(fresh.registration_id));
    }

    #[test]
    fn join_is_idempotent_by_registration_id() {
        let mut roster = PresenceRoster::new();
        let viewer = entry("Ada");

        roster.apply_join(viewer.clone());
        roster.apply_join(viewer);

        assert_eq!(roster.viewer_count(), 1);
    }

    #[test]
    fn leave_removes_and_unknown_leave_is_harmless() {
        let mut roster = PresenceRoster::new();
        let viewer = entry("Ada");
        roster.apply_join(viewer.clone());

        roster.apply_leave(Uuid::new_v4());
        assert_eq!(roster.viewer_count(), 1);

        roster.apply_leave(viewer.registration_id);
        assert_eq!(roster.viewer_count(), 0);
    }

    #[test]
    fn viewers_are_ordered_by_join_time() {
        let mut roster = PresenceRoster::new();
        let mut first = entry("First");
        first.joined_at = Utc::now() - Duration::minutes(5);
        let second = entry("Second");

        roster.apply_join(second);
        roster.apply_join(first.clone());

        let viewers = roster.viewers();
        assert_eq!(viewers[0].registration_id, first.registration_id);
    }
}
