// Optimistic write ledger.
//
// Every user-initiated mutation (send message, ask question, vote, react,
// upvote toggle) flows through an explicit state machine:
//   pending → confirmed   (write succeeded; broadcast echo deduplicates)
//   pending → failed      (write rejected; local state rolled back)
//
// The ledger makes rollback exhaustive: a sync unit applies a mutation
// locally, records it here as pending, and on resolution either keeps it
// (confirmed) or reverses it (failed). Failed writes are never retried
// automatically; the caller must re-invoke the action.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Lifecycle state of one optimistic mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteState {
    /// Applied locally, network result not yet known.
    Pending,
    /// The write succeeded; the local mutation is canonical.
    Confirmed,
    /// The write failed; the local mutation was rolled back.
    Failed { reason: String },
}

/// One tracked mutation, keyed by the id of the entity it created or
/// toggled (message id, question id, poll id, reaction id).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimisticWrite {
    pub entity_id: Uuid,
    pub state: WriteState,
    pub issued_at: DateTime<Utc>,
}

/// Tracks every in-flight and resolved optimistic mutation for one
/// viewer session.
#[derive(Debug, Default)]
pub struct OptimisticLedger {
    writes: HashMap<Uuid, OptimisticWrite>,
}

impl OptimisticLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a mutation that was just applied locally.
    pub fn begin(&mut self, entity_id: Uuid) {
        self.begin_at(entity_id, Utc::now());
    }

    pub fn begin_at(&mut self, entity_id: Uuid, issued_at: DateTime<Utc>) {
        self.writes
            .insert(entity_id, OptimisticWrite { entity_id, state: WriteState::Pending, issued_at });
    }

    /// Mark a pending mutation as confirmed by the server.
    pub fn confirm(&mut self, entity_id: Uuid) {
        if let Some(write) = self.writes.get_mut(&entity_id) {
            write.state = WriteState::Confirmed;
        }
    }

    /// Mark a pending mutation as failed. The caller is responsible for
    /// reversing the local mutation; the ledger only records the outcome.
    pub fn fail(&mut self, entity_id: Uuid, reason: impl Into<String>) {
        if let Some(write) = self.writes.get_mut(&entity_id) {
            write.state = WriteState::Failed { reason: reason.into() };
        }
    }

    pub fn state_of(&self, entity_id: Uuid) -> Option<&WriteState> {
        self.writes.get(&entity_id).map(|write| &write.state)
    }

    pub fn is_pending(&self, entity_id: Uuid) -> bool {
        matches!(self.state_of(entity_id), Some(WriteState::Pending))
    }

    pub fn pending_count(&self) -> usize {
        self.writes
            .values()
            .filter(|write| matches!(write.state, WriteState::Pending))
            .count()
    }

    /// Drop resolved entries, keeping only pending ones. Called on feature
    /// unmount so a long session does not accumulate history forever.
    pub fn clear_resolved(&mut self) {
        self.writes.retain(|_, write| matches!(write.state, WriteState::Pending));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_confirm_lifecycle() {
        let mut ledger = OptimisticLedger::new();
        let id = Uuid::new_v4();

        ledger.begin(id);
        assert!(ledger.is_pending(id));
        assert_eq!(ledger.pending_count(), 1);

        ledger.confirm(id);
        assert_eq!(ledger.state_of(id), Some(&WriteState::Confirmed));
        assert_eq!(ledger.pending_count(), 0);
    }

    #[test]
    fn begin_fail_records_reason() {
        let mut ledger = OptimisticLedger::new();
        let id = Uuid::new_v4();

        ledger.begin(id);
        ledger.fail(id, "chat message must be 1-500 characters");

        match ledger.state_of(id) {
            Some(WriteState::Failed { reason }) => {
                assert!(reason.contains("500 characters"));
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[test]
    fn resolving_an_untracked_id_is_a_no_op() {
        let mut ledger = OptimisticLedger::new();
        let id = Uuid::new_v4();

        ledger.confirm(id);
        ledger.fail(id, "nope");
        assert_eq!(ledger.state_of(id), None);
    }

    #[test]
    fn clear_resolved_keeps_pending_writes() {
        let mut ledger = OptimisticLedger::new();
        let pending = Uuid::new_v4();
        let confirmed = Uuid::new_v4();
        let failed = Uuid::new_v4();

        ledger.begin(pending);
        ledger.begin(confirmed);
        ledger.begin(failed);
        ledger.confirm(confirmed);
        ledger.fail(failed, "rejected");

        ledger.clear_resolved();

        assert!(ledger.is_pending(pending));
        assert_eq!(ledger.state_of(confirmed), None);
        assert_eq!(ledger.state_of(failed), None);
    }
}
