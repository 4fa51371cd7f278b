use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use greenroom_common::protocol::ws::PresenceEntry;
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-memory presence roster, one entry per live websocket session. Presence
/// is ephemeral: a restart empties the roster and clients repopulate it on
/// reconnect.
#[derive(Clone, Default)]
pub struct PresenceStore {
    state: Arc<RwLock<HashMap<Uuid, HashMap<Uuid, SessionPresence>>>>,
}

#[derive(Debug, Clone)]
struct SessionPresence {
    registration_id: Uuid,
    display_name: String,
    joined_at: DateTime<Utc>,
}

impl PresenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn join(
        &self,
        webinar_id: Uuid,
        session_id: Uuid,
        registration_id: Uuid,
        display_name: String,
    ) -> PresenceEntry {
        let joined_at = Utc::now();
        let mut state = self.state.write().await;
        state.entry(webinar_id).or_default().insert(
            session_id,
            SessionPresence { registration_id, display_name: display_name.clone(), joined_at },
        );

        PresenceEntry { registration_id, display_name, joined_at }
    }

    /// Removes the session and reports whether the registrant still has any
    /// other session in the roster. Callers only broadcast a leave when the
    /// last session for a registrant goes away.
    pub async fn leave(&self, webinar_id: Uuid, session_id: Uuid) -> Option<LeaveOutcome> {
        let mut state = self.state.write().await;
        let sessions = state.get_mut(&webinar_id)?;
        let removed = sessions.remove(&session_id)?;
        let still_present = sessions
            .values()
            .any(|session| session.registration_id == removed.registration_id);
        if sessions.is_empty() {
            state.remove(&webinar_id);
        }

        Some(LeaveOutcome { registration_id: removed.registration_id, still_present })
    }

    /// Current roster ordered by join time, deduplicated per registrant
    /// (earliest session wins).
    pub async fn snapshot(&self, webinar_id: Uuid) -> Vec<PresenceEntry> {
        let state = self.state.read().await;
        let Some(sessions) = state.get(&webinar_id) else {
            return Vec::new();
        };

        let mut earliest: HashMap<Uuid, &SessionPresence> = HashMap::new();
        for session in sessions.values() {
            earliest
                .entry(session.registration_id)
                .and_modify(|existing| {
                    if session.joined_at < existing.joined_at {
                        *existing = session;
                    }
                })
                .or_insert(session);
        }

        let mut entries: Vec<PresenceEntry> = earliest
            .into_values()
            .map(|session| PresenceEntry {
                registration_id: session.registration_id,
                display_name: session.display_name.clone(),
                joined_at: session.joined_at,
            })
            .collect();
        entries.sort_by(|a, b| a.joined_at.cmp(&b.joined_at));
        entries
    }

    /// Number of distinct registrants currently connected.
    pub async fn viewer_count(&self, webinar_id: Uuid) -> usize {
        let state = self.state.read().await;
        let Some(sessions) = state.get(&webinar_id) else {
            return 0;
        };

        let mut registrants: Vec<Uuid> =
            sessions.values().map(|session| session.registration_id).collect();
        registrants.sort_unstable();
        registrants.dedup();
        registrants.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaveOutcome {
    pub registration_id: Uuid,
    /// True when another session for the same registrant remains connected.
    pub still_present: bool,
}
