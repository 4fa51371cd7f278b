// Watch-time reporter: uninitialized → active → ended.
//
// Two triggers feed it — a fixed-interval timer and a minute boundary on
// the playback position — but a throttle coalesces them so at most one
// progress report goes out per interval. The server's reply is the
// authoritative milestone record; the local mirror only exists so the UI
// can react without waiting a round trip.
//
// Known gap, accepted: if the page dies without `end()` or the unload
// beacon firing, the session stays open server-side at its last reported
// position. Watch time is a soft analytics signal, not billing data.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use greenroom_common::types::{newly_crossed, percent_watched, WatchSession};

/// Default gap between progress reports.
pub const DEFAULT_REPORT_INTERVAL_SECS: i64 = 30;

/// Lifecycle of one viewing session's tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    Uninitialized,
    Active,
    Ended,
}

/// A progress report ready to send to the server.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProgressReport {
    pub session_id: Uuid,
    pub position_seconds: i32,
    pub duration_seconds: i32,
}

/// Per-session watch-time state machine.
#[derive(Debug)]
pub struct WatchTimeTracker {
    state: TrackerState,
    session_id: Option<Uuid>,
    duration_seconds: i32,
    last_position_seconds: i32,
    /// Local mirror of the server's milestone record.
    milestones_hit: Vec<i32>,
    last_report_at: Option<DateTime<Utc>>,
    interval: Duration,
}

impl Default for WatchTimeTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl WatchTimeTracker {
    pub fn new() -> Self {
        Self::with_interval(Duration::seconds(DEFAULT_REPORT_INTERVAL_SECS))
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self {
            state: TrackerState::Uninitialized,
            session_id: None,
            duration_seconds: 0,
            last_position_seconds: 0,
            milestones_hit: Vec::new(),
            last_report_at: None,
            interval,
        }
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    pub fn milestones_hit(&self) -> &[i32] {
        &self.milestones_hit
    }

    /// First mount while media is playing: the session row was created
    /// via REST and the tracker goes active.
    pub fn begin(&mut self, session: &WatchSession) {
        if self.state != TrackerState::Uninitialized {
            return;
        }
        self.state = TrackerState::Active;
        self.session_id = Some(session.id);
        self.duration_seconds = session.duration_seconds;
        self.last_position_seconds = session.last_position_seconds;
        self.milestones_hit = session.milestones_hit.clone();
    }

    /// Interval-timer trigger.
    pub fn on_timer(&mut self, now: DateTime<Utc>, position_seconds: i32) -> Option<ProgressReport> {
        self.maybe_report(now, position_seconds)
    }

    /// Minute-boundary trigger on the playback position. Shares the
    /// throttle with the timer so the two never double-report.
    pub fn on_minute_boundary(
        &mut self,
        now: DateTime<Utc>,
        position_seconds: i32,
    ) -> Option<ProgressReport> {
        self.maybe_report(now, position_seconds)
    }

    /// Percentage watched at the given position, floored.
    pub fn percent_at(&self, position_seconds: i32) -> u8 {
        percent_watched(position_seconds, self.duration_seconds)
    }

    /// Milestones the local mirror expects the next report to claim. The
    /// UI may show these immediately; the server reply corrects them.
    pub fn expected_milestones(&self, position_seconds: i32) -> Vec<u8> {
        newly_crossed(self.percent_at(position_seconds), &self.milestones_hit)
    }

    /// Fold in the server's reply to a progress report. The reply is
    /// authoritative: a retried or raced report never double-counts
    /// because the server checks `milestones_hit` atomically.
    pub fn apply_report_reply(&mut self, session: &WatchSession) {
        if self.session_id != Some(session.id) {
            return;
        }
        self.milestones_hit = session.milestones_hit.clone();
        self.last_position_seconds =
            self.last_position_seconds.max(session.last_position_seconds);
    }

    /// Component teardown or the unload beacon: emit the session id for a
    /// best-effort end call and stop reporting.
    pub fn end(&mut self) -> Option<Uuid> {
        if self.state != TrackerState::Active {
            return None;
        }
        self.state = TrackerState::Ended;
        self.session_id
    }

    fn maybe_report(&mut self, now: DateTime<Utc>, position_seconds: i32) -> Option<ProgressReport> {
        if self.state != TrackerState::Active {
            return None;
        }
        let session_id = self.session_id?;
        if let Some(last) = self.last_report_at {
            if now - last < self.interval {
                return None;
            }
        }
        self.last_report_at = Some(now);
        self.last_position_seconds = self.last_position_seconds.max(position_seconds);
        Some(ProgressReport {
            session_id,
            position_seconds,
            duration_seconds: self.duration_seconds,
        })
    }
}
