// Core domain types shared across all Greenroom crates.
//
// Every entity is scoped to a webinar and a registration (an attendee's
// per-webinar identity). Validation lives here so both the server boundary
// and the client's optimistic path reject the same malformed input.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum chat message length in characters.
pub const MAX_CHAT_MESSAGE_CHARS: usize = 500;

/// Minimum number of options in a poll.
pub const MIN_POLL_OPTIONS: usize = 2;
/// Maximum number of options in a poll.
pub const MAX_POLL_OPTIONS: usize = 10;

/// The fixed emoji palette viewers may react with.
pub const REACTION_PALETTE: [&str; 8] = ["👍", "❤️", "😂", "😮", "👏", "🎉", "🔥", "💯"];

/// Watch-progress milestones, in percent watched.
pub const WATCH_MILESTONES: [u8; 4] = [25, 50, 75, 100];

/// Validation failures for viewer-supplied input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("chat message must be 1-{MAX_CHAT_MESSAGE_CHARS} characters")]
    ChatMessageLength,
    #[error("poll must have {MIN_POLL_OPTIONS}-{MAX_POLL_OPTIONS} options")]
    PollOptionCount,
    #[error("poll option ids must be non-empty and unique")]
    PollOptionIds,
    #[error("poll option text must not be empty")]
    PollOptionText,
    #[error("selected option '{0}' is not one of the poll's options")]
    UnknownPollOption(String),
    #[error("poll does not allow multiple selections")]
    MultipleSelectionsNotAllowed,
    #[error("at least one option must be selected")]
    EmptySelection,
    #[error("emoji is not in the reaction palette")]
    UnknownEmoji,
    #[error("question must not be empty")]
    EmptyQuestion,
}

/// A chat message. Content is immutable once created; pin/hide flags are
/// mutated only by host moderation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: Uuid,
    pub webinar_id: Uuid,
    pub registration_id: Uuid,
    pub message: String,
    pub is_pinned: bool,
    pub is_hidden: bool,
    pub created_at: DateTime<Utc>,
}

/// Validate a chat message body before it reaches the store.
pub fn validate_chat_message(message: &str) -> Result<(), ValidationError> {
    let length = message.chars().count();
    if length == 0 || length > MAX_CHAT_MESSAGE_CHARS {
        return Err(ValidationError::ChatMessageLength);
    }
    Ok(())
}

/// Lifecycle status of a Q&A question.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QaStatus {
    Open,
    Answered,
}

impl QaStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Answered => "answered",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "open" => Some(Self::Open),
            "answered" => Some(Self::Answered),
            _ => None,
        }
    }
}

/// An audience question. `upvote_count` is derived from the upvote rows and
/// is never written directly by a client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QaQuestion {
    pub id: Uuid,
    pub webinar_id: Uuid,
    pub registration_id: Uuid,
    pub question: String,
    pub answer: Option<String>,
    pub status: QaStatus,
    pub is_highlighted: bool,
    pub is_hidden: bool,
    pub upvote_count: i32,
    pub created_at: DateTime<Utc>,
}

/// One registrant's upvote on one question. The existence of this row is the
/// sole source of truth for "has this registrant upvoted this question".
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct QaUpvote {
    pub question_id: Uuid,
    pub registration_id: Uuid,
}

/// Lifecycle status of a poll.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PollStatus {
    Draft,
    Active,
    Closed,
}

impl PollStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Closed => "closed",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "draft" => Some(Self::Draft),
            "active" => Some(Self::Active),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

/// One selectable poll option. Stored payloads are validated into this shape
/// at the write boundary; malformed stored shapes are rejected at read time
/// rather than trusted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PollOption {
    pub option_id: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Poll {
    pub id: Uuid,
    pub webinar_id: Uuid,
    pub question: String,
    pub options: Vec<PollOption>,
    pub allow_multiple: bool,
    pub show_results_live: bool,
    pub status: PollStatus,
    /// Set when the poll is activated; the client treats the most recently
    /// activated poll as "the" active poll when several are active.
    pub activated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Poll {
    /// Validate an option list: 2-10 entries, non-empty unique ids,
    /// non-empty text.
    pub fn validate_options(options: &[PollOption]) -> Result<(), ValidationError> {
        if options.len() < MIN_POLL_OPTIONS || options.len() > MAX_POLL_OPTIONS {
            return Err(ValidationError::PollOptionCount);
        }

        let mut seen = std::collections::HashSet::new();
        for option in options {
            if option.option_id.trim().is_empty() {
                return Err(ValidationError::PollOptionIds);
            }
            if !seen.insert(option.option_id.as_str()) {
                return Err(ValidationError::PollOptionIds);
            }
            if option.text.trim().is_empty() {
                return Err(ValidationError::PollOptionText);
            }
        }

        Ok(())
    }

    /// Validate a registrant's selection against this poll's options and
    /// `allow_multiple` setting.
    pub fn validate_selection(&self, selected: &[String]) -> Result<(), ValidationError> {
        if selected.is_empty() {
            return Err(ValidationError::EmptySelection);
        }
        if !self.allow_multiple && selected.len() > 1 {
            return Err(ValidationError::MultipleSelectionsNotAllowed);
        }
        for option_id in selected {
            if !self.options.iter().any(|option| &option.option_id == option_id) {
                return Err(ValidationError::UnknownPollOption(option_id.clone()));
            }
        }
        Ok(())
    }
}

/// One registrant's vote on one poll (at most one per (poll, registrant)).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PollResponse {
    pub id: Uuid,
    pub poll_id: Uuid,
    pub registration_id: Uuid,
    pub selected_options: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// An ephemeral emoji reaction. Clients display and discard; the store keeps
/// rows only for count aggregation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reaction {
    pub id: Uuid,
    pub webinar_id: Uuid,
    pub registration_id: Uuid,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

/// Validate a reaction emoji against the fixed palette.
pub fn validate_emoji(emoji: &str) -> Result<(), ValidationError> {
    if REACTION_PALETTE.contains(&emoji) {
        Ok(())
    } else {
        Err(ValidationError::UnknownEmoji)
    }
}

/// A viewing session with continuous progress and discrete milestones.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WatchSession {
    pub id: Uuid,
    pub webinar_id: Uuid,
    pub registration_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub last_position_seconds: i32,
    pub duration_seconds: i32,
    /// Subset of [`WATCH_MILESTONES`], each recorded at most once.
    pub milestones_hit: Vec<i32>,
}

/// Percentage watched, floored: `floor(position / duration * 100)`.
/// A zero or negative duration yields 0.
pub fn percent_watched(position_seconds: i32, duration_seconds: i32) -> u8 {
    if duration_seconds <= 0 || position_seconds <= 0 {
        return 0;
    }
    let percent = (position_seconds as i64 * 100) / duration_seconds as i64;
    percent.clamp(0, 100) as u8
}

/// Milestones newly crossed at `percent`, excluding any already hit.
/// A jump past several milestones (e.g. 10% -> 75%) crosses all of them.
pub fn newly_crossed(percent: u8, already_hit: &[i32]) -> Vec<u8> {
    WATCH_MILESTONES
        .iter()
        .copied()
        .filter(|milestone| percent >= *milestone && !already_hit.contains(&(*milestone as i32)))
        .collect()
}

/// Every kind of scoring-relevant engagement event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EngagementKind {
    ChatMessage,
    QaSubmit,
    QaUpvote,
    PollResponse,
    Reaction,
    CtaClick,
    #[serde(rename = "watch_25")]
    Watch25,
    #[serde(rename = "watch_50")]
    Watch50,
    #[serde(rename = "watch_75")]
    Watch75,
    #[serde(rename = "watch_100")]
    Watch100,
}

impl EngagementKind {
    pub const ALL: [Self; 10] = [
        Self::ChatMessage,
        Self::QaSubmit,
        Self::QaUpvote,
        Self::PollResponse,
        Self::Reaction,
        Self::CtaClick,
        Self::Watch25,
        Self::Watch50,
        Self::Watch75,
        Self::Watch100,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ChatMessage => "chat_message",
            Self::QaSubmit => "qa_submit",
            Self::QaUpvote => "qa_upvote",
            Self::PollResponse => "poll_response",
            Self::Reaction => "reaction",
            Self::CtaClick => "cta_click",
            Self::Watch25 => "watch_25",
            Self::Watch50 => "watch_50",
            Self::Watch75 => "watch_75",
            Self::Watch100 => "watch_100",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.as_str() == value)
    }

    /// The event kind for a watch milestone percentage.
    pub const fn for_milestone(milestone: u8) -> Option<Self> {
        match milestone {
            25 => Some(Self::Watch25),
            50 => Some(Self::Watch50),
            75 => Some(Self::Watch75),
            100 => Some(Self::Watch100),
            _ => None,
        }
    }
}

/// One row of the durable engagement ledger. `points_awarded` is resolved
/// when the event is logged and is never rewritten by later weight changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngagementEvent {
    pub id: Uuid,
    pub webinar_id: Uuid,
    pub registration_id: Uuid,
    pub kind: EngagementKind,
    pub payload: serde_json::Value,
    pub points_awarded: i32,
    pub created_at: DateTime<Utc>,
}

/// Webinar lifecycle status, owned by the external webinar service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WebinarStatus {
    Draft,
    Scheduled,
    Live,
    Ended,
    Cancelled,
}

impl WebinarStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Scheduled => "scheduled",
            Self::Live => "live",
            Self::Ended => "ended",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "draft" => Some(Self::Draft),
            "scheduled" => Some(Self::Scheduled),
            "live" => Some(Self::Live),
            "ended" => Some(Self::Ended),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// Per-webinar feature switches, owned by the external webinar service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeatureFlags {
    pub chat_enabled: bool,
    pub qa_enabled: bool,
    pub polls_enabled: bool,
    pub replay_enabled: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self { chat_enabled: true, qa_enabled: true, polls_enabled: true, replay_enabled: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(ids: &[&str]) -> Vec<PollOption> {
        ids.iter().map(|id| PollOption { option_id: id.to_string(), text: id.to_string() }).collect()
    }

    // ── Chat validation ────────────────────────────────────────────

    #[test]
    fn chat_message_accepts_up_to_limit() {
        assert!(validate_chat_message("hello").is_ok());
        assert!(validate_chat_message(&"a".repeat(MAX_CHAT_MESSAGE_CHARS)).is_ok());
    }

    #[test]
    fn chat_message_rejects_empty_and_oversized() {
        assert_eq!(validate_chat_message(""), Err(ValidationError::ChatMessageLength));
        assert_eq!(
            validate_chat_message(&"a".repeat(MAX_CHAT_MESSAGE_CHARS + 1)),
            Err(ValidationError::ChatMessageLength)
        );
    }

    #[test]
    fn chat_message_counts_chars_not_bytes() {
        // 500 multibyte characters are within the limit.
        assert!(validate_chat_message(&"é".repeat(MAX_CHAT_MESSAGE_CHARS)).is_ok());
    }

    // ── Poll option validation ─────────────────────────────────────

    #[test]
    fn poll_options_require_two_to_ten_entries() {
        assert_eq!(Poll::validate_options(&options(&["a"])), Err(ValidationError::PollOptionCount));
        assert!(Poll::validate_options(&options(&["a", "b"])).is_ok());

        let eleven: Vec<String> = (0..11).map(|i| format!("opt{i}")).collect();
        let eleven_refs: Vec<&str> = eleven.iter().map(String::as_str).collect();
        assert_eq!(
            Poll::validate_options(&options(&eleven_refs)),
            Err(ValidationError::PollOptionCount)
        );
    }

    #[test]
    fn poll_options_reject_duplicate_and_empty_ids() {
        assert_eq!(
            Poll::validate_options(&options(&["a", "a"])),
            Err(ValidationError::PollOptionIds)
        );
        assert_eq!(
            Poll::validate_options(&options(&["a", " "])),
            Err(ValidationError::PollOptionIds)
        );
    }

    #[test]
    fn poll_options_reject_empty_text() {
        let mut opts = options(&["a", "b"]);
        opts[1].text = "  ".to_string();
        assert_eq!(Poll::validate_options(&opts), Err(ValidationError::PollOptionText));
    }

    // ── Selection validation ───────────────────────────────────────

    fn single_choice_poll() -> Poll {
        Poll {
            id: Uuid::new_v4(),
            webinar_id: Uuid::new_v4(),
            question: "Yes or no?".to_string(),
            options: vec![
                PollOption { option_id: "a".into(), text: "Yes".into() },
                PollOption { option_id: "b".into(), text: "No".into() },
            ],
            allow_multiple: false,
            show_results_live: true,
            status: PollStatus::Active,
            activated_at: Some(Utc::now()),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn selection_must_match_poll_options() {
        let poll = single_choice_poll();
        assert!(poll.validate_selection(&["a".into()]).is_ok());
        assert_eq!(
            poll.validate_selection(&["z".into()]),
            Err(ValidationError::UnknownPollOption("z".into()))
        );
    }

    #[test]
    fn selection_respects_allow_multiple() {
        let mut poll = single_choice_poll();
        assert_eq!(
            poll.validate_selection(&["a".into(), "b".into()]),
            Err(ValidationError::MultipleSelectionsNotAllowed)
        );
        poll.allow_multiple = true;
        assert!(poll.validate_selection(&["a".into(), "b".into()]).is_ok());
    }

    #[test]
    fn empty_selection_is_rejected() {
        let poll = single_choice_poll();
        assert_eq!(poll.validate_selection(&[]), Err(ValidationError::EmptySelection));
    }

    // ── Emoji palette ──────────────────────────────────────────────

    #[test]
    fn palette_emoji_accepted_others_rejected() {
        assert!(validate_emoji("👍").is_ok());
        assert_eq!(validate_emoji("🦀"), Err(ValidationError::UnknownEmoji));
    }

    // ── Watch milestones ───────────────────────────────────────────

    #[test]
    fn percent_watched_floors() {
        assert_eq!(percent_watched(10, 40), 25);
        assert_eq!(percent_watched(9, 40), 22);
        assert_eq!(percent_watched(40, 40), 100);
    }

    #[test]
    fn percent_watched_handles_degenerate_durations() {
        assert_eq!(percent_watched(10, 0), 0);
        assert_eq!(percent_watched(-5, 40), 0);
        // Position past the end clamps to 100.
        assert_eq!(percent_watched(50, 40), 100);
    }

    #[test]
    fn newly_crossed_includes_skipped_milestones() {
        // Jump from 25% straight to 75% crosses 50 and 75.
        assert_eq!(newly_crossed(75, &[25]), vec![50, 75]);
    }

    #[test]
    fn newly_crossed_is_idempotent_against_already_hit() {
        assert_eq!(newly_crossed(75, &[25, 50, 75]), Vec::<u8>::new());
        assert_eq!(newly_crossed(100, &[25, 50, 75]), vec![100]);
    }

    #[test]
    fn newly_crossed_below_first_milestone_is_empty() {
        assert_eq!(newly_crossed(24, &[]), Vec::<u8>::new());
    }

    // ── Engagement kinds ───────────────────────────────────────────

    #[test]
    fn engagement_kind_round_trips_through_db_value() {
        for kind in EngagementKind::ALL {
            assert_eq!(EngagementKind::from_db_value(kind.as_str()), Some(kind));
        }
        assert_eq!(EngagementKind::from_db_value("unknown"), None);
    }

    #[test]
    fn milestone_kinds_cover_the_palette() {
        assert_eq!(EngagementKind::for_milestone(25), Some(EngagementKind::Watch25));
        assert_eq!(EngagementKind::for_milestone(50), Some(EngagementKind::Watch50));
        assert_eq!(EngagementKind::for_milestone(75), Some(EngagementKind::Watch75));
        assert_eq!(EngagementKind::for_milestone(100), Some(EngagementKind::Watch100));
        assert_eq!(EngagementKind::for_milestone(30), None);
    }

    #[test]
    fn engagement_kind_serializes_snake_case() {
        let json = serde_json::to_string(&EngagementKind::Watch25).expect("kind should serialize");
        assert_eq!(json, "\"watch_25\"");
    }
}
