use std::collections::HashMap;

use chrono::{DateTime, Utc};
use greenroom_common::types::{EngagementEvent, EngagementKind};
use serde::Serialize;
use uuid::Uuid;

/// Default point weights, applied when a webinar carries no custom table.
const DEFAULT_WEIGHTS: [(EngagementKind, i32); 10] = [
    (EngagementKind::ChatMessage, 1),
    (EngagementKind::QaSubmit, 3),
    (EngagementKind::QaUpvote, 1),
    (EngagementKind::PollResponse, 2),
    (EngagementKind::Reaction, 1),
    (EngagementKind::CtaClick, 5),
    (EngagementKind::Watch25, 1),
    (EngagementKind::Watch50, 2),
    (EngagementKind::Watch75, 3),
    (EngagementKind::Watch100, 5),
];

/// Resolves points for an engagement kind. A custom table fully replaces the
/// defaults: kinds it omits score zero.
#[derive(Debug, Clone, Default)]
pub enum PointTable {
    #[default]
    Default,
    Custom(HashMap<String, i32>),
}

impl PointTable {
    pub fn from_weights(weights: Option<HashMap<String, i32>>) -> Self {
        match weights {
            Some(weights) => Self::Custom(weights),
            None => Self::Default,
        }
    }

    pub fn points_for(&self, kind: EngagementKind) -> i32 {
        match self {
            Self::Default => DEFAULT_WEIGHTS
                .iter()
                .find(|(candidate, _)| *candidate == kind)
                .map(|(_, points)| *points)
                .unwrap_or(0),
            Self::Custom(weights) => weights.get(kind.as_str()).copied().unwrap_or(0),
        }
    }
}

/// One leaderboard row, already ranked.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub registration_id: Uuid,
    pub score: i64,
    pub event_count: usize,
    pub first_engaged_at: DateTime<Utc>,
}

/// Histogram bucket over registrant scores.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ScoreBucket {
    pub label: &'static str,
    pub registrants: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EngagementSummary {
    pub registrant_count: usize,
    pub event_count: usize,
    pub total_points: i64,
    pub mean_score: f64,
    pub distribution: Vec<ScoreBucket>,
}

const BUCKET_BOUNDS: [(&str, i64, i64); 6] = [
    ("0", 0, 0),
    ("1-9", 1, 9),
    ("10-24", 10, 24),
    ("25-49", 25, 49),
    ("50-99", 50, 99),
    ("100+", 100, i64::MAX),
];

/// Ranks registrants by total points. Ties break toward the registrant who
/// engaged first.
pub fn leaderboard(events: &[EngagementEvent], limit: usize) -> Vec<LeaderboardEntry> {
    struct Accum {
        score: i64,
        event_count: usize,
        first_engaged_at: DateTime<Utc>,
    }

    let mut totals: HashMap<Uuid, Accum> = HashMap::new();
    for event in events {
        totals
            .entry(event.registration_id)
            .and_modify(|accum| {
                accum.score += i64::from(event.points_awarded);
                accum.event_count += 1;
                if event.created_at < accum.first_engaged_at {
                    accum.first_engaged_at = event.created_at;
                }
            })
            .or_insert(Accum {
                score: i64::from(event.points_awarded),
                event_count: 1,
                first_engaged_at: event.created_at,
            });
    }

    let mut ranked: Vec<(Uuid, Accum)> = totals.into_iter().collect();
    ranked.sort_by(|(id_a, a), (id_b, b)| {
        b.score
            .cmp(&a.score)
            .then(a.first_engaged_at.cmp(&b.first_engaged_at))
            .then(id_a.cmp(id_b))
    });
    ranked.truncate(limit);

    ranked
        .into_iter()
        .enumerate()
        .map(|(index, (registration_id, accum))| LeaderboardEntry {
            rank: index + 1,
            registration_id,
            score: accum.score,
            event_count: accum.event_count,
            first_engaged_at: accum.first_engaged_at,
        })
        .collect()
}

pub fn summarize(events: &[EngagementEvent]) -> EngagementSummary {
    let mut totals: HashMap<Uuid, i64> = HashMap::new();
    let mut total_points: i64 = 0;
    for event in events {
        let points = i64::from(event.points_awarded);
        *totals.entry(event.registration_id).or_insert(0) += points;
        total_points += points;
    }

    let registrant_count = totals.len();
    let mean_score = if registrant_count == 0 {
        0.0
    } else {
        total_points as f64 / registrant_count as f64
    };

    let mut distribution: Vec<ScoreBucket> = BUCKET_BOUNDS
        .iter()
        .map(|(label, _, _)| ScoreBucket { label, registrants: 0 })
        .collect();
    for score in totals.values() {
        for (index, (_, low, high)) in BUCKET_BOUNDS.iter().enumerate() {
            if score >= low && score <= high {
                distribution[index].registrants += 1;
                break;
            }
        }
    }

    EngagementSummary {
        registrant_count,
        event_count: events.len(),
        total_points,
        mean_score,
        distribution,
    }
}
