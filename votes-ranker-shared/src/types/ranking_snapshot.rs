use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::TargetId;

/// Vote activity of one target inside a ranking window.
///
/// `score` is the sum of the current values of the votes last changed inside
/// the window and `last_activity` the most recent of those changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetActivity {
    pub target_id: TargetId,
    pub score: i64,
    pub last_activity: DateTime<Utc>,
}

/// One position of a published leaderboard.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RankingEntry {
    pub target_id: TargetId,
    pub score: i64,
    pub tie_break_timestamp: DateTime<Utc>,
}

/// Represents a fully computed leaderboard.
///
/// Snapshots are immutable once published and are replaced as a whole.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RankingSnapshot {
    pub generated_at: DateTime<Utc>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub entries: Vec<RankingEntry>,
}

/// A leaderboard row as returned to readers, `rank` starting at 1.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RankedPost {
    pub target_id: TargetId,
    pub score: i64,
    pub rank: usize,
}

impl RankingSnapshot {
    /// Returns the first `limit` entries with their 1-based rank.
    pub fn top(&self, limit: usize) -> Vec<RankedPost> {
        self.entries
            .iter()
            .take(limit)
            .enumerate()
            .map(|(index, entry)| RankedPost {
                target_id: entry.target_id,
                score: entry.score,
                rank: index + 1,
            })
            .collect()
    }
}
