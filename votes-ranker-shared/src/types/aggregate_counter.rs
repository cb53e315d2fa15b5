use serde::{Deserialize, Serialize};

use crate::types::{SequenceId, TargetId, TargetType};

/// Represents the running vote totals of a target.
///
/// `last_applied_sequence_id` is the sequence id of the newest delta folded
/// into the totals; it only moves forward and is what makes redelivered
/// deltas harmless.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AggregateCounter {
    pub target_id: TargetId,
    pub target_type: TargetType,
    pub upvotes: i64,
    pub downvotes: i64,
    pub last_applied_sequence_id: SequenceId,
}

impl AggregateCounter {
    /// An empty counter, as it exists before the first delta of a target.
    pub fn empty(target_id: TargetId, target_type: TargetType) -> Self {
        Self {
            target_id,
            target_type,
            upvotes: 0,
            downvotes: 0,
            last_applied_sequence_id: 0,
        }
    }

    pub fn totals(&self) -> VoteTotals {
        VoteTotals {
            upvotes: self.upvotes,
            downvotes: self.downvotes,
        }
    }
}

/// Upvote and downvote totals surfaced to the post/comment representation.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoteTotals {
    pub upvotes: i64,
    pub downvotes: i64,
}

impl VoteTotals {
    pub fn score(&self) -> i64 {
        self.upvotes - self.downvotes
    }
}
