use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{SequenceId, TargetId, TargetType, VoteValue};

/// Represents one committed change of a user's vote on a target.
///
/// Events are immutable and append-only. `sequence_id` is allocated per
/// target in the same transaction that commits the ledger change, so a
/// target's events form a gapless sequence starting at 1.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoteDeltaEvent {
    pub sequence_id: SequenceId,
    pub target_id: TargetId,
    pub target_type: TargetType,
    pub old_value: VoteValue,
    pub new_value: VoteValue,
    pub timestamp: DateTime<Utc>,
}

impl VoteDeltaEvent {
    /// Signed change this event causes to the `(upvotes, downvotes)` buckets.
    pub fn counter_delta(&self) -> (i64, i64) {
        let (old_up, old_down) = self.old_value.contribution();
        let (new_up, new_down) = self.new_value.contribution();
        (new_up - old_up, new_down - old_down)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn event(old_value: VoteValue, new_value: VoteValue) -> VoteDeltaEvent {
        VoteDeltaEvent {
            sequence_id: 1,
            target_id: Uuid::nil(),
            target_type: TargetType::Post,
            old_value,
            new_value,
            timestamp: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    #[test]
    fn test_counter_delta_upvote_downvote() {
        assert_eq!(event(VoteValue::Up, VoteValue::Down).counter_delta(), (-1, 1));
    }

    #[test]
    fn test_counter_delta_upvote_remove() {
        assert_eq!(event(VoteValue::Up, VoteValue::Remove).counter_delta(), (-1, 0));
    }

    #[test]
    fn test_counter_delta_downvote_upvote() {
        assert_eq!(event(VoteValue::Down, VoteValue::Up).counter_delta(), (1, -1));
    }

    #[test]
    fn test_counter_delta_downvote_remove() {
        assert_eq!(event(VoteValue::Down, VoteValue::Remove).counter_delta(), (0, -1));
    }

    #[test]
    fn test_counter_delta_first_vote() {
        assert_eq!(event(VoteValue::Remove, VoteValue::Up).counter_delta(), (1, 0));
        assert_eq!(event(VoteValue::Remove, VoteValue::Down).counter_delta(), (0, 1));
    }
}
