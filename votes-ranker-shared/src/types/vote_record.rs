use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{TargetId, TargetType, UserId, VoteValue};

/// Represents a user's current vote on a post or comment.
///
/// There is at most one record per `(user_id, target_id)`. Records are never
/// deleted: retracting a vote stores `VoteValue::Remove`. `version` starts at 0
/// and is bumped on every change, which is what compare-and-swap updates key on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoteRecord {
    pub user_id: UserId,
    pub target_id: TargetId,
    pub target_type: TargetType,
    pub value: VoteValue,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}
