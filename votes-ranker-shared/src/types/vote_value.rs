use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Represents the vote currently held by a user on a target.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum VoteValue {
    /// Indicates an upvote (`+1`).
    Up,
    /// Indicates a downvote (`-1`).
    Down,
    /// Indicates the absence or retraction of a vote (`0`).
    #[default]
    Remove,
}

/// Returned when a raw vote value is outside `{-1, 0, +1}`.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("invalid vote value: {0} (expected -1, 0 or 1)")]
pub struct InvalidVoteValue(pub i16);

impl VoteValue {
    /// Signed representation used on the wire and in storage.
    pub fn as_i16(self) -> i16 {
        match self {
            VoteValue::Up => 1,
            VoteValue::Down => -1,
            VoteValue::Remove => 0,
        }
    }

    /// Contribution of this value to the `(upvotes, downvotes)` buckets.
    ///
    /// `Up` adds one upvote, `Down` one downvote and `Remove` nothing.
    pub fn contribution(self) -> (i64, i64) {
        match self {
            VoteValue::Up => (1, 0),
            VoteValue::Down => (0, 1),
            VoteValue::Remove => (0, 0),
        }
    }

    /// Whether this value counts towards any bucket.
    pub fn is_active(self) -> bool {
        self != VoteValue::Remove
    }
}

impl TryFrom<i16> for VoteValue {
    type Error = InvalidVoteValue;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(VoteValue::Up),
            -1 => Ok(VoteValue::Down),
            0 => Ok(VoteValue::Remove),
            other => Err(InvalidVoteValue(other)),
        }
    }
}

impl From<VoteValue> for i16 {
    fn from(value: VoteValue) -> Self {
        value.as_i16()
    }
}

/// The kind of content a vote targets.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TargetType {
    Post,
    Comment,
}

/// Returned when a stored target type discriminant is unknown.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("invalid target type: {0}")]
pub struct InvalidTargetType(pub i16);

impl TargetType {
    pub fn as_i16(self) -> i16 {
        match self {
            TargetType::Post => 0,
            TargetType::Comment => 1,
        }
    }
}

impl TryFrom<i16> for TargetType {
    type Error = InvalidTargetType;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(TargetType::Post),
            1 => Ok(TargetType::Comment),
            other => Err(InvalidTargetType(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vote_value_from_raw() {
        assert_eq!(VoteValue::try_from(1), Ok(VoteValue::Up));
        assert_eq!(VoteValue::try_from(-1), Ok(VoteValue::Down));
        assert_eq!(VoteValue::try_from(0), Ok(VoteValue::Remove));
    }

    #[test]
    fn test_vote_value_rejects_out_of_range() {
        assert_eq!(VoteValue::try_from(2), Err(InvalidVoteValue(2)));
        assert_eq!(VoteValue::try_from(-5), Err(InvalidVoteValue(-5)));
    }

    #[test]
    fn test_vote_value_contribution() {
        assert_eq!(VoteValue::Up.contribution(), (1, 0));
        assert_eq!(VoteValue::Down.contribution(), (0, 1));
        assert_eq!(VoteValue::Remove.contribution(), (0, 0));
    }

    #[test]
    fn test_target_type_discriminants() {
        assert_eq!(TargetType::try_from(TargetType::Post.as_i16()), Ok(TargetType::Post));
        assert_eq!(TargetType::try_from(TargetType::Comment.as_i16()), Ok(TargetType::Comment));
        assert_eq!(TargetType::try_from(7), Err(InvalidTargetType(7)));
    }
}
