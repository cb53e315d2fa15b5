mod aggregate_counter;
mod ranking_snapshot;
mod vote_delta_event;
mod vote_record;
mod vote_transition;
mod vote_value;

pub use aggregate_counter::{AggregateCounter, VoteTotals};
pub use ranking_snapshot::{RankedPost, RankingEntry, RankingSnapshot, TargetActivity};
pub use vote_delta_event::VoteDeltaEvent;
pub use vote_record::VoteRecord;
pub use vote_transition::VoteTransition;
pub use vote_value::{InvalidTargetType, InvalidVoteValue, TargetType, VoteValue};

/// Identifier of the user casting a vote.
pub type UserId = uuid::Uuid;

/// Identifier of a post or comment that can receive votes.
pub type TargetId = uuid::Uuid;

/// Per-target, dense, strictly increasing identifier of a delta event.
pub type SequenceId = i64;
