//! Error types for the aggregator of the Votes Ranker Pipeline.
//! Every variant is transient from the point of view of a partition worker,
//! which retries the event with backoff until it is applied.
use thiserror::Error;
use votes_ranker_repository::RepositoryError;
use votes_ranker_shared::types::{SequenceId, TargetId};

/// Represents errors that can occur while applying a delta to its counter.
#[derive(Debug, Error)]
pub enum AggregatorError {
    #[error("Counter repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("Counter of target {target_id} moved past sequence {expected}")]
    ConcurrentUpdate {
        target_id: TargetId,
        expected: SequenceId,
    },
}
