//! This module defines the `CounterRepository` trait, the interface to the
//! running upvote/downvote totals of every target.
use votes_ranker_shared::types::{AggregateCounter, SequenceId, TargetId};

use crate::errors::RepositoryError;

/// A trait that defines the interface for the aggregate counter store.
#[async_trait::async_trait]
pub trait CounterRepository: Send + Sync {
    /// Reads the counter of a single target.
    ///
    /// # Returns
    ///
    /// `Ok(None)` when no delta has been applied to the target yet.
    async fn get_counter(
        &self,
        target_id: TargetId,
    ) -> Result<Option<AggregateCounter>, RepositoryError>;

    /// Reads the counters of many targets in one round trip.
    ///
    /// Targets without a counter are absent from the result.
    async fn get_counters(
        &self,
        target_ids: &[TargetId],
    ) -> Result<Vec<AggregateCounter>, RepositoryError>;

    /// Stores a counter if the stored one was last advanced to
    /// `expected_sequence_id`.
    ///
    /// An `expected_sequence_id` of 0 means the counter must not exist yet.
    /// Totals and `last_applied_sequence_id` are written together.
    ///
    /// # Arguments
    ///
    /// * `counter` - The counter with the new totals and sequence id.
    /// * `expected_sequence_id` - The sequence id the stored counter must hold.
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - The counter was written.
    /// * `Ok(false)` - The stored counter moved on; nothing was written.
    async fn save_counter(
        &self,
        counter: &AggregateCounter,
        expected_sequence_id: SequenceId,
    ) -> Result<bool, RepositoryError>;
}
