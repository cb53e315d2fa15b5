//! This module defines the `VoteLedgerRepository` trait, which provides an interface
//! for the durable record of each user's current vote, and the read-only
//! `VoteHistoryRepository` used to rank targets over a time window.
use chrono::{DateTime, Utc};
use votes_ranker_shared::types::{
    TargetActivity, TargetId, TargetType, UserId, VoteDeltaEvent, VoteRecord, VoteTransition,
};

use crate::errors::RepositoryError;

/// A trait that defines the interface for the vote ledger store.
///
/// Implementors hold exactly one `VoteRecord` per `(user_id, target_id)` and
/// commit every change together with its delta event.
#[async_trait::async_trait]
pub trait VoteLedgerRepository: Send + Sync {
    /// Reads the current vote of a user on a target.
    ///
    /// # Arguments
    ///
    /// * `user_id` - The user who cast the vote.
    /// * `target_id` - The post or comment the vote applies to.
    ///
    /// # Returns
    ///
    /// `Ok(None)` when the user never voted on the target.
    async fn get_vote(
        &self,
        user_id: UserId,
        target_id: TargetId,
    ) -> Result<Option<VoteRecord>, RepositoryError>;

    /// Atomically commits a ledger transition and appends its delta event.
    ///
    /// The record is inserted when `expected_version` is `None` and no record
    /// exists yet, or updated when the stored version equals
    /// `expected_version`. In the same transaction the next sequence id of
    /// the target is allocated and the resulting `VoteDeltaEvent` is written
    /// to the outbox.
    ///
    /// # Arguments
    ///
    /// * `transition` - The new record state, the value it replaces and the
    ///   version precondition.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(event))` - The transition was committed.
    /// * `Ok(None)` - The precondition failed because a concurrent writer
    ///   changed (or created) the record first. Nothing was written.
    /// * `Err(RepositoryError)` - The store could not be reached.
    async fn commit_transition(
        &self,
        transition: &VoteTransition,
    ) -> Result<Option<VoteDeltaEvent>, RepositoryError>;
}

/// Read-only access to vote history, grouped per target.
#[async_trait::async_trait]
pub trait VoteHistoryRepository: Send + Sync {
    /// Sums the current vote values of every record of `target_type` whose
    /// last change falls inside `[window_start, window_end]`.
    ///
    /// Records holding no active vote are ignored, so only targets with at
    /// least one active vote changed inside the window are returned. The
    /// order of the returned activity is unspecified.
    async fn window_activity(
        &self,
        target_type: TargetType,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<Vec<TargetActivity>, RepositoryError>;
}
