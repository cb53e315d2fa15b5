use votes_ranker_shared::types::{SequenceId, TargetId, VoteDeltaEvent};

use crate::errors::RepositoryError;

/// Trait for interacting with the delta outbox.
///
/// The outbox is written by `VoteLedgerRepository::commit_transition` and acts
/// as the durable buffer between a committed ledger change and its delivery
/// to the transport.
#[async_trait::async_trait]
pub trait DeltaOutboxRepository: Send + Sync {
    /// Returns up to `limit` events not yet handed to the transport, ordered
    /// by target and then by sequence id.
    async fn fetch_unpublished(&self, limit: i64) -> Result<Vec<VoteDeltaEvent>, RepositoryError>;

    /// Flags an event as delivered to the transport.
    async fn mark_published(
        &self,
        target_id: TargetId,
        sequence_id: SequenceId,
    ) -> Result<(), RepositoryError>;

    /// Clears the delivered flag of an event so the relay sends it again.
    ///
    /// Used when a redelivery of an already published event fails.
    async fn mark_unpublished(
        &self,
        target_id: TargetId,
        sequence_id: SequenceId,
    ) -> Result<(), RepositoryError>;

    /// Deletes delivered events that their target's counter has applied.
    ///
    /// Returns the number of events removed.
    async fn prune_applied(&self) -> Result<u64, RepositoryError>;

    /// Returns up to `limit` events whose sequence id is ahead of the
    /// `last_applied_sequence_id` of their target's counter, ordered by
    /// target and then by sequence id.
    ///
    /// Used on startup to redeliver events that reached the transport but
    /// were never applied.
    async fn fetch_unapplied(&self, limit: i64) -> Result<Vec<VoteDeltaEvent>, RepositoryError>;
}
