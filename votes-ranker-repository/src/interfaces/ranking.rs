use std::time::Duration;

use uuid::Uuid;
use votes_ranker_shared::types::RankingSnapshot;

use crate::errors::RepositoryError;

/// Trait for persisting published ranking snapshots.
#[async_trait::async_trait]
pub trait SnapshotRepository: Send + Sync {
    /// Stores a snapshot as the newest version and prunes everything but the
    /// two most recent versions.
    async fn save_snapshot(&self, snapshot: &RankingSnapshot) -> Result<(), RepositoryError>;

    /// Loads the most recently saved snapshot, if any.
    async fn load_latest_snapshot(&self) -> Result<Option<RankingSnapshot>, RepositoryError>;
}

/// Trait for the time-bounded mutual exclusion of ranking runs.
///
/// A lease is held by one holder until it is released or its time to live
/// runs out, after which any holder may take it.
#[async_trait::async_trait]
pub trait LeaseRepository: Send + Sync {
    /// Takes the lease `name` for `holder` if it is free, expired, or already
    /// held by `holder`. Returns whether the lease is now held by `holder`.
    async fn try_acquire_lease(
        &self,
        name: &str,
        holder: Uuid,
        ttl: Duration,
    ) -> Result<bool, RepositoryError>;

    /// Releases the lease if it is held by `holder`.
    async fn release_lease(&self, name: &str, holder: Uuid) -> Result<(), RepositoryError>;
}
