//! This module defines the `VoteLedger`, the single writer of vote records.
//!
//! A cast is validated first, then resolved against the stored record and
//! committed through an optimistic compare-and-swap on the record version.
//! Every committed change carries its delta event in the same transaction
//! (transactional outbox) and is handed to the `DeltaPublisher` afterwards.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{SubsecRound, Utc};
use tracing::{debug, instrument, warn};
use votes_ranker_repository::VoteLedgerRepository;
use votes_ranker_shared::types::{
    TargetId, TargetType, UserId, VoteRecord, VoteTransition, VoteValue,
};

use crate::errors::LedgerError;
use crate::publisher::DeltaPublisher;

/// Result of a `cast_vote` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastOutcome {
    /// First vote of the user on the target.
    Created,
    /// The stored vote already has this value. Nothing changed.
    Duplicate,
    /// The stored vote changed to the new value.
    Updated,
    /// Concurrent writers kept winning the compare-and-swap.
    Conflict,
}

/// Knows which targets exist and can receive votes.
#[async_trait]
pub trait TargetDirectory: Send + Sync {
    /// Returns whether the target exists and has not been deleted.
    async fn target_exists(
        &self,
        target_id: TargetId,
        target_type: TargetType,
    ) -> Result<bool, LedgerError>;
}

/// Directory that treats every target as existing.
///
/// Used when post and comment storage is not wired into the pipeline.
pub struct AcceptAllTargets;

#[async_trait]
impl TargetDirectory for AcceptAllTargets {
    async fn target_exists(
        &self,
        _target_id: TargetId,
        _target_type: TargetType,
    ) -> Result<bool, LedgerError> {
        Ok(true)
    }
}

/// Configuration for the vote ledger.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Number of compare-and-swap attempts before giving up with `Conflict`.
    pub max_cas_attempts: u32,
    /// Base pause between attempts, multiplied by the attempt number.
    pub cas_backoff: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_cas_attempts: 5,
            cas_backoff: Duration::from_millis(5),
        }
    }
}

/// The durable record of each user's current vote on each target.
pub struct VoteLedger {
    repository: Arc<dyn VoteLedgerRepository>,
    targets: Arc<dyn TargetDirectory>,
    publisher: Arc<DeltaPublisher>,
    config: LedgerConfig,
}

impl VoteLedger {
    /// Creates a new `VoteLedger`.
    ///
    /// # Arguments
    ///
    /// * `repository` - Store of vote records and their outbox
    /// * `targets` - Directory used to reject votes on unknown targets
    /// * `publisher` - Receives each committed delta event
    /// * `config` - Compare-and-swap retry bound and backoff
    pub fn new(
        repository: Arc<dyn VoteLedgerRepository>,
        targets: Arc<dyn TargetDirectory>,
        publisher: Arc<DeltaPublisher>,
        config: LedgerConfig,
    ) -> Self {
        Self {
            repository,
            targets,
            publisher,
            config,
        }
    }

    /// Records the vote of `user_id` on `target_id`.
    ///
    /// `value` must be `-1`, `0` or `+1`; `0` retracts the vote. Validation
    /// happens before any state is read or written.
    ///
    /// # Returns
    ///
    /// * `Ok(CastOutcome::Created)` - The first vote of the user on the target.
    /// * `Ok(CastOutcome::Updated)` - The stored vote changed.
    /// * `Ok(CastOutcome::Duplicate)` - The vote already had this value (a
    ///   retraction without a stored vote included). No event is emitted.
    /// * `Ok(CastOutcome::Conflict)` - Every compare-and-swap attempt lost to
    ///   a concurrent writer.
    /// * `Err(LedgerError)` - The vote was rejected or the store failed.
    #[instrument(skip(self), fields(user_id = %user_id, target_id = %target_id))]
    pub async fn cast_vote(
        &self,
        user_id: UserId,
        target_id: TargetId,
        target_type: TargetType,
        value: i16,
    ) -> Result<CastOutcome, LedgerError> {
        let value = VoteValue::try_from(value)?;
        if !self.targets.target_exists(target_id, target_type).await? {
            return Err(LedgerError::TargetNotFound(target_id));
        }

        for attempt in 1..=self.config.max_cas_attempts {
            let stored = self.repository.get_vote(user_id, target_id).await?;
            let Some((transition, outcome)) =
                resolve_transition(stored, user_id, target_id, target_type, value)
            else {
                return Ok(CastOutcome::Duplicate);
            };

            match self.repository.commit_transition(&transition).await? {
                Some(event) => {
                    if let Err(e) = self.publisher.publish(&event).await {
                        warn!(
                            sequence_id = event.sequence_id,
                            error = %e,
                            "Committed delta could not be marked as published"
                        );
                    }
                    return Ok(outcome);
                }
                None => {
                    debug!(attempt, "Vote record changed concurrently");
                    if attempt < self.config.max_cas_attempts {
                        tokio::time::sleep(self.config.cas_backoff * attempt).await;
                    }
                }
            }
        }

        warn!(
            attempts = self.config.max_cas_attempts,
            "Giving up on vote after repeated compare-and-swap conflicts"
        );
        Ok(CastOutcome::Conflict)
    }

    /// Returns the stored vote of a user on a target.
    pub async fn get_user_vote(
        &self,
        user_id: UserId,
        target_id: TargetId,
    ) -> Result<Option<VoteRecord>, LedgerError> {
        Ok(self.repository.get_vote(user_id, target_id).await?)
    }
}

/// Decides how a cast changes the stored record.
///
/// Returns `None` when the cast is a duplicate and nothing must be written.
/// Timestamps are kept at microsecond precision, the resolution of the
/// persisted ledger.
fn resolve_transition(
    stored: Option<VoteRecord>,
    user_id: UserId,
    target_id: TargetId,
    target_type: TargetType,
    value: VoteValue,
) -> Option<(VoteTransition, CastOutcome)> {
    let now = Utc::now().trunc_subsecs(6);
    match stored {
        None if !value.is_active() => None,
        None => Some((
            VoteTransition {
                record: VoteRecord {
                    user_id,
                    target_id,
                    target_type,
                    value,
                    version: 0,
                    updated_at: now,
                },
                old_value: VoteValue::Remove,
                expected_version: None,
            },
            CastOutcome::Created,
        )),
        Some(record) if record.value == value => None,
        Some(record) => Some((
            VoteTransition {
                old_value: record.value,
                expected_version: Some(record.version),
                record: VoteRecord {
                    value,
                    version: record.version + 1,
                    updated_at: now,
                    ..record
                },
            },
            CastOutcome::Updated,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::PublisherConfig;
    use crate::transport::InMemoryDeltaLog;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;
    use votes_ranker_repository::{
        DeltaOutboxRepository, InMemoryVotesRepository, RepositoryError,
    };
    use votes_ranker_shared::types::VoteDeltaEvent;

    struct KnownTargets(Mutex<HashSet<TargetId>>);

    #[async_trait]
    impl TargetDirectory for KnownTargets {
        async fn target_exists(
            &self,
            target_id: TargetId,
            _target_type: TargetType,
        ) -> Result<bool, LedgerError> {
            Ok(self.0.lock().unwrap().contains(&target_id))
        }
    }

    /// Directory whose backing store cannot be reached.
    struct UnreachableTargets;

    #[async_trait]
    impl TargetDirectory for UnreachableTargets {
        async fn target_exists(
            &self,
            _target_id: TargetId,
            _target_type: TargetType,
        ) -> Result<bool, LedgerError> {
            Err(LedgerError::TargetDirectory("posts service timed out".to_string()))
        }
    }

    /// Ledger store where another writer always commits first.
    struct ContendedLedger {
        inner: InMemoryVotesRepository,
        commits: AtomicUsize,
    }

    #[async_trait]
    impl VoteLedgerRepository for ContendedLedger {
        async fn get_vote(
            &self,
            user_id: UserId,
            target_id: TargetId,
        ) -> Result<Option<VoteRecord>, RepositoryError> {
            self.inner.get_vote(user_id, target_id).await
        }

        async fn commit_transition(
            &self,
            _transition: &VoteTransition,
        ) -> Result<Option<VoteDeltaEvent>, RepositoryError> {
            self.commits.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }
    }

    fn publisher(repository: &Arc<InMemoryVotesRepository>) -> Arc<DeltaPublisher> {
        let log = Arc::new(InMemoryDeltaLog::new(1, 64, Duration::from_millis(10)));
        Arc::new(DeltaPublisher::new(repository.clone(), log, PublisherConfig::default()))
    }

    fn ledger(repository: &Arc<InMemoryVotesRepository>) -> VoteLedger {
        VoteLedger::new(
            repository.clone(),
            Arc::new(AcceptAllTargets),
            publisher(repository),
            LedgerConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_cast_vote_created_updated_duplicate() {
        let repository = Arc::new(InMemoryVotesRepository::new());
        let ledger = ledger(&repository);
        let user = Uuid::new_v4();
        let post = Uuid::new_v4();

        let created = ledger.cast_vote(user, post, TargetType::Post, 1).await.unwrap();
        let updated = ledger.cast_vote(user, post, TargetType::Post, -1).await.unwrap();
        let duplicate = ledger.cast_vote(user, post, TargetType::Post, -1).await.unwrap();

        assert_eq!(created, CastOutcome::Created);
        assert_eq!(updated, CastOutcome::Updated);
        assert_eq!(duplicate, CastOutcome::Duplicate);

        let record = ledger.get_user_vote(user, post).await.unwrap().unwrap();
        assert_eq!(record.value, VoteValue::Down);
        assert_eq!(record.version, 1);
        assert_eq!(repository.fetch_unapplied(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_cast_vote_emits_transition_events() {
        let repository = Arc::new(InMemoryVotesRepository::new());
        let ledger = ledger(&repository);
        let user = Uuid::new_v4();
        let post = Uuid::new_v4();

        ledger.cast_vote(user, post, TargetType::Post, 1).await.unwrap();
        ledger.cast_vote(user, post, TargetType::Post, 0).await.unwrap();

        let events = repository.fetch_unapplied(10).await.unwrap();
        let transitions: Vec<(i64, VoteValue, VoteValue)> = events
            .iter()
            .map(|event| (event.sequence_id, event.old_value, event.new_value))
            .collect();
        assert_eq!(
            transitions,
            vec![
                (1, VoteValue::Remove, VoteValue::Up),
                (2, VoteValue::Up, VoteValue::Remove),
            ]
        );
    }

    #[tokio::test]
    async fn test_retraction_without_vote_is_duplicate() {
        let repository = Arc::new(InMemoryVotesRepository::new());
        let ledger = ledger(&repository);
        let user = Uuid::new_v4();
        let post = Uuid::new_v4();

        let outcome = ledger.cast_vote(user, post, TargetType::Post, 0).await.unwrap();

        assert_eq!(outcome, CastOutcome::Duplicate);
        assert!(ledger.get_user_vote(user, post).await.unwrap().is_none());
        assert!(repository.fetch_unapplied(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_value_is_rejected_before_mutation() {
        let repository = Arc::new(InMemoryVotesRepository::new());
        let ledger = ledger(&repository);
        let user = Uuid::new_v4();
        let post = Uuid::new_v4();

        let result = ledger.cast_vote(user, post, TargetType::Post, 2).await;

        assert!(matches!(result, Err(LedgerError::InvalidValue(_))));
        assert!(ledger.get_user_vote(user, post).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_target_is_rejected() {
        let repository = Arc::new(InMemoryVotesRepository::new());
        let known = Uuid::new_v4();
        let ledger = VoteLedger::new(
            repository.clone(),
            Arc::new(KnownTargets(Mutex::new(HashSet::from([known])))),
            publisher(&repository),
            LedgerConfig::default(),
        );
        let unknown = Uuid::new_v4();

        let result = ledger
            .cast_vote(Uuid::new_v4(), unknown, TargetType::Comment, 1)
            .await;

        assert!(matches!(result, Err(LedgerError::TargetNotFound(id)) if id == unknown));
        let accepted = ledger
            .cast_vote(Uuid::new_v4(), known, TargetType::Comment, 1)
            .await
            .unwrap();
        assert_eq!(accepted, CastOutcome::Created);
    }

    #[tokio::test]
    async fn test_directory_failure_aborts_cast() {
        let repository = Arc::new(InMemoryVotesRepository::new());
        let ledger = VoteLedger::new(
            repository.clone(),
            Arc::new(UnreachableTargets),
            publisher(&repository),
            LedgerConfig::default(),
        );
        let user = Uuid::new_v4();
        let post = Uuid::new_v4();

        let result = ledger.cast_vote(user, post, TargetType::Post, 1).await;

        assert!(matches!(result, Err(LedgerError::TargetDirectory(_))));
        assert!(ledger.get_user_vote(user, post).await.unwrap().is_none());
        assert_eq!(repository.unpublished_events().unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_contention_yields_conflict() {
        let repository = Arc::new(InMemoryVotesRepository::new());
        let contended = Arc::new(ContendedLedger {
            inner: InMemoryVotesRepository::new(),
            commits: AtomicUsize::new(0),
        });
        let ledger = VoteLedger::new(
            contended.clone(),
            Arc::new(AcceptAllTargets),
            publisher(&repository),
            LedgerConfig {
                max_cas_attempts: 3,
                cas_backoff: Duration::from_millis(5),
            },
        );

        let outcome = ledger
            .cast_vote(Uuid::new_v4(), Uuid::new_v4(), TargetType::Post, 1)
            .await
            .unwrap();

        assert_eq!(outcome, CastOutcome::Conflict);
        assert_eq!(contended.commits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_resolve_transition_bumps_version() {
        let user = Uuid::new_v4();
        let post = Uuid::new_v4();
        let stored = VoteRecord {
            user_id: user,
            target_id: post,
            target_type: TargetType::Post,
            value: VoteValue::Up,
            version: 4,
            updated_at: Utc::now(),
        };

        let (transition, outcome) =
            resolve_transition(Some(stored), user, post, TargetType::Post, VoteValue::Down).unwrap();

        assert_eq!(outcome, CastOutcome::Updated);
        assert_eq!(transition.expected_version, Some(4));
        assert_eq!(transition.record.version, 5);
        assert_eq!(transition.old_value, VoteValue::Up);
    }
}
