//! In-memory implementation of every repository trait.
//!
//! Backs the `memory` storage mode and the test suites. All state sits behind
//! a single mutex, so each trait method is atomic the same way a database
//! transaction is.
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::Instant;
use uuid::Uuid;
use votes_ranker_shared::types::{
    AggregateCounter, RankingSnapshot, SequenceId, TargetActivity, TargetId, TargetType, UserId,
    VoteDeltaEvent, VoteRecord, VoteTransition,
};

use crate::{
    CounterRepository, DeltaOutboxRepository, LeaseRepository, RepositoryError,
    SnapshotRepository, VoteHistoryRepository, VoteLedgerRepository,
};

const RETAINED_SNAPSHOTS: usize = 2;

struct OutboxEntry {
    event: VoteDeltaEvent,
    published: bool,
}

struct Lease {
    holder: Uuid,
    expires_at: Instant,
}

#[derive(Default)]
struct State {
    votes: HashMap<(UserId, TargetId), VoteRecord>,
    sequences: HashMap<TargetId, SequenceId>,
    outbox: BTreeMap<(TargetId, SequenceId), OutboxEntry>,
    counters: HashMap<TargetId, AggregateCounter>,
    snapshots: VecDeque<RankingSnapshot>,
    leases: HashMap<String, Lease>,
}

/// Process-local store implementing the ledger, outbox, history, counter,
/// snapshot and lease repositories.
#[derive(Default)]
pub struct InMemoryVotesRepository {
    state: Mutex<State>,
}

impl InMemoryVotesRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, RepositoryError> {
        self.state
            .lock()
            .map_err(|_| RepositoryError::Unavailable("in-memory store lock poisoned".to_string()))
    }

    /// Number of snapshot versions currently retained.
    pub fn stored_snapshots(&self) -> Result<usize, RepositoryError> {
        Ok(self.state()?.snapshots.len())
    }

    /// Number of outbox events still waiting for delivery.
    pub fn unpublished_events(&self) -> Result<usize, RepositoryError> {
        Ok(self.state()?.outbox.values().filter(|entry| !entry.published).count())
    }
}

#[async_trait]
impl VoteLedgerRepository for InMemoryVotesRepository {
    async fn get_vote(
        &self,
        user_id: UserId,
        target_id: TargetId,
    ) -> Result<Option<VoteRecord>, RepositoryError> {
        Ok(self.state()?.votes.get(&(user_id, target_id)).cloned())
    }

    async fn commit_transition(
        &self,
        transition: &VoteTransition,
    ) -> Result<Option<VoteDeltaEvent>, RepositoryError> {
        let mut state = self.state()?;
        let record = &transition.record;
        let key = (record.user_id, record.target_id);

        let precondition_holds = match (transition.expected_version, state.votes.get(&key)) {
            (None, None) => true,
            (Some(expected), Some(stored)) => stored.version == expected,
            _ => false,
        };
        if !precondition_holds {
            return Ok(None);
        }

        state.votes.insert(key, record.clone());

        let sequence = state.sequences.entry(record.target_id).or_insert(0);
        *sequence += 1;
        let event = VoteDeltaEvent {
            sequence_id: *sequence,
            target_id: record.target_id,
            target_type: record.target_type,
            old_value: transition.old_value,
            new_value: record.value,
            timestamp: record.updated_at,
        };
        state.outbox.insert(
            (event.target_id, event.sequence_id),
            OutboxEntry {
                event: event.clone(),
                published: false,
            },
        );

        Ok(Some(event))
    }
}

#[async_trait]
impl VoteHistoryRepository for InMemoryVotesRepository {
    async fn window_activity(
        &self,
        target_type: TargetType,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<Vec<TargetActivity>, RepositoryError> {
        let state = self.state()?;
        let mut activity: BTreeMap<TargetId, TargetActivity> = BTreeMap::new();

        let in_window = state.votes.values().filter(|record| {
            record.target_type == target_type
                && record.value.is_active()
                && record.updated_at >= window_start
                && record.updated_at <= window_end
        });
        for record in in_window {
            let entry = activity.entry(record.target_id).or_insert(TargetActivity {
                target_id: record.target_id,
                score: 0,
                last_activity: record.updated_at,
            });
            entry.score += i64::from(record.value.as_i16());
            entry.last_activity = entry.last_activity.max(record.updated_at);
        }

        Ok(activity.into_values().collect())
    }
}

#[async_trait]
impl DeltaOutboxRepository for InMemoryVotesRepository {
    async fn fetch_unpublished(&self, limit: i64) -> Result<Vec<VoteDeltaEvent>, RepositoryError> {
        let state = self.state()?;
        Ok(state
            .outbox
            .values()
            .filter(|entry| !entry.published)
            .take(usize::try_from(limit).unwrap_or(0))
            .map(|entry| entry.event.clone())
            .collect())
    }

    async fn mark_published(
        &self,
        target_id: TargetId,
        sequence_id: SequenceId,
    ) -> Result<(), RepositoryError> {
        if let Some(entry) = self.state()?.outbox.get_mut(&(target_id, sequence_id)) {
            entry.published = true;
        }
        Ok(())
    }

    async fn mark_unpublished(
        &self,
        target_id: TargetId,
        sequence_id: SequenceId,
    ) -> Result<(), RepositoryError> {
        if let Some(entry) = self.state()?.outbox.get_mut(&(target_id, sequence_id)) {
            entry.published = false;
        }
        Ok(())
    }

    async fn prune_applied(&self) -> Result<u64, RepositoryError> {
        let mut state = self.state()?;
        let State {
            outbox, counters, ..
        } = &mut *state;
        let before = outbox.len();
        outbox.retain(|(target_id, sequence_id), entry| {
            let applied = counters
                .get(target_id)
                .map_or(0, |counter| counter.last_applied_sequence_id);
            !entry.published || *sequence_id > applied
        });
        Ok((before - outbox.len()) as u64)
    }

    async fn fetch_unapplied(&self, limit: i64) -> Result<Vec<VoteDeltaEvent>, RepositoryError> {
        let state = self.state()?;
        Ok(state
            .outbox
            .values()
            .filter(|entry| {
                let applied = state
                    .counters
                    .get(&entry.event.target_id)
                    .map_or(0, |counter| counter.last_applied_sequence_id);
                entry.event.sequence_id > applied
            })
            .take(usize::try_from(limit).unwrap_or(0))
            .map(|entry| entry.event.clone())
            .collect())
    }
}

#[async_trait]
impl CounterRepository for InMemoryVotesRepository {
    async fn get_counter(
        &self,
        target_id: TargetId,
    ) -> Result<Option<AggregateCounter>, RepositoryError> {
        Ok(self.state()?.counters.get(&target_id).cloned())
    }

    async fn get_counters(
        &self,
        target_ids: &[TargetId],
    ) -> Result<Vec<AggregateCounter>, RepositoryError> {
        let state = self.state()?;
        Ok(target_ids
            .iter()
            .filter_map(|target_id| state.counters.get(target_id).cloned())
            .collect())
    }

    async fn save_counter(
        &self,
        counter: &AggregateCounter,
        expected_sequence_id: SequenceId,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state()?;
        let stored_sequence_id = state
            .counters
            .get(&counter.target_id)
            .map(|stored| stored.last_applied_sequence_id);

        let precondition_holds = match stored_sequence_id {
            None => expected_sequence_id == 0,
            Some(stored) => expected_sequence_id != 0 && stored == expected_sequence_id,
        };
        if !precondition_holds {
            return Ok(false);
        }

        state.counters.insert(counter.target_id, counter.clone());
        Ok(true)
    }
}

#[async_trait]
impl SnapshotRepository for InMemoryVotesRepository {
    async fn save_snapshot(&self, snapshot: &RankingSnapshot) -> Result<(), RepositoryError> {
        let mut state = self.state()?;
        state.snapshots.push_back(snapshot.clone());
        while state.snapshots.len() > RETAINED_SNAPSHOTS {
            state.snapshots.pop_front();
        }
        Ok(())
    }

    async fn load_latest_snapshot(&self) -> Result<Option<RankingSnapshot>, RepositoryError> {
        Ok(self.state()?.snapshots.back().cloned())
    }
}

#[async_trait]
impl LeaseRepository for InMemoryVotesRepository {
    async fn try_acquire_lease(
        &self,
        name: &str,
        holder: Uuid,
        ttl: Duration,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state()?;
        let now = Instant::now();

        let available = state
            .leases
            .get(name)
            .is_none_or(|lease| lease.expires_at <= now || lease.holder == holder);
        if !available {
            return Ok(false);
        }

        state.leases.insert(
            name.to_string(),
            Lease {
                holder,
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn release_lease(&self, name: &str, holder: Uuid) -> Result<(), RepositoryError> {
        let mut state = self.state()?;
        if state.leases.get(name).is_some_and(|lease| lease.holder == holder) {
            state.leases.remove(name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use votes_ranker_shared::types::{RankingEntry, VoteValue};

    fn record(user_id: UserId, target_id: TargetId, value: VoteValue, version: i64) -> VoteRecord {
        VoteRecord {
            user_id,
            target_id,
            target_type: TargetType::Post,
            value,
            version,
            updated_at: Utc::now(),
        }
    }

    fn create(record: VoteRecord) -> VoteTransition {
        VoteTransition {
            record,
            old_value: VoteValue::Remove,
            expected_version: None,
        }
    }

    fn snapshot(score: i64) -> RankingSnapshot {
        RankingSnapshot {
            generated_at: Utc::now(),
            window_start: Utc::now(),
            window_end: Utc::now(),
            entries: vec![RankingEntry {
                target_id: Uuid::new_v4(),
                score,
                tie_break_timestamp: Utc::now(),
            }],
        }
    }

    #[tokio::test]
    async fn test_commit_transition_allocates_dense_sequence_ids() {
        let repository = InMemoryVotesRepository::new();
        let target = Uuid::new_v4();

        let first = repository
            .commit_transition(&create(record(Uuid::new_v4(), target, VoteValue::Up, 0)))
            .await
            .unwrap()
            .unwrap();
        let second = repository
            .commit_transition(&create(record(Uuid::new_v4(), target, VoteValue::Down, 0)))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(first.sequence_id, 1);
        assert_eq!(second.sequence_id, 2);
        assert_eq!(repository.fetch_unpublished(10).await.unwrap(), vec![first, second]);
    }

    #[tokio::test]
    async fn test_commit_transition_rejects_second_insert() {
        let repository = InMemoryVotesRepository::new();
        let user = Uuid::new_v4();
        let target = Uuid::new_v4();

        let created = repository
            .commit_transition(&create(record(user, target, VoteValue::Up, 0)))
            .await
            .unwrap();
        let raced = repository
            .commit_transition(&create(record(user, target, VoteValue::Down, 0)))
            .await
            .unwrap();

        assert!(created.is_some());
        assert!(raced.is_none());
        let stored = repository.get_vote(user, target).await.unwrap().unwrap();
        assert_eq!(stored.value, VoteValue::Up);
    }

    #[tokio::test]
    async fn test_commit_transition_checks_version() {
        let repository = InMemoryVotesRepository::new();
        let user = Uuid::new_v4();
        let target = Uuid::new_v4();
        repository
            .commit_transition(&create(record(user, target, VoteValue::Up, 0)))
            .await
            .unwrap();

        let stale = VoteTransition {
            record: record(user, target, VoteValue::Down, 5),
            old_value: VoteValue::Up,
            expected_version: Some(4),
        };
        assert!(repository.commit_transition(&stale).await.unwrap().is_none());

        let fresh = VoteTransition {
            record: record(user, target, VoteValue::Down, 1),
            old_value: VoteValue::Up,
            expected_version: Some(0),
        };
        let event = repository.commit_transition(&fresh).await.unwrap().unwrap();
        assert_eq!(event.old_value, VoteValue::Up);
        assert_eq!(event.new_value, VoteValue::Down);
        assert_eq!(event.sequence_id, 2);
    }

    #[tokio::test]
    async fn test_mark_published_removes_event_from_pending() {
        let repository = InMemoryVotesRepository::new();
        let event = repository
            .commit_transition(&create(record(Uuid::new_v4(), Uuid::new_v4(), VoteValue::Up, 0)))
            .await
            .unwrap()
            .unwrap();

        repository.mark_published(event.target_id, event.sequence_id).await.unwrap();

        assert!(repository.fetch_unpublished(10).await.unwrap().is_empty());
        assert_eq!(repository.unpublished_events().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_fetch_unapplied_skips_applied_events() {
        let repository = InMemoryVotesRepository::new();
        let target = Uuid::new_v4();
        for _ in 0..3 {
            repository
                .commit_transition(&create(record(Uuid::new_v4(), target, VoteValue::Up, 0)))
                .await
                .unwrap();
        }
        let counter = AggregateCounter {
            target_id: target,
            target_type: TargetType::Post,
            upvotes: 2,
            downvotes: 0,
            last_applied_sequence_id: 2,
        };
        assert!(repository.save_counter(&counter, 0).await.unwrap());

        let unapplied = repository.fetch_unapplied(10).await.unwrap();
        assert_eq!(unapplied.len(), 1);
        assert_eq!(unapplied[0].sequence_id, 3);
    }

    #[tokio::test]
    async fn test_mark_unpublished_returns_event_to_relay() {
        let repository = InMemoryVotesRepository::new();
        let event = repository
            .commit_transition(&create(record(Uuid::new_v4(), Uuid::new_v4(), VoteValue::Up, 0)))
            .await
            .unwrap()
            .unwrap();
        repository.mark_published(event.target_id, event.sequence_id).await.unwrap();

        repository.mark_unpublished(event.target_id, event.sequence_id).await.unwrap();

        assert_eq!(repository.fetch_unpublished(10).await.unwrap(), vec![event]);
    }

    #[tokio::test]
    async fn test_prune_applied_keeps_pending_events() {
        let repository = InMemoryVotesRepository::new();
        let target = Uuid::new_v4();
        let mut events = Vec::new();
        for _ in 0..3 {
            let event = repository
                .commit_transition(&create(record(Uuid::new_v4(), target, VoteValue::Up, 0)))
                .await
                .unwrap()
                .unwrap();
            events.push(event);
        }
        // 1 and 2 applied, 1 and 3 delivered: only 1 may go.
        repository.mark_published(target, 1).await.unwrap();
        repository.mark_published(target, 3).await.unwrap();
        let counter = AggregateCounter {
            target_id: target,
            target_type: TargetType::Post,
            upvotes: 2,
            downvotes: 0,
            last_applied_sequence_id: 2,
        };
        assert!(repository.save_counter(&counter, 0).await.unwrap());

        assert_eq!(repository.prune_applied().await.unwrap(), 1);

        assert_eq!(repository.fetch_unpublished(10).await.unwrap(), vec![events[1].clone()]);
        assert_eq!(repository.fetch_unapplied(10).await.unwrap(), vec![events[2].clone()]);
    }

    #[tokio::test]
    async fn test_window_activity_sums_active_votes_in_window() {
        let repository = InMemoryVotesRepository::new();
        let now = Utc::now();
        let target = Uuid::new_v4();
        let old = Uuid::new_v4();

        let mut votes = vec![
            record(Uuid::new_v4(), target, VoteValue::Up, 0),
            record(Uuid::new_v4(), target, VoteValue::Up, 0),
            record(Uuid::new_v4(), target, VoteValue::Down, 0),
            record(Uuid::new_v4(), target, VoteValue::Remove, 0),
            record(Uuid::new_v4(), old, VoteValue::Up, 0),
        ];
        votes[0].updated_at = now - TimeDelta::hours(2);
        votes[1].updated_at = now - TimeDelta::hours(1);
        votes[2].updated_at = now - TimeDelta::hours(3);
        votes[3].updated_at = now;
        votes[4].updated_at = now - TimeDelta::hours(25);
        for vote in votes {
            repository.commit_transition(&create(vote)).await.unwrap();
        }

        let activity = repository
            .window_activity(TargetType::Post, now - TimeDelta::hours(24), now)
            .await
            .unwrap();

        assert_eq!(activity.len(), 1);
        assert_eq!(activity[0].target_id, target);
        assert_eq!(activity[0].score, 1);
        assert_eq!(activity[0].last_activity, now - TimeDelta::hours(1));
    }

    #[tokio::test]
    async fn test_save_counter_requires_expected_sequence() {
        let repository = InMemoryVotesRepository::new();
        let mut counter = AggregateCounter::empty(Uuid::new_v4(), TargetType::Comment);
        counter.upvotes = 1;
        counter.last_applied_sequence_id = 1;

        assert!(!repository.save_counter(&counter, 3).await.unwrap());
        assert!(repository.save_counter(&counter, 0).await.unwrap());
        assert!(!repository.save_counter(&counter, 0).await.unwrap());

        counter.upvotes = 2;
        counter.last_applied_sequence_id = 2;
        assert!(repository.save_counter(&counter, 1).await.unwrap());
        let stored = repository.get_counter(counter.target_id).await.unwrap().unwrap();
        assert_eq!(stored, counter);
    }

    #[tokio::test]
    async fn test_save_snapshot_retains_two_versions() {
        let repository = InMemoryVotesRepository::new();
        for score in 1..=3 {
            repository.save_snapshot(&snapshot(score)).await.unwrap();
        }

        assert_eq!(repository.stored_snapshots().unwrap(), 2);
        let latest = repository.load_latest_snapshot().await.unwrap().unwrap();
        assert_eq!(latest.entries[0].score, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lease_is_exclusive_until_expiry() {
        let repository = InMemoryVotesRepository::new();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let ttl = Duration::from_secs(30);

        assert!(repository.try_acquire_lease("ranking", first, ttl).await.unwrap());
        assert!(!repository.try_acquire_lease("ranking", second, ttl).await.unwrap());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(repository.try_acquire_lease("ranking", second, ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_release_lease_only_by_holder() {
        let repository = InMemoryVotesRepository::new();
        let holder = Uuid::new_v4();
        let other = Uuid::new_v4();
        let ttl = Duration::from_secs(30);

        assert!(repository.try_acquire_lease("ranking", holder, ttl).await.unwrap());
        repository.release_lease("ranking", other).await.unwrap();
        assert!(!repository.try_acquire_lease("ranking", other, ttl).await.unwrap());

        repository.release_lease("ranking", holder).await.unwrap();
        assert!(repository.try_acquire_lease("ranking", other, ttl).await.unwrap());
    }
}
