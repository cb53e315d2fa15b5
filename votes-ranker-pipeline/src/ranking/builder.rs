//! Scheduled computation of the post leaderboard.
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::broadcast;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;
use votes_ranker_repository::{LeaseRepository, SnapshotRepository, VoteHistoryRepository};
use votes_ranker_shared::types::{RankingEntry, RankingSnapshot, TargetActivity, TargetType};

use crate::errors::RankingError;
use crate::ranking::RankingStore;

/// Name of the lease that serialises ranking runs across instances.
pub const RANKING_LEASE: &str = "ranking-snapshot-builder";

/// Configuration for the ranking snapshot builder.
#[derive(Debug, Clone)]
pub struct RankingConfig {
    /// Time between two runs.
    pub period: Duration,
    /// Length of the vote window ending at the snapshot's `window_end`.
    pub window: Duration,
    /// Maximum duration of a run. The lease is taken for twice as long.
    pub run_timeout: Duration,
    /// Maximum number of entries of a snapshot.
    pub max_entries: usize,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(600),
            window: Duration::from_secs(86_400),
            run_timeout: Duration::from_secs(120),
            max_entries: 1000,
        }
    }
}

/// Result of a scheduled ranking run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// A new snapshot with `entries` entries is current.
    Published { entries: usize },
    /// Another holder owns the lease; nothing was computed.
    Skipped,
}

/// Orders window activity into leaderboard entries.
///
/// Entries are sorted by score descending, then by most recent activity
/// descending, then by target id ascending, and truncated to `max_entries`.
/// The order is total, so equal input always yields identical output.
pub fn rank_targets(mut activity: Vec<TargetActivity>, max_entries: usize) -> Vec<RankingEntry> {
    activity.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| b.last_activity.cmp(&a.last_activity))
            .then_with(|| a.target_id.cmp(&b.target_id))
    });
    activity.truncate(max_entries);
    activity
        .into_iter()
        .map(|target| RankingEntry {
            target_id: target.target_id,
            score: target.score,
            tie_break_timestamp: target.last_activity,
        })
        .collect()
}

/// Periodically recomputes the leaderboard and publishes it to the
/// `RankingStore`.
pub struct RankingBuilder {
    history: Arc<dyn VoteHistoryRepository>,
    snapshots: Arc<dyn SnapshotRepository>,
    leases: Arc<dyn LeaseRepository>,
    store: Arc<RankingStore>,
    config: RankingConfig,
    holder: Uuid,
}

impl RankingBuilder {
    /// Creates a new `RankingBuilder` with a fresh lease holder id.
    ///
    /// # Arguments
    ///
    /// * `history` - Source of the windowed vote activity
    /// * `snapshots` - Durable copy of published snapshots
    /// * `leases` - Mutual exclusion between builder instances
    /// * `store` - The store readers are served from
    /// * `config` - Period, window, timeout and size of the leaderboard
    pub fn new(
        history: Arc<dyn VoteHistoryRepository>,
        snapshots: Arc<dyn SnapshotRepository>,
        leases: Arc<dyn LeaseRepository>,
        store: Arc<RankingStore>,
        config: RankingConfig,
    ) -> Self {
        Self {
            history,
            snapshots,
            leases,
            store,
            config,
            holder: Uuid::new_v4(),
        }
    }

    /// Computes a snapshot for the window ending at `max(now, previous end)`.
    ///
    /// The window end never moves backwards, even if `now` does.
    pub async fn build_snapshot(&self, now: DateTime<Utc>) -> Result<RankingSnapshot, RankingError> {
        let window = TimeDelta::from_std(self.config.window)
            .map_err(|_| RankingError::InvalidWindow(self.config.window))?;
        let window_end = self
            .store
            .current()
            .map_or(now, |previous| previous.window_end.max(now));
        let window_start = window_end - window;

        let activity = self
            .history
            .window_activity(TargetType::Post, window_start, window_end)
            .await?;

        Ok(RankingSnapshot {
            generated_at: now,
            window_start,
            window_end,
            entries: rank_targets(activity, self.config.max_entries),
        })
    }

    /// Builds a snapshot, persists it and swaps it into the store.
    ///
    /// Only the computation is bounded by `run_timeout`. Once a snapshot is
    /// handed to the snapshot store the run is no longer cancelled, so a
    /// persisted snapshot is always the one readers are served. Nothing is
    /// published if any step fails.
    pub async fn build_and_publish(&self, now: DateTime<Utc>) -> Result<usize, RankingError> {
        let snapshot = tokio::time::timeout(self.config.run_timeout, self.build_snapshot(now))
            .await
            .map_err(|_| RankingError::Timeout(self.config.run_timeout))??;
        self.snapshots.save_snapshot(&snapshot).await?;

        let entries = snapshot.entries.len();
        self.store.publish(snapshot);
        Ok(entries)
    }

    /// Runs one lease-guarded rebuild.
    ///
    /// The lease is released whether the run succeeds, fails or times out.
    #[instrument(skip(self), fields(holder = %self.holder))]
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<RunOutcome, RankingError> {
        let acquired = self
            .leases
            .try_acquire_lease(RANKING_LEASE, self.holder, self.config.run_timeout * 2)
            .await?;
        if !acquired {
            debug!("Ranking lease held elsewhere, skipping run");
            return Ok(RunOutcome::Skipped);
        }

        let result = self.build_and_publish(now).await;

        if let Err(e) = self.leases.release_lease(RANKING_LEASE, self.holder).await {
            warn!(error = %e, "Failed to release ranking lease, it will expire");
        }

        result.map(|entries| RunOutcome::Published { entries })
    }

    /// Seeds the store with the latest persisted snapshot if it is empty.
    ///
    /// Returns whether a snapshot was loaded.
    pub async fn warm_start(&self) -> Result<bool, RankingError> {
        if self.store.current().is_some() {
            return Ok(false);
        }
        match self.snapshots.load_latest_snapshot().await? {
            Some(snapshot) => {
                info!(
                    generated_at = %snapshot.generated_at,
                    entries = snapshot.entries.len(),
                    "Loaded persisted ranking snapshot"
                );
                self.store.publish(snapshot);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Runs the builder on its period until shutdown is signalled.
    ///
    /// The first run starts immediately. A failed run is logged and the
    /// previous snapshot stays current until the next tick.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut ranking_timer = interval(self.config.period);
        ranking_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!("Ranking builder stopping");
                    break;
                }
                _ = ranking_timer.tick() => {
                    match self.run_once(Utc::now()).await {
                        Ok(RunOutcome::Published { entries }) => {
                            info!(entries, "Published ranking snapshot");
                        }
                        Ok(RunOutcome::Skipped) => {}
                        Err(e) => {
                            error!(error = %e, "Ranking run failed, keeping previous snapshot");
                        }
                    }
                }
            }
        }
    }
}
