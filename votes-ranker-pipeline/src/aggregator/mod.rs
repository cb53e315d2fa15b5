//! This module defines the `Aggregator`, which folds delta events into the
//! running upvote/downvote counters of each target.
//!
//! One worker consumes each transport partition strictly in order; partitions
//! run in parallel. A counter only advances by applying the event whose
//! sequence id directly follows its `last_applied_sequence_id`, and the new
//! totals are written together with that sequence id, so redelivered events
//! are skipped and each event is applied exactly once.
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::{MissedTickBehavior, interval};
use tokio_retry::Retry;
use tokio_retry::strategy::ExponentialBackoff;
use tracing::{debug, error, info, warn};
use votes_ranker_repository::CounterRepository;
use votes_ranker_shared::types::{AggregateCounter, SequenceId, TargetId, VoteDeltaEvent, VoteTotals};

use crate::errors::AggregatorError;

/// Events held back per target until the gap before them is filled.
type ReorderBuffer = HashMap<TargetId, BTreeMap<SequenceId, VoteDeltaEvent>>;

/// Result of offering one event to its counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The event was folded into the counter.
    Applied,
    /// The counter already contains the event.
    Redelivered,
    /// Earlier events of the target are still missing; `expected` is the
    /// sequence id the counter is waiting for.
    OutOfOrder { expected: SequenceId },
}

/// Configuration for the aggregator's store retry.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Delay before the first retry; each further retry doubles it.
    pub retry_base: Duration,
    /// Upper bound of the delay between retries.
    pub retry_max: Duration,
    /// Period at which held-back events are offered to their counters again.
    pub held_recheck_interval: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            retry_base: Duration::from_millis(100),
            retry_max: Duration::from_secs(30),
            held_recheck_interval: Duration::from_secs(5),
        }
    }
}

/// Runtime counters of the aggregator, shared by all partition workers.
#[derive(Debug, Default)]
pub struct AggregatorStats {
    applied: AtomicU64,
    redelivered: AtomicU64,
    reordered: AtomicU64,
    retries: AtomicU64,
}

impl AggregatorStats {
    pub fn applied(&self) -> u64 {
        self.applied.load(Ordering::Relaxed)
    }

    pub fn redelivered(&self) -> u64 {
        self.redelivered.load(Ordering::Relaxed)
    }

    pub fn reordered(&self) -> u64 {
        self.reordered.load(Ordering::Relaxed)
    }

    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }
}

/// Returns `counter` with `event` folded in.
///
/// The contribution of `old_value` is removed and that of `new_value` added.
/// A bucket that would drop below zero is clamped at zero and reported, since
/// it can only happen if the event stream and the counter disagree.
pub fn apply_delta(counter: &AggregateCounter, event: &VoteDeltaEvent) -> AggregateCounter {
    let (upvotes_delta, downvotes_delta) = event.counter_delta();
    let upvotes = counter.upvotes + upvotes_delta;
    let downvotes = counter.downvotes + downvotes_delta;

    if upvotes < 0 || downvotes < 0 {
        error!(
            target_id = %event.target_id,
            sequence_id = event.sequence_id,
            upvotes,
            downvotes,
            "Counter would become negative, clamping at zero"
        );
    }

    AggregateCounter {
        target_id: counter.target_id,
        target_type: counter.target_type,
        upvotes: upvotes.max(0),
        downvotes: downvotes.max(0),
        last_applied_sequence_id: event.sequence_id,
    }
}

/// Maintains the aggregate counters from the delta stream.
pub struct Aggregator {
    counters: Arc<dyn CounterRepository>,
    config: AggregatorConfig,
    stats: AggregatorStats,
}

impl Aggregator {
    /// Creates a new `Aggregator`.
    ///
    /// # Arguments
    ///
    /// * `counters` - The counter store; the aggregator is its only writer
    /// * `config` - Backoff applied when the store fails
    pub fn new(counters: Arc<dyn CounterRepository>, config: AggregatorConfig) -> Self {
        Self {
            counters,
            config,
            stats: AggregatorStats::default(),
        }
    }

    pub fn stats(&self) -> &AggregatorStats {
        &self.stats
    }

    /// Offers a single event to its target's counter.
    ///
    /// The counter is written only when `event.sequence_id` is exactly one
    /// past its `last_applied_sequence_id`, conditionally on that sequence id
    /// being unchanged in the store.
    pub async fn apply_event(&self, event: &VoteDeltaEvent) -> Result<ApplyOutcome, AggregatorError> {
        let stored = self.counters.get_counter(event.target_id).await?;
        let last_applied = stored
            .as_ref()
            .map_or(0, |counter| counter.last_applied_sequence_id);

        if event.sequence_id <= last_applied {
            return Ok(ApplyOutcome::Redelivered);
        }
        if event.sequence_id > last_applied + 1 {
            return Ok(ApplyOutcome::OutOfOrder {
                expected: last_applied + 1,
            });
        }

        let current =
            stored.unwrap_or_else(|| AggregateCounter::empty(event.target_id, event.target_type));
        let updated = apply_delta(&current, event);
        if !self.counters.save_counter(&updated, last_applied).await? {
            return Err(AggregatorError::ConcurrentUpdate {
                target_id: event.target_id,
                expected: last_applied,
            });
        }
        Ok(ApplyOutcome::Applied)
    }

    /// Applies an event, retrying store failures with exponential backoff
    /// until they succeed.
    async fn apply_with_retry(&self, event: &VoteDeltaEvent) -> Result<ApplyOutcome, AggregatorError> {
        let factor = (self.config.retry_base.as_millis() as u64 / 2).max(1);
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(factor)
            .max_delay(self.config.retry_max);

        Retry::spawn(strategy, move || async move {
            self.apply_event(event).await.inspect_err(|e| {
                self.stats.retries.fetch_add(1, Ordering::Relaxed);
                warn!(
                    target_id = %event.target_id,
                    sequence_id = event.sequence_id,
                    error = %e,
                    "Failed to apply delta, retrying"
                );
            })
        })
        .await
    }

    /// Applies an event and then every buffered event of the same target
    /// that has become next in line.
    async fn handle_event(
        &self,
        event: VoteDeltaEvent,
        pending: &mut ReorderBuffer,
    ) -> Result<(), AggregatorError> {
        let target_id = event.target_id;
        let mut next = Some(event);

        while let Some(event) = next.take() {
            match self.apply_with_retry(&event).await? {
                ApplyOutcome::Applied => {
                    self.stats.applied.fetch_add(1, Ordering::Relaxed);
                    next = pop_buffered(pending, target_id);
                }
                ApplyOutcome::Redelivered => {
                    self.stats.redelivered.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        target_id = %target_id,
                        sequence_id = event.sequence_id,
                        "Skipping redelivered delta"
                    );
                    next = pop_buffered(pending, target_id);
                }
                ApplyOutcome::OutOfOrder { expected } => {
                    self.stats.reordered.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        target_id = %target_id,
                        sequence_id = event.sequence_id,
                        expected,
                        "Holding delta until earlier ones arrive"
                    );
                    pending
                        .entry(target_id)
                        .or_default()
                        .insert(event.sequence_id, event);
                    // Another writer may have moved the counter up to a held event.
                    next = pop_buffered_through(pending, target_id, expected);
                }
            }
        }
        Ok(())
    }

    /// Offers the lowest held event of every target to its counter again.
    async fn redrive_held(&self, pending: &mut ReorderBuffer) -> Result<(), AggregatorError> {
        let targets: Vec<TargetId> = pending.keys().copied().collect();
        for target_id in targets {
            if let Some(event) = pop_buffered(pending, target_id) {
                self.handle_event(event, pending).await?;
            }
        }
        Ok(())
    }

    /// Consumes one transport partition until it closes or shutdown is
    /// signalled.
    ///
    /// Events are handled strictly one after another. A store outage stalls
    /// only this partition.
    pub async fn run_partition(
        &self,
        partition: usize,
        mut receiver: mpsc::Receiver<VoteDeltaEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), AggregatorError> {
        info!(partition, "Aggregator worker started");
        let mut pending = ReorderBuffer::new();
        let mut recheck_timer = interval(self.config.held_recheck_interval);
        recheck_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            // `None` asks for a recheck of the held events.
            let next = tokio::select! {
                _ = shutdown.recv() => break,
                _ = recheck_timer.tick(), if !pending.is_empty() => None,
                message = receiver.recv() => match message {
                    Some(event) => Some(event),
                    None => break,
                },
            };

            let work = async {
                match next {
                    Some(event) => self.handle_event(event, &mut pending).await,
                    None => self.redrive_held(&mut pending).await,
                }
            };
            tokio::select! {
                _ = shutdown.recv() => break,
                result = work => result?,
            }
        }

        let held: usize = pending.values().map(BTreeMap::len).sum();
        if held > 0 {
            warn!(partition, held, "Aggregator worker stopped with deltas still held back");
        }
        info!(partition, "Aggregator worker stopped");
        Ok(())
    }

    /// Returns the totals of a target, zeros when it has no counter yet.
    pub async fn get_aggregate_counters(&self, target_id: TargetId) -> Result<VoteTotals, AggregatorError> {
        Ok(self
            .counters
            .get_counter(target_id)
            .await?
            .map(|counter| counter.totals())
            .unwrap_or_default())
    }

    /// Returns the totals of many targets, zeros for targets without a counter.
    pub async fn get_aggregate_counters_batch(
        &self,
        target_ids: &[TargetId],
    ) -> Result<HashMap<TargetId, VoteTotals>, AggregatorError> {
        let mut totals: HashMap<TargetId, VoteTotals> = target_ids
            .iter()
            .map(|target_id| (*target_id, VoteTotals::default()))
            .collect();
        for counter in self.counters.get_counters(target_ids).await? {
            totals.insert(counter.target_id, counter.totals());
        }
        Ok(totals)
    }
}

/// Takes the lowest buffered event of a target, dropping the target's buffer
/// once it is empty.
fn pop_buffered(pending: &mut ReorderBuffer, target_id: TargetId) -> Option<VoteDeltaEvent> {
    pop_buffered_through(pending, target_id, SequenceId::MAX)
}

/// Like `pop_buffered`, but only if the lowest buffered sequence id is at most
/// `through`.
fn pop_buffered_through(
    pending: &mut ReorderBuffer,
    target_id: TargetId,
    through: SequenceId,
) -> Option<VoteDeltaEvent> {
    let buffer = pending.get_mut(&target_id)?;
    let (&lowest, _) = buffer.first_key_value()?;
    if lowest > through {
        return None;
    }
    let (_, event) = buffer.pop_first()?;
    if buffer.is_empty() {
        pending.remove(&target_id);
    }
    Some(event)
}
