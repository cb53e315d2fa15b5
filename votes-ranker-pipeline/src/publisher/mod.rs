//! This module defines the `DeltaPublisher`, which moves committed delta
//! events from the ledger's outbox onto the delta transport.
//!
//! The publisher only ever sees events already committed to the outbox. An
//! event that cannot be delivered stays in the outbox and is picked up by the
//! periodic relay, so a transport outage delays deltas but never drops them.
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, instrument, warn};
use votes_ranker_repository::DeltaOutboxRepository;
use votes_ranker_shared::types::VoteDeltaEvent;

use crate::errors::PublisherError;
use crate::transport::DeltaTransport;

/// Result of handing a single event to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The transport accepted the event and the outbox row was marked.
    Delivered,
    /// The transport rejected the event; it stays in the outbox for the relay.
    Buffered,
}

/// Configuration for the delta publisher.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Period of the outbox relay.
    pub relay_interval: Duration,
    /// Number of outbox rows read per relay batch.
    pub relay_batch_size: i64,
    /// Maximum number of events re-sent on startup.
    pub replay_limit: i64,
    /// Period of the removal of delivered and applied outbox events.
    pub prune_interval: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            relay_interval: Duration::from_millis(1000),
            relay_batch_size: 500,
            replay_limit: 100_000,
            prune_interval: Duration::from_secs(60),
        }
    }
}

/// Publishes committed vote deltas to the transport.
pub struct DeltaPublisher {
    outbox: Arc<dyn DeltaOutboxRepository>,
    transport: Arc<dyn DeltaTransport>,
    config: PublisherConfig,
    delivered: AtomicU64,
    buffered: AtomicU64,
}

impl DeltaPublisher {
    /// Creates a new `DeltaPublisher`.
    ///
    /// # Arguments
    ///
    /// * `outbox` - The outbox the ledger commits events to
    /// * `transport` - The partitioned log read by the aggregator
    /// * `config` - Relay period and batch sizes
    pub fn new(
        outbox: Arc<dyn DeltaOutboxRepository>,
        transport: Arc<dyn DeltaTransport>,
        config: PublisherConfig,
    ) -> Self {
        Self {
            outbox,
            transport,
            config,
            delivered: AtomicU64::new(0),
            buffered: AtomicU64::new(0),
        }
    }

    /// Number of events delivered to the transport since startup.
    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Number of publish attempts that left the event in the outbox.
    pub fn buffered_count(&self) -> u64 {
        self.buffered.load(Ordering::Relaxed)
    }

    /// Sends a committed event to the transport.
    ///
    /// # Returns
    ///
    /// * `Ok(PublishOutcome::Delivered)` - The event is on the transport and
    ///   its outbox row is marked as published.
    /// * `Ok(PublishOutcome::Buffered)` - The transport failed; the event
    ///   remains in the outbox.
    /// * `Err(PublisherError)` - The event was delivered but the outbox could
    ///   not be updated. The relay will deliver it again, which the
    ///   aggregator tolerates.
    pub async fn publish(&self, event: &VoteDeltaEvent) -> Result<PublishOutcome, PublisherError> {
        match self.transport.send(event).await {
            Ok(()) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                self.outbox
                    .mark_published(event.target_id, event.sequence_id)
                    .await?;
                Ok(PublishOutcome::Delivered)
            }
            Err(e) => {
                self.buffered.fetch_add(1, Ordering::Relaxed);
                warn!(
                    target_id = %event.target_id,
                    sequence_id = event.sequence_id,
                    error = %e,
                    "Transport rejected delta, leaving it in the outbox"
                );
                Ok(PublishOutcome::Buffered)
            }
        }
    }

    /// Delivers unpublished outbox events in `(target_id, sequence_id)` order.
    ///
    /// Stops at the end of the first batch in which any delivery failed, so
    /// a transport outage does not spin on the same rows.
    ///
    /// # Returns
    ///
    /// The number of events delivered.
    pub async fn relay_pending(&self) -> Result<usize, PublisherError> {
        let mut relayed = 0;
        loop {
            let pending = self.outbox.fetch_unpublished(self.config.relay_batch_size).await?;
            let batch_len = pending.len();

            let mut delivered_in_batch = 0;
            for event in &pending {
                if self.publish(event).await? == PublishOutcome::Delivered {
                    delivered_in_batch += 1;
                }
            }
            relayed += delivered_in_batch;

            if delivered_in_batch < batch_len || (batch_len as i64) < self.config.relay_batch_size {
                break;
            }
        }

        if relayed > 0 {
            info!(relayed, "Relayed buffered deltas from the outbox");
        }
        Ok(relayed)
    }

    /// Re-sends every outbox event that its target's counter has not applied.
    ///
    /// Run once on startup, after the aggregator workers are consuming. It
    /// covers events that reached the transport before a crash but were never
    /// applied. Duplicates are skipped by the aggregator. An event the
    /// transport rejects is flagged as unpublished again, so the relay
    /// delivers it later.
    #[instrument(skip(self))]
    pub async fn replay_unapplied(&self) -> Result<usize, PublisherError> {
        let unapplied = self.outbox.fetch_unapplied(self.config.replay_limit).await?;
        let mut replayed = 0;
        for event in &unapplied {
            match self.transport.send(event).await {
                Ok(()) => replayed += 1,
                Err(e) => {
                    self.buffered.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        target_id = %event.target_id,
                        sequence_id = event.sequence_id,
                        error = %e,
                        "Failed to replay unapplied delta, handing it to the relay"
                    );
                    self.outbox
                        .mark_unpublished(event.target_id, event.sequence_id)
                        .await?;
                }
            }
        }
        info!(replayed, found = unapplied.len(), "Replayed unapplied deltas");
        Ok(replayed)
    }

    /// Removes delivered outbox events that their counters have applied.
    pub async fn prune_applied(&self) -> Result<u64, PublisherError> {
        let pruned = self.outbox.prune_applied().await?;
        if pruned > 0 {
            debug!(pruned, "Pruned applied deltas from the outbox");
        }
        Ok(pruned)
    }

    /// Runs the outbox relay and pruning on their intervals until shutdown is
    /// signalled.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut relay_timer = interval(self.config.relay_interval);
        relay_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut prune_timer = interval(self.config.prune_interval);
        prune_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!("Outbox relay stopping");
                    break;
                }
                _ = relay_timer.tick() => {
                    if let Err(e) = self.relay_pending().await {
                        error!(error = %e, "Outbox relay failed");
                    }
                }
                _ = prune_timer.tick() => {
                    if let Err(e) = self.prune_applied().await {
                        warn!(error = %e, "Outbox pruning failed");
                    }
                }
            }
        }
    }
}
