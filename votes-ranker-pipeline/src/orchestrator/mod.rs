//! This module defines the `Orchestrator` responsible for running the
//! background services of the vote pipeline.
//!
//! It starts one aggregator worker per delta log partition, replays deltas
//! that were delivered but never applied, and runs the outbox relay and the
//! ranking scheduler until Ctrl-C or an explicit shutdown request.
use std::sync::Arc;
use std::time::Duration;

use futures03::future::join_all;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{error, info, instrument, warn};
use votes_ranker_shared::types::VoteDeltaEvent;

use crate::aggregator::Aggregator;
use crate::errors::OrchestratorError;
use crate::publisher::DeltaPublisher;
use crate::ranking::RankingBuilder;

/// Configuration for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Period of the progress log line.
    pub progress_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            progress_interval: Duration::from_secs(10),
        }
    }
}

/// `Orchestrator` owns the lifecycle of the pipeline's background services.
pub struct Orchestrator {
    publisher: Arc<DeltaPublisher>,
    aggregator: Arc<Aggregator>,
    ranking: Arc<RankingBuilder>,
    partitions: Vec<mpsc::Receiver<VoteDeltaEvent>>,
    config: OrchestratorConfig,
    shutdown_tx: broadcast::Sender<()>,
}

impl Orchestrator {
    /// Creates a new `Orchestrator` instance.
    ///
    /// # Arguments
    ///
    /// * `publisher` - Publisher whose outbox relay is run periodically
    /// * `aggregator` - Aggregator shared by all partition workers
    /// * `ranking` - Builder run on its schedule
    /// * `partitions` - Consuming ends of the delta log, one per worker
    pub fn new(
        publisher: Arc<DeltaPublisher>,
        aggregator: Arc<Aggregator>,
        ranking: Arc<RankingBuilder>,
        partitions: Vec<mpsc::Receiver<VoteDeltaEvent>>,
    ) -> Self {
        Self::with_config(
            publisher,
            aggregator,
            ranking,
            partitions,
            OrchestratorConfig::default(),
        )
    }

    /// Creates a new orchestrator with custom configuration.
    pub fn with_config(
        publisher: Arc<DeltaPublisher>,
        aggregator: Arc<Aggregator>,
        ranking: Arc<RankingBuilder>,
        partitions: Vec<mpsc::Receiver<VoteDeltaEvent>>,
        config: OrchestratorConfig,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            publisher,
            aggregator,
            ranking,
            partitions,
            config,
            shutdown_tx,
        }
    }

    /// Returns a sender that stops the orchestrator when a value is sent.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Runs the background services until shutdown.
    ///
    /// Aggregator workers are started before the startup replay so replayed
    /// deltas are consumed while they are sent.
    #[instrument(skip(self))]
    pub async fn run(self) -> Result<(), OrchestratorError> {
        if self.partitions.is_empty() {
            return Err(OrchestratorError::NoPartitions);
        }
        info!(partitions = self.partitions.len(), "Starting votes ranker orchestrator");

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        match self.ranking.warm_start().await {
            Ok(true) => {}
            Ok(false) => info!("No persisted ranking snapshot, waiting for the first run"),
            Err(e) => warn!(error = %e, "Failed to load persisted ranking snapshot"),
        }

        let mut handles = Vec::with_capacity(self.partitions.len() + 2);
        for (partition, receiver) in self.partitions.into_iter().enumerate() {
            let aggregator = Arc::clone(&self.aggregator);
            let worker_shutdown = self.shutdown_tx.subscribe();
            handles.push(tokio::spawn(async move {
                if let Err(e) = aggregator
                    .run_partition(partition, receiver, worker_shutdown)
                    .await
                {
                    error!(partition, error = %e, "Aggregator worker failed");
                }
            }));
        }

        if let Err(e) = self.publisher.replay_unapplied().await {
            error!(error = %e, "Startup replay failed, stopping aggregator workers");
            let _ = self.shutdown_tx.send(());
            join_all(handles).await;
            return Err(e.into());
        }

        let publisher = Arc::clone(&self.publisher);
        let relay_shutdown = self.shutdown_tx.subscribe();
        handles.push(tokio::spawn(async move { publisher.run(relay_shutdown).await }));

        let ranking = Arc::clone(&self.ranking);
        let ranking_shutdown = self.shutdown_tx.subscribe();
        handles.push(tokio::spawn(async move { ranking.run(ranking_shutdown).await }));

        info!("Votes ranker services running");

        let mut progress_timer = interval(self.config.progress_interval);
        progress_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut prev_applied: u64 = 0;
        let mut prev_time = std::time::Instant::now();

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    let _ = self.shutdown_tx.send(());
                    break;
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown requested");
                    break;
                }
                _ = progress_timer.tick() => {
                    let stats = self.aggregator.stats();
                    let applied = stats.applied();

                    let now = std::time::Instant::now();
                    let elapsed_secs = now.duration_since(prev_time).as_secs_f64();
                    let applied_per_sec = if elapsed_secs > 0.0 {
                        (applied.saturating_sub(prev_applied) as f64) / elapsed_secs
                    } else {
                        0.0
                    };

                    info!(
                        applied,
                        applied_per_sec = format!("{:.1}", applied_per_sec),
                        redelivered = stats.redelivered(),
                        reordered = stats.reordered(),
                        retries = stats.retries(),
                        delivered = self.publisher.delivered_count(),
                        buffered = self.publisher.buffered_count(),
                        "Progress"
                    );

                    prev_applied = applied;
                    prev_time = now;
                }
            }
        }

        for result in join_all(handles).await {
            if let Err(e) = result {
                error!(error = %e, "Background task panicked");
            }
        }
        info!("Votes ranker orchestrator stopped");
        Ok(())
    }
}
