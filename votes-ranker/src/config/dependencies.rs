use std::sync::Arc;

use tracing::info;
use votes_ranker_pipeline::aggregator::{Aggregator, AggregatorConfig};
use votes_ranker_pipeline::ledger::{AcceptAllTargets, LedgerConfig, VoteLedger};
use votes_ranker_pipeline::orchestrator::Orchestrator;
use votes_ranker_pipeline::publisher::{DeltaPublisher, PublisherConfig};
use votes_ranker_pipeline::ranking::{RankingBuilder, RankingConfig, RankingStore};
use votes_ranker_pipeline::transport::{
    DEFAULT_PARTITION_CAPACITY, DEFAULT_SEND_TIMEOUT, InMemoryDeltaLog,
};
use votes_ranker_pipeline::VotesApi;
use votes_ranker_repository::{
    CounterRepository, DeltaOutboxRepository, InMemoryVotesRepository, LeaseRepository,
    PostgresCounterRepository, PostgresLedgerRepository, PostgresRankingRepository,
    SnapshotRepository, VoteHistoryRepository, VoteLedgerRepository, postgres,
};

use crate::config::{Settings, StorageBackend};
use crate::errors::ServiceError;

/// Handles to every store the pipeline writes to, whatever the backend.
struct Stores {
    ledger: Arc<dyn VoteLedgerRepository>,
    outbox: Arc<dyn DeltaOutboxRepository>,
    history: Arc<dyn VoteHistoryRepository>,
    counters: Arc<dyn CounterRepository>,
    snapshots: Arc<dyn SnapshotRepository>,
    leases: Arc<dyn LeaseRepository>,
}

impl Stores {
    async fn postgres(settings: &Settings) -> Result<(Self, sqlx::PgPool), ServiceError> {
        let database_url = settings
            .database_url
            .as_deref()
            .ok_or(ServiceError::MissingDatabaseUrl)?;
        let pool = postgres::connect(database_url, settings.database_max_connections).await?;

        if settings.run_migrations {
            postgres::run_migrations(&pool).await?;
        }
        if !postgres::check_tables_created(&pool).await? {
            return Err(ServiceError::MissingTables);
        }

        let ledger = Arc::new(PostgresLedgerRepository::new(pool.clone()));
        let counters = Arc::new(PostgresCounterRepository::new(pool.clone()));
        let ranking = Arc::new(PostgresRankingRepository::new(pool.clone()));

        let stores = Self {
            ledger: ledger.clone(),
            outbox: ledger.clone(),
            history: ledger,
            counters,
            snapshots: ranking.clone(),
            leases: ranking,
        };
        Ok((stores, pool))
    }

    fn memory() -> Self {
        let repository = Arc::new(InMemoryVotesRepository::new());
        Self {
            ledger: repository.clone(),
            outbox: repository.clone(),
            history: repository.clone(),
            counters: repository.clone(),
            snapshots: repository.clone(),
            leases: repository,
        }
    }
}

/// `Dependencies` struct holds the wired components of the votes ranker.
///
/// `orchestrator` runs the background side of the pipeline: partition
/// workers, outbox relay and ranking. `api` is the in-process entry point for
/// a forum backend embedding this crate; the `votes-ranker` binary exposes no
/// request surface and only runs the orchestrator.
pub struct Dependencies {
    pub api: VotesApi,
    pub orchestrator: Orchestrator,
    /// Open connection pool when the postgres backend is selected.
    pub pool: Option<sqlx::PgPool>,
}

impl Dependencies {
    /// Creates a new `Dependencies` instance.
    ///
    /// Connects to the configured storage backend, applies migrations when
    /// enabled and wires the ledger, publisher, aggregator and ranking
    /// builder around a partitioned in-process delta log.
    ///
    /// # Returns
    ///
    /// A `Result` which is `Ok(Self)` on successful initialization or a
    /// `ServiceError` if any dependency fails to initialize.
    pub async fn new(settings: &Settings) -> Result<Self, ServiceError> {
        let (stores, pool) = match settings.storage_backend {
            StorageBackend::Postgres => {
                let (stores, pool) = Stores::postgres(settings).await?;
                (stores, Some(pool))
            }
            StorageBackend::Memory => (Stores::memory(), None),
        };
        info!(backend = ?settings.storage_backend, "Storage initialized");

        let log = Arc::new(InMemoryDeltaLog::new(
            settings.delta_partitions,
            DEFAULT_PARTITION_CAPACITY,
            DEFAULT_SEND_TIMEOUT,
        ));
        let partitions = log.take_partitions().ok_or(ServiceError::PartitionsTaken)?;

        let publisher = Arc::new(DeltaPublisher::new(
            stores.outbox,
            log,
            PublisherConfig {
                relay_interval: settings.publisher_relay_interval,
                ..PublisherConfig::default()
            },
        ));
        let ledger = Arc::new(VoteLedger::new(
            stores.ledger,
            Arc::new(AcceptAllTargets),
            publisher.clone(),
            LedgerConfig {
                max_cas_attempts: settings.ledger_max_cas_attempts,
                ..LedgerConfig::default()
            },
        ));
        let aggregator = Arc::new(Aggregator::new(
            stores.counters,
            AggregatorConfig {
                retry_base: settings.aggregator_retry_base,
                retry_max: settings.aggregator_retry_max,
                ..AggregatorConfig::default()
            },
        ));
        let store = Arc::new(RankingStore::new());
        let ranking = Arc::new(RankingBuilder::new(
            stores.history,
            stores.snapshots,
            stores.leases,
            store.clone(),
            RankingConfig {
                period: settings.ranking_period,
                window: settings.ranking_window,
                run_timeout: settings.ranking_timeout,
                max_entries: settings.ranking_max_entries,
            },
        ));

        let api = VotesApi::new(ledger, aggregator.clone(), store);
        let orchestrator = Orchestrator::new(publisher, aggregator, ranking, partitions);

        Ok(Dependencies {
            api,
            orchestrator,
            pool,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use votes_ranker_pipeline::ledger::CastOutcome;
    use votes_ranker_shared::types::{TargetType, VoteTotals};

    // Helper function to clear environment variables
    fn clear_env_vars() {
        unsafe {
            env::remove_var("STORAGE_BACKEND");
            env::remove_var("DATABASE_URL");
            env::remove_var("RUN_MIGRATIONS");
            env::remove_var("DELTA_PARTITIONS");
        }
    }

    #[tokio::test]
    #[serial]
    async fn test_dependencies_new_invalid_database_url() {
        clear_env_vars();
        unsafe {
            env::set_var("DATABASE_URL", "invalid-database-url");
        }

        let settings = Settings::from_env().unwrap();
        let result = Dependencies::new(&settings).await;

        assert!(matches!(result, Err(ServiceError::Repository(_))));
        clear_env_vars();
    }

    #[tokio::test]
    #[serial]
    async fn test_dependencies_new_memory_backend() {
        clear_env_vars();
        unsafe {
            env::set_var("STORAGE_BACKEND", "memory");
            env::set_var("DELTA_PARTITIONS", "2");
        }

        let settings = Settings::from_env().unwrap();
        let dependencies = Dependencies::new(&settings).await.unwrap();

        assert!(dependencies.pool.is_none());
        let user_id = uuid::Uuid::new_v4();
        let target_id = uuid::Uuid::new_v4();
        let outcome = dependencies
            .api
            .cast_vote(user_id, target_id, TargetType::Post, 1)
            .await
            .unwrap();
        assert_eq!(outcome, CastOutcome::Created);

        let vote = dependencies
            .api
            .get_user_vote(user_id, target_id)
            .await
            .unwrap();
        assert!(vote.is_some());

        // Nothing is applied until the orchestrator runs the partition workers.
        let totals = dependencies
            .api
            .get_aggregate_counters(target_id)
            .await
            .unwrap();
        assert_eq!(totals, VoteTotals::default());
        assert!(dependencies.api.get_top_posts(10).is_empty());
        clear_env_vars();
    }
}
