//! Error types for the Votes Ranker application.
//! Consolidates the errors that can stop the service, from configuration and
//! storage setup to the orchestrator itself.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Orchestrator error: {0}")]
    Orchestrator(#[from] votes_ranker_pipeline::errors::OrchestratorError),
    #[error("Repository error: {0}")]
    Repository(#[from] votes_ranker_repository::RepositoryError),
    #[error("DATABASE_URL must be set for the postgres storage backend")]
    MissingDatabaseUrl,
    #[error("Invalid value {value:?} for {name}")]
    InvalidConfig { name: String, value: String },
    #[error("Unknown storage backend: {0}")]
    UnknownStorageBackend(String),
    #[error("Database tables are missing and RUN_MIGRATIONS is disabled")]
    MissingTables,
    #[error("Delta log partitions were already taken")]
    PartitionsTaken,
}
