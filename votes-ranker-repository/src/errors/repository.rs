//! Error types for the repositories.
//! Defines specific errors that can occur during storage operations.
use thiserror::Error;
use votes_ranker_shared::types::{InvalidTargetType, InvalidVoteValue};

/// Represents errors that can occur within any of the repositories.
///
/// This enum consolidates the error conditions of the storage layer, such as
/// SQLx errors during database operations or values read back from storage
/// that do not decode into the domain types.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("Stored vote value is invalid: {0}")]
    InvalidVoteValue(#[from] InvalidVoteValue),

    #[error("Stored target type is invalid: {0}")]
    InvalidTargetType(#[from] InvalidTargetType),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}
