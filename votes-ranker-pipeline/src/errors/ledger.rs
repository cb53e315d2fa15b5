//! Error types for the vote ledger of the Votes Ranker Pipeline.
//! Defines the errors that reject a vote before the ledger is mutated and
//! the storage errors that abort a cast.
use thiserror::Error;
use votes_ranker_repository::RepositoryError;
use votes_ranker_shared::types::{InvalidVoteValue, TargetId};

/// Represents errors that can occur while casting or reading a vote.
///
/// Validation errors (`InvalidValue`, `TargetNotFound`) are always raised
/// before any ledger state changes. A CAS conflict is not an error: it is
/// reported as `CastOutcome::Conflict`.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Invalid vote value: {0}")]
    InvalidValue(#[from] InvalidVoteValue),
    #[error("Target not found: {0}")]
    TargetNotFound(TargetId),
    #[error("Target directory error: {0}")]
    TargetDirectory(String),
    #[error("Ledger repository error: {0}")]
    Repository(#[from] RepositoryError),
}
