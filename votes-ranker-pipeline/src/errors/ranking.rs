//! Error types for the ranking snapshot builder.
use std::time::Duration;

use thiserror::Error;
use votes_ranker_repository::RepositoryError;

/// Represents errors that abort a ranking run.
///
/// Any of these leaves the previously published snapshot current.
#[derive(Debug, Error)]
pub enum RankingError {
    #[error("Ranking repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("Ranking run exceeded its timeout of {0:?}")]
    Timeout(Duration),
    #[error("Ranking window of {0:?} is out of range")]
    InvalidWindow(Duration),
}
