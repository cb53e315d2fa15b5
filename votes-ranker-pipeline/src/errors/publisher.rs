//! Error types for the delta publisher.
//! A transport failure on its own is never surfaced as a publisher error: the
//! event stays in the outbox and is relayed later.
use thiserror::Error;
use votes_ranker_repository::RepositoryError;

/// Represents errors that can occur while reading or updating the outbox.
#[derive(Debug, Error)]
pub enum PublisherError {
    #[error("Outbox repository error: {0}")]
    Repository(#[from] RepositoryError),
}
