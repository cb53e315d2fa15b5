//! Error types for the orchestrator module of the Votes Ranker Pipeline.
//! Defines specific errors that can occur while starting the background services.
use thiserror::Error;

use crate::errors::PublisherError;

/// Represents errors that can occur within the orchestrator.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Publisher error: {0}")]
    Publisher(#[from] PublisherError),
    #[error("No delta log partitions to consume")]
    NoPartitions,
}
