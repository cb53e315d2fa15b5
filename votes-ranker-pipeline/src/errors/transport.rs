//! Error types for the delta transport.
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Partition {0} is full")]
    PartitionFull(usize),
    #[error("Partition {0} is closed")]
    PartitionClosed(usize),
}
