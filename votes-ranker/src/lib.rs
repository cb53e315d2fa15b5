//! Votes Ranker Library
//!
//! This library provides the service shell around the vote pipeline:
//! configuration from the environment, error handling, and dependency
//! wiring for the PostgreSQL and in-memory storage backends.

pub mod config;
pub mod errors;

pub use config::{Dependencies, Settings, StorageBackend};
pub use errors::ServiceError;
