//! # Votes Ranker Repository
//! This crate provides traits and implementations for interacting with the
//! stores behind the vote pipeline: the vote ledger and its outbox, the
//! aggregate counters, and the ranking snapshots with their run lease.
//! It includes definitions for errors, interfaces, and concrete
//! implementations for PostgreSQL and for process memory.
pub mod errors;
pub mod interfaces;
pub mod memory;
pub mod postgres;

pub use errors::RepositoryError;
pub use interfaces::{
    CounterRepository, DeltaOutboxRepository, LeaseRepository, SnapshotRepository,
    VoteHistoryRepository, VoteLedgerRepository,
};
pub use memory::InMemoryVotesRepository;
pub use postgres::{PostgresCounterRepository, PostgresLedgerRepository, PostgresRankingRepository};
