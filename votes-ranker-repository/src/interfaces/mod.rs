//! This module defines and re-exports the interfaces for the repositories.
//! It serves as a central point for accessing traits related to data interaction.
mod counters;
mod ledger;
mod outbox;
mod ranking;

pub use counters::CounterRepository;
pub use ledger::{VoteHistoryRepository, VoteLedgerRepository};
pub use outbox::DeltaOutboxRepository;
pub use ranking::{LeaseRepository, SnapshotRepository};
