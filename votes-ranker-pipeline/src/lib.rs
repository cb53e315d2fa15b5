//! # Votes Ranker Pipeline
//! This crate implements the vote pipeline of the forum backend: the vote
//! ledger, the delta publisher and its transport, the aggregator maintaining
//! vote counters, and the ranking builder and store serving the post
//! leaderboard.
//! It also provides the `VotesApi` facade, the `Orchestrator` running the
//! background services, and the error types of each component.
pub mod aggregator;
pub mod api;
pub mod ledger;
pub mod orchestrator;
pub mod publisher;
pub mod ranking;
pub mod transport;

pub mod errors;

pub use api::VotesApi;
