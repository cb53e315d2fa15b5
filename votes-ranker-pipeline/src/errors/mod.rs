mod aggregator;
mod ledger;
mod orchestrator;
mod publisher;
mod ranking;
mod transport;

pub use aggregator::AggregatorError;
pub use ledger::LedgerError;
pub use orchestrator::OrchestratorError;
pub use publisher::PublisherError;
pub use ranking::RankingError;
pub use transport::TransportError;
