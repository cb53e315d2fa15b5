//! Time-windowed post leaderboard: the scheduled `RankingBuilder` and the
//! `RankingStore` serving the currently published snapshot.
mod builder;
mod store;

pub use builder::{RANKING_LEASE, RankingBuilder, RankingConfig, RunOutcome, rank_targets};
pub use store::RankingStore;
