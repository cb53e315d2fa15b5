//! The `VotesApi` facade: the operations the forum backend calls.
use std::collections::HashMap;
use std::sync::Arc;

use votes_ranker_shared::types::{RankedPost, TargetId, TargetType, UserId, VoteRecord, VoteTotals};

use crate::aggregator::Aggregator;
use crate::errors::{AggregatorError, LedgerError};
use crate::ledger::{CastOutcome, VoteLedger};
use crate::ranking::RankingStore;

/// Entry point for vote writes and reads.
///
/// Writes go to the ledger; counter reads are served from the aggregate
/// counters and leaderboard reads from the currently published snapshot.
#[derive(Clone)]
pub struct VotesApi {
    ledger: Arc<VoteLedger>,
    aggregator: Arc<Aggregator>,
    store: Arc<RankingStore>,
}

impl VotesApi {
    pub fn new(ledger: Arc<VoteLedger>, aggregator: Arc<Aggregator>, store: Arc<RankingStore>) -> Self {
        Self {
            ledger,
            aggregator,
            store,
        }
    }

    /// See [`VoteLedger::cast_vote`].
    pub async fn cast_vote(
        &self,
        user_id: UserId,
        target_id: TargetId,
        target_type: TargetType,
        value: i16,
    ) -> Result<CastOutcome, LedgerError> {
        self.ledger
            .cast_vote(user_id, target_id, target_type, value)
            .await
    }

    pub async fn get_user_vote(
        &self,
        user_id: UserId,
        target_id: TargetId,
    ) -> Result<Option<VoteRecord>, LedgerError> {
        self.ledger.get_user_vote(user_id, target_id).await
    }

    /// Current totals of a target. Lags the ledger by the delta propagation
    /// delay.
    pub async fn get_aggregate_counters(&self, target_id: TargetId) -> Result<VoteTotals, AggregatorError> {
        self.aggregator.get_aggregate_counters(target_id).await
    }

    pub async fn get_aggregate_counters_batch(
        &self,
        target_ids: &[TargetId],
    ) -> Result<HashMap<TargetId, VoteTotals>, AggregatorError> {
        self.aggregator.get_aggregate_counters_batch(target_ids).await
    }

    /// Top `limit` posts of the published leaderboard. Never blocks on a
    /// rebuild.
    pub fn get_top_posts(&self, limit: usize) -> Vec<RankedPost> {
        self.store.top_posts(limit)
    }
}
