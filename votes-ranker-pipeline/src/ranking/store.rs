use std::sync::Arc;

use tokio::sync::watch;
use votes_ranker_shared::types::{RankedPost, RankingSnapshot};

/// Holds the currently published ranking snapshot.
///
/// Publishing swaps the snapshot pointer in one step. Readers clone the
/// `Arc` of whichever snapshot is current and never wait on a rebuild; a
/// snapshot a reader still holds stays valid after it is replaced.
pub struct RankingStore {
    current: watch::Sender<Option<Arc<RankingSnapshot>>>,
}

impl Default for RankingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RankingStore {
    pub fn new() -> Self {
        let (current, _) = watch::channel(None);
        Self { current }
    }

    /// Replaces the current snapshot.
    pub fn publish(&self, snapshot: RankingSnapshot) {
        self.current.send_replace(Some(Arc::new(snapshot)));
    }

    /// Returns the current snapshot, if one has been published.
    pub fn current(&self) -> Option<Arc<RankingSnapshot>> {
        self.current.borrow().clone()
    }

    /// Returns the first `limit` posts of the current snapshot with their
    /// 1-based rank, or nothing before the first publish.
    pub fn top_posts(&self, limit: usize) -> Vec<RankedPost> {
        self.current()
            .map(|snapshot| snapshot.top(limit))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;
    use votes_ranker_shared::types::RankingEntry;

    fn snapshot(scores: &[i64]) -> RankingSnapshot {
        let now = Utc::now();
        RankingSnapshot {
            generated_at: now,
            window_start: now,
            window_end: now,
            entries: scores
                .iter()
                .map(|score| RankingEntry {
                    target_id: Uuid::new_v4(),
                    score: *score,
                    tie_break_timestamp: now,
                })
                .collect(),
        }
    }

    #[test]
    fn test_top_posts_is_empty_before_first_publish() {
        let store = RankingStore::new();
        assert!(store.current().is_none());
        assert!(store.top_posts(10).is_empty());
    }

    #[test]
    fn test_top_posts_limits_and_ranks() {
        let store = RankingStore::new();
        store.publish(snapshot(&[9, 4, 1]));

        let top = store.top_posts(2);

        assert_eq!(top.len(), 2);
        assert_eq!((top[0].score, top[0].rank), (9, 1));
        assert_eq!((top[1].score, top[1].rank), (4, 2));
    }

    #[test]
    fn test_reader_keeps_replaced_snapshot() {
        let store = RankingStore::new();
        store.publish(snapshot(&[1]));
        let held = store.current().unwrap();

        store.publish(snapshot(&[2, 3]));

        assert_eq!(held.entries.len(), 1);
        assert_eq!(store.current().unwrap().entries.len(), 2);
    }
}
