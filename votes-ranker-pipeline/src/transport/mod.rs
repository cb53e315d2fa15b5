//! Delivery log between the delta publisher and the aggregator.
//!
//! The log is a single logical stream partitioned by target id. Events of
//! one target always land on the same partition; delivery is at-least-once
//! and ordered within a partition.
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use votes_ranker_shared::types::{TargetId, VoteDeltaEvent};

use crate::errors::TransportError;

/// Default number of buffered events per partition.
pub const DEFAULT_PARTITION_CAPACITY: usize = 1024;

/// Default time a send waits for room in a full partition.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_millis(250);

/// Returns the partition that carries the events of `target_id`.
pub fn partition_for(target_id: TargetId, partitions: usize) -> usize {
    (target_id.as_u128() % partitions.max(1) as u128) as usize
}

/// An ordered, partitioned, at-least-once log of delta events.
#[async_trait]
pub trait DeltaTransport: Send + Sync {
    /// Number of partitions of the log.
    fn partition_count(&self) -> usize;

    /// Appends an event to the partition of its target.
    async fn send(&self, event: &VoteDeltaEvent) -> Result<(), TransportError>;
}

/// In-process delta log backed by one bounded channel per partition.
pub struct InMemoryDeltaLog {
    senders: Vec<mpsc::Sender<VoteDeltaEvent>>,
    receivers: Mutex<Option<Vec<mpsc::Receiver<VoteDeltaEvent>>>>,
    send_timeout: Duration,
}

impl InMemoryDeltaLog {
    /// Creates a log with `partitions` partitions (at least one), each
    /// buffering up to `capacity` events.
    pub fn new(partitions: usize, capacity: usize, send_timeout: Duration) -> Self {
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..partitions.max(1))
            .map(|_| mpsc::channel(capacity.max(1)))
            .unzip();
        Self {
            senders,
            receivers: Mutex::new(Some(receivers)),
            send_timeout,
        }
    }

    /// Hands out the consuming ends of every partition, indexed by partition.
    ///
    /// Returns `None` once the partitions have been taken.
    pub fn take_partitions(&self) -> Option<Vec<mpsc::Receiver<VoteDeltaEvent>>> {
        self.receivers.lock().ok()?.take()
    }
}

#[async_trait]
impl DeltaTransport for InMemoryDeltaLog {
    fn partition_count(&self) -> usize {
        self.senders.len()
    }

    async fn send(&self, event: &VoteDeltaEvent) -> Result<(), TransportError> {
        let partition = partition_for(event.target_id, self.senders.len());
        self.senders[partition]
            .send_timeout(event.clone(), self.send_timeout)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => TransportError::PartitionFull(partition),
                SendTimeoutError::Closed(_) => TransportError::PartitionClosed(partition),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;
    use votes_ranker_shared::types::{TargetType, VoteValue};

    fn event(target_id: TargetId, sequence_id: i64) -> VoteDeltaEvent {
        VoteDeltaEvent {
            sequence_id,
            target_id,
            target_type: TargetType::Post,
            old_value: VoteValue::Remove,
            new_value: VoteValue::Up,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_partition_for_is_stable() {
        let target = Uuid::from_u128(10);
        assert_eq!(partition_for(target, 4), 2);
        assert_eq!(partition_for(target, 4), partition_for(target, 4));
        assert_eq!(partition_for(target, 0), 0);
    }

    #[tokio::test]
    async fn test_events_of_a_target_share_a_partition_in_order() {
        let log = InMemoryDeltaLog::new(4, 16, DEFAULT_SEND_TIMEOUT);
        let target = Uuid::from_u128(7);

        log.send(&event(target, 1)).await.unwrap();
        log.send(&event(target, 2)).await.unwrap();

        let mut partitions = log.take_partitions().unwrap();
        let receiver = &mut partitions[partition_for(target, 4)];
        assert_eq!(receiver.recv().await.unwrap().sequence_id, 1);
        assert_eq!(receiver.recv().await.unwrap().sequence_id, 2);
        assert!(log.take_partitions().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_to_full_partition_times_out() {
        let log = InMemoryDeltaLog::new(1, 1, DEFAULT_SEND_TIMEOUT);
        let target = Uuid::new_v4();

        log.send(&event(target, 1)).await.unwrap();
        let result = log.send(&event(target, 2)).await;

        assert_eq!(result, Err(TransportError::PartitionFull(0)));
    }

    #[tokio::test]
    async fn test_send_to_dropped_partition_is_closed() {
        let log = InMemoryDeltaLog::new(1, 1, DEFAULT_SEND_TIMEOUT);
        drop(log.take_partitions());

        let result = log.send(&event(Uuid::new_v4(), 1)).await;

        assert_eq!(result, Err(TransportError::PartitionClosed(0)));
    }
}
