//! PostgreSQL implementation of the vote ledger, its history view and its outbox.
//!
//! Ledger changes are committed with a transactional outbox: the record write,
//! the per-target sequence allocation and the delta event insert share one
//! transaction, so an event exists if and only if its change was committed.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;
use votes_ranker_shared::types::{
    SequenceId, TargetActivity, TargetId, TargetType, UserId, VoteDeltaEvent, VoteRecord,
    VoteTransition, VoteValue,
};

use crate::{DeltaOutboxRepository, RepositoryError, VoteHistoryRepository, VoteLedgerRepository};

#[derive(sqlx::FromRow)]
struct VoteRecordRow {
    user_id: Uuid,
    target_id: Uuid,
    target_type: i16,
    value: i16,
    version: i64,
    updated_at: DateTime<Utc>,
}

impl TryFrom<VoteRecordRow> for VoteRecord {
    type Error = RepositoryError;

    fn try_from(row: VoteRecordRow) -> Result<Self, Self::Error> {
        Ok(VoteRecord {
            user_id: row.user_id,
            target_id: row.target_id,
            target_type: TargetType::try_from(row.target_type)?,
            value: VoteValue::try_from(row.value)?,
            version: row.version,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct DeltaEventRow {
    target_id: Uuid,
    sequence_id: i64,
    target_type: i16,
    old_value: i16,
    new_value: i16,
    occurred_at: DateTime<Utc>,
}

impl TryFrom<DeltaEventRow> for VoteDeltaEvent {
    type Error = RepositoryError;

    fn try_from(row: DeltaEventRow) -> Result<Self, Self::Error> {
        Ok(VoteDeltaEvent {
            sequence_id: row.sequence_id,
            target_id: row.target_id,
            target_type: TargetType::try_from(row.target_type)?,
            old_value: VoteValue::try_from(row.old_value)?,
            new_value: VoteValue::try_from(row.new_value)?,
            timestamp: row.occurred_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ActivityRow {
    target_id: Uuid,
    score: i64,
    last_activity: DateTime<Utc>,
}

/// PostgreSQL-backed vote ledger.
///
/// Implements `VoteLedgerRepository`, `VoteHistoryRepository` and
/// `DeltaOutboxRepository` over the `vote_records`, `target_sequences` and
/// `vote_outbox` tables.
pub struct PostgresLedgerRepository {
    pool: sqlx::PgPool,
}

impl PostgresLedgerRepository {
    /// Creates a new PostgreSQL ledger repository instance.
    ///
    /// # Arguments
    ///
    /// * `pool` - Configured PostgreSQL connection pool with the required schema
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    /// Writes the record part of a transition within an active transaction.
    ///
    /// Returns the number of affected rows, 0 when the precondition failed.
    async fn write_record_tx(
        &self,
        transition: &VoteTransition,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    ) -> Result<u64, RepositoryError> {
        let record = &transition.record;
        let result = match transition.expected_version {
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO vote_records (user_id, target_id, target_type, value, version, updated_at)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    ON CONFLICT (user_id, target_id) DO NOTHING
                    "#,
                )
                .bind(record.user_id)
                .bind(record.target_id)
                .bind(record.target_type.as_i16())
                .bind(record.value.as_i16())
                .bind(record.version)
                .bind(record.updated_at)
                .execute(&mut **tx)
                .await?
            }
            Some(expected_version) => {
                sqlx::query(
                    r#"
                    UPDATE vote_records
                    SET value = $1, version = $2, updated_at = $3
                    WHERE user_id = $4 AND target_id = $5 AND version = $6
                    "#,
                )
                .bind(record.value.as_i16())
                .bind(record.version)
                .bind(record.updated_at)
                .bind(record.user_id)
                .bind(record.target_id)
                .bind(expected_version)
                .execute(&mut **tx)
                .await?
            }
        };
        Ok(result.rows_affected())
    }

    /// Allocates the next sequence id of a target within an active transaction.
    ///
    /// The upsert takes a row lock on the target's sequence, so concurrent
    /// commits on the same target are ordered by this statement.
    async fn next_sequence_id_tx(
        &self,
        target_id: TargetId,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    ) -> Result<SequenceId, RepositoryError> {
        let sequence_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO target_sequences (target_id, last_sequence_id)
            VALUES ($1, 1)
            ON CONFLICT (target_id)
            DO UPDATE SET last_sequence_id = target_sequences.last_sequence_id + 1
            RETURNING last_sequence_id
            "#,
        )
        .bind(target_id)
        .fetch_one(&mut **tx)
        .await?;
        Ok(sequence_id)
    }

    async fn insert_outbox_tx(
        &self,
        event: &VoteDeltaEvent,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO vote_outbox (target_id, sequence_id, target_type, old_value, new_value, occurred_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(event.target_id)
        .bind(event.sequence_id)
        .bind(event.target_type.as_i16())
        .bind(event.old_value.as_i16())
        .bind(event.new_value.as_i16())
        .bind(event.timestamp)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl VoteLedgerRepository for PostgresLedgerRepository {
    async fn get_vote(
        &self,
        user_id: UserId,
        target_id: TargetId,
    ) -> Result<Option<VoteRecord>, RepositoryError> {
        let row = sqlx::query_as::<_, VoteRecordRow>(
            r#"
            SELECT user_id, target_id, target_type, value, version, updated_at
            FROM vote_records
            WHERE user_id = $1 AND target_id = $2
            "#,
        )
        .bind(user_id)
        .bind(target_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(VoteRecord::try_from).transpose()
    }

    /// Commits the record write, sequence allocation and outbox insert in a
    /// single transaction. A failed precondition rolls everything back.
    async fn commit_transition(
        &self,
        transition: &VoteTransition,
    ) -> Result<Option<VoteDeltaEvent>, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        if self.write_record_tx(transition, &mut tx).await? == 0 {
            tracing::debug!(
                user_id = %transition.record.user_id,
                target_id = %transition.record.target_id,
                "Vote record changed concurrently, rolling back"
            );
            tx.rollback().await?;
            return Ok(None);
        }

        let record = &transition.record;
        let sequence_id = self.next_sequence_id_tx(record.target_id, &mut tx).await?;
        let event = VoteDeltaEvent {
            sequence_id,
            target_id: record.target_id,
            target_type: record.target_type,
            old_value: transition.old_value,
            new_value: record.value,
            timestamp: record.updated_at,
        };
        self.insert_outbox_tx(&event, &mut tx).await?;

        tx.commit().await?;
        Ok(Some(event))
    }
}

#[async_trait]
impl VoteHistoryRepository for PostgresLedgerRepository {
    async fn window_activity(
        &self,
        target_type: TargetType,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<Vec<TargetActivity>, RepositoryError> {
        let rows = sqlx::query_as::<_, ActivityRow>(
            r#"
            SELECT target_id,
                   SUM(value)::BIGINT AS score,
                   MAX(updated_at) AS last_activity
            FROM vote_records
            WHERE target_type = $1
              AND value <> 0
              AND updated_at >= $2
              AND updated_at <= $3
            GROUP BY target_id
            "#,
        )
        .bind(target_type.as_i16())
        .bind(window_start)
        .bind(window_end)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| TargetActivity {
                target_id: row.target_id,
                score: row.score,
                last_activity: row.last_activity,
            })
            .collect())
    }
}

#[async_trait]
impl DeltaOutboxRepository for PostgresLedgerRepository {
    async fn fetch_unpublished(&self, limit: i64) -> Result<Vec<VoteDeltaEvent>, RepositoryError> {
        let rows = sqlx::query_as::<_, DeltaEventRow>(
            r#"
            SELECT target_id, sequence_id, target_type, old_value, new_value, occurred_at
            FROM vote_outbox
            WHERE NOT published
            ORDER BY target_id, sequence_id
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(VoteDeltaEvent::try_from).collect()
    }

    async fn mark_published(
        &self,
        target_id: TargetId,
        sequence_id: SequenceId,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE vote_outbox SET published = TRUE WHERE target_id = $1 AND sequence_id = $2")
            .bind(target_id)
            .bind(sequence_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_unpublished(
        &self,
        target_id: TargetId,
        sequence_id: SequenceId,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE vote_outbox SET published = FALSE WHERE target_id = $1 AND sequence_id = $2")
            .bind(target_id)
            .bind(sequence_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn prune_applied(&self) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            r#"
            DELETE FROM vote_outbox o
            USING aggregate_counters c
            WHERE c.target_id = o.target_id
              AND o.published
              AND o.sequence_id <= c.last_applied_sequence_id
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn fetch_unapplied(&self, limit: i64) -> Result<Vec<VoteDeltaEvent>, RepositoryError> {
        let rows = sqlx::query_as::<_, DeltaEventRow>(
            r#"
            SELECT o.target_id, o.sequence_id, o.target_type, o.old_value, o.new_value, o.occurred_at
            FROM vote_outbox o
            LEFT JOIN aggregate_counters c ON c.target_id = o.target_id
            WHERE o.sequence_id > COALESCE(c.last_applied_sequence_id, 0)
            ORDER BY o.target_id, o.sequence_id
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(VoteDeltaEvent::try_from).collect()
    }
}
