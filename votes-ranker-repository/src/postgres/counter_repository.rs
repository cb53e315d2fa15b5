//! PostgreSQL implementation of the aggregate counter repository.
//!
//! Counters live in the `aggregate_counters` table. Writes are conditional on
//! the stored `last_applied_sequence_id`, which keeps totals and sequence id
//! in lockstep.
use async_trait::async_trait;
use uuid::Uuid;
use votes_ranker_shared::types::{AggregateCounter, SequenceId, TargetId, TargetType};

use crate::{CounterRepository, RepositoryError};

#[derive(sqlx::FromRow)]
struct CounterRow {
    target_id: Uuid,
    target_type: i16,
    upvotes: i64,
    downvotes: i64,
    last_applied_sequence_id: i64,
}

impl TryFrom<CounterRow> for AggregateCounter {
    type Error = RepositoryError;

    fn try_from(row: CounterRow) -> Result<Self, Self::Error> {
        Ok(AggregateCounter {
            target_id: row.target_id,
            target_type: TargetType::try_from(row.target_type)?,
            upvotes: row.upvotes,
            downvotes: row.downvotes,
            last_applied_sequence_id: row.last_applied_sequence_id,
        })
    }
}

/// PostgreSQL-backed counter repository.
pub struct PostgresCounterRepository {
    /// PostgreSQL connection pool
    pool: sqlx::PgPool,
}

impl PostgresCounterRepository {
    /// Creates a new PostgreSQL counter repository instance.
    ///
    /// # Arguments
    ///
    /// * `pool` - Configured PostgreSQL connection pool with the required schema
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CounterRepository for PostgresCounterRepository {
    async fn get_counter(
        &self,
        target_id: TargetId,
    ) -> Result<Option<AggregateCounter>, RepositoryError> {
        let row = sqlx::query_as::<_, CounterRow>(
            r#"
            SELECT target_id, target_type, upvotes, downvotes, last_applied_sequence_id
            FROM aggregate_counters
            WHERE target_id = $1
            "#,
        )
        .bind(target_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(AggregateCounter::try_from).transpose()
    }

    /// Retrieves the counters of many targets using `ANY` over a UUID array.
    async fn get_counters(
        &self,
        target_ids: &[TargetId],
    ) -> Result<Vec<AggregateCounter>, RepositoryError> {
        if target_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, CounterRow>(
            r#"
            SELECT target_id, target_type, upvotes, downvotes, last_applied_sequence_id
            FROM aggregate_counters
            WHERE target_id = ANY($1)
            "#,
        )
        .bind(target_ids)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(AggregateCounter::try_from).collect()
    }

    async fn save_counter(
        &self,
        counter: &AggregateCounter,
        expected_sequence_id: SequenceId,
    ) -> Result<bool, RepositoryError> {
        let result = if expected_sequence_id == 0 {
            sqlx::query(
                r#"
                INSERT INTO aggregate_counters (target_id, target_type, upvotes, downvotes, last_applied_sequence_id)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (target_id) DO NOTHING
                "#,
            )
            .bind(counter.target_id)
            .bind(counter.target_type.as_i16())
            .bind(counter.upvotes)
            .bind(counter.downvotes)
            .bind(counter.last_applied_sequence_id)
            .execute(&self.pool)
            .await?
        } else {
            sqlx::query(
                r#"
                UPDATE aggregate_counters
                SET upvotes = $1, downvotes = $2, last_applied_sequence_id = $3
                WHERE target_id = $4 AND last_applied_sequence_id = $5
                "#,
            )
            .bind(counter.upvotes)
            .bind(counter.downvotes)
            .bind(counter.last_applied_sequence_id)
            .bind(counter.target_id)
            .bind(expected_sequence_id)
            .execute(&self.pool)
            .await?
        };

        Ok(result.rows_affected() == 1)
    }
}
