//! PostgreSQL implementation of the snapshot and lease repositories.
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use uuid::Uuid;
use votes_ranker_shared::types::{RankingEntry, RankingSnapshot};

use crate::{LeaseRepository, RepositoryError, SnapshotRepository};

/// Number of snapshot versions kept: the current one and its predecessor.
const RETAINED_SNAPSHOTS: i64 = 2;

#[derive(sqlx::FromRow)]
struct SnapshotRow {
    generated_at: DateTime<Utc>,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    entries: Json<Vec<RankingEntry>>,
}

/// PostgreSQL-backed ranking storage.
///
/// Snapshots are stored as JSONB rows in `ranking_snapshots`; leases are rows
/// of `ranking_leases` whose expiry is evaluated against the database clock.
pub struct PostgresRankingRepository {
    pool: sqlx::PgPool,
}

impl PostgresRankingRepository {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SnapshotRepository for PostgresRankingRepository {
    /// Inserts the snapshot and prunes older versions in one transaction.
    async fn save_snapshot(&self, snapshot: &RankingSnapshot) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO ranking_snapshots (generated_at, window_start, window_end, entries)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(snapshot.generated_at)
        .bind(snapshot.window_start)
        .bind(snapshot.window_end)
        .bind(Json(&snapshot.entries))
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            DELETE FROM ranking_snapshots
            WHERE id NOT IN (SELECT id FROM ranking_snapshots ORDER BY id DESC LIMIT $1)
            "#,
        )
        .bind(RETAINED_SNAPSHOTS)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn load_latest_snapshot(&self) -> Result<Option<RankingSnapshot>, RepositoryError> {
        let row = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT generated_at, window_start, window_end, entries
            FROM ranking_snapshots
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| RankingSnapshot {
            generated_at: row.generated_at,
            window_start: row.window_start,
            window_end: row.window_end,
            entries: row.entries.0,
        }))
    }
}

#[async_trait]
impl LeaseRepository for PostgresRankingRepository {
    /// Upserts the lease row, taking over only when the current lease has
    /// expired or already belongs to `holder`.
    async fn try_acquire_lease(
        &self,
        name: &str,
        holder: Uuid,
        ttl: Duration,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"
            INSERT INTO ranking_leases (name, holder, expires_at)
            VALUES ($1, $2, now() + make_interval(secs => $3::double precision))
            ON CONFLICT (name)
            DO UPDATE SET holder = EXCLUDED.holder, expires_at = EXCLUDED.expires_at
            WHERE ranking_leases.expires_at < now() OR ranking_leases.holder = EXCLUDED.holder
            "#,
        )
        .bind(name)
        .bind(holder)
        .bind(ttl.as_secs_f64())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release_lease(&self, name: &str, holder: Uuid) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM ranking_leases WHERE name = $1 AND holder = $2")
            .bind(name)
            .bind(holder)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
