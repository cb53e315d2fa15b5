//! PostgreSQL implementations of the votes ranker repositories.
//!
//! ## Database Tables
//!
//! - `vote_records`: Current vote of each user on each target
//! - `target_sequences`: Per-target delta sequence allocator
//! - `vote_outbox`: Committed delta events awaiting or past delivery
//! - `aggregate_counters`: Running vote totals per target
//! - `ranking_snapshots`: The two most recent published leaderboards
//! - `ranking_leases`: Mutual exclusion of ranking runs
mod counter_repository;
mod ledger_repository;
mod ranking_repository;

pub use counter_repository::PostgresCounterRepository;
pub use ledger_repository::PostgresLedgerRepository;
pub use ranking_repository::PostgresRankingRepository;

use sqlx::postgres::PgPoolOptions;

use crate::errors::RepositoryError;

const REQUIRED_TABLES: [&str; 6] = [
    "vote_records",
    "target_sequences",
    "vote_outbox",
    "aggregate_counters",
    "ranking_snapshots",
    "ranking_leases",
];

/// Opens a connection pool to the database at `database_url`.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<sqlx::PgPool, RepositoryError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Applies the embedded schema migrations.
pub async fn run_migrations(pool: &sqlx::PgPool) -> Result<(), RepositoryError> {
    sqlx::migrate!("./src/postgres/migrations").run(pool).await?;
    tracing::info!("Database migrations applied");
    Ok(())
}

/// Checks if the tables are created in the database.
///
/// # Returns
///
/// * `Ok(true)` - If every table used by the repositories exists
pub async fn check_tables_created(pool: &sqlx::PgPool) -> Result<bool, RepositoryError> {
    for table in REQUIRED_TABLES {
        let table_exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM information_schema.tables WHERE table_name = $1)",
        )
        .bind(table)
        .fetch_one(pool)
        .await?;
        if !table_exists {
            return Ok(false);
        }
    }
    Ok(true)
}
