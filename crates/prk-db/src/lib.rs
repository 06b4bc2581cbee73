//! prk-db
//!
//! Transaction Store adapters:
//! - [`PgTransactionStore`]: PostgreSQL via sqlx, embedded migrations
//! - [`MemoryTransactionStore`]: in-process, used for dry runs and tests
//!
//! Both enforce the same contract: soft-deleted rows are invisible to
//! matching, ids and versions are store-assigned, and a versioned update
//! against a moved record is a conflict.

use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, PgPool};

mod memory;
mod pg;

pub use memory::MemoryTransactionStore;
pub use pg::PgTransactionStore;

/// Env var holding the database url unless config names another.
pub const ENV_DB_URL: &str = "PRK_DATABASE_URL";

pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Connect to Postgres using PRK_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    connect(&url, DEFAULT_MAX_CONNECTIONS).await
}

pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;
    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_transactions_table: bool,
    /// Live (non-deleted) rows; 0 when the table does not exist yet.
    pub live_transactions: i64,
}

/// Connectivity + schema presence.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='transactions'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    let live = if exists {
        let (n,): (i64,) = sqlx::query_as::<_, (i64,)>(
            "select count(*)::bigint from transactions where deleted_at is null",
        )
        .fetch_one(pool)
        .await
        .context("status live-count query failed")?;
        n
    } else {
        0
    };

    Ok(DbStatus {
        ok: one == 1,
        has_transactions_table: exists,
        live_transactions: live,
    })
}
