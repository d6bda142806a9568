//! Schema bootstrap.
//!
//! Every statement is idempotent and the whole bootstrap runs in one
//! exclusive-write transaction, so any number of processes may open the same
//! store at once.

use jobq_config::ConfigKey;
use sqlx::SqlitePool;

use crate::DbResult;
use crate::tx::ImmediateTx;

const DDL: [&str; 7] = [
    r#"
    CREATE TABLE IF NOT EXISTS jobs (
        id TEXT PRIMARY KEY,
        command TEXT NOT NULL,
        state TEXT NOT NULL CHECK (state IN ('pending', 'processing', 'completed', 'failed', 'dead')),
        attempts INTEGER NOT NULL DEFAULT 0,
        max_retries INTEGER NOT NULL DEFAULT 3,
        priority INTEGER NOT NULL DEFAULT 0,
        next_run_at TEXT,
        locked_by TEXT,
        locked_at TEXT,
        last_error TEXT,
        return_code INTEGER,
        stdout TEXT,
        stderr TEXT,
        duration_ms INTEGER,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_jobs_state_next ON jobs(state, next_run_at)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_claim_order ON jobs(state, priority DESC, created_at)",
    r#"
    CREATE TABLE IF NOT EXISTS workers (
        worker_id TEXT PRIMARY KEY,
        status TEXT NOT NULL CHECK (status IN ('starting', 'idle', 'busy', 'stopping', 'stopped')),
        current_job_id TEXT,
        pid INTEGER,
        started_at TEXT NOT NULL,
        last_seen_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS config (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS control (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
    "#,
    "INSERT OR IGNORE INTO control (key, value) VALUES ('shutdown', '0')",
];

/// Create tables and seed default tunables if they are missing.
#[tracing::instrument(skip(pool))]
pub async fn ensure_schema(pool: &SqlitePool) -> DbResult<()> {
    let mut tx = ImmediateTx::begin(pool).await?;

    for statement in DDL {
        sqlx::query(statement).execute(tx.conn()).await?;
    }

    for key in ConfigKey::ALL {
        sqlx::query("INSERT OR IGNORE INTO config (key, value) VALUES (?, ?)")
            .bind(key.as_str())
            .bind(key.default_value())
            .execute(tx.conn())
            .await?;
    }

    tx.commit().await?;
    tracing::debug!("schema ready");
    Ok(())
}
