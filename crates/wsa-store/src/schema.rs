// SPDX-License-Identifier: MIT OR Apache-2.0
//! Schema creation — single source of truth for every table this crate
//! owns. Mirrors the original control-plane store's layout exactly.

use crate::StoreError;
use sqlx::sqlite::SqlitePool;

pub(crate) async fn ensure_schema(pool: &SqlitePool) -> Result<(), StoreError> {
    sqlx::query("PRAGMA journal_mode=WAL").execute(pool).await?;
    sqlx::query("PRAGMA synchronous=NORMAL").execute(pool).await?;
    sqlx::query("PRAGMA foreign_keys=ON").execute(pool).await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS sessions (
            session_id TEXT PRIMARY KEY,
            token TEXT NOT NULL,
            created_at_ms INTEGER NOT NULL
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS jobs (
            job_id TEXT PRIMARY KEY,
            dedupe_key TEXT NOT NULL,
            type INTEGER NOT NULL,
            status INTEGER NOT NULL,
            created_at_ms INTEGER NOT NULL,
            started_at_ms INTEGER,
            finished_at_ms INTEGER,
            error_message TEXT,
            params_json TEXT NOT NULL,
            allowed_roots_json TEXT NOT NULL,
            lease_owner TEXT,
            lease_expires_at_ms INTEGER,
            approval_token TEXT
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS idx_jobs_dedupe ON jobs(dedupe_key, type)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status, created_at_ms)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS results (
            job_id TEXT PRIMARY KEY,
            result_bytes BLOB NOT NULL,
            content_type TEXT NOT NULL,
            created_at_ms INTEGER NOT NULL,
            FOREIGN KEY(job_id) REFERENCES jobs(job_id) ON DELETE CASCADE
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS approvals (
            token TEXT PRIMARY KEY,
            plan_job_id TEXT NOT NULL,
            plan_hash TEXT NOT NULL,
            expires_at_ms INTEGER NOT NULL,
            created_at_ms INTEGER NOT NULL
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_approvals_expires ON approvals(expires_at_ms)")
        .execute(pool)
        .await?;

    Ok(())
}
