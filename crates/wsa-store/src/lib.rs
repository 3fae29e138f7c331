// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! Durable, transactional control-plane store: sessions, jobs, results, and
//! approvals. Backed by SQLite in WAL mode. All queries use the runtime
//! `sqlx::query` form (no `query!` macro), since this crate is never built
//! against a live database at compile time.

mod schema;

use chrono::Utc;
use serde_json;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::HashMap;
use thiserror::Error;
use wsa_core::{Approval, Job, JobResult, JobStatus, JobType};

/// Errors raised by the store. Wraps the underlying `sqlx::Error` alongside
/// a couple of store-specific conditions.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("malformed params/roots JSON in row: {0}")]
    Decode(#[from] serde_json::Error),
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Default worker lease duration, in milliseconds.
pub const DEFAULT_LEASE_MS: i64 = 30_000;

/// Durable control-plane store.
#[derive(Clone)]
pub struct CPStore {
    pool: SqlitePool,
}

impl CPStore {
    /// Open (creating if absent) the SQLite database at `path` and ensure
    /// the schema exists.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let url = format!("sqlite:{path}?mode=rwc");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Open an in-memory database. Intended for tests.
    pub async fn open_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<(), StoreError> {
        schema::ensure_schema(&self.pool).await
    }

    // ---------------- sessions ----------------

    pub async fn create_session(&self, session_id: &str, token: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT OR REPLACE INTO sessions(session_id, token, created_at_ms) VALUES(?,?,?)",
        )
        .bind(session_id)
        .bind(token)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_session_token(&self, session_id: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT token FROM sessions WHERE session_id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>("token")))
    }

    // ---------------- jobs ----------------

    /// Atomically inserts a new QUEUED job unless `(dedupe_key, type)`
    /// already exists, in which case the existing job id is returned
    /// unchanged (invariant J1).
    #[allow(clippy::too_many_arguments)]
    pub async fn upsert_job_if_new(
        &self,
        job_id: &str,
        dedupe_key: &str,
        job_type: JobType,
        params: &HashMap<String, String>,
        allowed_roots: &[String],
        approval_token: Option<&str>,
    ) -> Result<(bool, String), StoreError> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query("SELECT job_id FROM jobs WHERE dedupe_key = ? AND type = ?")
            .bind(dedupe_key)
            .bind(job_type.code())
            .fetch_optional(&mut *tx)
            .await?;

        if let Some(row) = existing {
            tx.commit().await?;
            return Ok((false, row.get::<String, _>("job_id")));
        }

        let params_json = serde_json::to_string(params)?;
        let roots_json = serde_json::to_string(allowed_roots)?;

        sqlx::query(
            "INSERT INTO jobs(job_id, dedupe_key, type, status, created_at_ms, params_json, allowed_roots_json, approval_token)
             VALUES(?,?,?,?,?,?,?,?)",
        )
        .bind(job_id)
        .bind(dedupe_key)
        .bind(job_type.code())
        .bind(JobStatus::Queued.code())
        .bind(now_ms())
        .bind(params_json)
        .bind(roots_json)
        .bind(approval_token)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok((true, job_id.to_string()))
    }

    /// Returns the oldest QUEUED job, if any. A pure read; does not claim.
    pub async fn fetch_next_queued_job(&self) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM jobs WHERE status = ? ORDER BY created_at_ms ASC, job_id ASC LIMIT 1",
        )
        .bind(JobStatus::Queued.code())
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_job).transpose()
    }

    /// The scheduler primitive: atomically transitions `job_id` to RUNNING,
    /// either from QUEUED or by reclaiming a RUNNING job whose lease has
    /// expired (invariant J2). Returns `true` iff exactly one row updated.
    pub async fn claim_job_lease(
        &self,
        job_id: &str,
        worker_id: &str,
        lease_ms: i64,
    ) -> Result<bool, StoreError> {
        let t = now_ms();
        let expires = t + lease_ms;
        let result = sqlx::query(
            "UPDATE jobs
               SET status = ?,
                   started_at_ms = COALESCE(started_at_ms, ?),
                   lease_owner = ?,
                   lease_expires_at_ms = ?
             WHERE job_id = ?
               AND (
                  status = ?
                  OR (status = ? AND lease_expires_at_ms IS NOT NULL AND lease_expires_at_ms < ?)
               )",
        )
        .bind(JobStatus::Running.code())
        .bind(t)
        .bind(worker_id)
        .bind(expires)
        .bind(job_id)
        .bind(JobStatus::Queued.code())
        .bind(JobStatus::Running.code())
        .bind(t)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Terminates a job exactly once (invariant J3), clearing its lease.
    pub async fn complete_job(
        &self,
        job_id: &str,
        ok: bool,
        error_message: Option<&str>,
    ) -> Result<(), StoreError> {
        let status = if ok { JobStatus::Succeeded } else { JobStatus::Failed };
        sqlx::query(
            "UPDATE jobs
               SET status = ?, finished_at_ms = ?, error_message = ?,
                   lease_owner = NULL, lease_expires_at_ms = NULL
             WHERE job_id = ?",
        )
        .bind(status.code())
        .bind(now_ms())
        .bind(error_message)
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query("SELECT * FROM jobs WHERE job_id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_job).transpose()
    }

    /// Deletes a job row; its result row cascades (`ON DELETE CASCADE`).
    pub async fn delete_job(&self, job_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM jobs WHERE job_id = ?")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ---------------- results ----------------

    pub async fn put_result(
        &self,
        job_id: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT OR REPLACE INTO results(job_id, result_bytes, content_type, created_at_ms)
             VALUES(?,?,?,?)",
        )
        .bind(job_id)
        .bind(bytes)
        .bind(content_type)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_result(&self, job_id: &str) -> Result<Option<JobResult>, StoreError> {
        let row = sqlx::query(
            "SELECT job_id, result_bytes, content_type, created_at_ms FROM results WHERE job_id = ?",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| JobResult {
            job_id: r.get("job_id"),
            bytes: r.get::<Vec<u8>, _>("result_bytes"),
            content_type: r.get("content_type"),
            created_at_ms: r.get("created_at_ms"),
        }))
    }

    // ---------------- approvals ----------------

    pub async fn create_approval(
        &self,
        token: &str,
        plan_job_id: &str,
        plan_hash: &str,
        ttl_ms: i64,
    ) -> Result<(), StoreError> {
        let t = now_ms();
        sqlx::query(
            "INSERT INTO approvals(token, plan_job_id, plan_hash, expires_at_ms, created_at_ms)
             VALUES(?,?,?,?,?)",
        )
        .bind(token)
        .bind(plan_job_id)
        .bind(plan_hash)
        .bind(t + ttl_ms)
        .bind(t)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// True iff a non-expired approval exists binding all three of `token`,
    /// `plan_job_id`, and `plan_hash` together (invariants A1, A2).
    pub async fn validate_approval(
        &self,
        token: &str,
        plan_job_id: &str,
        plan_hash: &str,
    ) -> Result<bool, StoreError> {
        let row = sqlx::query(
            "SELECT token FROM approvals
             WHERE token = ? AND plan_job_id = ? AND plan_hash = ? AND expires_at_ms > ?",
        )
        .bind(token)
        .bind(plan_job_id)
        .bind(plan_hash)
        .bind(now_ms())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    /// Deletes every approval past its TTL (invariant A3).
    pub async fn purge_expired_approvals(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM approvals WHERE expires_at_ms <= ?")
            .bind(now_ms())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Fetches a single approval by token, for diagnostic/display purposes.
    pub async fn get_approval(&self, token: &str) -> Result<Option<Approval>, StoreError> {
        let row = sqlx::query(
            "SELECT token, plan_job_id, plan_hash, expires_at_ms, created_at_ms
             FROM approvals WHERE token = ?",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| Approval {
            token: r.get("token"),
            plan_job_id: r.get("plan_job_id"),
            plan_hash: r.get("plan_hash"),
            expires_at_ms: r.get("expires_at_ms"),
            created_at_ms: r.get("created_at_ms"),
        }))
    }
}

fn row_to_job(row: sqlx::sqlite::SqliteRow) -> Result<Job, StoreError> {
    let params_json: String = row.get("params_json");
    let roots_json: String = row.get("allowed_roots_json");
    let type_code: i64 = row.get("type");
    let status_code: i64 = row.get("status");

    Ok(Job {
        job_id: row.get("job_id"),
        dedupe_key: row.get("dedupe_key"),
        r#type: JobType(type_code),
        status: JobStatus::from_code(status_code)
            .unwrap_or(JobStatus::Failed),
        created_at_ms: row.get("created_at_ms"),
        started_at_ms: row.get("started_at_ms"),
        finished_at_ms: row.get("finished_at_ms"),
        error_message: row.get("error_message"),
        params: serde_json::from_str(&params_json)?,
        allowed_roots: serde_json::from_str(&roots_json)?,
        lease_owner: row.get("lease_owner"),
        lease_expires_at_ms: row.get("lease_expires_at_ms"),
        approval_token: row.get("approval_token"),
    })
}
