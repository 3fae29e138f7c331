// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! Plan canonicalization/hashing and the approval-token service that gates
//! mutating jobs.

use base64::Engine;
use rand::RngCore;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use wsa_core::{JobStatus, Plan};
use wsa_store::{CPStore, StoreError};

/// TTL bounds an approval's lifetime is unconditionally clamped to,
/// regardless of what a caller requests.
pub const MIN_TTL_SECONDS: i64 = 10;
pub const MAX_TTL_SECONDS: i64 = 3600;

#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("plan job not found")]
    PlanJobNotFound,

    #[error("plan job is not in SUCCEEDED state")]
    PlanJobNotSucceeded,

    #[error("plan result not found")]
    PlanResultNotFound,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("malformed plan JSON: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Produce the canonical JSON encoding of any serializable value: sorted
/// keys, no whitespace separators. This is the exact input `plan_hash` is
/// computed over.
pub fn canonicalize<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let v = serde_json::to_value(value)?;
    serde_json::to_string(&v)
}

/// SHA-256 hex digest of a plan's canonical encoding, with `plan_hash`
/// itself excluded from the hashed bytes.
pub fn compute_plan_hash(plan: &Plan) -> Result<String, serde_json::Error> {
    let mut unhashed = plan.clone();
    unhashed.plan_hash = None;
    let json = canonicalize(&unhashed)?;
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

/// The plan hash to validate against: the plan's own embedded `plan_hash`
/// field when present, otherwise freshly computed. Mirrors the original
/// worker's `plan_json.get("plan_hash") or plan_sha256(plan_json)`.
pub fn effective_plan_hash(plan: &Plan) -> Result<String, serde_json::Error> {
    match &plan.plan_hash {
        Some(h) if !h.is_empty() => Ok(h.clone()),
        _ => compute_plan_hash(plan),
    }
}

/// Mint a 256-bit, URL-safe, unpadded random token.
pub fn mint_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

fn clamp_ttl(requested: i64) -> i64 {
    requested.clamp(MIN_TTL_SECONDS, MAX_TTL_SECONDS)
}

/// Result of a successful `/approve` call.
#[derive(Debug, Clone)]
pub struct ApproveResult {
    pub approval_token: String,
    pub plan_job_id: String,
    pub plan_hash: String,
    pub ttl_seconds: i64,
}

/// Mints and validates approval tokens. Thin wrapper around [`CPStore`]
/// that owns the canonicalization/hashing and TTL-clamping policy.
#[derive(Clone)]
pub struct ApprovalService {
    store: CPStore,
}

impl ApprovalService {
    pub fn new(store: CPStore) -> Self {
        Self { store }
    }

    /// Approves the plan produced by `plan_job_id`: the job must exist and
    /// have SUCCEEDED, and its result must decode as a [`Plan`]. Purges
    /// expired approvals first.
    pub async fn approve_plan(
        &self,
        plan_job_id: &str,
        ttl_seconds: i64,
    ) -> Result<ApproveResult, ApprovalError> {
        self.store.purge_expired_approvals().await?;

        let plan_job = self
            .store
            .get_job(plan_job_id)
            .await?
            .ok_or(ApprovalError::PlanJobNotFound)?;

        if plan_job.status != JobStatus::Succeeded {
            return Err(ApprovalError::PlanJobNotSucceeded);
        }

        let result = self
            .store
            .get_result(plan_job_id)
            .await?
            .ok_or(ApprovalError::PlanResultNotFound)?;

        let plan: Plan = serde_json::from_slice(&result.bytes)?;
        let plan_hash = effective_plan_hash(&plan)?;

        let token = mint_token();
        let ttl = clamp_ttl(ttl_seconds);
        self.store
            .create_approval(&token, plan_job_id, &plan_hash, ttl * 1000)
            .await?;

        Ok(ApproveResult {
            approval_token: token,
            plan_job_id: plan_job_id.to_string(),
            plan_hash,
            ttl_seconds: ttl,
        })
    }

    /// Validates a token against a freshly computed/extracted plan hash.
    /// Callers (the EXECUTE_PLAN handler) must pass a hash derived from the
    /// plan they are about to run, never one read off the approval row.
    pub async fn validate(
        &self,
        token: &str,
        plan_job_id: &str,
        plan_hash: &str,
    ) -> Result<bool, StoreError> {
        self.store.validate_approval(token, plan_job_id, plan_hash).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wsa_core::{JobType, PlanMove};

    #[test]
    fn canonical_encoding_has_no_whitespace_and_sorted_keys() {
        let plan = Plan {
            policy: "by_ext".into(),
            count: 1,
            moves: vec![PlanMove { from: "/a".into(), to: "/b".into() }],
            plan_hash: None,
        };
        let json = canonicalize(&plan).unwrap();
        assert!(!json.contains(' '));
        // "count" < "moves" < "plan_hash" < "policy" alphabetically
        let count_pos = json.find("\"count\"").unwrap();
        let moves_pos = json.find("\"moves\"").unwrap();
        let policy_pos = json.find("\"policy\"").unwrap();
        assert!(count_pos < moves_pos);
        assert!(moves_pos < policy_pos);
    }

    #[test]
    fn plan_hash_is_stable_across_reserialization() {
        let plan = Plan {
            policy: "by_ext".into(),
            count: 1,
            moves: vec![PlanMove { from: "/a".into(), to: "/b".into() }],
            plan_hash: None,
        };
        let h1 = compute_plan_hash(&plan).unwrap();
        let json = serde_json::to_string(&plan).unwrap();
        let roundtripped: Plan = serde_json::from_str(&json).unwrap();
        let h2 = compute_plan_hash(&roundtripped).unwrap();
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn effective_hash_prefers_embedded_field() {
        let plan = Plan {
            policy: "by_ext".into(),
            count: 0,
            moves: vec![],
            plan_hash: Some("embedded".into()),
        };
        assert_eq!(effective_plan_hash(&plan).unwrap(), "embedded");
    }

    #[test]
    fn mint_token_is_random_and_url_safe() {
        let a = mint_token();
        let b = mint_token();
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[tokio::test]
    async fn approve_plan_rejects_missing_job() {
        let store = CPStore::open_memory().await.unwrap();
        let svc = ApprovalService::new(store);
        let err = svc.approve_plan("missing", 120).await.unwrap_err();
        assert!(matches!(err, ApprovalError::PlanJobNotFound));
    }

    #[tokio::test]
    async fn approve_plan_rejects_job_not_succeeded() {
        let store = CPStore::open_memory().await.unwrap();
        store
            .upsert_job_if_new(
                "plan-1",
                "dk",
                JobType::ORGANIZE_PLAN,
                &Default::default(),
                &["/tmp".to_string()],
                None,
            )
            .await
            .unwrap();
        let svc = ApprovalService::new(store);
        let err = svc.approve_plan("plan-1", 120).await.unwrap_err();
        assert!(matches!(err, ApprovalError::PlanJobNotSucceeded));
    }

    #[tokio::test]
    async fn approve_plan_clamps_ttl_and_binds_hash() {
        let store = CPStore::open_memory().await.unwrap();
        store
            .upsert_job_if_new(
                "plan-1",
                "dk",
                JobType::ORGANIZE_PLAN,
                &Default::default(),
                &["/tmp".to_string()],
                None,
            )
            .await
            .unwrap();
        store.claim_job_lease("plan-1", "w1", 30_000).await.unwrap();

        let plan = Plan {
            policy: "by_ext".into(),
            count: 0,
            moves: vec![],
            plan_hash: None,
        };
        let hash = compute_plan_hash(&plan).unwrap();
        let mut stored = plan.clone();
        stored.plan_hash = Some(hash.clone());
        let bytes = serde_json::to_vec(&stored).unwrap();
        store.put_result("plan-1", &bytes, "application/json").await.unwrap();
        store.complete_job("plan-1", true, None).await.unwrap();

        let svc = ApprovalService::new(store.clone());
        let approved = svc.approve_plan("plan-1", 100_000).await.unwrap();
        assert_eq!(approved.ttl_seconds, MAX_TTL_SECONDS);
        assert_eq!(approved.plan_hash, hash);
        assert!(svc.validate(&approved.approval_token, "plan-1", &hash).await.unwrap());
    }
}
