// SPDX-License-Identifier: MIT OR Apache-2.0
//! Job-type dispatch: decodes a job's `params` map and routes to the
//! matching filesystem handler. The mutating handlers additionally gate on
//! the approval service before touching the filesystem.

use std::collections::HashMap;
use wsa_approval::{effective_plan_hash, ApprovalService};
use wsa_core::{Job, JobType, Plan, WsaError};
use wsa_store::CPStore;

use crate::fs;

fn required<'a>(params: &'a HashMap<String, String>, key: &str) -> Result<&'a str, WsaError> {
    params
        .get(key)
        .map(|s| s.as_str())
        .ok_or_else(|| WsaError::Handler(format!("missing required param: {key}")))
}

fn optional_u64(params: &HashMap<String, String>, key: &str, default: u64) -> u64 {
    params.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn optional_usize(params: &HashMap<String, String>, key: &str, default: usize) -> usize {
    params.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn optional_bool(params: &HashMap<String, String>, key: &str, default: bool) -> bool {
    params.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// `workspace_root` defaults to the job's first allowed root when omitted,
/// mirroring the original worker's `params.get("workspace_root", roots[0]
/// if roots else "")`.
fn workspace_root_or_default(params: &HashMap<String, String>, roots: &[String]) -> String {
    params
        .get("workspace_root")
        .cloned()
        .unwrap_or_else(|| roots.first().cloned().unwrap_or_default())
}

fn to_json(value: &impl serde::Serialize) -> Result<(Vec<u8>, String), WsaError> {
    let bytes = serde_json::to_vec(value).map_err(|e| WsaError::Handler(e.to_string()))?;
    Ok((bytes, "application/json".to_string()))
}

/// Runs `job` against the handler its type names, returning the result
/// bytes and content type the caller should persist via
/// `CPStore::put_result`. The mutating types additionally consult `store`
/// (to load the referenced plan) and `approvals` (to validate the token).
pub async fn dispatch(job: &Job, store: &CPStore, approvals: &ApprovalService) -> Result<(Vec<u8>, String), WsaError> {
    let params = &job.params;
    let roots = &job.allowed_roots;

    match job.r#type {
        JobType::SCAN_INDEX => {
            let root = required(params, "root")?;
            let hash_files = optional_bool(params, "hash_files", false);
            let max_items = optional_usize(params, "max_items", fs::DEFAULT_SCAN_MAX);
            to_json(&fs::scan_index(root, roots, hash_files, max_items)?)
        }
        JobType::LIST_FILES => {
            let root = required(params, "root")?;
            let max_items = optional_usize(params, "max_items", fs::DEFAULT_LIST_MAX);
            to_json(&fs::list_files(root, roots, max_items)?)
        }
        JobType::READ_FILE => {
            let path = required(params, "path")?;
            let max_bytes = optional_u64(params, "max_bytes", fs::DEFAULT_READ_MAX_BYTES_PUB);
            to_json(&fs::read_file_safe(path, roots, max_bytes)?)
        }
        JobType::ORGANIZE_PLAN => {
            let root = required(params, "root")?;
            let policy = params.get("policy").map(|s| s.as_str()).unwrap_or("by_ext");
            to_json(&fs::propose_organize_plan(root, roots, policy)?)
        }
        JobType::EXECUTE_PLAN => execute_plan(job, store, approvals).await,
        // No hash-bound re-validation here: there is no plan job to recompute a
        // hash against, and the original worker only ever calls validate_approval
        // from the EXECUTE_PLAN branch. The submit-time presence check in
        // wsa-daemon is this pair's only gate.
        JobType::SOFT_DELETE => {
            let path = required(params, "path")?;
            let workspace_root = workspace_root_or_default(params, roots);
            to_json(&fs::soft_delete(path, roots, &workspace_root)?)
        }
        JobType::RESTORE => {
            let trash_item_path = required(params, "trash_item_path")?;
            let restore_to = required(params, "restore_to")?;
            let workspace_root = workspace_root_or_default(params, roots);
            to_json(&fs::restore_from_trash(trash_item_path, restore_to, roots, &workspace_root)?)
        }
        JobType(code) => Err(WsaError::UnsupportedJobType(code)),
    }
}

/// The only handler that re-validates the approval token against a freshly
/// recomputed plan hash. SOFT_DELETE and RESTORE never reach this function;
/// their only gate is the Control API's submit-time presence check.
async fn execute_plan(job: &Job, store: &CPStore, approvals: &ApprovalService) -> Result<(Vec<u8>, String), WsaError> {
    let plan_job_id = required(&job.params, "plan_job_id")?;
    let workspace_root = workspace_root_or_default(&job.params, &job.allowed_roots);
    let token = job.approval_token.as_deref().ok_or(WsaError::ApprovalRequired)?;

    let plan_job = store
        .get_job(plan_job_id)
        .await
        .map_err(|e| WsaError::Store(e.to_string()))?
        .ok_or_else(|| WsaError::Handler(format!("plan job not found: {plan_job_id}")))?;

    if plan_job.status != wsa_core::JobStatus::Succeeded {
        return Err(WsaError::Handler(format!("plan job {plan_job_id} has not succeeded")));
    }

    let result = store
        .get_result(plan_job_id)
        .await
        .map_err(|e| WsaError::Store(e.to_string()))?
        .ok_or_else(|| WsaError::Handler(format!("plan job {plan_job_id} has no result")))?;

    let plan: Plan = serde_json::from_slice(&result.bytes).map_err(|e| WsaError::Handler(e.to_string()))?;
    let plan_hash = effective_plan_hash(&plan).map_err(|e| WsaError::Handler(e.to_string()))?;

    let valid = approvals
        .validate(token, plan_job_id, &plan_hash)
        .await
        .map_err(|e| WsaError::Store(e.to_string()))?;
    if !valid {
        return Err(WsaError::InvalidApproval);
    }

    to_json(&fs::execute_plan(&plan, &job.allowed_roots, &workspace_root)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use wsa_core::{JobStatus, PlanMove};

    fn job_with(r#type: JobType, params: HashMap<String, String>, roots: Vec<String>) -> Job {
        Job {
            job_id: "job-1".into(),
            dedupe_key: "dk".into(),
            r#type,
            status: JobStatus::Running,
            created_at_ms: 0,
            started_at_ms: None,
            finished_at_ms: None,
            error_message: None,
            params,
            allowed_roots: roots,
            lease_owner: None,
            lease_expires_at_ms: None,
            approval_token: None,
        }
    }

    #[tokio::test]
    async fn dispatch_rejects_unsupported_job_type() {
        let store = CPStore::open_memory().await.unwrap();
        let approvals = ApprovalService::new(store.clone());
        let job = job_with(JobType(999), HashMap::new(), vec!["/tmp".into()]);
        let err = dispatch(&job, &store, &approvals).await.unwrap_err();
        assert!(matches!(err, WsaError::UnsupportedJobType(999)));
    }

    #[tokio::test]
    async fn dispatch_list_files_reads_params() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"x").unwrap();
        let store = CPStore::open_memory().await.unwrap();
        let approvals = ApprovalService::new(store.clone());

        let mut params = HashMap::new();
        params.insert("root".to_string(), dir.path().to_string_lossy().to_string());
        let job = job_with(JobType::LIST_FILES, params, vec![dir.path().to_string_lossy().to_string()]);

        let (bytes, content_type) = dispatch(&job, &store, &approvals).await.unwrap();
        assert_eq!(content_type, "application/json");
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["items"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn execute_plan_fails_without_approval_token() {
        let store = CPStore::open_memory().await.unwrap();
        let approvals = ApprovalService::new(store.clone());

        let mut params = HashMap::new();
        params.insert("plan_job_id".to_string(), "plan-1".to_string());
        params.insert("workspace_root".to_string(), "/tmp".to_string());
        let job = job_with(JobType::EXECUTE_PLAN, params, vec!["/tmp".into()]);

        let err = dispatch(&job, &store, &approvals).await.unwrap_err();
        assert!(matches!(err, WsaError::ApprovalRequired));
    }

    #[tokio::test]
    async fn execute_plan_fails_on_hash_mismatch() {
        let store = CPStore::open_memory().await.unwrap();
        let approvals = ApprovalService::new(store.clone());

        let params_map: HashMap<String, String> = HashMap::new();
        store
            .upsert_job_if_new("plan-1", "dk-plan", JobType::ORGANIZE_PLAN, &params_map, &["/tmp".to_string()], None)
            .await
            .unwrap();
        store.claim_job_lease("plan-1", "w1", 30_000).await.unwrap();

        let plan = Plan {
            policy: "by_ext".into(),
            count: 1,
            moves: vec![PlanMove { from: "/tmp/a".into(), to: "/tmp/b".into() }],
            plan_hash: None,
        };
        let hash = wsa_approval::compute_plan_hash(&plan).unwrap();
        let mut stored = plan.clone();
        stored.plan_hash = Some(hash);
        store.put_result("plan-1", &serde_json::to_vec(&stored).unwrap(), "application/json").await.unwrap();
        store.complete_job("plan-1", true, None).await.unwrap();

        // Approve against the original hash, then tamper with the stored plan.
        let approved = approvals.approve_plan("plan-1", 60).await.unwrap();
        let mut tampered = stored.clone();
        tampered.moves[0].to = "/tmp/different".into();
        tampered.plan_hash = None;
        store.put_result("plan-1", &serde_json::to_vec(&tampered).unwrap(), "application/json").await.unwrap();

        let mut params = HashMap::new();
        params.insert("plan_job_id".to_string(), "plan-1".to_string());
        params.insert("workspace_root".to_string(), "/tmp".to_string());
        let mut job = job_with(JobType::EXECUTE_PLAN, params, vec!["/tmp".into()]);
        job.approval_token = Some(approved.approval_token);

        let err = dispatch(&job, &store, &approvals).await.unwrap_err();
        assert!(matches!(err, WsaError::InvalidApproval));
    }
}
