// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! The HTTP control API: handshake, tool catalog, job submission/status/
//! result retrieval, and plan approval. Thin translation over
//! [`wsa_store::CPStore`] and [`wsa_approval::ApprovalService`].

pub mod middleware;

use axum::{
    extract::{Path as AxPath, State},
    http::StatusCode,
    middleware::from_fn,
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;
use wsa_approval::{ApprovalError, ApprovalService};
use wsa_core::{Job, JobStatus, JobType};
use wsa_store::{CPStore, StoreError};

#[derive(Clone)]
pub struct AppState {
    pub store: CPStore,
    pub approvals: ApprovalService,
    /// `COWORKER_ALLOWED_ROOTS` (or the process cwd): used to fill in
    /// `allowed_roots` on a submitted job that omits it entirely.
    pub default_allowed_roots: Vec<String>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(store: CPStore, approvals: ApprovalService, default_allowed_roots: Vec<String>) -> Self {
        Self { store, approvals, default_allowed_roots, started_at: Instant::now() }
    }
}

/// Control-API error, carrying the same stable string code convention as
/// [`wsa_core::WsaError`] so `{"error": {"code", "message"}}` bodies are
/// consistent whether the failure originated in this crate or bubbled up
/// from the store/approval layer.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self { status, code, message: message.into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": { "code": self.code, "message": self.message } }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "WSA-STORE-001", e.to_string())
    }
}

/// Builds the full router: `/handshake` and `/health` are public, every
/// other route requires the `X-Coworker-Session`/`X-Coworker-Token`
/// header pair (enforced by [`middleware::auth_middleware`]).
pub fn build_app(state: Arc<AppState>) -> Router {
    let authenticated = Router::new()
        .route("/tools", get(list_tools))
        .route("/approve", post(approve_plan))
        .route("/jobs", post(submit_job))
        .route("/jobs/{job_id}", get(get_job))
        .route("/jobs/{job_id}/result", get(get_job_result))
        .route_layer(from_fn_with_state(state.clone(), middleware::auth_middleware));

    Router::new()
        .route("/health", get(health))
        .route("/handshake", post(handshake))
        .merge(authenticated)
        .layer(middleware::permissive_cors_layer())
        .layer(from_fn(middleware::request_logger_middleware))
        .layer(from_fn(middleware::request_id_middleware))
        .with_state(state)
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": wsa_core::CONTRACT_VERSION,
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    }))
}

#[derive(Debug, Serialize)]
struct HandshakeResponse {
    session_id: String,
    token: String,
}

async fn handshake(State(state): State<Arc<AppState>>) -> Result<Json<HandshakeResponse>, ApiError> {
    let session_id = Uuid::new_v4().to_string();
    let token = wsa_approval::mint_token();
    state.store.create_session(&session_id, &token).await?;
    Ok(Json(HandshakeResponse { session_id, token }))
}

#[derive(Debug, Serialize)]
struct ToolInfo {
    name: &'static str,
    #[serde(rename = "type")]
    type_code: i64,
    params: &'static [&'static str],
    #[serde(skip_serializing_if = "is_false")]
    requires_approval: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

#[derive(Debug, Serialize)]
struct ToolsResponse {
    tools: Vec<ToolInfo>,
}

async fn list_tools() -> Json<ToolsResponse> {
    let tools = wsa_handlers::registry::CATALOG
        .iter()
        .map(|t| ToolInfo { name: t.name, type_code: t.type_code, params: t.params, requires_approval: t.requires_approval })
        .collect();
    Json(ToolsResponse { tools })
}

#[derive(Debug, Deserialize)]
struct SubmitJobBody {
    dedupe_key: String,
    #[serde(rename = "type")]
    type_code: i64,
    #[serde(default)]
    allowed_roots: Vec<String>,
    #[serde(default)]
    params: HashMap<String, String>,
    #[serde(default)]
    approval_token: Option<String>,
}

#[derive(Debug, Serialize)]
struct SubmitJobResponse {
    created_new: bool,
    job_id: String,
    status: JobStatus,
}

async fn submit_job(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SubmitJobBody>,
) -> Result<Json<SubmitJobResponse>, ApiError> {
    let job_type = JobType(body.type_code);
    let approval_token = body.approval_token.filter(|t| !t.trim().is_empty());

    if job_type.is_mutating() && approval_token.is_none() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "WSA-APPROVAL-002",
            "approval_token is required for write jobs",
        ));
    }

    let allowed_roots =
        if body.allowed_roots.is_empty() { state.default_allowed_roots.clone() } else { body.allowed_roots };

    let job_id = Uuid::new_v4().to_string();
    let (created_new, final_job_id) = state
        .store
        .upsert_job_if_new(&job_id, &body.dedupe_key, job_type, &body.params, &allowed_roots, approval_token.as_deref())
        .await?;

    Ok(Json(SubmitJobResponse { created_new, job_id: final_job_id, status: JobStatus::Queued }))
}

async fn get_job(State(state): State<Arc<AppState>>, AxPath(job_id): AxPath<String>) -> Result<Json<Job>, ApiError> {
    state
        .store
        .get_job(&job_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "WSA-NOTFOUND-001", "Job not found"))
}

#[derive(Debug, Serialize)]
struct JobResultResponse {
    content_type: String,
    bytes_base64: String,
}

async fn get_job_result(
    State(state): State<Arc<AppState>>,
    AxPath(job_id): AxPath<String>,
) -> Result<Json<JobResultResponse>, ApiError> {
    let result = state
        .store
        .get_result(&job_id)
        .await?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "WSA-NOTFOUND-002", "Result not found"))?;

    Ok(Json(JobResultResponse {
        content_type: result.content_type,
        bytes_base64: base64::engine::general_purpose::STANDARD.encode(&result.bytes),
    }))
}

#[derive(Debug, Deserialize)]
struct ApprovePlanBody {
    plan_job_id: String,
    #[serde(default = "default_ttl_seconds")]
    ttl_seconds: i64,
}

fn default_ttl_seconds() -> i64 {
    120
}

#[derive(Debug, Serialize)]
struct ApproveResponse {
    approval_token: String,
    plan_job_id: String,
    plan_hash: String,
    ttl_seconds: i64,
}

async fn approve_plan(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ApprovePlanBody>,
) -> Result<Json<ApproveResponse>, ApiError> {
    match state.approvals.approve_plan(&body.plan_job_id, body.ttl_seconds).await {
        Ok(result) => Ok(Json(ApproveResponse {
            approval_token: result.approval_token,
            plan_job_id: result.plan_job_id,
            plan_hash: result.plan_hash,
            ttl_seconds: result.ttl_seconds,
        })),
        Err(ApprovalError::PlanJobNotFound) => {
            Err(ApiError::new(StatusCode::NOT_FOUND, "WSA-NOTFOUND-001", "Plan job not found"))
        }
        Err(ApprovalError::PlanJobNotSucceeded) => Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "WSA-APPROVAL-003",
            "Plan job is not in SUCCEEDED state",
        )),
        Err(ApprovalError::PlanResultNotFound) => {
            Err(ApiError::new(StatusCode::NOT_FOUND, "WSA-NOTFOUND-002", "Plan result not found"))
        }
        Err(e @ ApprovalError::Store(_)) | Err(e @ ApprovalError::Decode(_)) => {
            Err(ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "WSA-APPROVAL-004", e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn test_state() -> Arc<AppState> {
        let store = CPStore::open_memory().await.unwrap();
        let approvals = ApprovalService::new(store.clone());
        Arc::new(AppState::new(store, approvals, vec!["/tmp".to_string()]))
    }

    #[tokio::test]
    async fn handshake_then_tools_requires_headers() {
        let state = test_state().await;
        let app = build_app(state);

        let resp = app
            .clone()
            .oneshot(Request::builder().method("POST").uri("/handshake").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let unauth = app
            .oneshot(Request::builder().method("GET").uri("/tools").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(unauth.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn submit_job_rejects_mutating_type_without_approval() {
        let state = test_state().await;
        state.store.create_session("s1", "tok1").await.unwrap();
        let app = build_app(state);

        let body = json!({
            "dedupe_key": "dk",
            "type": 5,
            "allowed_roots": ["/tmp"],
            "params": {},
        })
        .to_string();

        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/jobs")
                    .header("content-type", "application/json")
                    .header(middleware::SESSION_HEADER, "s1")
                    .header(middleware::TOKEN_HEADER, "tok1")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn submit_job_accepts_read_only_type() {
        let state = test_state().await;
        state.store.create_session("s1", "tok1").await.unwrap();
        let app = build_app(state);

        let body = json!({
            "dedupe_key": "dk",
            "type": 2,
            "allowed_roots": ["/tmp"],
            "params": {"root": "/tmp"},
        })
        .to_string();

        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/jobs")
                    .header("content-type", "application/json")
                    .header(middleware::SESSION_HEADER, "s1")
                    .header(middleware::TOKEN_HEADER, "tok1")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn submit_job_defaults_allowed_roots_when_omitted() {
        let state = test_state().await;
        state.store.create_session("s1", "tok1").await.unwrap();
        let default_roots = state.default_allowed_roots.clone();
        let app = build_app(state.clone());

        let body = json!({
            "dedupe_key": "dk",
            "type": 2,
            "params": {"root": "/tmp"},
        })
        .to_string();

        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/jobs")
                    .header("content-type", "application/json")
                    .header(middleware::SESSION_HEADER, "s1")
                    .header(middleware::TOKEN_HEADER, "tok1")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let submitted: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let job_id = submitted["job_id"].as_str().unwrap();

        let job = state.store.get_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.allowed_roots, default_roots);
    }

    #[tokio::test]
    async fn health_reports_version_and_uptime() {
        let state = test_state().await;
        let app = build_app(state);

        let resp = app
            .oneshot(Request::builder().method("GET").uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["status"], "ok");
        assert!(value["version"].is_string());
        assert!(value["uptime_seconds"].is_u64());
    }
}
