// SPDX-License-Identifier: MIT OR Apache-2.0
//! Middleware for the control API: request id, request logging, CORS, and
//! session/token authentication, plus a sliding-window rate limiter
//! available as a `tower::Layer` for deployments that want to wire it in.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tracing::info;
use uuid::Uuid;

use crate::AppState;

pub const SESSION_HEADER: &str = "x-coworker-session";
pub const TOKEN_HEADER: &str = "x-coworker-token";

// ---------------------------------------------------------------------------
// RequestId
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub Uuid);

pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let id = RequestId(Uuid::new_v4());
    req.extensions_mut().insert(id);
    let mut resp = next.run(req).await;
    resp.headers_mut()
        .insert("x-request-id", HeaderValue::from_str(&id.0.to_string()).unwrap());
    resp
}

// ---------------------------------------------------------------------------
// RequestLogger
// ---------------------------------------------------------------------------

pub async fn request_logger_middleware(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let start = Instant::now();

    let resp = next.run(req).await;

    info!(
        http.method = %method,
        http.path = %path,
        http.status = resp.status().as_u16(),
        http.duration_ms = start.elapsed().as_millis() as u64,
        "request completed"
    );

    resp
}

// ---------------------------------------------------------------------------
// RateLimiter
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Mutex<RateLimiterInner>>,
    max_requests: u32,
    window: Duration,
}

struct RateLimiterInner {
    timestamps: VecDeque<Instant>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self { inner: Arc::new(Mutex::new(RateLimiterInner { timestamps: VecDeque::new() })), max_requests, window }
    }

    pub async fn check(&self) -> Result<(), StatusCode> {
        let now = Instant::now();
        let mut guard = self.inner.lock().await;

        while let Some(&front) = guard.timestamps.front() {
            if now.duration_since(front) > self.window {
                guard.timestamps.pop_front();
            } else {
                break;
            }
        }

        if guard.timestamps.len() as u32 >= self.max_requests {
            return Err(StatusCode::TOO_MANY_REQUESTS);
        }

        guard.timestamps.push_back(now);
        Ok(())
    }

    pub fn into_layer(self) -> RateLimiterLayer {
        RateLimiterLayer(self)
    }
}

#[derive(Clone)]
pub struct RateLimiterLayer(RateLimiter);

impl<S: Clone> tower::Layer<S> for RateLimiterLayer {
    type Service = RateLimiterService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimiterService { limiter: self.0.clone(), inner }
    }
}

#[derive(Clone)]
pub struct RateLimiterService<S> {
    limiter: RateLimiter,
    inner: S,
}

impl<S> tower::Service<Request<Body>> for RateLimiterService<S>
where
    S: tower::Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: IntoResponse,
{
    type Response = Response;
    type Error = S::Error;
    type Future = std::pin::Pin<Box<dyn std::future::Future<Output = Result<Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut std::task::Context<'_>) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let limiter = self.limiter.clone();
        let mut inner = self.inner.clone();
        Box::pin(async move {
            if let Err(status) = limiter.check().await {
                return Ok((status, "too many requests").into_response());
            }
            inner.call(req).await
        })
    }
}

// ---------------------------------------------------------------------------
// CORS
// ---------------------------------------------------------------------------

/// Dev-friendly default: allow any origin/method/header. Restrict this in
/// production deployments.
pub fn permissive_cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods(AllowMethods::any())
        .allow_headers(AllowHeaders::any())
}

// ---------------------------------------------------------------------------
// Session/token auth
// ---------------------------------------------------------------------------

fn error_body(message: &str) -> Json<serde_json::Value> {
    Json(json!({ "error": message }))
}

/// Enforces the `X-Coworker-Session` / `X-Coworker-Token` header pair
/// against the session store. Applied to every route except `/handshake`
/// and `/health`.
pub async fn auth_middleware(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    let session_id = req.headers().get(SESSION_HEADER).and_then(|v| v.to_str().ok()).map(str::to_string);
    let token = req.headers().get(TOKEN_HEADER).and_then(|v| v.to_str().ok()).map(str::to_string);

    let (session_id, token) = match (session_id, token) {
        (Some(s), Some(t)) if !s.is_empty() && !t.is_empty() => (s, t),
        _ => return (StatusCode::UNAUTHORIZED, error_body("Missing session or token")).into_response(),
    };

    match state.store.get_session_token(&session_id).await {
        Ok(Some(expected)) if expected == token => next.run(req).await,
        Ok(_) => (StatusCode::FORBIDDEN, error_body("Invalid token")).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, error_body(&e.to_string())).into_response(),
    }
}
