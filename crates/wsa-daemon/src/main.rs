// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use wsa_approval::ApprovalService;
use wsa_daemon::{build_app, AppState};
use wsa_store::CPStore;
use wsa_worker::WorkerPool;

#[derive(Parser, Debug)]
#[command(name = "wsa-daemon", version, about = "Workspace agent control-plane daemon")]
struct Args {
    /// Bind address.
    #[arg(long, env = "WORKSPACE_BIND_ADDR", default_value = "127.0.0.1:8787")]
    bind: String,

    /// Path to the SQLite control-plane database.
    #[arg(long, env = "WORKSPACE_DB_PATH", default_value = "workspace_cp.sqlite3")]
    db_path: String,

    /// Number of job-execution workers to run.
    #[arg(long, env = "WORKSPACE_WORKER_COUNT", default_value_t = wsa_worker::DEFAULT_WORKER_COUNT)]
    workers: usize,

    /// Lease duration (milliseconds) a worker holds a claimed job for before
    /// another worker may reclaim it.
    #[arg(long, env = "WORKSPACE_LEASE_MS", default_value_t = wsa_store::DEFAULT_LEASE_MS)]
    lease_ms: i64,

    /// Comma-separated list of filesystem roots jobs may default to when a
    /// submitted job omits `allowed_roots`. Defaults to the daemon's own
    /// working directory.
    #[arg(long, env = "COWORKER_ALLOWED_ROOTS", value_delimiter = ',')]
    allowed_roots: Vec<String>,

    /// Enable request/response debug logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("wsa=debug,wsa_daemon=debug,wsa_worker=debug")
    } else {
        EnvFilter::new("wsa=info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let store = CPStore::open(&args.db_path).await.with_context(|| format!("open db {}", args.db_path))?;
    let approvals = ApprovalService::new(store.clone());

    let pool = WorkerPool::new(store.clone(), approvals.clone(), args.workers).with_lease_ms(args.lease_ms);
    let _worker_handles = pool.spawn();

    let default_allowed_roots = if args.allowed_roots.is_empty() {
        let cwd = std::env::current_dir().context("read current directory")?;
        vec![cwd.to_string_lossy().to_string()]
    } else {
        args.allowed_roots.clone()
    };

    let state = Arc::new(AppState::new(store, approvals, default_allowed_roots));
    let app = build_app(state);

    let listener = tokio::net::TcpListener::bind(&args.bind).await.with_context(|| format!("bind {}", args.bind))?;
    info!(
        bind = %args.bind,
        db_path = %args.db_path,
        workers = args.workers,
        lease_ms = args.lease_ms,
        "wsa-daemon listening"
    );

    axum::serve(listener, app).await.context("serve")
}
