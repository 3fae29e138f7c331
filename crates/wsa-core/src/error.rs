// SPDX-License-Identifier: MIT OR Apache-2.0
use thiserror::Error;

/// Broad category a [`WsaError`] falls into, mirroring the component that
/// raised it. Used for metrics/logging grouping, not for control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Sandbox,
    Store,
    Approval,
    Auth,
    Handler,
    Config,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sandbox => "sandbox",
            Self::Store => "store",
            Self::Approval => "approval",
            Self::Auth => "auth",
            Self::Handler => "handler",
            Self::Config => "config",
        }
    }
}

/// Stable, typed error taxonomy carried end-to-end through the control
/// plane. Every variant exposes a stable string `code()` so callers (logs,
/// HTTP error bodies) never depend on the `Display` message's exact wording.
#[derive(Debug, Error)]
pub enum WsaError {
    #[error("path is outside allowed roots: {path}")]
    OutsideRoots { path: String },

    #[error("store error: {0}")]
    Store(String),

    #[error("Invalid or expired approval token for this plan")]
    InvalidApproval,

    #[error("approval_token is required for write jobs")]
    ApprovalRequired,

    #[error("missing session or token")]
    MissingAuth,

    #[error("invalid token")]
    InvalidToken,

    #[error("unsupported job type: {0}")]
    UnsupportedJobType(i64),

    #[error("handler error: {0}")]
    Handler(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl WsaError {
    /// Stable machine-readable code, e.g. for HTTP error bodies or logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::OutsideRoots { .. } => "WSA-SANDBOX-001",
            Self::Store(_) => "WSA-STORE-001",
            Self::InvalidApproval => "WSA-APPROVAL-001",
            Self::ApprovalRequired => "WSA-APPROVAL-002",
            Self::MissingAuth => "WSA-AUTH-001",
            Self::InvalidToken => "WSA-AUTH-002",
            Self::UnsupportedJobType(_) => "WSA-HANDLER-001",
            Self::Handler(_) => "WSA-HANDLER-002",
            Self::Config(_) => "WSA-CONFIG-001",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::OutsideRoots { .. } => ErrorCategory::Sandbox,
            Self::Store(_) => ErrorCategory::Store,
            Self::InvalidApproval | Self::ApprovalRequired => ErrorCategory::Approval,
            Self::MissingAuth | Self::InvalidToken => ErrorCategory::Auth,
            Self::UnsupportedJobType(_) | Self::Handler(_) => ErrorCategory::Handler,
            Self::Config(_) => ErrorCategory::Config,
        }
    }
}
