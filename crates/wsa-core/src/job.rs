// SPDX-License-Identifier: MIT OR Apache-2.0
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle status of a [`Job`]. Numeric codes are stable and match the
/// control-plane store's `status` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Queued = 1,
    Running = 2,
    Succeeded = 3,
    Failed = 4,
    Canceled = 5,
}

impl JobStatus {
    /// Decode a status from its stable integer code.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Queued),
            2 => Some(Self::Running),
            3 => Some(Self::Succeeded),
            4 => Some(Self::Failed),
            5 => Some(Self::Canceled),
            _ => None,
        }
    }

    /// This status's stable integer code.
    pub fn code(self) -> i64 {
        self as i64
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Canceled => "CANCELED",
        }
    }

    /// Returns `true` if this status never transitions again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }

    /// Returns the set of statuses that are valid successors of `self`.
    pub fn valid_transitions(&self) -> &'static [JobStatus] {
        match self {
            Self::Queued => &[Self::Running, Self::Canceled],
            Self::Running => &[Self::Succeeded, Self::Failed, Self::Canceled],
            Self::Succeeded | Self::Failed | Self::Canceled => &[],
        }
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        self.valid_transitions().contains(&next)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of tool a job invokes. Codes 1-7 are implemented by this crate; codes
/// 8 and above are reserved for handlers registered elsewhere (see
/// `wsa-handlers::registry`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobType(pub i64);

impl JobType {
    pub const SCAN_INDEX: JobType = JobType(1);
    pub const LIST_FILES: JobType = JobType(2);
    pub const READ_FILE: JobType = JobType(3);
    pub const ORGANIZE_PLAN: JobType = JobType(4);
    pub const EXECUTE_PLAN: JobType = JobType(5);
    pub const SOFT_DELETE: JobType = JobType(6);
    pub const RESTORE: JobType = JobType(7);

    /// The mutating types: submitting one requires a non-null
    /// `approval_token` (invariant J4).
    pub const MUTATING: [JobType; 3] = [Self::EXECUTE_PLAN, Self::SOFT_DELETE, Self::RESTORE];

    pub fn is_mutating(self) -> bool {
        Self::MUTATING.contains(&self)
    }

    pub fn code(self) -> i64 {
        self.0
    }
}

/// A handshake-issued session and its bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub token: String,
    pub created_at_ms: i64,
}

/// The central job entity. See the module docs for the full invariant set
/// (J1-J4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub dedupe_key: String,
    pub r#type: JobType,
    pub status: JobStatus,
    pub created_at_ms: i64,
    pub started_at_ms: Option<i64>,
    pub finished_at_ms: Option<i64>,
    pub error_message: Option<String>,
    pub params: HashMap<String, String>,
    pub allowed_roots: Vec<String>,
    pub lease_owner: Option<String>,
    pub lease_expires_at_ms: Option<i64>,
    pub approval_token: Option<String>,
}

/// The output of a completed job. Written at most once, read-only
/// thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: String,
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub created_at_ms: i64,
}

/// A minted approval, bound to exactly one `(plan_job_id, plan_hash)` pair
/// (invariant A2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Approval {
    pub token: String,
    pub plan_job_id: String,
    pub plan_hash: String,
    pub expires_at_ms: i64,
    pub created_at_ms: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_status_code_roundtrip() {
        for status in [
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Succeeded,
            JobStatus::Failed,
            JobStatus::Canceled,
        ] {
            assert_eq!(JobStatus::from_code(status.code()), Some(status));
        }
    }

    #[test]
    fn job_status_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&JobStatus::Queued).unwrap(), "\"QUEUED\"");
    }

    #[test]
    fn terminal_states_have_no_transitions() {
        for status in [JobStatus::Succeeded, JobStatus::Failed, JobStatus::Canceled] {
            assert!(status.is_terminal());
            assert!(status.valid_transitions().is_empty());
        }
    }

    #[test]
    fn queued_can_only_move_to_running_or_canceled() {
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Canceled));
        assert!(!JobStatus::Queued.can_transition_to(JobStatus::Succeeded));
    }

    #[test]
    fn mutating_types_are_exactly_five_six_seven() {
        assert!(JobType::EXECUTE_PLAN.is_mutating());
        assert!(JobType::SOFT_DELETE.is_mutating());
        assert!(JobType::RESTORE.is_mutating());
        assert!(!JobType::LIST_FILES.is_mutating());
        assert!(!JobType::ORGANIZE_PLAN.is_mutating());
    }
}
