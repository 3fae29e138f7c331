// SPDX-License-Identifier: MIT OR Apache-2.0
use serde::{Deserialize, Serialize};

/// A single `from -> to` rename proposed by an organize plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanMove {
    pub from: String,
    pub to: String,
}

/// The dry-run output of an `ORGANIZE_PLAN` job. `plan_hash` is the SHA-256
/// hex digest of this struct's canonical JSON encoding (see
/// `wsa_approval::canonicalize`); it is the binding identity approvals are
/// scoped to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Plan {
    pub policy: String,
    pub count: usize,
    pub moves: Vec<PlanMove>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_hash: Option<String>,
}
