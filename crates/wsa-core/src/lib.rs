// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! Shared data model and error taxonomy for the workspace agent control
//! plane.

mod error;
mod job;
mod plan;

pub use error::{ErrorCategory, WsaError};
pub use job::{Approval, Job, JobStatus, JobType, JobResult, Session};
pub use plan::{Plan, PlanMove};

/// Schema/contract version for the control-plane wire types. Bumped whenever
/// the shape of [`Job`], [`Approval`], or [`Plan`] changes incompatibly.
pub const CONTRACT_VERSION: &str = "1";
