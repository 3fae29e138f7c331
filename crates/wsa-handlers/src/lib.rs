// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! Filesystem tool handlers and the job-type dispatch table that routes a
//! [`wsa_core::Job`] to one of them.

mod dispatch;
mod fs;
pub mod registry;

pub use dispatch::dispatch;
pub use fs::{
    execute_plan, list_files, propose_organize_plan, read_file_safe, restore_from_trash, scan_index, soft_delete,
    write_audit_event, ExecutePlanResult, FileItem, IndexedFile, ListFilesResult, MoveError, ReadFileResult,
    RestoreResult, ScanIndexResult, SoftDeleteResult,
};
