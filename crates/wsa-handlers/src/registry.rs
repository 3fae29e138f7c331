// SPDX-License-Identifier: MIT OR Apache-2.0
//! Table-driven tool catalog: a flat map from a stable key to descriptive
//! metadata, consulted by `GET /tools` and by job submission validation.
//! Dispatch itself lives in [`crate::dispatch`] — this module only
//! describes what exists.

use wsa_core::JobType;

/// Static description of one registered tool. `params` lists the
/// handler-specific keys it reads out of a job's `params` map.
#[derive(Debug, Clone, Copy)]
pub struct ToolDescriptor {
    pub type_code: i64,
    pub name: &'static str,
    pub params: &'static [&'static str],
    pub requires_approval: bool,
}

/// The full catalog of filesystem tools this crate implements, in ascending
/// type-code order. Type codes 8 and above are reserved for tool kinds
/// registered elsewhere and do not appear here.
pub const CATALOG: &[ToolDescriptor] = &[
    ToolDescriptor {
        type_code: 1,
        name: "scan_index",
        params: &["root", "hash_files", "max_items"],
        requires_approval: false,
    },
    ToolDescriptor {
        type_code: 2,
        name: "list_files",
        params: &["root", "max_items"],
        requires_approval: false,
    },
    ToolDescriptor {
        type_code: 3,
        name: "read_file",
        params: &["path", "max_bytes"],
        requires_approval: false,
    },
    ToolDescriptor {
        type_code: 4,
        name: "propose_organize_plan",
        params: &["root", "policy"],
        requires_approval: false,
    },
    ToolDescriptor {
        type_code: 5,
        name: "execute_plan",
        params: &["plan_job_id", "workspace_root"],
        requires_approval: true,
    },
    ToolDescriptor {
        type_code: 6,
        name: "soft_delete",
        params: &["path", "workspace_root"],
        requires_approval: true,
    },
    ToolDescriptor {
        type_code: 7,
        name: "restore_from_trash",
        params: &["trash_item_path", "restore_to", "workspace_root"],
        requires_approval: true,
    },
];

pub fn describe(type_code: i64) -> Option<&'static ToolDescriptor> {
    CATALOG.iter().find(|t| t.type_code == type_code)
}

/// Returns `true` iff `type_code` names one of the three mutating types.
/// Delegates to [`JobType::is_mutating`] rather than re-deriving the set
/// from `requires_approval`, so the two stay in lockstep by construction.
pub fn is_mutating(type_code: i64) -> bool {
    JobType(type_code).is_mutating()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_mutating_flags_match_job_type() {
        for tool in CATALOG {
            assert_eq!(tool.requires_approval, is_mutating(tool.type_code), "type {}", tool.type_code);
        }
    }

    #[test]
    fn describe_finds_known_and_rejects_unknown() {
        assert_eq!(describe(2).unwrap().name, "list_files");
        assert!(describe(99).is_none());
    }
}
