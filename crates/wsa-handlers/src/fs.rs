// SPDX-License-Identifier: MIT OR Apache-2.0
//! Filesystem tool handlers: the read-only trio (scan/list/read), the
//! organize-plan dry run, and the three mutating operations
//! (execute-plan/soft-delete/restore). Every path argument is resolved
//! through [`wsa_sandbox::enforce_within_roots`] before any I/O.

use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use wsa_core::{Plan, PlanMove, WsaError};
use wsa_sandbox::enforce_within_roots;

const DEFAULT_LIST_MAX_ITEMS: usize = 500;
const DEFAULT_SCAN_MAX_ITEMS: usize = 2000;
const DEFAULT_READ_MAX_BYTES: u64 = 1_000_000;
const DEFAULT_HASH_MAX_BYTES: u64 = 25_000_000;

fn mtime_secs(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ---------------- list_files ----------------

#[derive(Debug, Serialize, Deserialize)]
pub struct FileItem {
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
    pub mtime: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListFilesResult {
    pub truncated: bool,
    pub items: Vec<FileItem>,
}

pub fn list_files(root: &str, roots: &[String], max_items: usize) -> Result<ListFilesResult, WsaError> {
    let root = enforce_within_roots(root, roots)?;
    let mut items = Vec::new();
    let mut truncated = false;

    for entry in walkdir::WalkDir::new(&root).min_depth(1) {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        let meta = match entry.metadata() {
            Ok(m) => m,
            Err(_) => continue,
        };
        items.push(FileItem {
            path: entry.path().to_string_lossy().to_string(),
            is_dir: meta.is_dir(),
            size: meta.len(),
            mtime: mtime_secs(&meta),
        });
        if items.len() >= max_items {
            truncated = true;
            break;
        }
    }

    Ok(ListFilesResult { truncated, items })
}

// ---------------- scan_index ----------------

#[derive(Debug, Serialize, Deserialize)]
pub struct IndexedFile {
    pub path: String,
    pub size: u64,
    pub mtime: i64,
    pub ext: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScanIndexResult {
    pub truncated: bool,
    pub files: Vec<IndexedFile>,
}

fn sha256_file(path: &Path, max_bytes: u64) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 1024 * 1024];
    let mut total: u64 = 0;
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
        if total > max_bytes {
            break;
        }
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn extension_lower(path: &Path) -> String {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

pub fn scan_index(
    root: &str,
    roots: &[String],
    hash_files: bool,
    max_items: usize,
) -> Result<ScanIndexResult, WsaError> {
    let root = enforce_within_roots(root, roots)?;
    let mut files = Vec::new();
    let mut truncated = false;

    for entry in walkdir::WalkDir::new(&root).min_depth(1) {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let meta = match entry.metadata() {
            Ok(m) => m,
            Err(_) => continue,
        };
        let sha256 = if hash_files {
            sha256_file(entry.path(), DEFAULT_HASH_MAX_BYTES).ok()
        } else {
            None
        };
        files.push(IndexedFile {
            path: entry.path().to_string_lossy().to_string(),
            size: meta.len(),
            mtime: mtime_secs(&meta),
            ext: extension_lower(entry.path()),
            sha256,
        });
        if files.len() >= max_items {
            truncated = true;
            break;
        }
    }

    Ok(ScanIndexResult { truncated, files })
}

// ---------------- read_file ----------------

#[derive(Debug, Serialize, Deserialize)]
pub struct ReadFileResult {
    pub path: String,
    pub size: u64,
    pub read_bytes: usize,
    pub truncated: bool,
    pub data_base64: String,
}

pub fn read_file_safe(path: &str, roots: &[String], max_bytes: u64) -> Result<ReadFileResult, WsaError> {
    let resolved = enforce_within_roots(path, roots)?;

    if resolved.is_dir() {
        return Err(WsaError::Handler("path is a directory, not a file".to_string()));
    }

    let size = std::fs::metadata(&resolved)
        .map_err(|e| WsaError::Handler(e.to_string()))?
        .len();
    let to_read = size.min(max_bytes);

    let mut file = std::fs::File::open(&resolved).map_err(|e| WsaError::Handler(e.to_string()))?;
    let mut data = vec![0u8; to_read as usize];
    file.read_exact(&mut data).map_err(|e| WsaError::Handler(e.to_string()))?;

    Ok(ReadFileResult {
        path: resolved.to_string_lossy().to_string(),
        size,
        read_bytes: data.len(),
        truncated: size > max_bytes,
        data_base64: base64::engine::general_purpose::STANDARD.encode(&data),
    })
}

// ---------------- organize_plan ----------------

pub fn propose_organize_plan(root: &str, roots: &[String], policy: &str) -> Result<Plan, WsaError> {
    let root = enforce_within_roots(root, roots)?;
    let mut moves = Vec::new();

    for entry in walkdir::WalkDir::new(&root).min_depth(1) {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let src = entry.path();
        let filename = match src.file_name() {
            Some(n) => n,
            None => continue,
        };
        let ext = src
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| "no_ext".to_string());
        let dest_dir = if policy == "by_ext" { root.join(&ext) } else { root.join("misc") };
        let dest = dest_dir.join(filename);

        if src != dest {
            moves.push(PlanMove {
                from: src.to_string_lossy().to_string(),
                to: dest.to_string_lossy().to_string(),
            });
        }
    }

    let mut plan = Plan {
        policy: policy.to_string(),
        count: moves.len(),
        moves,
        plan_hash: None,
    };
    let hash = wsa_approval::compute_plan_hash(&plan).map_err(|e| WsaError::Handler(e.to_string()))?;
    plan.plan_hash = Some(hash);
    Ok(plan)
}

// ---------------- audit log ----------------

pub fn write_audit_event(
    roots: &[String],
    workspace_root: &str,
    action: &str,
    from: &str,
    to: &str,
) -> Result<(), WsaError> {
    let workspace_root = enforce_within_roots(workspace_root, roots)?;
    let audit_path = workspace_root.join(".coworker_audit.jsonl");
    enforce_within_roots(&audit_path.to_string_lossy(), roots)?;

    let event = serde_json::json!({
        "action": action,
        "from": from,
        "to": to,
        "ts_unix_ms": now_ms(),
    });

    use std::io::Write as _;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&audit_path)
        .map_err(|e| WsaError::Handler(e.to_string()))?;
    writeln!(file, "{event}").map_err(|e| WsaError::Handler(e.to_string()))?;
    Ok(())
}

// ---------------- execute_plan ----------------

#[derive(Debug, Serialize, Deserialize)]
pub struct MoveError {
    pub from: String,
    pub to: String,
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExecutePlanResult {
    pub applied: usize,
    pub skipped: usize,
    pub errors: Vec<MoveError>,
}

/// Applies a move plan idempotently: never overwrites an existing
/// destination, skips missing sources, and appends one audit line per
/// applied move. Per-entry failures are collected rather than aborting the
/// whole plan.
pub fn execute_plan(plan: &Plan, roots: &[String], workspace_root: &str) -> Result<ExecutePlanResult, WsaError> {
    let workspace_root = enforce_within_roots(workspace_root, roots)?;
    let mut applied = 0usize;
    let mut skipped = 0usize;
    let mut errors = Vec::new();

    for mv in &plan.moves {
        match apply_one_move(mv, roots, &workspace_root) {
            Ok(MoveOutcome::Applied) => applied += 1,
            Ok(MoveOutcome::Skipped) => skipped += 1,
            Err(e) => errors.push(MoveError { from: mv.from.clone(), to: mv.to.clone(), error: e.to_string() }),
        }
    }

    Ok(ExecutePlanResult { applied, skipped, errors })
}

enum MoveOutcome {
    Applied,
    Skipped,
}

fn apply_one_move(mv: &PlanMove, roots: &[String], workspace_root: &Path) -> Result<MoveOutcome, WsaError> {
    let src = enforce_within_roots(&mv.from, roots)?;
    // `to` may not exist yet; enforce_within_roots handles that.
    let dst = enforce_within_roots(&mv.to, roots)?;

    if !src.exists() {
        return Ok(MoveOutcome::Skipped);
    }

    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent).map_err(|e| WsaError::Handler(e.to_string()))?;
    }

    if dst.exists() {
        return Ok(MoveOutcome::Skipped);
    }

    std::fs::rename(&src, &dst).map_err(|e| WsaError::Handler(e.to_string()))?;

    write_audit_event(
        roots,
        &workspace_root.to_string_lossy(),
        "move",
        &src.to_string_lossy(),
        &dst.to_string_lossy(),
    )?;

    Ok(MoveOutcome::Applied)
}

// ---------------- soft_delete / restore ----------------

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SoftDeleteResult {
    Deleted { deleted: bool, from: String, to: String },
    NotFound { deleted: bool, reason: String, path: String },
}

pub fn soft_delete(path: &str, roots: &[String], workspace_root: &str) -> Result<SoftDeleteResult, WsaError> {
    let resolved_path = enforce_within_roots(path, roots)?;
    let resolved_workspace = enforce_within_roots(workspace_root, roots)?;

    if !resolved_path.exists() {
        return Ok(SoftDeleteResult::NotFound {
            deleted: false,
            reason: "not_found".to_string(),
            path: resolved_path.to_string_lossy().to_string(),
        });
    }

    let trash_dir = resolved_workspace.join(".trash");
    std::fs::create_dir_all(&trash_dir).map_err(|e| WsaError::Handler(e.to_string()))?;

    let basename = resolved_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let unique = format!("{basename}.{}", now_ms());
    let dst = trash_dir.join(unique);

    let dst = enforce_within_roots(&dst.to_string_lossy(), roots)?;
    std::fs::rename(&resolved_path, &dst).map_err(|e| WsaError::Handler(e.to_string()))?;

    write_audit_event(
        roots,
        &resolved_workspace.to_string_lossy(),
        "soft_delete",
        &resolved_path.to_string_lossy(),
        &dst.to_string_lossy(),
    )?;

    Ok(SoftDeleteResult::Deleted {
        deleted: true,
        from: resolved_path.to_string_lossy().to_string(),
        to: dst.to_string_lossy().to_string(),
    })
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RestoreResult {
    Restored { restored: bool, from: String, to: String },
    NotRestored { restored: bool, reason: String },
}

pub fn restore_from_trash(
    trash_item_path: &str,
    restore_to: &str,
    roots: &[String],
    workspace_root: &str,
) -> Result<RestoreResult, WsaError> {
    let trash_item = enforce_within_roots(trash_item_path, roots)?;
    let restore_to = enforce_within_roots(restore_to, roots)?;
    let workspace_root = enforce_within_roots(workspace_root, roots)?;

    if !trash_item.exists() {
        return Ok(RestoreResult::NotRestored { restored: false, reason: "not_found".to_string() });
    }

    if let Some(parent) = restore_to.parent() {
        std::fs::create_dir_all(parent).map_err(|e| WsaError::Handler(e.to_string()))?;
    }

    if restore_to.exists() {
        return Ok(RestoreResult::NotRestored { restored: false, reason: "destination_exists".to_string() });
    }

    std::fs::rename(&trash_item, &restore_to).map_err(|e| WsaError::Handler(e.to_string()))?;

    write_audit_event(
        roots,
        &workspace_root.to_string_lossy(),
        "restore",
        &trash_item.to_string_lossy(),
        &restore_to.to_string_lossy(),
    )?;

    Ok(RestoreResult::Restored {
        restored: true,
        from: trash_item.to_string_lossy().to_string(),
        to: restore_to.to_string_lossy().to_string(),
    })
}

pub const DEFAULT_LIST_MAX: usize = DEFAULT_LIST_MAX_ITEMS;
pub const DEFAULT_SCAN_MAX: usize = DEFAULT_SCAN_MAX_ITEMS;
pub const DEFAULT_READ_MAX_BYTES_PUB: u64 = DEFAULT_READ_MAX_BYTES;

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn roots_for(dir: &tempfile::TempDir) -> Vec<String> {
        vec![dir.path().to_string_lossy().to_string()]
    }

    #[test]
    fn list_files_walks_recursively() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("a.txt"), b"x").unwrap();
        fs::write(dir.path().join("sub/b.txt"), b"y").unwrap();

        let roots = roots_for(&dir);
        let result = list_files(&dir.path().to_string_lossy(), &roots, 500).unwrap();
        assert!(!result.truncated);
        assert_eq!(result.items.len(), 3); // sub/, a.txt, sub/b.txt
    }

    #[test]
    fn read_file_rejects_directory() {
        let dir = tempfile::tempdir().unwrap();
        let roots = roots_for(&dir);
        let err = read_file_safe(&dir.path().to_string_lossy(), &roots, 1000);
        assert!(err.is_err());
    }

    #[test]
    fn read_file_truncates_at_max_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("big.bin");
        fs::write(&file, vec![0u8; 100]).unwrap();
        let roots = roots_for(&dir);

        let result = read_file_safe(&file.to_string_lossy(), &roots, 10).unwrap();
        assert_eq!(result.read_bytes, 10);
        assert!(result.truncated);
    }

    #[test]
    fn organize_plan_groups_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"x").unwrap();
        fs::write(dir.path().join("b.TXT"), b"y").unwrap();
        let roots = roots_for(&dir);

        let plan = propose_organize_plan(&dir.path().to_string_lossy(), &roots, "by_ext").unwrap();
        assert_eq!(plan.count, 2);
        assert!(plan.plan_hash.is_some());
        assert!(plan.moves.iter().all(|m| m.to.contains("/txt/")));
    }

    #[test]
    fn execute_plan_never_overwrites_existing_destination() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("src.txt"), b"new").unwrap();
        fs::create_dir_all(dir.path().join("txt")).unwrap();
        fs::write(dir.path().join("txt/src.txt"), b"existing").unwrap();
        let roots = roots_for(&dir);

        let plan = Plan {
            policy: "by_ext".into(),
            count: 1,
            moves: vec![PlanMove {
                from: dir.path().join("src.txt").to_string_lossy().to_string(),
                to: dir.path().join("txt/src.txt").to_string_lossy().to_string(),
            }],
            plan_hash: None,
        };

        let result = execute_plan(&plan, &roots, &dir.path().to_string_lossy()).unwrap();
        assert_eq!(result.applied, 0);
        assert_eq!(result.skipped, 1);
        assert_eq!(fs::read(dir.path().join("txt/src.txt")).unwrap(), b"existing");
        assert!(dir.path().join("src.txt").exists());
    }

    #[test]
    fn execute_plan_applies_and_audits() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("src.txt"), b"hello").unwrap();
        let roots = roots_for(&dir);

        let plan = Plan {
            policy: "by_ext".into(),
            count: 1,
            moves: vec![PlanMove {
                from: dir.path().join("src.txt").to_string_lossy().to_string(),
                to: dir.path().join("txt/src.txt").to_string_lossy().to_string(),
            }],
            plan_hash: None,
        };

        let result = execute_plan(&plan, &roots, &dir.path().to_string_lossy()).unwrap();
        assert_eq!(result.applied, 1);
        assert_eq!(result.skipped, 0);
        assert!(dir.path().join("txt/src.txt").exists());
        assert!(dir.path().join(".coworker_audit.jsonl").exists());
    }

    #[test]
    fn soft_delete_moves_into_trash_and_is_reversible() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("doc.txt");
        fs::write(&target, b"keep me").unwrap();
        let roots = roots_for(&dir);

        let deleted = soft_delete(&target.to_string_lossy(), &roots, &dir.path().to_string_lossy()).unwrap();
        let trash_path = match deleted {
            SoftDeleteResult::Deleted { to, .. } => to,
            _ => panic!("expected Deleted"),
        };
        assert!(!target.exists());
        assert!(Path::new(&trash_path).exists());

        let restored = restore_from_trash(
            &trash_path,
            &target.to_string_lossy(),
            &roots,
            &dir.path().to_string_lossy(),
        )
        .unwrap();
        match restored {
            RestoreResult::Restored { .. } => {}
            _ => panic!("expected Restored"),
        }
        assert!(target.exists());
        assert_eq!(fs::read(&target).unwrap(), b"keep me");
    }

    #[test]
    fn restore_refuses_existing_destination() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("doc.txt");
        fs::write(&target, b"keep me").unwrap();
        let roots = roots_for(&dir);
        let deleted = soft_delete(&target.to_string_lossy(), &roots, &dir.path().to_string_lossy()).unwrap();
        let trash_path = match deleted {
            SoftDeleteResult::Deleted { to, .. } => to,
            _ => panic!("expected Deleted"),
        };

        fs::write(&target, b"someone recreated me").unwrap();
        let restored =
            restore_from_trash(&trash_path, &target.to_string_lossy(), &roots, &dir.path().to_string_lossy())
                .unwrap();
        match restored {
            RestoreResult::NotRestored { reason, .. } => assert_eq!(reason, "destination_exists"),
            _ => panic!("expected NotRestored"),
        }
    }
}
