// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! Path containment checks. Every filesystem-touching handler must resolve
//! every path it touches through [`enforce_within_roots`] before doing any
//! I/O.

use std::path::{Component, Path, PathBuf};
use wsa_core::WsaError;

/// Canonicalizes `path` and verifies it is exactly one of `roots` or a
/// descendant of one. Roots are themselves canonicalized (and must already
/// exist). `path` need not exist yet — e.g. a rename destination or a trash
/// entry — in which case the deepest existing ancestor is canonicalized and
/// the remaining path components are appended lexically; a `..` segment in
/// that unresolved tail is rejected rather than silently normalized away.
pub fn enforce_within_roots(path: &str, roots: &[String]) -> Result<PathBuf, WsaError> {
    let canonical_roots: Vec<PathBuf> = roots
        .iter()
        .map(|r| {
            std::fs::canonicalize(r).map_err(|_| WsaError::OutsideRoots { path: r.clone() })
        })
        .collect::<Result<_, _>>()?;

    let resolved = resolve_lexically(Path::new(path))
        .map_err(|_| WsaError::OutsideRoots { path: path.to_string() })?;

    let within = canonical_roots
        .iter()
        .any(|root| resolved == *root || resolved.starts_with(root));

    if !within {
        return Err(WsaError::OutsideRoots { path: path.to_string() });
    }

    Ok(resolved)
}

/// Resolves `path` to an absolute, symlink-free form even when it (or a
/// suffix of it) does not yet exist on disk.
fn resolve_lexically(path: &Path) -> std::io::Result<PathBuf> {
    if path.exists() {
        return std::fs::canonicalize(path);
    }

    let components: Vec<Component> = path.components().collect();

    // Find the longest existing prefix.
    let mut split = components.len();
    loop {
        if split == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no existing ancestor",
            ));
        }
        let prefix: PathBuf = components[..split].iter().collect();
        if prefix.exists() {
            break;
        }
        split -= 1;
    }

    let tail = &components[split..];
    if tail.iter().any(|c| matches!(c, Component::ParentDir)) {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "'..' not allowed past the last existing ancestor",
        ));
    }

    let prefix: PathBuf = components[..split].iter().collect();
    let mut canonical = std::fs::canonicalize(&prefix)?;
    for component in tail {
        if let Component::Normal(part) = component {
            canonical.push(part);
        }
    }
    Ok(canonical)
}
