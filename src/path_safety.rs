//! Safe path resolution under a share root (spec §4.3).
//!
//! A client-supplied relative path is joined to the share root and the
//! result MUST stay inside that root. We canonicalize the deepest
//! existing ancestor and require the resolved path to start with the
//! canonicalized root, which rejects `..` traversal, absolute-path
//! overrides, and symlinks that point outside the root — the same
//! algorithm `sanitize_path` in the tftp-rs reference server uses,
//! generalized to accept a single relative path instead of a bare
//! filename.

use std::path::{Component, Path, PathBuf};

use crate::error::{NetShareError, Result};

/// Resolve `requested` (a client-supplied, `/`-separated relative path)
/// against `root`, rejecting anything that would escape `root`.
///
/// `requested` may name a path that does not exist yet (upload target);
/// in that case we canonicalize the deepest existing ancestor and check
/// containment there, then rejoin the remaining components.
///
/// Case sensitivity (spec §4.3) is whatever the host filesystem gives
/// us: we do no case folding or normalization of our own, so two
/// requested paths differing only in case name the same file on a
/// case-insensitive filesystem (default macOS/Windows) and distinct
/// files on a case-sensitive one (default Linux).
pub fn resolve(root: &Path, requested: &str) -> Result<PathBuf> {
    let canonical_root = root
        .canonicalize()
        .map_err(|e| NetShareError::Internal(format!("share root unavailable: {e}")))?;

    let mut relative = PathBuf::new();
    for part in requested.split(['/', '\\']) {
        if part.is_empty() || part == "." {
            continue;
        }
        if part == ".." {
            return Err(NetShareError::PathTraversal(requested.to_string()));
        }
        relative.push(part);
    }

    let mut components = relative.components();
    if matches!(components.next(), Some(Component::RootDir) | Some(Component::Prefix(_))) {
        return Err(NetShareError::PathTraversal(requested.to_string()));
    }

    let joined = canonical_root.join(&relative);

    let resolved = match joined.canonicalize() {
        Ok(existing) => existing,
        Err(_) => canonicalize_new_path(&canonical_root, &joined)?,
    };

    if !resolved.starts_with(&canonical_root) {
        return Err(NetShareError::PathTraversal(requested.to_string()));
    }

    Ok(resolved)
}

/// For a path that doesn't exist yet, canonicalize the deepest existing
/// ancestor (to resolve any symlinks in the parent chain) and rejoin the
/// non-existent tail verbatim.
fn canonicalize_new_path(root: &Path, joined: &Path) -> Result<PathBuf> {
    let mut existing = joined.to_path_buf();
    let mut tail: Vec<std::ffi::OsString> = Vec::new();

    loop {
        if existing == *root {
            break;
        }
        match existing.canonicalize() {
            Ok(canonical) => {
                let mut resolved = canonical;
                for component in tail.iter().rev() {
                    resolved.push(component);
                }
                return Ok(resolved);
            }
            Err(_) => {
                let name = existing
                    .file_name()
                    .ok_or_else(|| NetShareError::BadRequest("empty path".to_string()))?
                    .to_owned();
                tail.push(name);
                if !existing.pop() {
                    break;
                }
            }
        }
    }

    let mut resolved = root.to_path_buf();
    for component in tail.iter().rev() {
        resolved.push(component);
    }
    Ok(resolved)
}
