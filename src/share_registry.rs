//! Share registry (spec §4.5): the ordered, single-writer table of local
//! shares keyed by a stable `share_id`.
//!
//! Grounded on the teacher's `DiscoveredPeers` shared-state pattern
//! (`Arc<RwLock<...>>` via `parking_lot`) from `lan/discovery.rs`, but
//! backed by a `Vec` instead of a `HashMap` so snapshot order matches
//! insertion order (required by §8's identity property), with
//! linear lookups — registries are small (tens of shares), so this
//! trades a little lookup speed for not pulling in an ordered-map crate
//! the teacher doesn't use.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::{NetShareError, Result};

#[derive(Debug, Clone)]
pub struct Share {
    pub share_id: String,
    pub name: String,
    pub local_path: PathBuf,
    pub read_only: bool,
}

#[derive(Clone)]
pub struct ShareRegistry {
    inner: Arc<RwLock<Vec<Share>>>,
}

impl ShareRegistry {
    pub fn new() -> Self {
        ShareRegistry {
            inner: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Restore a previously-persisted share list verbatim (preserves
    /// `share_id`s across restarts, per spec §3's identity invariant).
    pub fn from_shares(shares: Vec<Share>) -> Self {
        ShareRegistry {
            inner: Arc::new(RwLock::new(shares)),
        }
    }

    pub fn list(&self) -> Vec<Share> {
        self.inner.read().clone()
    }

    pub fn get(&self, share_id: &str) -> Option<Share> {
        self.inner.read().iter().find(|s| s.share_id == share_id).cloned()
    }

    /// Add or update a share. See spec §4.5 for the three-way precedence:
    /// explicit `share_id` match > canonical-path match > new entry.
    pub fn add(
        &self,
        path: &Path,
        read_only: bool,
        share_id: Option<String>,
        name: Option<String>,
    ) -> Result<String> {
        let canonical = path
            .canonicalize()
            .map_err(|e| NetShareError::Io(format!("cannot add share at {}: {e}", path.display())))?;

        let mut shares = self.inner.write();

        if let Some(id) = share_id.as_ref() {
            if let Some(existing) = shares.iter_mut().find(|s| &s.share_id == id) {
                existing.local_path = canonical;
                if let Some(n) = name {
                    existing.name = n;
                }
                existing.read_only = read_only;
                return Ok(existing.share_id.clone());
            }
        }

        if let Some(existing) = shares.iter_mut().find(|s| s.local_path == canonical) {
            if let Some(n) = name {
                existing.name = n;
            }
            existing.read_only = read_only;
            return Ok(existing.share_id.clone());
        }

        let new_id = share_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let derived_name = name.unwrap_or_else(|| {
            canonical
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| canonical.to_string_lossy().into_owned())
        });

        shares.push(Share {
            share_id: new_id.clone(),
            name: derived_name,
            local_path: canonical,
            read_only,
        });

        Ok(new_id)
    }

    pub fn remove(&self, share_id: &str) -> bool {
        let mut shares = self.inner.write();
        let before = shares.len();
        shares.retain(|s| s.share_id != share_id);
        shares.len() != before
    }

    pub fn toggle_read_only(&self, share_id: &str) -> bool {
        let mut shares = self.inner.write();
        match shares.iter_mut().find(|s| s.share_id == share_id) {
            Some(s) => {
                s.read_only = !s.read_only;
                true
            }
            None => false,
        }
    }
}

impl Default for ShareRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_with_explicit_id_preserves_it() {
        let dir = tempfile::tempdir().unwrap();
        let reg = ShareRegistry::new();
        let id = reg
            .add(dir.path(), false, Some("fixed-id".to_string()), Some("docs".to_string()))
            .unwrap();
        assert_eq!(id, "fixed-id");
        assert_eq!(reg.get("fixed-id").unwrap().name, "docs");
    }

    #[test]
    fn adding_same_path_twice_returns_original_id_and_updates_fields() {
        let dir = tempfile::tempdir().unwrap();
        let reg = ShareRegistry::new();
        let id1 = reg.add(dir.path(), false, None, Some("first".to_string())).unwrap();
        let id2 = reg.add(dir.path(), true, None, Some("second".to_string())).unwrap();
        assert_eq!(id1, id2);
        let share = reg.get(&id1).unwrap();
        assert_eq!(share.name, "second");
        assert!(share.read_only);
    }

    #[test]
    fn remove_then_readd_without_id_generates_new_id() {
        let dir = tempfile::tempdir().unwrap();
        let reg = ShareRegistry::new();
        let id1 = reg.add(dir.path(), false, None, None).unwrap();
        assert!(reg.remove(&id1));
        let id2 = reg.add(dir.path(), false, None, None).unwrap();
        assert_ne!(id1, id2);
    }

    #[test]
    fn list_preserves_insertion_order() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        let reg = ShareRegistry::new();
        let id_a = reg.add(dir_a.path(), false, None, Some("a".into())).unwrap();
        let id_b = reg.add(dir_b.path(), false, None, Some("b".into())).unwrap();
        let listed = reg.list();
        assert_eq!(listed[0].share_id, id_a);
        assert_eq!(listed[1].share_id, id_b);
    }

    #[test]
    fn toggle_read_only_flips_flag() {
        let dir = tempfile::tempdir().unwrap();
        let reg = ShareRegistry::new();
        let id = reg.add(dir.path(), false, None, None).unwrap();
        assert!(reg.toggle_read_only(&id));
        assert!(reg.get(&id).unwrap().read_only);
        assert!(reg.toggle_read_only(&id));
        assert!(!reg.get(&id).unwrap().read_only);
    }

    #[test]
    fn toggle_unknown_id_returns_false() {
        let reg = ShareRegistry::new();
        assert!(!reg.toggle_read_only("nope"));
    }

    #[test]
    fn derives_name_from_final_path_component() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("photos");
        std::fs::create_dir(&sub).unwrap();
        let reg = ShareRegistry::new();
        let id = reg.add(&sub, false, None, None).unwrap();
        assert_eq!(reg.get(&id).unwrap().name, "photos");
    }
}
