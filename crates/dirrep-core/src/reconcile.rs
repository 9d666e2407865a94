//! Reconciliation between the tracked tree and the filesystem
//!
//! Tracked entries whose directory, payload or sidecar vanished, or whose
//! sidecar belongs to another repository, are pruned from the in-memory
//! tree and reported. Nothing is ever deleted from disk here, and
//! untracked content is never adopted.

use dirrep_fs::RelPath;
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use uuid::Uuid;

use crate::sidecar::{DirectorySidecar, FilePaths, FileSidecar};
use crate::tree::{DirectoryNode, Node};

/// Why an entry was pruned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WarningKind {
    MissingDirectory,
    MissingDirectorySidecar,
    MissingPayload,
    MissingFileSidecar,
    /// Sidecar unreadable or owned by another repository
    StaleOrForeign,
}

/// One pruned entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileWarning {
    pub path: RelPath,
    pub kind: WarningKind,
    pub reason: String,
}

impl fmt::Display for ReconcileWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.reason)
    }
}

/// Verify the whole tree against the filesystem under `root`.
pub fn reconcile(root: &Path, owner_id: Uuid, tree: &mut DirectoryNode) -> Vec<ReconcileWarning> {
    let mut warnings = Vec::new();
    check_directory(root, owner_id, &RelPath::root(), tree, &mut warnings);
    for warning in &warnings {
        tracing::warn!(path = %warning.path, kind = ?warning.kind, reason = %warning.reason, "pruned tracked entry");
    }
    warnings
}

/// Verify only the entries a transaction touched, pruning those that do
/// not exist on disk.
pub fn verify_paths(
    root: &Path,
    owner_id: Uuid,
    tree: &mut DirectoryNode,
    touched: &BTreeSet<RelPath>,
) -> Vec<ReconcileWarning> {
    let mut warnings = Vec::new();
    for path in touched {
        let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
            continue;
        };
        let Some(dir) = tree.descend_mut(&parent) else {
            continue;
        };
        let Some(node) = dir.child(name) else {
            continue;
        };
        if let Some(warning) = check_node(root, owner_id, path, node) {
            tracing::warn!(path = %warning.path, reason = %warning.reason, "touched entry missing after mutation");
            dir.remove(name);
            warnings.push(warning);
        }
    }
    warnings
}

fn check_directory(
    root: &Path,
    owner_id: Uuid,
    dir_path: &RelPath,
    dir: &mut DirectoryNode,
    warnings: &mut Vec<ReconcileWarning>,
) {
    dir.children_mut().retain_mut(|child| {
        let path = dir_path.join(child.name());
        if let Some(warning) = check_node(root, owner_id, &path, child) {
            warnings.push(warning);
            return false;
        }
        if let Node::Directory(sub) = child {
            check_directory(root, owner_id, &path, sub, warnings);
        }
        true
    });
}

/// Check one entry itself, not its descendants.
fn check_node(root: &Path, owner_id: Uuid, path: &RelPath, node: &Node) -> Option<ReconcileWarning> {
    let warn = |kind, reason: String| {
        Some(ReconcileWarning {
            path: path.clone(),
            kind,
            reason,
        })
    };

    match node {
        Node::Directory(_) => {
            if !path.to_native(root).is_dir() {
                return warn(WarningKind::MissingDirectory, "directory is missing".into());
            }
            match DirectorySidecar::read(&DirectorySidecar::path(root, path)) {
                Ok(Some(sidecar)) if sidecar.owner_id == owner_id => None,
                Ok(Some(sidecar)) => warn(
                    WarningKind::StaleOrForeign,
                    format!("directory sidecar is owned by {}", sidecar.owner_id),
                ),
                Ok(None) => warn(
                    WarningKind::MissingDirectorySidecar,
                    "directory sidecar is missing".into(),
                ),
                Err(e) => warn(
                    WarningKind::StaleOrForeign,
                    format!("directory sidecar is unreadable: {e}"),
                ),
            }
        }
        Node::File(_) => {
            let paths = FilePaths::new(root, path);
            if !paths.payload.is_file() {
                return warn(WarningKind::MissingPayload, "payload file is missing".into());
            }
            match FileSidecar::read(&paths.info) {
                Ok(Some(sidecar)) if sidecar.owner_id == owner_id => None,
                Ok(Some(sidecar)) => warn(
                    WarningKind::StaleOrForeign,
                    format!("file sidecar is owned by {}", sidecar.owner_id),
                ),
                Ok(None) => warn(
                    WarningKind::MissingFileSidecar,
                    "file sidecar is missing".into(),
                ),
                Err(e) => warn(
                    WarningKind::StaleOrForeign,
                    format!("file sidecar is unreadable: {e}"),
                ),
            }
        }
    }
}
