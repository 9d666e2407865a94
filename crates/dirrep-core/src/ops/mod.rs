//! Directory and file operations
//!
//! Every public operation resolves and validates its paths first, then runs
//! as one transaction. The helpers here are the tree edits several
//! operations share.

mod directory;
mod file;

use dirrep_fs::{RelPath, check_name};
use serde_json::Value;
use std::fs;
use std::path::Path;

use crate::sidecar::{DirectorySidecar, FilePaths};
use crate::transaction::Tx;
use crate::tree::{DirectoryNode, Node};
use crate::{Error, Result};

/// Options for [`Repository::dump_file`](crate::Repository::dump_file).
#[derive(Debug, Clone, Default)]
pub struct DumpOptions {
    /// Codec name, [`DEFAULT_CODEC`](crate::DEFAULT_CODEC) if unset
    pub codec: Option<String>,
    pub description: Option<Value>,
    pub class_tag: Option<String>,
    /// Overwrite an already tracked file
    pub replace: bool,
}

impl DumpOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn codec(mut self, codec: impl Into<String>) -> Self {
        self.codec = Some(codec.into());
        self
    }

    pub fn description(mut self, description: Value) -> Self {
        self.description = Some(description);
        self
    }

    pub fn class_tag(mut self, class_tag: impl Into<String>) -> Self {
        self.class_tag = Some(class_tag.into());
        self
    }

    pub fn replace(mut self, replace: bool) -> Self {
        self.replace = replace;
        self
    }
}

/// Options for [`Repository::update_file`](crate::Repository::update_file).
///
/// Unset fields keep their stored value.
#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    pub codec: Option<String>,
    pub description: Option<Value>,
    pub class_tag: Option<String>,
}

impl UpdateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn codec(mut self, codec: impl Into<String>) -> Self {
        self.codec = Some(codec.into());
        self
    }

    pub fn description(mut self, description: Value) -> Self {
        self.description = Some(description);
        self
    }

    pub fn class_tag(mut self, class_tag: impl Into<String>) -> Self {
        self.class_tag = Some(class_tag.into());
        self
    }
}

/// Resolve a path that will name a tracked entry.
///
/// Every segment must be an allowed name, so the root is rejected too.
pub(crate) fn resolve_target(raw: &str) -> Result<RelPath> {
    let path = RelPath::resolve(raw)?;
    check_segments(&path)?;
    Ok(path)
}

/// Like [`resolve_target`], but the root is a tree invariant violation.
pub(crate) fn resolve_directory_target(raw: &str, action: &str) -> Result<RelPath> {
    let path = RelPath::resolve(raw)?;
    if path.is_root() {
        return Err(Error::invariant(format!(
            "the repository root cannot be {action}"
        )));
    }
    check_segments(&path)?;
    Ok(path)
}

fn check_segments(path: &RelPath) -> Result<()> {
    if path.is_root() {
        check_name(path)?;
    }
    let mut prefix = RelPath::root();
    for segment in path.segments() {
        prefix = prefix.join(segment);
        check_name(&prefix)?;
    }
    Ok(())
}

/// Validate a bare entry name used by the rename operations.
pub(crate) fn check_new_name(name: &str) -> Result<()> {
    let as_path = RelPath::resolve(name)?;
    if as_path.depth() != 1 || name.contains(['/', '\\']) {
        return Err(Error::NameNotAllowed {
            name: name.to_string(),
            reason: "a new name must be a single path segment".to_string(),
        });
    }
    check_name(&as_path)?;
    Ok(())
}

pub(crate) fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> Error + '_ {
    move |e| dirrep_fs::Error::io(path, e).into()
}

/// Track `path` and every missing ancestor as directories.
///
/// The description goes to the terminal directory only. Returns whether
/// anything new was tracked. Directories and sidecars created here are
/// removed again if the transaction does not commit.
pub(crate) fn ensure_directory(
    tx: &mut Tx<'_>,
    path: &RelPath,
    description: Option<&Value>,
) -> Result<bool> {
    let root = tx.root();
    let owner = tx.owner_id();
    let mut created = Vec::new();
    let mut current = RelPath::root();

    for segment in path.segments() {
        let parent = current.clone();
        current = current.join(segment);
        let parent_node = tx
            .tree()
            .descend(&parent)
            .ok_or_else(|| Error::not_found("directory", &parent))?;
        match parent_node.child(segment) {
            Some(Node::Directory(_)) => continue,
            Some(Node::File(_)) => {
                return Err(Error::invariant(format!(
                    "'{current}' is a tracked file, not a directory"
                )));
            }
            None => {}
        }

        let native = current.to_native(root);
        if native.exists() && !native.is_dir() {
            return Err(Error::invariant(format!(
                "'{current}' exists on disk and is not a directory"
            )));
        }
        tx.creating(&native);
        fs::create_dir_all(&native).map_err(io_error(&native))?;

        let sidecar_path = DirectorySidecar::path(root, &current);
        match DirectorySidecar::read(&sidecar_path) {
            Ok(Some(existing)) if existing.owner_id != owner => {
                return Err(Error::StaleOrForeign {
                    path: native,
                    reason: format!("directory is owned by repository {}", existing.owner_id),
                });
            }
            Err(e) => {
                return Err(Error::StaleOrForeign {
                    path: native,
                    reason: format!("directory sidecar is unreadable: {e}"),
                });
            }
            _ => {}
        }

        let terminal = current == *path;
        let description = match description {
            Some(value) if terminal => value.clone(),
            _ => Value::Null,
        };
        let node = DirectoryNode::new(segment, description);
        tx.creating(&sidecar_path);
        DirectorySidecar::for_node(owner, &node).write(&sidecar_path)?;
        tx.tree_mut()
            .descend_mut(&parent)
            .ok_or_else(|| Error::not_found("directory", &parent))?
            .insert(Node::Directory(node))?;
        created.push(current.clone());
    }

    for path in &created {
        tx.touch(path);
    }
    Ok(!created.is_empty())
}

/// Clear `dest` for an incoming entry.
///
/// Tracked or untracked occupants are an error unless `force` is set, in
/// which case they are dropped from the tree and discarded from disk.
pub(crate) fn make_room(tx: &mut Tx<'_>, dest: &RelPath, force: bool) -> Result<()> {
    let native = tx.native(dest);
    if tx.tree().node_at(dest).is_some() {
        if !force {
            return Err(Error::invariant(format!("'{dest}' is already tracked")));
        }
        match tx.tree_mut().detach(dest) {
            Some(Node::File(_)) => {
                let paths = FilePaths::new(tx.root(), dest);
                tx.discard(&paths.payload)?;
                for path in paths.metadata() {
                    tx.discard(path)?;
                }
            }
            Some(Node::Directory(_)) => tx.discard(&native)?,
            None => {}
        }
        tracing::debug!(path = %dest, "replaced tracked entry");
    } else if native.exists() {
        if !force {
            return Err(Error::invariant(format!(
                "'{dest}' exists on disk but is not tracked"
            )));
        }
        tx.discard(&native)?;
    }
    Ok(())
}

/// Remove a file or a whole directory tree, ignoring absence.
pub(crate) fn remove_native(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path).map_err(io_error(path)),
        Ok(_) => fs::remove_file(path).map_err(io_error(path)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_error(path)(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("a/b")]
    #[case("data.bin")]
    #[case("./x//y")]
    fn valid_targets_resolve(#[case] raw: &str) {
        assert!(resolve_target(raw).is_ok());
    }

    #[rstest]
    #[case("")]
    #[case(".")]
    #[case("a/.dirrep_dir/b")]
    #[case("a/x.dirrep_file")]
    #[case(".dirrep")]
    fn reserved_or_root_targets_are_rejected(#[case] raw: &str) {
        assert!(matches!(
            resolve_target(raw),
            Err(Error::NameNotAllowed { .. })
        ));
    }

    #[test]
    fn root_directory_target_is_an_invariant_violation() {
        assert!(matches!(
            resolve_directory_target("/", "removed"),
            Err(Error::TreeInvariantViolation { .. })
        ));
    }

    #[rstest]
    #[case("new")]
    #[case(".hidden")]
    fn single_segment_names_are_accepted(#[case] name: &str) {
        assert!(check_new_name(name).is_ok());
    }

    #[rstest]
    #[case("a/b")]
    #[case("a\\b")]
    #[case("")]
    #[case(".dirrep_dir.lock")]
    fn bad_new_names_are_rejected(#[case] name: &str) {
        assert!(check_new_name(name).is_err());
    }
}
