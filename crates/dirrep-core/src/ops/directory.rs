//! Directory operations

use dirrep_fs::{RelPath, ReservedName, io};
use serde_json::Value;
use std::fs;
use std::path::Path;
use uuid::Uuid;

use super::{ensure_directory, io_error, make_room, resolve_directory_target};
use crate::repository::Repository;
use crate::sidecar::{DirectorySidecar, FilePaths};
use crate::transaction::Tx;
use crate::tree::{DirectoryNode, Node};
use crate::{Error, Result};

impl Repository {
    /// Track the directory at `path`, creating it and any missing ancestor.
    ///
    /// `description` is given to the terminal directory only. With `clean`,
    /// untracked content below `path` is deleted. Adding a directory that
    /// is already tracked succeeds without changing anything.
    pub fn add_directory(
        &mut self,
        path: impl AsRef<str>,
        description: Option<Value>,
        clean: bool,
    ) -> Result<()> {
        let path = super::resolve_target(path.as_ref())?;
        let targets = std::slice::from_ref(&path);
        let subtrees: &[RelPath] = if clean { targets } else { &[] };
        self.transact_scoped(targets, subtrees, |tx| {
            if ensure_directory(tx, &path, description.as_ref())? {
                tracing::debug!(path = %path, "tracked directory");
            }
            if clean {
                let node = tx
                    .tree()
                    .descend(&path)
                    .cloned()
                    .ok_or_else(|| Error::not_found("directory", &path))?;
                let native = tx.native(&path);
                remove_untracked(tx, &native, &node)?;
            }
            Ok(())
        })
    }

    /// Stop tracking the directory at `path` and everything below it.
    ///
    /// With `clean` the directory is deleted from disk. Otherwise only the
    /// repository's own files are removed from the subtree, and directories
    /// are deleted only when that leaves them empty. Nothing is deleted
    /// before the descriptor is committed.
    pub fn remove_directory(&mut self, path: impl AsRef<str>, clean: bool) -> Result<()> {
        let path = resolve_directory_target(path.as_ref(), "removed")?;
        let targets = std::slice::from_ref(&path);
        self.transact_scoped(targets, targets, |tx| {
            if tx.tree().descend(&path).is_none() {
                return Err(Error::not_found("directory", &path));
            }
            let Some(Node::Directory(node)) = tx.tree_mut().detach(&path) else {
                return Err(Error::not_found("directory", &path));
            };
            if clean {
                let native = tx.native(&path);
                tx.remove_after_commit(native);
            } else {
                purge_metadata(tx, &path, &node);
            }
            Ok(())
        })
    }

    /// Rename the directory at `path` within its parent.
    pub fn rename_directory(
        &mut self,
        path: impl AsRef<str>,
        new_name: &str,
        force: bool,
    ) -> Result<()> {
        super::check_new_name(new_name)?;
        let source = resolve_directory_target(path.as_ref(), "renamed")?;
        let destination = source.with_file_name(new_name);
        self.relocate_directory(source, destination, force)
    }

    /// Move the directory at `path` to `destination`.
    ///
    /// A tracked destination is replaced only with `force`. Moving a
    /// directory into itself or over one of its ancestors is rejected.
    pub fn move_directory(
        &mut self,
        path: impl AsRef<str>,
        destination: impl AsRef<str>,
        force: bool,
    ) -> Result<()> {
        let source = resolve_directory_target(path.as_ref(), "moved")?;
        let destination = resolve_directory_target(destination.as_ref(), "replaced")?;
        self.relocate_directory(source, destination, force)
    }

    fn relocate_directory(
        &mut self,
        source: RelPath,
        destination: RelPath,
        force: bool,
    ) -> Result<()> {
        if source != destination {
            check_disjoint(&source, &destination)?;
        }

        let targets = [source.clone(), destination.clone()];
        self.transact_scoped(&targets, &targets, |tx| {
            if tx.tree().descend(&source).is_none() {
                return Err(Error::not_found("directory", &source));
            }
            if source == destination {
                return Ok(());
            }
            let dest_parent = destination.parent().unwrap_or_default();
            ensure_directory(tx, &dest_parent, None)?;
            make_room(tx, &destination, force)?;

            let from = tx.native(&source);
            let to = tx.native(&destination);
            tx.rename(&from, &to)?;

            let mut node = tx
                .tree_mut()
                .detach(&source)
                .ok_or_else(|| Error::not_found("directory", &source))?;
            node.set_name(destination.file_name().unwrap_or_default());
            tx.tree_mut()
                .descend_mut(&dest_parent)
                .ok_or_else(|| Error::not_found("directory", &dest_parent))?
                .insert(node)?;
            tx.touch(&destination);
            tracing::debug!(from = %source, to = %destination, "moved directory");
            Ok(())
        })
    }

    /// Copy the directory at `path`, with every tracked entry below it, to
    /// `destination`.
    ///
    /// Copied files get new ids and keep their other metadata. Untracked
    /// content is not copied.
    pub fn copy_directory(
        &mut self,
        path: impl AsRef<str>,
        destination: impl AsRef<str>,
        force: bool,
    ) -> Result<()> {
        let source = resolve_directory_target(path.as_ref(), "copied")?;
        let destination = resolve_directory_target(destination.as_ref(), "replaced")?;
        if source == destination {
            return Err(Error::invariant(format!(
                "cannot copy '{source}' onto itself"
            )));
        }
        check_disjoint(&source, &destination)?;

        let targets = [source.clone(), destination.clone()];
        self.transact_scoped(&targets, &targets, |tx| {
            let node = tx
                .tree()
                .descend(&source)
                .cloned()
                .ok_or_else(|| Error::not_found("directory", &source))?;
            let dest_parent = destination.parent().unwrap_or_default();
            ensure_directory(tx, &dest_parent, None)?;
            make_room(tx, &destination, force)?;

            let native = tx.native(&destination);
            tx.creating(&native);
            let copy = copy_tree(tx.root(), tx.owner_id(), &source, &destination, &node)?;
            tx.tree_mut()
                .descend_mut(&dest_parent)
                .ok_or_else(|| Error::not_found("directory", &dest_parent))?
                .insert(Node::Directory(copy))?;
            tx.touch(&destination);
            Ok(())
        })
    }
}

fn check_disjoint(source: &RelPath, destination: &RelPath) -> Result<()> {
    if destination.starts_with(source) {
        return Err(Error::invariant(format!(
            "cannot place '{source}' inside itself at '{destination}'"
        )));
    }
    if source.starts_with(destination) {
        return Err(Error::invariant(format!(
            "cannot replace '{destination}', it contains '{source}'"
        )));
    }
    Ok(())
}

/// Discard everything below `native` that is neither tracked nor reserved.
fn remove_untracked(tx: &mut Tx<'_>, native: &Path, node: &DirectoryNode) -> Result<()> {
    let entries = fs::read_dir(native).map_err(io_error(native))?;
    for entry in entries {
        let entry = entry.map_err(io_error(native))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if ReservedName::matches(&name).is_some() {
            continue;
        }
        let path = entry.path();
        let is_dir = entry.file_type().map_err(io_error(&path))?.is_dir();
        match node.child(&name) {
            Some(Node::Directory(sub)) if is_dir => remove_untracked(tx, &path, sub)?,
            Some(Node::File(_)) if !is_dir => {}
            _ => {
                tracing::debug!(path = %path.display(), "removing untracked content");
                tx.discard(&path)?;
            }
        }
    }
    Ok(())
}

/// Schedule removal of the repository's own files below a directory that
/// is no longer tracked, keeping payloads and non-empty directories.
///
/// Lock markers go too; the transaction holds every one of them.
fn purge_metadata(tx: &mut Tx<'_>, path: &RelPath, node: &DirectoryNode) {
    let root = tx.root();
    for file in node.files() {
        let paths = FilePaths::new(root, &path.join(&file.name));
        for path in paths.metadata() {
            tx.remove_after_commit(path.to_path_buf());
        }
    }
    for dir in node.directories() {
        purge_metadata(tx, &path.join(&dir.name), dir);
    }
    let native = path.to_native(root);
    tx.remove_after_commit(native.join(ReservedName::DirectorySidecar));
    tx.remove_after_commit(native.join(ReservedName::DirectoryLock));
    tx.remove_dir_after_commit(native);
}

/// Duplicate the tracked subtree `node` from `source` to `destination`.
fn copy_tree(
    root: &Path,
    owner_id: Uuid,
    source: &RelPath,
    destination: &RelPath,
    node: &DirectoryNode,
) -> Result<DirectoryNode> {
    let mut copy = DirectoryNode::new(
        destination.file_name().unwrap_or_default(),
        node.description.clone(),
    );
    copy.created_at = node.created_at;
    copy.updated_at = node.updated_at;

    let native = destination.to_native(root);
    fs::create_dir_all(&native).map_err(io_error(&native))?;
    DirectorySidecar::for_node(owner_id, &copy).write(&DirectorySidecar::path(root, destination))?;

    for file in node.files() {
        let from = FilePaths::new(root, &source.join(&file.name));
        let to = FilePaths::new(root, &destination.join(&file.name));
        io::copy_atomic(&from.payload, &to.payload)?;
        let mut entry = file.clone();
        entry.id = Uuid::new_v4();
        to.write_sidecars(owner_id, &entry)?;
        copy.insert(Node::File(entry))?;
    }
    for dir in node.directories() {
        let sub = copy_tree(
            root,
            owner_id,
            &source.join(&dir.name),
            &destination.join(&dir.name),
            dir,
        )?;
        copy.insert(Node::Directory(sub))?;
    }
    Ok(copy)
}
