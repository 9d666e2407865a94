//! Repository handle
//!
//! A [`Repository`] is one handle on a repository root. Any number of
//! handles, in any number of threads or processes, may share a root: every
//! mutation reloads the descriptor under lock before editing it, so a handle
//! never commits on top of stale state. Reads are served from the snapshot
//! the handle last loaded or committed.

use chrono::{DateTime, Utc};
use dirrep_fs::{FileLockService, LockService, RelPath, ReservedName, io};
use semver::Version;
use serde_json::Value;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use crate::codec::{Codec, CodecRegistry};
use crate::config::RepositoryOptions;
use crate::descriptor::Descriptor;
use crate::reconcile::{self, ReconcileWarning};
use crate::sidecar::{self, DirectorySidecar, FilePaths};
use crate::transaction::{LockSet, Transaction, Tx, repository_lock_key};
use crate::tree::{DirectoryNode, FileEntry, Walk};
use crate::{Error, Result};

/// A handle on a repository root.
#[derive(Debug)]
pub struct Repository {
    root: PathBuf,
    descriptor: Descriptor,
    options: RepositoryOptions,
    locks: Arc<dyn LockService>,
    codecs: CodecRegistry,
    warnings: Vec<ReconcileWarning>,
}

impl Repository {
    /// Turn `path` into a new, empty repository.
    ///
    /// The directory is created if needed. If `path` already is a
    /// repository, this fails with [`Error::TreeInvariantViolation`] unless
    /// `replace` is set, in which case its tracked content and any leftover
    /// sidecars are removed first. Untracked files are kept.
    pub fn create(
        path: impl AsRef<Path>,
        description: Value,
        options: RepositoryOptions,
        replace: bool,
    ) -> Result<Self> {
        Self::create_with(
            path,
            description,
            options,
            replace,
            Arc::new(FileLockService::new()),
        )
    }

    /// [`create`](Self::create) with an explicit lock service.
    pub fn create_with(
        path: impl AsRef<Path>,
        description: Value,
        options: RepositoryOptions,
        replace: bool,
        locks: Arc<dyn LockService>,
    ) -> Result<Self> {
        let path = path.as_ref();
        fs::create_dir_all(path).map_err(|e| dirrep_fs::Error::io(path, e))?;
        let root = dunce::canonicalize(path).map_err(|e| dirrep_fs::Error::io(path, e))?;

        let descriptor = {
            let mut held = LockSet::default();
            held.acquire(
                locks.as_ref(),
                &repository_lock_key(&root),
                options.lock_timeout,
            )?;
            if Descriptor::exists(&root) {
                if !replace {
                    return Err(Error::invariant(format!(
                        "{} is already a repository",
                        root.display()
                    )));
                }
                clear_repository(&root)?;
            }
            let descriptor = Descriptor::new(description);
            DirectorySidecar::for_node(descriptor.unique_id, &descriptor.tree)
                .write(&DirectorySidecar::path(&root, &RelPath::root()))?;
            descriptor.write(&root)?;
            descriptor
        };

        tracing::info!(root = %root.display(), id = %descriptor.unique_id, "created repository");
        Ok(Self {
            root,
            descriptor,
            options,
            locks,
            codecs: CodecRegistry::new(),
            warnings: Vec::new(),
        })
    }

    /// Open an existing repository.
    ///
    /// Tracked entries that no longer match the filesystem are pruned from
    /// this handle's view and listed in [`warnings`](Self::warnings); nothing
    /// on disk is changed.
    pub fn load(path: impl AsRef<Path>, options: RepositoryOptions) -> Result<Self> {
        Self::load_with(path, options, Arc::new(FileLockService::new()))
    }

    /// [`load`](Self::load) with an explicit lock service.
    pub fn load_with(
        path: impl AsRef<Path>,
        options: RepositoryOptions,
        locks: Arc<dyn LockService>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let root = dunce::canonicalize(path).map_err(|_| Error::NotARepository {
            path: path.to_path_buf(),
        })?;
        let (mut descriptor, _) = Descriptor::read(&root)?;
        let warnings = reconcile::reconcile(&root, descriptor.unique_id, &mut descriptor.tree);
        tracing::debug!(root = %root.display(), revision = descriptor.revision, pruned = warnings.len(), "loaded repository");

        Ok(Self {
            root,
            descriptor,
            options,
            locks,
            codecs: CodecRegistry::new(),
            warnings,
        })
    }

    /// Load `path` if it is a repository, create it otherwise.
    pub fn open_or_create(
        path: impl AsRef<Path>,
        description: Value,
        options: RepositoryOptions,
    ) -> Result<Self> {
        if Self::is_repository(path.as_ref()) {
            Self::load(path, options)
        } else {
            Self::create(path, description, options, false)
        }
    }

    /// Whether `path` holds a readable repository descriptor.
    pub fn is_repository(path: impl AsRef<Path>) -> bool {
        Descriptor::read(path.as_ref()).is_ok()
    }

    /// Use `locks` for every later operation on this handle.
    ///
    /// Handles only exclude each other when they use lock services that see
    /// the same locks: file locks always do, a [`dirrep_fs::MemoryLockService`]
    /// must be shared.
    pub fn with_lock_service(mut self, locks: Arc<dyn LockService>) -> Self {
        self.locks = locks;
        self
    }

    /// Make a custom codec available to this handle.
    pub fn register_codec(&mut self, codec: Arc<dyn Codec>) -> Result<()> {
        self.codecs.register(codec)
    }

    /// Re-read the descriptor without taking locks or committing.
    pub fn refresh(&mut self) -> Result<&[ReconcileWarning]> {
        let (mut descriptor, _) = Descriptor::read(&self.root)?;
        self.warnings = reconcile::reconcile(&self.root, descriptor.unique_id, &mut descriptor.tree);
        self.descriptor = descriptor;
        Ok(&self.warnings)
    }

    /// Reconcile under lock and commit the pruned tree.
    pub fn synchronize(&mut self) -> Result<Vec<ReconcileWarning>> {
        self.transact(&[], |_| Ok(()))?;
        Ok(self.warnings.clone())
    }

    /// Stop tracking everything and remove the repository's own files.
    ///
    /// Sidecars, lock markers and the descriptor are always removed. With
    /// `remove_files` the tracked payloads go too; with `remove_directories`
    /// tracked directories left empty are removed, the root included.
    /// Untracked content is never touched.
    pub fn remove_repository(self, remove_files: bool, remove_directories: bool) -> Result<()> {
        {
            let mut held = LockSet::default();
            held.acquire(
                self.locks.as_ref(),
                &repository_lock_key(&self.root),
                self.options.lock_timeout,
            )?;
            let (descriptor, _) = Descriptor::read(&self.root)?;
            untrack_all(&self.root, &descriptor.tree, remove_files, remove_directories)?;
            sidecar::remove_directory_metadata(&self.root)?;
            io::remove_file_if_exists(&Descriptor::path(&self.root))?;
        }
        io::remove_file_if_exists(&repository_lock_key(&self.root))?;
        if remove_directories {
            io::remove_dir_if_empty(&self.root)?;
        }
        tracing::info!(root = %self.root.display(), "removed repository");
        Ok(())
    }

    /// Run `op` as a transaction and adopt the committed descriptor.
    pub(crate) fn transact<T>(
        &mut self,
        targets: &[RelPath],
        op: impl FnMut(&mut Tx<'_>) -> Result<T>,
    ) -> Result<T> {
        self.transact_scoped(targets, &[], op)
    }

    /// Like [`transact`](Self::transact), also locking the tracked
    /// directories at or below each of `subtrees`.
    pub(crate) fn transact_scoped<T>(
        &mut self,
        targets: &[RelPath],
        subtrees: &[RelPath],
        op: impl FnMut(&mut Tx<'_>) -> Result<T>,
    ) -> Result<T> {
        let committed = Transaction {
            root: &self.root,
            locks: self.locks.as_ref(),
            options: &self.options,
            codecs: &self.codecs,
        }
        .run_scoped(targets, subtrees, op)?;
        self.descriptor = committed.descriptor;
        self.warnings = committed.warnings;
        Ok(committed.value)
    }

    pub(crate) fn lock_service(&self) -> &dyn LockService {
        self.locks.as_ref()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn unique_id(&self) -> Uuid {
        self.descriptor.unique_id
    }

    pub fn version(&self) -> &Version {
        &self.descriptor.version
    }

    /// Revision of the descriptor this handle last saw.
    pub fn revision(&self) -> u64 {
        self.descriptor.revision
    }

    pub fn description(&self) -> &Value {
        &self.descriptor.description
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.descriptor.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.descriptor.updated_at
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    pub fn options(&self) -> &RepositoryOptions {
        &self.options
    }

    pub fn codecs(&self) -> &CodecRegistry {
        &self.codecs
    }

    /// Entries pruned by the last load, refresh or transaction.
    pub fn warnings(&self) -> &[ReconcileWarning] {
        &self.warnings
    }

    /// The root directory node.
    pub fn tree(&self) -> &DirectoryNode {
        &self.descriptor.tree
    }

    /// The tracked directory at `path`; the root for `""` or `"."`.
    pub fn get_directory(&self, path: impl AsRef<str>) -> Option<&DirectoryNode> {
        let path = RelPath::resolve(path).ok()?;
        self.tree().descend(&path)
    }

    /// The tracked directory containing `path`.
    pub fn get_parent_directory(&self, path: impl AsRef<str>) -> Option<&DirectoryNode> {
        let path = RelPath::resolve(path).ok()?;
        self.tree().descend(&path.parent()?)
    }

    pub fn get_file(&self, path: impl AsRef<str>) -> Option<&FileEntry> {
        let path = RelPath::resolve(path).ok()?;
        self.tree().file_at(&path)
    }

    pub fn is_repository_directory(&self, path: impl AsRef<str>) -> bool {
        self.get_directory(path).is_some()
    }

    pub fn is_repository_file(&self, path: impl AsRef<str>) -> bool {
        self.get_file(path).is_some()
    }

    fn walk(&self, path: impl AsRef<str>, recursive: bool) -> Walk<'_> {
        self.get_directory(path)
            .map(|dir| dir.walk(recursive))
            .unwrap_or_else(Walk::empty)
    }

    /// Paths of tracked files below `path`, relative to `path`.
    ///
    /// Files come before subdirectories at every level, each sorted by
    /// name. A missing start directory yields nothing.
    pub fn walk_files(
        &self,
        path: impl AsRef<str>,
        recursive: bool,
    ) -> impl Iterator<Item = RelPath> + '_ {
        self.walk_files_info(path, recursive).map(|(path, _)| path)
    }

    pub fn walk_files_info(
        &self,
        path: impl AsRef<str>,
        recursive: bool,
    ) -> impl Iterator<Item = (RelPath, &FileEntry)> + '_ {
        self.walk(path, recursive).files()
    }

    /// Paths of tracked directories below `path`, relative to `path`.
    pub fn walk_directories(
        &self,
        path: impl AsRef<str>,
        recursive: bool,
    ) -> impl Iterator<Item = RelPath> + '_ {
        self.walk_directories_info(path, recursive)
            .map(|(path, _)| path)
    }

    pub fn walk_directories_info(
        &self,
        path: impl AsRef<str>,
        recursive: bool,
    ) -> impl Iterator<Item = (RelPath, &DirectoryNode)> + '_ {
        self.walk(path, recursive).directories()
    }

    /// Find a tracked file by its id.
    pub fn find_file_by_id(&self, id: Uuid) -> Option<(RelPath, &FileEntry)> {
        self.walk_files_info("", true).find(|(_, file)| file.id == id)
    }

    /// Paths of every tracked file called `name`.
    pub fn find_files_by_name(&self, name: &str) -> Vec<RelPath> {
        self.walk_files_info("", true)
            .filter(|(_, file)| file.name == name)
            .map(|(path, _)| path)
            .collect()
    }

    /// One `dir:[file,file]` line per tracked directory, root first.
    pub fn list_representation(&self) -> Vec<String> {
        fn line(label: &str, dir: &DirectoryNode) -> String {
            let names: Vec<&str> = dir.files().map(|f| f.name.as_str()).collect();
            format!("{}:[{}]", label, names.join(","))
        }

        let mut out = vec![line(&self.root.display().to_string(), self.tree())];
        out.extend(
            self.walk_directories_info("", true)
                .map(|(path, dir)| line(path.as_str(), dir)),
        );
        out
    }
}

impl fmt::Display for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root.display())?;
        for file in self.tree().files() {
            write!(f, "\n  {}", file.name)?;
        }
        for (path, dir) in self.walk_directories_info("", true) {
            let indent = "  ".repeat(path.depth());
            write!(f, "\n{}/{}", indent, dir.name)?;
            for file in dir.files() {
                write!(f, "\n{}  {}", indent, file.name)?;
            }
        }
        Ok(())
    }
}

/// Remove the metadata of every tracked entry, and optionally payloads and
/// emptied directories.
fn untrack_all(
    root: &Path,
    tree: &DirectoryNode,
    remove_files: bool,
    remove_directories: bool,
) -> Result<()> {
    for (path, _) in tree.walk(true).files() {
        let paths = FilePaths::new(root, &path);
        if remove_files {
            paths.remove_all()?;
        } else {
            paths.remove_metadata()?;
        }
    }
    let directories: Vec<RelPath> = tree.walk(true).directories().map(|(p, _)| p).collect();
    // Children come after their parents in a walk
    for path in directories.iter().rev() {
        let native = path.to_native(root);
        sidecar::remove_directory_metadata(&native)?;
        if remove_directories {
            io::remove_dir_if_empty(&native)?;
        }
    }
    Ok(())
}

/// Wipe a repository before it is created again.
fn clear_repository(root: &Path) -> Result<()> {
    match Descriptor::read(root) {
        Ok((descriptor, _)) => untrack_all(root, &descriptor.tree, true, true)?,
        Err(e) => {
            tracing::warn!(root = %root.display(), error = %e, "replacing unreadable repository");
        }
    }
    remove_reserved_files(root, root)?;
    io::remove_file_if_exists(&Descriptor::path(root))?;
    Ok(())
}

/// Delete leftover sidecars below `dir`, whoever owns them.
fn remove_reserved_files(root: &Path, dir: &Path) -> Result<()> {
    let entries = fs::read_dir(dir).map_err(|e| dirrep_fs::Error::io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| dirrep_fs::Error::io(dir, e))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| dirrep_fs::Error::io(&path, e))?;
        if file_type.is_dir() {
            remove_reserved_files(root, &path)?;
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let held = dir == root && name == ReservedName::RepositoryLock.as_str();
        if !held && ReservedName::matches(&name).is_some() {
            io::remove_file_if_exists(&path)?;
        }
    }
    Ok(())
}
