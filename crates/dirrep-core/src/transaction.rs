//! Lock & transaction protocol
//!
//! Every mutation of a repository runs through [`Transaction::run`]:
//!
//! 1. Take the repository lock (`.dirrep.lock`), then the directory lock
//!    (`.dirrep_dir.lock`) of each target's parent and of every tracked
//!    directory in each affected subtree, deduplicated and in lexical
//!    order. A lock that cannot be taken in time aborts with
//!    [`Error::LockTimeout`] before anything is touched.
//! 2. Reload the descriptor from disk, remembering its checksum, and
//!    reconcile it against the filesystem.
//! 3. Let the operation edit the reloaded tree and write payloads and
//!    sidecars. Renames and creations are journaled; deletions are moved
//!    aside or deferred.
//! 4. Verify the touched paths, then replace the descriptor atomically if
//!    its checksum on disk is still the one reloaded. Deferred deletions
//!    run only after this commit.
//! 5. Release the locks in reverse order.
//!
//! An attempt that does not commit reverts its journal, so the disk is
//! back to what the reload saw. Steps 2 to 4 are retried with exponential
//! backoff when the reload or the commit fails or races another writer.
//! Errors raised by the operation itself are returned at once.

use backoff::ExponentialBackoffBuilder;
use backoff::backoff::Backoff;
use chrono::Utc;
use dirrep_fs::{LockService, LockToken, RelPath, ReservedName, io};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use uuid::Uuid;

use crate::codec::CodecRegistry;
use crate::config::RepositoryOptions;
use crate::descriptor::Descriptor;
use crate::ops::remove_native;
use crate::reconcile::{self, ReconcileWarning};
use crate::tree::DirectoryNode;
use crate::{Error, Result};

/// A held lock, released on drop.
#[derive(Debug)]
pub struct LockGuard<'a> {
    service: &'a dyn LockService,
    token: Option<LockToken>,
}

impl<'a> LockGuard<'a> {
    /// Take the lock `key` or fail with [`Error::LockTimeout`].
    pub fn acquire(service: &'a dyn LockService, key: &Path, timeout: Duration) -> Result<Self> {
        match service.acquire(key, timeout)? {
            Some(token) => {
                tracing::debug!(key = %key.display(), "lock acquired");
                Ok(Self {
                    service,
                    token: Some(token),
                })
            }
            None => Err(Error::LockTimeout {
                key: key.to_path_buf(),
                timeout,
            }),
        }
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            let key = token.key().to_path_buf();
            match self.service.release(token) {
                Ok(()) => tracing::debug!(key = %key.display(), "lock released"),
                Err(e) => tracing::warn!(key = %key.display(), error = %e, "failed to release lock"),
            }
        }
    }
}

/// Locks taken in order and released in reverse order.
#[derive(Debug, Default)]
pub struct LockSet<'a> {
    guards: Vec<LockGuard<'a>>,
}

impl<'a> LockSet<'a> {
    pub fn acquire(
        &mut self,
        service: &'a dyn LockService,
        key: &Path,
        timeout: Duration,
    ) -> Result<()> {
        self.guards.push(LockGuard::acquire(service, key, timeout)?);
        Ok(())
    }
}

impl Drop for LockSet<'_> {
    fn drop(&mut self) {
        while let Some(guard) = self.guards.pop() {
            drop(guard);
        }
    }
}

/// Key of the lock guarding the descriptor.
pub fn repository_lock_key(root: &Path) -> PathBuf {
    root.join(ReservedName::RepositoryLock)
}

/// Key of the lock guarding the directory that contains `target`.
///
/// Directories that do not exist yet are guarded by their nearest existing
/// ancestor, so this must be evaluated under the repository lock.
pub fn directory_lock_key(root: &Path, target: &RelPath) -> PathBuf {
    let mut dir = target.parent().unwrap_or_default();
    loop {
        let native = dir.to_native(root);
        if native.is_dir() {
            return native.join(ReservedName::DirectoryLock);
        }
        match dir.parent() {
            Some(parent) => dir = parent,
            None => return root.join(ReservedName::DirectoryLock),
        }
    }
}

/// Keys of every tracked directory at or below `path`, as far as it exists
/// on disk.
fn collect_subtree_keys(
    root: &Path,
    path: &RelPath,
    dir: &DirectoryNode,
    keys: &mut BTreeSet<PathBuf>,
) {
    let native = path.to_native(root);
    if !native.is_dir() {
        return;
    }
    keys.insert(native.join(ReservedName::DirectoryLock));
    for sub in dir.directories() {
        collect_subtree_keys(root, &path.join(&sub.name), sub, keys);
    }
}

#[derive(Debug)]
enum Undo {
    /// Put `to` back at `from`
    Rename { from: PathBuf, to: PathBuf },
    /// Delete something the attempt created
    Remove(PathBuf),
}

#[derive(Debug)]
enum Deferred {
    Remove(PathBuf),
    RemoveDirIfEmpty(PathBuf),
}

/// Disk effects of one attempt that depend on whether it commits.
#[derive(Debug, Default)]
struct Journal {
    /// Reverted last first when the attempt does not commit
    undo: Vec<Undo>,
    /// Applied in order once the descriptor is committed
    deferred: Vec<Deferred>,
}

impl Journal {
    fn revert(self) {
        for step in self.undo.into_iter().rev() {
            let result = match &step {
                Undo::Rename { from, to } => fs::rename(to, from)
                    .map_err(|e| Error::from(dirrep_fs::Error::io(to, e))),
                Undo::Remove(path) => remove_native(path),
            };
            if let Err(e) = result {
                tracing::warn!(?step, error = %e, "failed to revert attempt");
            }
        }
    }

    fn apply(self) {
        for step in self.deferred {
            let result = match &step {
                Deferred::Remove(path) => remove_native(path),
                Deferred::RemoveDirIfEmpty(path) => {
                    io::remove_dir_if_empty(path).map(drop).map_err(Error::from)
                }
            };
            if let Err(e) = result {
                tracing::warn!(?step, error = %e, "failed to clean up after commit");
            }
        }
    }
}

/// Mutable view handed to an operation inside a transaction.
#[derive(Debug)]
pub struct Tx<'a> {
    root: &'a Path,
    codecs: &'a CodecRegistry,
    descriptor: Descriptor,
    touched: BTreeSet<RelPath>,
    journal: Journal,
}

impl<'a> Tx<'a> {
    pub fn root(&self) -> &'a Path {
        self.root
    }

    pub fn codecs(&self) -> &'a CodecRegistry {
        self.codecs
    }

    pub fn owner_id(&self) -> Uuid {
        self.descriptor.unique_id
    }

    pub fn tree(&self) -> &DirectoryNode {
        &self.descriptor.tree
    }

    pub(crate) fn tree_mut(&mut self) -> &mut DirectoryNode {
        &mut self.descriptor.tree
    }

    pub fn native(&self, path: &RelPath) -> PathBuf {
        path.to_native(self.root)
    }

    /// Record that `path` must exist on disk when the transaction commits.
    pub(crate) fn touch(&mut self, path: &RelPath) {
        self.touched.insert(path.clone());
    }

    /// Note that `path` is about to be written. If nothing is there yet, it
    /// is deleted again when the attempt does not commit.
    pub(crate) fn creating(&mut self, path: &Path) {
        if fs::symlink_metadata(path).is_err() {
            self.journal.undo.push(Undo::Remove(path.to_path_buf()));
        }
    }

    /// Rename `from` to `to`, undone when the attempt does not commit.
    pub(crate) fn rename(&mut self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(from, to).map_err(|e| dirrep_fs::Error::io(from, e))?;
        self.journal.undo.push(Undo::Rename {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
        });
        Ok(())
    }

    /// Clear `path` now and delete it once the descriptor is committed.
    ///
    /// The content is moved to a temporary sibling until then.
    pub(crate) fn discard(&mut self, path: &Path) -> Result<()> {
        if fs::symlink_metadata(path).is_err() {
            return Ok(());
        }
        let aside = io::temp_path_for(path);
        self.rename(path, &aside)?;
        self.journal.deferred.push(Deferred::Remove(aside));
        Ok(())
    }

    /// Delete `path` once the descriptor is committed.
    pub(crate) fn remove_after_commit(&mut self, path: PathBuf) {
        self.journal.deferred.push(Deferred::Remove(path));
    }

    /// Delete the directory `path` once the descriptor is committed, if it
    /// is empty by then.
    pub(crate) fn remove_dir_after_commit(&mut self, path: PathBuf) {
        self.journal.deferred.push(Deferred::RemoveDirIfEmpty(path));
    }
}

/// Result of a committed (or no-op) transaction.
#[derive(Debug)]
pub struct Committed<T> {
    pub value: T,
    pub descriptor: Descriptor,
    pub warnings: Vec<ReconcileWarning>,
}

enum AttemptError {
    /// Reload or commit failed; worth another attempt
    Retry(Error),
    /// The operation itself refused; give up now
    Fatal(Error),
}

impl AttemptError {
    fn from_reload(err: Error) -> Self {
        match err {
            Error::NotARepository { .. } | Error::IncompatibleVersion { .. } => Self::Fatal(err),
            other => Self::Retry(other),
        }
    }
}

/// One repository handle's view of the protocol.
#[derive(Debug)]
pub struct Transaction<'a> {
    pub root: &'a Path,
    pub locks: &'a dyn LockService,
    pub options: &'a RepositoryOptions,
    pub codecs: &'a CodecRegistry,
}

impl<'a> Transaction<'a> {
    /// Run `op` under the repository lock and the parent locks of `targets`.
    pub fn run<T, F>(&self, targets: &[RelPath], op: F) -> Result<Committed<T>>
    where
        F: FnMut(&mut Tx<'_>) -> Result<T>,
    {
        self.run_scoped(targets, &[], op)
    }

    /// Like [`run`](Self::run), also locking every tracked directory at or
    /// below each of `subtrees`.
    pub fn run_scoped<T, F>(
        &self,
        targets: &[RelPath],
        subtrees: &[RelPath],
        mut op: F,
    ) -> Result<Committed<T>>
    where
        F: FnMut(&mut Tx<'_>) -> Result<T>,
    {
        let mut locks = LockSet::default();
        locks.acquire(
            self.locks,
            &repository_lock_key(self.root),
            self.options.lock_timeout,
        )?;
        for key in &self.lock_keys(targets, subtrees) {
            locks.acquire(self.locks, key, self.options.lock_timeout)?;
        }

        let trials = self.options.n_trials.max(1);
        let mut delays = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.options.retry_initial_interval)
            .with_max_interval(self.options.retry_max_interval)
            .with_max_elapsed_time(None)
            .build();

        let mut attempt = 1;
        loop {
            let err = match self.attempt(&mut op) {
                Ok(committed) => return Ok(committed),
                Err(AttemptError::Fatal(err)) => return Err(err),
                Err(AttemptError::Retry(err)) => err,
            };
            if attempt >= trials {
                tracing::warn!(trials, error = %err, "transaction retry budget exhausted");
                return Err(Error::ConcurrentModification {
                    trials,
                    source: Box::new(err),
                });
            }
            let delay = delays
                .next_backoff()
                .unwrap_or(self.options.retry_max_interval);
            tracing::warn!(attempt, trials, ?delay, error = %err, "transaction attempt failed, retrying");
            thread::sleep(delay);
            attempt += 1;
        }
    }

    /// Directory lock keys for `targets` and `subtrees`, in lexical order.
    ///
    /// Subtrees are looked up in the descriptor on disk, so this must run
    /// under the repository lock.
    fn lock_keys(&self, targets: &[RelPath], subtrees: &[RelPath]) -> BTreeSet<PathBuf> {
        let mut keys: BTreeSet<PathBuf> = targets
            .iter()
            .map(|target| directory_lock_key(self.root, target))
            .collect();
        if subtrees.is_empty() {
            return keys;
        }
        match Descriptor::read(self.root) {
            Ok((descriptor, _)) => {
                for path in subtrees {
                    if let Some(dir) = descriptor.tree.descend(path) {
                        collect_subtree_keys(self.root, path, dir, &mut keys);
                    }
                }
            }
            // The reload reports it
            Err(e) => tracing::debug!(error = %e, "cannot read descriptor for subtree locks"),
        }
        keys
    }

    fn attempt<T, F>(&self, op: &mut F) -> std::result::Result<Committed<T>, AttemptError>
    where
        F: FnMut(&mut Tx<'_>) -> Result<T>,
    {
        let (mut descriptor, checksum) =
            Descriptor::read(self.root).map_err(AttemptError::from_reload)?;
        let mut warnings =
            reconcile::reconcile(self.root, descriptor.unique_id, &mut descriptor.tree);
        let reloaded = descriptor.clone();

        let mut tx = Tx {
            root: self.root,
            codecs: self.codecs,
            descriptor,
            touched: BTreeSet::new(),
            journal: Journal::default(),
        };
        let value = match op(&mut tx) {
            Ok(value) => value,
            Err(err) => {
                tx.journal.revert();
                return Err(AttemptError::Fatal(err));
            }
        };
        let Tx {
            mut descriptor,
            touched,
            journal,
            ..
        } = tx;

        warnings.extend(reconcile::verify_paths(
            self.root,
            descriptor.unique_id,
            &mut descriptor.tree,
            &touched,
        ));

        if descriptor == reloaded && warnings.is_empty() {
            journal.apply();
            return Ok(Committed {
                value,
                descriptor,
                warnings,
            });
        }

        if let Err(err) = self.commit(&mut descriptor, checksum) {
            journal.revert();
            return Err(AttemptError::Retry(err));
        }
        journal.apply();

        Ok(Committed {
            value,
            descriptor,
            warnings,
        })
    }

    /// Write `descriptor` as the next revision if the one on disk still has
    /// `checksum`.
    fn commit(&self, descriptor: &mut Descriptor, checksum: String) -> Result<()> {
        let on_disk = Descriptor::checksum_on_disk(self.root)?;
        if on_disk.as_deref() != Some(checksum.as_str()) {
            return Err(Error::DescriptorChanged {
                expected: checksum,
                found: on_disk.unwrap_or_else(|| "nothing".to_string()),
            });
        }

        descriptor.revision += 1;
        descriptor.updated_at = Utc::now();
        descriptor.write(self.root)?;
        tracing::debug!(root = %self.root.display(), revision = descriptor.revision, "descriptor committed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dirrep_fs::MemoryLockService;
    use pretty_assertions::assert_eq;
    use serde_json::Value;
    use std::cell::Cell;
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, RepositoryOptions, CodecRegistry) {
        let dir = tempdir().unwrap();
        Descriptor::new(Value::Null).write(dir.path()).unwrap();
        let options = RepositoryOptions::default()
            .with_lock_timeout(Duration::from_millis(50))
            .with_retry_intervals(Duration::from_millis(1), Duration::from_millis(2));
        (dir, options, CodecRegistry::new())
    }

    #[test]
    fn lock_keys_fall_back_to_existing_ancestor() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("a")).unwrap();

        let key = directory_lock_key(dir.path(), &RelPath::resolve("a/b/c").unwrap());
        assert_eq!(key, dir.path().join("a").join(".dirrep_dir.lock"));

        let key = directory_lock_key(dir.path(), &RelPath::resolve("x").unwrap());
        assert_eq!(key, dir.path().join(".dirrep_dir.lock"));
    }

    #[test]
    fn noop_operation_does_not_commit() {
        let (dir, options, codecs) = setup();
        let locks = MemoryLockService::new();
        let tx = Transaction {
            root: dir.path(),
            locks: &locks,
            options: &options,
            codecs: &codecs,
        };

        let committed = tx.run(&[], |_| Ok(())).unwrap();
        assert_eq!(committed.descriptor.revision, 0);
        assert!(!locks.is_held(&repository_lock_key(dir.path())));
    }

    #[test]
    fn edits_are_committed_with_next_revision() {
        let (dir, options, codecs) = setup();
        let locks = MemoryLockService::new();
        let tx = Transaction {
            root: dir.path(),
            locks: &locks,
            options: &options,
            codecs: &codecs,
        };

        tx.run(&[], |tx| {
            tx.tree_mut().description = Value::String("changed".into());
            Ok(())
        })
        .unwrap();

        let (on_disk, _) = Descriptor::read(dir.path()).unwrap();
        assert_eq!(on_disk.revision, 1);
        assert_eq!(on_disk.tree.description, Value::String("changed".into()));
    }

    #[test]
    fn held_repository_lock_times_out_without_running_op() {
        let (dir, options, codecs) = setup();
        let locks = MemoryLockService::new();
        let _held = locks
            .acquire(&repository_lock_key(dir.path()), Duration::ZERO)
            .unwrap()
            .unwrap();
        let tx = Transaction {
            root: dir.path(),
            locks: &locks,
            options: &options,
            codecs: &codecs,
        };
        let ran = Cell::new(false);

        let err = tx
            .run(&[], |_| {
                ran.set(true);
                Ok(())
            })
            .unwrap_err();

        assert!(matches!(err, Error::LockTimeout { .. }));
        assert!(!ran.get());
    }

    #[test]
    fn racing_writer_exhausts_retries() {
        let (dir, options, codecs) = setup();
        let locks = MemoryLockService::new();
        let tx = Transaction {
            root: dir.path(),
            locks: &locks,
            options: &options,
            codecs: &codecs,
        };
        let attempts = Cell::new(0);

        let err = tx
            .run(&[], |tx| {
                attempts.set(attempts.get() + 1);
                // Another writer commits behind our back on every attempt
                let mut other = Descriptor::read(tx.root()).unwrap().0;
                other.revision += 1;
                other.write(tx.root()).unwrap();
                tx.tree_mut().description = Value::from(attempts.get());
                Ok(())
            })
            .unwrap_err();

        assert!(matches!(
            err,
            Error::ConcurrentModification { trials: 3, ref source }
                if matches!(**source, Error::DescriptorChanged { .. })
        ));
        assert_eq!(attempts.get(), 3);
    }

    #[test]
    fn losing_attempt_is_undone_before_retry() {
        let (dir, options, codecs) = setup();
        let locks = MemoryLockService::new();
        let tx = Transaction {
            root: dir.path(),
            locks: &locks,
            options: &options,
            codecs: &codecs,
        };
        let moved = dir.path().join("moved");
        let dropped = dir.path().join("dropped");
        let created = dir.path().join("created");
        std::fs::write(&moved, "m").unwrap();
        std::fs::write(&dropped, "d").unwrap();
        let attempts = Cell::new(0);

        tx.run(&[], |tx| {
            attempts.set(attempts.get() + 1);
            // Every attempt starts from the disk state the reload saw
            assert!(moved.is_file());
            assert!(dropped.is_file());
            assert!(!created.exists());

            tx.rename(&moved, &dir.path().join("renamed"))?;
            tx.remove_after_commit(dropped.clone());
            tx.creating(&created);
            std::fs::write(&created, "c").unwrap();
            if attempts.get() == 1 {
                let mut other = Descriptor::read(tx.root()).unwrap().0;
                other.revision += 100;
                other.write(tx.root()).unwrap();
            }
            tx.tree_mut().description = Value::from("done");
            Ok(())
        })
        .unwrap();

        assert_eq!(attempts.get(), 2);
        assert!(!moved.exists());
        assert!(dir.path().join("renamed").is_file());
        assert!(!dropped.exists());
        assert!(created.is_file());
        assert_eq!(Descriptor::read(dir.path()).unwrap().0.revision, 101);
    }

    #[test]
    fn failed_operation_removes_what_it_created() {
        let (dir, options, codecs) = setup();
        let locks = MemoryLockService::new();
        let tx = Transaction {
            root: dir.path(),
            locks: &locks,
            options: &options,
            codecs: &codecs,
        };
        let existing = dir.path().join("existing");
        std::fs::write(&existing, "keep").unwrap();
        let fresh = dir.path().join("fresh");

        let err = tx
            .run(&[], |tx| -> Result<()> {
                tx.creating(&existing);
                std::fs::write(&existing, "overwritten").unwrap();
                tx.creating(&fresh);
                std::fs::create_dir(&fresh).unwrap();
                std::fs::write(fresh.join("inner"), "x").unwrap();
                tx.discard(&existing)?;
                Err(Error::invariant("nope"))
            })
            .unwrap_err();

        assert!(matches!(err, Error::TreeInvariantViolation { .. }));
        assert!(!fresh.exists());
        assert_eq!(std::fs::read_to_string(&existing).unwrap(), "overwritten");
    }

    #[test]
    fn subtree_locks_cover_tracked_directories() {
        let (dir, options, codecs) = setup();
        let (mut descriptor, _) = Descriptor::read(dir.path()).unwrap();
        let mut a = DirectoryNode::new("a", Value::Null);
        a.insert(crate::tree::Node::Directory(DirectoryNode::new("b", Value::Null)))
            .unwrap();
        descriptor
            .tree
            .insert(crate::tree::Node::Directory(a))
            .unwrap();
        descriptor.write(dir.path()).unwrap();
        std::fs::create_dir_all(dir.path().join("a").join("b")).unwrap();
        let locks = MemoryLockService::new();
        let tx = Transaction {
            root: dir.path(),
            locks: &locks,
            options: &options,
            codecs: &codecs,
        };

        let keys = tx.lock_keys(
            &[RelPath::resolve("a").unwrap()],
            &[RelPath::resolve("a").unwrap()],
        );

        let expected: BTreeSet<PathBuf> = [
            dir.path().join(".dirrep_dir.lock"),
            dir.path().join("a").join(".dirrep_dir.lock"),
            dir.path().join("a").join("b").join(".dirrep_dir.lock"),
        ]
        .into_iter()
        .collect();
        assert_eq!(keys, expected);
    }

    #[test]
    fn operation_errors_are_not_retried() {
        let (dir, options, codecs) = setup();
        let locks = MemoryLockService::new();
        let tx = Transaction {
            root: dir.path(),
            locks: &locks,
            options: &options,
            codecs: &codecs,
        };
        let attempts = Cell::new(0);

        let err = tx
            .run(&[], |_| -> Result<()> {
                attempts.set(attempts.get() + 1);
                Err(Error::invariant("nope"))
            })
            .unwrap_err();

        assert!(matches!(err, Error::TreeInvariantViolation { .. }));
        assert_eq!(attempts.get(), 1);
    }
}
