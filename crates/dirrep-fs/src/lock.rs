//! Advisory lock service
//!
//! Repositories coordinate writers through named, timeout-bounded locks
//! keyed by the path of a lock marker file. The [`LockService`] trait is the
//! only thing the transaction protocol relies on, so the implementation can
//! be swapped:
//!
//! - [`FileLockService`] takes OS-level exclusive locks (`fs2`) on the marker
//!   file and therefore excludes other processes as well as other handles in
//!   the same process.
//! - [`MemoryLockService`] keeps the lock table in memory; handles must share
//!   one instance to exclude each other.
//!
//! # Invariants
//!
//! - `acquire` never blocks longer than its timeout.
//! - A token is released at most once; releasing an unknown token is an error.

use crate::{Error, Result};
use fs2::FileExt;
use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Default timeout for lock acquisition (10 seconds).
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Polling interval when waiting for a file lock.
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(10);

static NEXT_TOKEN_ID: AtomicU64 = AtomicU64::new(1);

/// Proof of a held lock, handed back to [`LockService::release`].
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct LockToken {
    key: PathBuf,
    id: u64,
}

impl LockToken {
    fn new(key: &Path) -> Self {
        Self {
            key: key.to_path_buf(),
            id: NEXT_TOKEN_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// The lock key this token was issued for.
    pub fn key(&self) -> &Path {
        &self.key
    }

    /// Process-unique token id.
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// A cross-handle mutual-exclusion primitive keyed by path.
pub trait LockService: Send + Sync + std::fmt::Debug {
    /// Try to take the lock named `key`, waiting at most `timeout`.
    ///
    /// Returns `Ok(None)` when the timeout expires while another holder keeps
    /// the lock, and `Err` for failures unrelated to contention.
    fn acquire(&self, key: &Path, timeout: Duration) -> Result<Option<LockToken>>;

    /// Release a lock previously returned by [`acquire`](Self::acquire).
    fn release(&self, token: LockToken) -> Result<()>;
}

/// Lock service backed by exclusive OS file locks.
///
/// The marker file is created on first use and never deleted, since
/// removing a lock file another process has open would split the lock.
#[derive(Debug, Default)]
pub struct FileLockService {
    held: Mutex<HashMap<u64, File>>,
}

impl FileLockService {
    pub fn new() -> Self {
        Self::default()
    }

    fn open_marker(key: &Path) -> Result<File> {
        if let Some(parent) = key.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(key)
            .map_err(|e| Error::io(key, e))
    }
}

impl LockService for FileLockService {
    fn acquire(&self, key: &Path, timeout: Duration) -> Result<Option<LockToken>> {
        let file = Self::open_marker(key)?;
        let deadline = Instant::now() + timeout;
        let contended = fs2::lock_contended_error().kind();

        // Retry loop with polling
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => break,
                Err(e) if e.kind() == contended => {
                    if Instant::now() >= deadline {
                        tracing::debug!(key = %key.display(), ?timeout, "lock acquisition timed out");
                        return Ok(None);
                    }
                    thread::sleep(LOCK_POLL_INTERVAL);
                }
                Err(_) => return Err(Error::LockFailed { path: key.to_path_buf() }),
            }
        }

        let token = LockToken::new(key);
        self.held
            .lock()
            .map_err(|_| Error::LockFailed { path: key.to_path_buf() })?
            .insert(token.id, file);
        tracing::trace!(key = %key.display(), id = token.id, "lock acquired");
        Ok(Some(token))
    }

    fn release(&self, token: LockToken) -> Result<()> {
        let file = self
            .held
            .lock()
            .map_err(|_| Error::LockFailed { path: token.key.clone() })?
            .remove(&token.id)
            .ok_or_else(|| Error::LockFailed { path: token.key.clone() })?;
        file.unlock()
            .map_err(|e| Error::io(&token.key, e))?;
        tracing::trace!(key = %token.key.display(), id = token.id, "lock released");
        Ok(())
    }
}

/// In-process lock table.
///
/// Share one instance (behind an `Arc`) between every handle that must be
/// mutually exclusive.
#[derive(Debug, Default)]
pub struct MemoryLockService {
    held: Mutex<HashSet<PathBuf>>,
    released: Condvar,
}

impl MemoryLockService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `key` is currently held by anyone.
    pub fn is_held(&self, key: &Path) -> bool {
        self.held
            .lock()
            .map(|held| held.contains(key))
            .unwrap_or(false)
    }
}

impl LockService for MemoryLockService {
    fn acquire(&self, key: &Path, timeout: Duration) -> Result<Option<LockToken>> {
        let deadline = Instant::now() + timeout;
        let poisoned = || Error::LockFailed { path: key.to_path_buf() };
        let mut held = self.held.lock().map_err(|_| poisoned())?;
        while held.contains(key) {
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let (guard, _) = self
                .released
                .wait_timeout(held, deadline - now)
                .map_err(|_| poisoned())?;
            held = guard;
        }
        held.insert(key.to_path_buf());
        Ok(Some(LockToken::new(key)))
    }

    fn release(&self, token: LockToken) -> Result<()> {
        let mut held = self
            .held
            .lock()
            .map_err(|_| Error::LockFailed { path: token.key.clone() })?;
        if !held.remove(&token.key) {
            return Err(Error::LockFailed { path: token.key });
        }
        self.released.notify_all();
        Ok(())
    }
}
