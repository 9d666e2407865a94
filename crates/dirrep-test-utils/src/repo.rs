//! [`TestRepo`] fixture for repository scenarios.

use dirrep_core::{LockService, Repository, RepositoryOptions};
use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Options with short lock timeouts and retry delays.
pub fn fast_options() -> RepositoryOptions {
    RepositoryOptions::default()
        .with_lock_timeout(Duration::from_secs(5))
        .with_retry_intervals(Duration::from_millis(1), Duration::from_millis(10))
}

/// A temporary directory that holds a repository in its `repo` subdirectory.
///
/// The subdirectory keeps the archive and system-file helpers outside the
/// repository itself.
///
/// # Example
///
/// ```rust,no_run
/// use dirrep_test_utils::TestRepo;
///
/// let fixture = TestRepo::new();
/// let mut repo = fixture.create();
/// repo.add_directory("a/b", None, false).unwrap();
/// fixture.assert_file_exists("a/b/.dirrep_dir");
/// ```
pub struct TestRepo {
    temp_dir: TempDir,
}

impl Default for TestRepo {
    fn default() -> Self {
        Self::new()
    }
}

impl TestRepo {
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().unwrap(),
        }
    }

    /// The repository root (which may not be a repository yet).
    pub fn root(&self) -> PathBuf {
        self.temp_dir.path().join("repo")
    }

    /// A scratch directory next to the repository root.
    pub fn scratch(&self) -> PathBuf {
        let dir = self.temp_dir.path().join("scratch");
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// Create a fresh repository at [`root`](Self::root).
    pub fn create(&self) -> Repository {
        Repository::create(self.root(), Value::Null, fast_options(), false)
            .unwrap_or_else(|e| panic!("TestRepo::create: {e}"))
    }

    /// Create a fresh repository using `locks`.
    pub fn create_with(&self, locks: Arc<dyn LockService>) -> Repository {
        Repository::create_with(self.root(), Value::Null, fast_options(), false, locks)
            .unwrap_or_else(|e| panic!("TestRepo::create_with: {e}"))
    }

    /// Open another handle on the repository.
    pub fn open(&self) -> Repository {
        Repository::load(self.root(), fast_options())
            .unwrap_or_else(|e| panic!("TestRepo::open: {e}"))
    }

    /// Open another handle on the repository using `locks`.
    pub fn open_with(&self, locks: Arc<dyn LockService>) -> Repository {
        Repository::load_with(self.root(), fast_options(), locks)
            .unwrap_or_else(|e| panic!("TestRepo::open_with: {e}"))
    }

    /// Native path of `path` below the root.
    pub fn path(&self, path: &str) -> PathBuf {
        self.root().join(path)
    }

    /// Write a file the repository does not know about.
    pub fn write_untracked(&self, path: &str, content: &str) -> PathBuf {
        let full_path = self.path(path);
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&full_path, content).unwrap();
        full_path
    }

    /// Raw bytes of the descriptor file.
    pub fn descriptor_bytes(&self) -> Vec<u8> {
        fs::read(self.path(".dirrep")).unwrap()
    }

    pub fn assert_file_exists(&self, path: &str) {
        let full_path = self.path(path);
        assert!(
            full_path.exists(),
            "Expected file to exist: {}",
            full_path.display()
        );
    }

    pub fn assert_file_not_exists(&self, path: &str) {
        let full_path = self.path(path);
        assert!(
            !full_path.exists(),
            "Expected file NOT to exist: {}",
            full_path.display()
        );
    }

    /// Assert that the file at `path` (relative to root) contains `content`.
    pub fn assert_file_contains(&self, path: &str, content: &str) {
        let full_path = self.path(path);
        let file_content = fs::read_to_string(&full_path)
            .unwrap_or_else(|_| panic!("Could not read file: {}", full_path.display()));
        assert!(
            file_content.contains(content),
            "File {} does not contain expected content.\nExpected: {}\nActual: {}",
            full_path.display(),
            content,
            file_content
        );
    }
}

