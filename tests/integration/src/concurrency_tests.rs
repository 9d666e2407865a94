//! Concurrent mutation from independent repository handles
//!
//! Every handle in these tests is opened separately, as another process
//! would, and only shares the repository root (and, for the in-memory lock
//! service, the lock table).

use dirrep_core::{DumpOptions, LockService, MemoryLockService, Repository};
use dirrep_fs::FileLockService;
use dirrep_test_utils::{TestRepo, init_tracing};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::{Arc, Barrier};
use std::thread;

/// Run one worker per entry of `jobs`, each on its own handle, all released
/// at the same time.
fn run_concurrently<F, S>(fixture: &TestRepo, jobs: Vec<S>, make_locks: F, work: fn(&mut Repository, S))
where
    F: Fn() -> Arc<dyn LockService>,
    S: Send + 'static,
{
    let barrier = Arc::new(Barrier::new(jobs.len()));
    let handles: Vec<_> = jobs
        .into_iter()
        .map(|job| {
            let mut repo = fixture.open_with(make_locks());
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                work(&mut repo, job);
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("worker panicked");
    }
}

fn add_directory(repo: &mut Repository, path: String) {
    repo.add_directory(&path, None, false)
        .unwrap_or_else(|e| panic!("add_directory({path}): {e}"));
}

fn dump_many(repo: &mut Repository, (dir, count): (String, usize)) {
    for i in 0..count {
        let path = format!("{dir}/f{i}");
        repo.dump_file(&json!(path), &path, DumpOptions::default())
            .unwrap_or_else(|e| panic!("dump_file({path}): {e}"));
    }
}

#[test]
fn test_concurrent_add_with_file_locks() {
    init_tracing();
    let fixture = TestRepo::new();
    fixture.create();

    run_concurrently(
        &fixture,
        vec!["a/b".to_string(), "a/c".to_string()],
        || -> Arc<dyn LockService> { Arc::new(FileLockService::new()) },
        add_directory,
    );

    let repo = fixture.open();
    assert!(repo.is_repository_directory("a/b"));
    assert!(repo.is_repository_directory("a/c"));
    assert!(repo.warnings().is_empty());
}

#[test]
fn test_concurrent_add_with_shared_memory_locks() {
    init_tracing();
    let fixture = TestRepo::new();
    let locks: Arc<MemoryLockService> = Arc::new(MemoryLockService::new());
    fixture.create_with(locks.clone());

    run_concurrently(
        &fixture,
        vec!["a/b".to_string(), "a/c".to_string()],
        || -> Arc<dyn LockService> { locks.clone() },
        add_directory,
    );

    let repo = fixture.open();
    assert!(repo.is_repository_directory("a/b"));
    assert!(repo.is_repository_directory("a/c"));
}

#[test]
fn test_many_writers_lose_no_commit() {
    init_tracing();
    let fixture = TestRepo::new();
    let start_revision = fixture.create().revision();
    let writers = 4;
    let per_writer = 5;

    run_concurrently(
        &fixture,
        (0..writers)
            .map(|w| (format!("shared/w{w}"), per_writer))
            .collect(),
        || -> Arc<dyn LockService> { Arc::new(FileLockService::new()) },
        dump_many,
    );

    let repo = fixture.open();
    assert_eq!(repo.walk_files("shared", true).count(), writers * per_writer);
    assert_eq!(
        repo.revision(),
        start_revision + (writers * per_writer) as u64
    );
    for (path, _) in repo.walk_files_info("", true) {
        assert_eq!(repo.pull_file(path.as_str(), None).unwrap(), json!(path.as_str()));
    }
}

#[test]
fn test_stale_handle_builds_on_latest_commit() {
    let fixture = TestRepo::new();
    let mut first = fixture.create();
    let mut second = fixture.open();

    second.add_directory("from_second", None, false).unwrap();
    first.add_directory("from_first", None, false).unwrap();

    assert!(first.is_repository_directory("from_second"));
    assert!(!second.is_repository_directory("from_first"));
    second.refresh().unwrap();
    assert!(second.is_repository_directory("from_first"));
    assert_eq!(first.revision(), second.revision());
}
