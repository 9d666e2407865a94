//! End-to-end repository lifecycle across handles

use dirrep_core::{DumpOptions, Error, Outcome, PackageFormat, Repository, RepositoryOptions};
use dirrep_test_utils::{TestRepo, fast_options};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::fs;

#[test]
fn test_full_lifecycle() {
    let fixture = TestRepo::new();
    let mut repo = Repository::open_or_create(fixture.root(), json!("experiment"), fast_options())
        .unwrap();

    repo.add_directory("runs/first", Some(json!({"seed": 7})), false)
        .unwrap();
    repo.dump_file(
        &json!({"energy": [1.5, 2.5]}),
        "runs/first/output",
        DumpOptions::default(),
    )
    .unwrap();
    repo.copy_directory("runs/first", "runs/second", false)
        .unwrap();
    repo.rename_file("runs/second/output", "result", false)
        .unwrap();

    let reopened = Repository::open_or_create(fixture.root(), Value::Null, fast_options())
        .unwrap();
    assert_eq!(reopened.unique_id(), repo.unique_id());
    assert_eq!(reopened.description(), &json!("experiment"));
    assert_eq!(
        reopened.get_directory("runs/second").unwrap().description,
        json!({"seed": 7})
    );
    assert_eq!(
        reopened.pull_file("runs/second/result", None).unwrap(),
        json!({"energy": [1.5, 2.5]})
    );

    let archive = reopened
        .create_package(fixture.scratch(), PackageFormat::TarGz)
        .unwrap();
    assert!(archive.is_file());

    reopened.remove_repository(true, true).unwrap();
    assert!(!fixture.root().exists());
    assert!(matches!(
        Repository::load(fixture.root(), fast_options()),
        Err(Error::NotARepository { .. })
    ));
}

#[test]
fn test_removed_repository_fails_stale_handle() {
    let fixture = TestRepo::new();
    let mut stale = fixture.create();
    fixture.open().remove_repository(false, false).unwrap();

    let (ok, message) = stale.add_directory("late", None, false).outcome();

    assert!(!ok);
    assert!(message.unwrap().contains("Not a repository"));
    assert!(!fixture.path("late").exists());
}

#[test]
fn test_options_loaded_from_yaml() {
    let fixture = TestRepo::new();
    let path = fixture.scratch().join("options.yaml");
    fs::write(&path, "n_trials: 7\nlock_timeout_ms: 250\n").unwrap();

    let options = RepositoryOptions::from_file(&path).unwrap();
    let repo = Repository::create(fixture.root(), Value::Null, options, false).unwrap();

    assert_eq!(repo.options().n_trials, 7);
    assert_eq!(repo.options().lock_timeout.as_millis(), 250);
    assert_eq!(
        repo.options().retry_max_interval,
        RepositoryOptions::default().retry_max_interval
    );
}
