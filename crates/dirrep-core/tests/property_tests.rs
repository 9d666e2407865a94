//! Property-based tests for tree invariants under random operation sequences

use dirrep_core::{DirectoryNode, DumpOptions, Node, Repository};
use dirrep_test_utils::TestRepo;
use proptest::prelude::*;
use serde_json::json;
use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, Clone)]
enum Op {
    AddDirectory(String),
    Dump(String),
    RemoveFile(String),
    RemoveDirectory(String),
    MoveFile(String, String),
}

fn path_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec(prop::sample::select(vec!["a", "b", "c"]), 1..=3)
        .prop_map(|segments| segments.join("/"))
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        path_strategy().prop_map(Op::AddDirectory),
        path_strategy().prop_map(Op::Dump),
        path_strategy().prop_map(Op::RemoveFile),
        path_strategy().prop_map(Op::RemoveDirectory),
        (path_strategy(), path_strategy()).prop_map(|(from, to)| Op::MoveFile(from, to)),
    ]
}

fn apply(repo: &mut Repository, op: &Op) {
    // Individual operations may legitimately fail, e.g. on collisions
    let _ = match op {
        Op::AddDirectory(path) => repo.add_directory(path, None, false),
        Op::Dump(path) => repo.dump_file(&json!(path), path, DumpOptions::new().replace(true)),
        Op::RemoveFile(path) => repo.remove_file(path, true),
        Op::RemoveDirectory(path) => repo.remove_directory(path, true),
        Op::MoveFile(from, to) => repo.move_file(from, to, false),
    };
}

fn check_invariants(dir: &DirectoryNode, native: &Path) {
    let mut seen = HashSet::new();
    let mut directories_started = false;
    let mut previous: Option<(bool, &str)> = None;
    for child in dir.children() {
        assert!(seen.insert(child.name()), "duplicate sibling {}", child.name());
        let is_dir = !child.is_file();
        assert!(!(directories_started && !is_dir), "file after directory");
        directories_started |= is_dir;
        if let Some((prev_dir, prev_name)) = previous {
            if prev_dir == is_dir {
                assert!(prev_name < child.name(), "siblings out of order");
            }
        }
        previous = Some((is_dir, child.name()));

        let child_native = native.join(child.name());
        match child {
            Node::File(_) => assert!(child_native.is_file()),
            Node::Directory(sub) => {
                assert!(child_native.join(".dirrep_dir").is_file());
                check_invariants(sub, &child_native);
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_tree_invariants_hold(ops in prop::collection::vec(op_strategy(), 1..12)) {
        let fixture = TestRepo::new();
        let mut repo = fixture.create();

        for op in &ops {
            apply(&mut repo, op);
        }

        check_invariants(repo.tree(), repo.root());
        let reopened = fixture.open();
        prop_assert!(reopened.warnings().is_empty());
        prop_assert_eq!(reopened.tree(), repo.tree());
    }

    #[test]
    fn prop_tracked_files_pull_back(paths in prop::collection::vec(path_strategy(), 1..6)) {
        let fixture = TestRepo::new();
        let mut repo = fixture.create();

        for path in &paths {
            let _ = repo.dump_file(&json!(path), path, DumpOptions::new().replace(true));
        }

        for path in repo.walk_files("", true).collect::<Vec<_>>() {
            prop_assert_eq!(repo.pull_file(path.as_str(), None).unwrap(), json!(path.as_str()));
        }
    }
}
