//! Tests for directory operations

use dirrep_core::{DumpOptions, Error};
use dirrep_test_utils::TestRepo;
use serde_json::json;

mod add_directory_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_add_directory_creates_ancestors() {
        let fixture = TestRepo::new();
        let mut repo = fixture.create();

        repo.add_directory("a/b/c", Some(json!("leaf")), false)
            .unwrap();

        assert!(repo.is_repository_directory("a"));
        assert!(repo.is_repository_directory("a/b"));
        assert_eq!(repo.get_directory("a/b/c").unwrap().description, json!("leaf"));
        assert_eq!(repo.get_directory("a").unwrap().description, json!(null));
        fixture.assert_file_exists("a/.dirrep_dir");
        fixture.assert_file_exists("a/b/c/.dirrep_dir");
    }

    #[test]
    fn test_add_directory_is_idempotent() {
        let fixture = TestRepo::new();
        let mut repo = fixture.create();

        repo.add_directory("a/b", None, false).unwrap();
        let revision = repo.revision();
        let tree = repo.tree().clone();

        repo.add_directory("a/b", None, false).unwrap();

        assert_eq!(repo.revision(), revision);
        assert_eq!(repo.tree(), &tree);
    }

    #[test]
    fn test_add_directory_clean_removes_untracked_only() {
        let fixture = TestRepo::new();
        let mut repo = fixture.create();
        repo.dump_file(&json!(1), "a/kept", DumpOptions::default())
            .unwrap();
        fixture.write_untracked("a/junk.txt", "junk");
        fixture.write_untracked("a/nested/more.txt", "junk");

        repo.add_directory("a", None, true).unwrap();

        fixture.assert_file_not_exists("a/junk.txt");
        fixture.assert_file_not_exists("a/nested");
        fixture.assert_file_exists("a/kept");
        fixture.assert_file_exists("a/.kept.dirrep_file");
        fixture.assert_file_exists("a/.dirrep_dir");
    }

    #[test]
    fn test_add_directory_over_tracked_file_fails() {
        let fixture = TestRepo::new();
        let mut repo = fixture.create();
        repo.dump_file(&json!(1), "x", DumpOptions::default())
            .unwrap();

        let err = repo.add_directory("x/y", None, false).unwrap_err();
        assert!(matches!(err, Error::TreeInvariantViolation { .. }));
    }

    #[test]
    fn test_add_directory_rejects_reserved_names() {
        let fixture = TestRepo::new();
        let mut repo = fixture.create();

        let err = repo.add_directory("a/.dirrep_dir", None, false).unwrap_err();
        assert!(matches!(err, Error::NameNotAllowed { .. }));
        assert!(!repo.is_repository_directory("a"));
    }
}

mod remove_directory_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_remove_directory_keeps_payloads_without_clean() {
        let fixture = TestRepo::new();
        let mut repo = fixture.create();
        repo.dump_file(&json!("v"), "d/f", DumpOptions::default())
            .unwrap();
        repo.add_directory("d/empty", None, false).unwrap();

        repo.remove_directory("d", false).unwrap();

        assert!(!repo.is_repository_directory("d"));
        fixture.assert_file_exists("d/f");
        fixture.assert_file_not_exists("d/.f.dirrep_file");
        fixture.assert_file_not_exists("d/.dirrep_dir");
        fixture.assert_file_not_exists("d/empty");
    }

    #[test]
    fn test_remove_directory_clean_deletes_tree() {
        let fixture = TestRepo::new();
        let mut repo = fixture.create();
        repo.dump_file(&json!("v"), "d/e/f", DumpOptions::default())
            .unwrap();

        repo.remove_directory("d", true).unwrap();

        fixture.assert_file_not_exists("d");
        assert_eq!(repo.walk_directories("", true).count(), 0);
    }

    #[test]
    fn test_remove_root_is_rejected() {
        let fixture = TestRepo::new();
        let mut repo = fixture.create();

        for root in ["", ".", "/"] {
            let err = repo.remove_directory(root, true).unwrap_err();
            assert!(matches!(err, Error::TreeInvariantViolation { .. }));
        }
        fixture.assert_file_exists(".dirrep");
    }

    #[test]
    fn test_remove_missing_directory_is_not_found() {
        let fixture = TestRepo::new();
        let mut repo = fixture.create();
        repo.dump_file(&json!(1), "f", DumpOptions::default())
            .unwrap();

        assert!(matches!(
            repo.remove_directory("nope", false),
            Err(Error::NotFound { .. })
        ));
        assert!(matches!(
            repo.remove_directory("f", false),
            Err(Error::NotFound { .. })
        ));
        assert!(repo.is_repository_file("f"));
    }
}

mod rename_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_rename_directory_relocates_descendants() {
        let fixture = TestRepo::new();
        let mut repo = fixture.create();
        repo.dump_file(&json!("deep"), "old/sub/f", DumpOptions::default())
            .unwrap();

        repo.rename_directory("old", "new", false).unwrap();

        assert!(!repo.is_repository_directory("old"));
        assert!(repo.is_repository_file("new/sub/f"));
        assert_eq!(repo.pull_file("new/sub/f", None).unwrap(), json!("deep"));
        fixture.assert_file_not_exists("old");
    }

    #[test]
    fn test_rename_collision_requires_force() {
        let fixture = TestRepo::new();
        let mut repo = fixture.create();
        repo.dump_file(&json!(1), "a/f", DumpOptions::default())
            .unwrap();
        repo.dump_file(&json!(2), "b/g", DumpOptions::default())
            .unwrap();

        let err = repo.rename_directory("a", "b", false).unwrap_err();
        assert!(matches!(err, Error::TreeInvariantViolation { .. }));
        assert!(repo.is_repository_file("b/g"));

        repo.rename_directory("a", "b", true).unwrap();
        assert!(repo.is_repository_file("b/f"));
        assert!(!repo.is_repository_file("b/g"));
        assert!(!repo.is_repository_directory("a"));
    }

    #[test]
    fn test_rename_to_path_is_rejected() {
        let fixture = TestRepo::new();
        let mut repo = fixture.create();
        repo.add_directory("a", None, false).unwrap();

        assert!(matches!(
            repo.rename_directory("a", "x/y", false),
            Err(Error::NameNotAllowed { .. })
        ));
    }
}

mod move_copy_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_move_directory_creates_destination_parents() {
        let fixture = TestRepo::new();
        let mut repo = fixture.create();
        repo.dump_file(&json!([1, 2]), "src/f", DumpOptions::default())
            .unwrap();

        repo.move_directory("src", "x/y/dst", false).unwrap();

        assert!(repo.is_repository_directory("x/y"));
        assert!(repo.is_repository_file("x/y/dst/f"));
        assert!(!repo.is_repository_directory("src"));
    }

    #[test]
    fn test_move_directory_into_itself_is_rejected() {
        let fixture = TestRepo::new();
        let mut repo = fixture.create();
        repo.add_directory("a/b", None, false).unwrap();

        assert!(matches!(
            repo.move_directory("a", "a/b/c", true),
            Err(Error::TreeInvariantViolation { .. })
        ));
        assert!(matches!(
            repo.move_directory("a/b", "a", true),
            Err(Error::TreeInvariantViolation { .. })
        ));
        assert!(repo.is_repository_directory("a/b"));
    }

    #[test]
    fn test_copy_directory_assigns_new_ids() {
        let fixture = TestRepo::new();
        let mut repo = fixture.create();
        repo.dump_file(
            &json!({"k": "v"}),
            "src/sub/f",
            DumpOptions::new().description(json!("kept")),
        )
        .unwrap();

        repo.copy_directory("src", "dst", false).unwrap();

        let original = repo.get_file("src/sub/f").unwrap().clone();
        let copy = repo.get_file("dst/sub/f").unwrap();
        assert_ne!(original.id, copy.id);
        assert_eq!(copy.description, json!("kept"));
        assert_eq!(copy.dump_codec, original.dump_codec);
        assert_eq!(repo.pull_file("dst/sub/f", None).unwrap(), json!({"k": "v"}));
        fixture.assert_file_exists("dst/sub/.dirrep_dir");
    }

    #[test]
    fn test_copy_directory_skips_untracked_content() {
        let fixture = TestRepo::new();
        let mut repo = fixture.create();
        repo.add_directory("src", None, false).unwrap();
        fixture.write_untracked("src/loose.txt", "loose");

        repo.copy_directory("src", "dst", false).unwrap();

        fixture.assert_file_exists("src/loose.txt");
        fixture.assert_file_not_exists("dst/loose.txt");
    }

    #[test]
    fn test_copy_over_untracked_content_requires_force() {
        let fixture = TestRepo::new();
        let mut repo = fixture.create();
        repo.add_directory("src", None, false).unwrap();
        fixture.write_untracked("dst/other.txt", "x");

        assert!(matches!(
            repo.copy_directory("src", "dst", false),
            Err(Error::TreeInvariantViolation { .. })
        ));
        repo.copy_directory("src", "dst", true).unwrap();
        fixture.assert_file_not_exists("dst/other.txt");
        assert!(repo.is_repository_directory("dst"));
    }
}

mod rename_in_place_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_rename_directory_to_own_name() {
        let fixture = TestRepo::new();
        let mut repo = fixture.create();
        repo.add_directory("d", None, false).unwrap();
        let revision = repo.revision();

        repo.rename_directory("d", "d", false).unwrap();
        assert_eq!(repo.revision(), revision);

        assert!(matches!(
            repo.rename_directory("missing", "missing", false),
            Err(Error::NotFound { .. })
        ));
        assert!(matches!(
            repo.move_directory("missing", "missing", true),
            Err(Error::NotFound { .. })
        ));
    }
}
