use dirrep_fs::io;
use std::fs;
use tempfile::TempDir;

fn leftover_temp_files(dir: &std::path::Path) -> Vec<String> {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".dirrep_tmp"))
        .collect()
}

#[test]
fn test_write_atomic_creates_file() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("test.txt");

    io::write_atomic(&path, b"hello world").unwrap();

    assert_eq!(fs::read_to_string(&path).unwrap(), "hello world");
    assert!(leftover_temp_files(temp.path()).is_empty());
}

#[test]
fn test_write_atomic_overwrites_existing() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("test.txt");
    fs::write(&path, "original").unwrap();

    io::write_atomic(&path, b"updated").unwrap();

    assert_eq!(fs::read_to_string(&path).unwrap(), "updated");
}

#[test]
fn test_write_atomic_with_failure_keeps_original() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("test.txt");
    fs::write(&path, "original").unwrap();

    let result: dirrep_fs::Result<()> = io::write_atomic_with(&path, |tmp| {
        fs::write(tmp, "half").unwrap();
        Err(dirrep_fs::Error::invalid_path("x", "writer failed"))
    });

    assert!(result.is_err());
    assert_eq!(fs::read_to_string(&path).unwrap(), "original");
    assert!(leftover_temp_files(temp.path()).is_empty());
}

#[test]
fn test_write_atomic_creates_parent_directories() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("a").join("b").join("file.txt");

    io::write_text(&path, "deep content").unwrap();

    assert_eq!(io::read_text(&path).unwrap(), "deep content");
}

#[test]
fn test_copy_atomic_duplicates_content() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("source.bin");
    let destination = temp.path().join("copy.bin");
    fs::write(&source, [1u8, 2, 3]).unwrap();

    io::copy_atomic(&source, &destination).unwrap();

    assert_eq!(io::read_bytes(&destination).unwrap(), vec![1u8, 2, 3]);
    assert!(source.exists());
}

#[test]
fn test_remove_file_if_exists_reports_presence() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("gone.txt");
    fs::write(&path, "x").unwrap();

    assert!(io::remove_file_if_exists(&path).unwrap());
    assert!(!io::remove_file_if_exists(&path).unwrap());
}

#[test]
fn test_remove_dir_if_empty_keeps_non_empty() {
    let temp = TempDir::new().unwrap();
    let full = temp.path().join("full");
    let empty = temp.path().join("empty");
    fs::create_dir(&full).unwrap();
    fs::create_dir(&empty).unwrap();
    fs::write(full.join("keep.txt"), "x").unwrap();

    assert!(!io::remove_dir_if_empty(&full).unwrap());
    assert!(io::remove_dir_if_empty(&empty).unwrap());
    assert!(full.exists());
    assert!(!empty.exists());
}

#[test]
fn test_read_text_nonexistent_file() {
    let temp = TempDir::new().unwrap();
    let result = io::read_text(&temp.path().join("missing.txt"));
    assert!(matches!(result, Err(dirrep_fs::Error::Io { .. })));
}
