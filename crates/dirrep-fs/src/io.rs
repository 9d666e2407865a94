//! Atomic I/O operations
//!
//! Every durable write goes to a temporary sibling first, is flushed to
//! disk, and is then renamed over the target so readers only ever observe
//! the old or the new content.

use crate::{Error, ReservedName, Result};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Temporary sibling path for `target`, in the same directory so the final
/// rename never crosses filesystems.
pub fn temp_path_for(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(
        ".{}.{}{}",
        name,
        Uuid::new_v4().simple(),
        ReservedName::Temporary.as_str()
    ))
}

/// Write content atomically to a file.
///
/// Uses write-to-temp-then-rename strategy to prevent partial writes.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    write_atomic_with(path, |temp| {
        fs::write(temp, content).map_err(|e| Error::io(temp, e))
    })
}

/// Atomically produce `path` with a caller supplied writer.
///
/// `write` receives the temporary path and must fully create the file
/// there. On failure the temporary file is removed and the target is left
/// untouched.
pub fn write_atomic_with<F, E>(path: &Path, write: F) -> std::result::Result<(), E>
where
    F: FnOnce(&Path) -> std::result::Result<(), E>,
    E: From<Error>,
{
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }

    let temp_path = temp_path_for(path);

    if let Err(err) = write(&temp_path) {
        let _ = fs::remove_file(&temp_path);
        return Err(err);
    }

    let finish = || -> Result<()> {
        // Flush to disk
        let file = File::open(&temp_path).map_err(|e| Error::io(&temp_path, e))?;
        file.sync_all().map_err(|e| Error::io(&temp_path, e))?;
        drop(file);

        // Atomic rename
        fs::rename(&temp_path, path).map_err(|e| Error::io(path, e))?;

        if let Some(parent) = path.parent() {
            sync_dir(parent)?;
        }
        Ok(())
    };

    if let Err(err) = finish() {
        let _ = fs::remove_file(&temp_path);
        return Err(err.into());
    }
    Ok(())
}

/// Copy `source` over `destination` atomically.
pub fn copy_atomic(source: &Path, destination: &Path) -> Result<()> {
    write_atomic_with(destination, |temp| {
        fs::copy(source, temp)
            .map(|_| ())
            .map_err(|e| Error::io(source, e))
    })
}

/// Flush directory metadata (new/renamed entries) to disk.
#[cfg(unix)]
pub fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)
        .and_then(|d| d.sync_all())
        .map_err(|e| Error::io(dir, e))
}

/// Directory handles cannot be synced on this platform.
#[cfg(not(unix))]
pub fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

/// Read a whole file.
pub fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| Error::io(path, e))
}

/// Read text content from a file.
pub fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| Error::io(path, e))
}

/// Write text content to a file atomically.
pub fn write_text(path: &Path, content: &str) -> Result<()> {
    write_atomic(path, content.as_bytes())
}

/// Remove a file, treating absence as success.
///
/// Returns whether a file was actually removed.
pub fn remove_file_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::io(path, e)),
    }
}

/// Remove a directory if it exists and is empty.
///
/// Returns whether the directory was removed.
pub fn remove_dir_if_empty(path: &Path) -> Result<bool> {
    let mut entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(Error::io(path, e)),
    };
    if entries.next().is_some() {
        return Ok(false);
    }
    fs::remove_dir(path).map_err(|e| Error::io(path, e))?;
    Ok(true)
}
