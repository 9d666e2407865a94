//! Sidecar metadata files
//!
//! Every tracked directory carries a `.dirrep_dir` sidecar and every tracked
//! file a `.<name>.dirrep_file` sidecar (plus an optional
//! `.<name>.dirrep_class`). Sidecars record the owning repository's id so
//! that leftovers of another repository are never mistaken for our own.

use chrono::{DateTime, Utc};
use dirrep_fs::{RelPath, ReservedName, io};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::Result;
use crate::tree::{DirectoryNode, FileEntry};

/// Metadata stored next to a tracked directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectorySidecar {
    pub owner_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub description: Value,
}

impl DirectorySidecar {
    pub fn for_node(owner_id: Uuid, node: &DirectoryNode) -> Self {
        Self {
            owner_id,
            created_at: node.created_at,
            updated_at: node.updated_at,
            description: node.description.clone(),
        }
    }

    /// Sidecar location for the directory at `dir`.
    pub fn path(root: &Path, dir: &RelPath) -> PathBuf {
        dir.to_native(root).join(ReservedName::DirectorySidecar)
    }

    pub fn read(path: &Path) -> Result<Option<Self>> {
        read_json(path)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        write_json(path, self)
    }
}

/// Metadata stored next to a tracked file: codec selectors and identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSidecar {
    pub owner_id: Uuid,
    pub id: Uuid,
    pub dump_codec: String,
    pub pull_codec: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub description: Value,
}

impl FileSidecar {
    pub fn for_entry(owner_id: Uuid, entry: &FileEntry) -> Self {
        Self {
            owner_id,
            id: entry.id,
            dump_codec: entry.dump_codec.clone(),
            pull_codec: entry.pull_codec.clone(),
            created_at: entry.created_at,
            updated_at: entry.updated_at,
            description: entry.description.clone(),
        }
    }

    pub fn read(path: &Path) -> Result<Option<Self>> {
        read_json(path)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        write_json(path, self)
    }
}

/// Native paths of everything that belongs to one tracked file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePaths {
    pub payload: PathBuf,
    pub info: PathBuf,
    pub class: PathBuf,
    pub lock: PathBuf,
}

impl FilePaths {
    pub fn new(root: &Path, file: &RelPath) -> Self {
        let payload = file.to_native(root);
        let name = file.file_name().unwrap_or_default();
        let dir = payload
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| root.to_path_buf());
        Self {
            info: dir.join(ReservedName::FileSidecar.file_name_for(name)),
            class: dir.join(ReservedName::ClassSidecar.file_name_for(name)),
            lock: dir.join(ReservedName::FileLock.file_name_for(name)),
            payload,
        }
    }

    /// Sidecars and lock marker, without the payload.
    pub fn metadata(&self) -> [&Path; 3] {
        [
            self.info.as_path(),
            self.class.as_path(),
            self.lock.as_path(),
        ]
    }

    /// Write the info sidecar and the class sidecar (or drop a stale one).
    pub fn write_sidecars(&self, owner_id: Uuid, entry: &FileEntry) -> Result<()> {
        FileSidecar::for_entry(owner_id, entry).write(&self.info)?;
        match &entry.class_tag {
            Some(tag) => io::write_text(&self.class, tag)?,
            None => {
                io::remove_file_if_exists(&self.class)?;
            }
        }
        Ok(())
    }

    /// The class tag on disk, if any.
    pub fn read_class_tag(&self) -> Result<Option<String>> {
        if !self.class.is_file() {
            return Ok(None);
        }
        Ok(Some(io::read_text(&self.class)?.trim().to_string()))
    }

    /// Remove sidecars and the lock marker, keeping the payload.
    pub fn remove_metadata(&self) -> Result<()> {
        for path in self.metadata() {
            io::remove_file_if_exists(path)?;
        }
        Ok(())
    }

    /// Remove payload, sidecars and the lock marker.
    pub fn remove_all(&self) -> Result<()> {
        io::remove_file_if_exists(&self.payload)?;
        self.remove_metadata()
    }
}

/// Remove a directory's own sidecar and lock marker.
pub fn remove_directory_metadata(native_dir: &Path) -> Result<()> {
    io::remove_file_if_exists(&native_dir.join(ReservedName::DirectorySidecar))?;
    io::remove_file_if_exists(&native_dir.join(ReservedName::DirectoryLock))?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.is_file() {
        return Ok(None);
    }
    let bytes = io::read_bytes(path)?;
    Ok(Some(serde_json::from_slice(&bytes)?))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    io::write_atomic(path, &bytes)?;
    Ok(())
}
