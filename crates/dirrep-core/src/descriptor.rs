//! Root descriptor persistence
//!
//! The descriptor (`.dirrep`) is the single source of truth shared by every
//! handle on a repository. It is always replaced atomically, and its SHA-256
//! checksum is what the transaction protocol compares to detect that another
//! writer committed in between.

use chrono::{DateTime, Utc};
use dirrep_fs::{ReservedName, checksum, io};
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::tree::DirectoryNode;
use crate::{Error, Result};

/// Identity, version and tree of one repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub unique_id: Uuid,
    /// Version of the code that created the repository
    pub version: Version,
    /// Incremented on every commit
    #[serde(default)]
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub description: Value,
    pub tree: DirectoryNode,
}

/// The version this crate writes and the newest it can read.
pub fn supported_version() -> Version {
    Version::parse(env!("CARGO_PKG_VERSION")).unwrap_or_else(|_| Version::new(0, 0, 0))
}

impl Descriptor {
    /// A fresh, empty descriptor.
    pub fn new(description: Value) -> Self {
        let now = Utc::now();
        Self {
            unique_id: Uuid::new_v4(),
            version: supported_version(),
            revision: 0,
            created_at: now,
            updated_at: now,
            description,
            tree: DirectoryNode::root(),
        }
    }

    /// Location of the descriptor under `root`.
    pub fn path(root: &Path) -> PathBuf {
        root.join(ReservedName::Descriptor)
    }

    /// Whether `root` has a descriptor file at all.
    pub fn exists(root: &Path) -> bool {
        Self::path(root).is_file()
    }

    /// Read and validate the descriptor, returning it with its checksum.
    ///
    /// # Errors
    ///
    /// - [`Error::NotARepository`] if there is no descriptor file.
    /// - [`Error::IncompatibleVersion`] if it was written by a newer version.
    /// - [`Error::Json`] / [`Error::Filesystem`] for unreadable content.
    pub fn read(root: &Path) -> Result<(Self, String)> {
        let path = Self::path(root);
        if !path.is_file() {
            return Err(Error::NotARepository {
                path: root.to_path_buf(),
            });
        }
        let bytes = io::read_bytes(&path)?;
        let checksum = checksum::compute_bytes_checksum(&bytes);

        // Build a complete value first, install it only once it is valid
        let mut descriptor: Descriptor = serde_json::from_slice(&bytes)?;
        let supported = supported_version();
        if descriptor.version > supported {
            return Err(Error::IncompatibleVersion {
                found: descriptor.version,
                supported,
            });
        }
        let dropped = descriptor.tree.normalize();
        if dropped > 0 {
            tracing::warn!(root = %root.display(), dropped, "descriptor had duplicate sibling names");
        }
        Ok((descriptor, checksum))
    }

    /// Atomically write the descriptor, returning the new checksum.
    pub fn write(&self, root: &Path) -> Result<String> {
        let bytes = serde_json::to_vec_pretty(self)?;
        io::write_atomic(&Self::path(root), &bytes)?;
        Ok(checksum::compute_bytes_checksum(&bytes))
    }

    /// Checksum of the descriptor currently on disk, `None` if it is gone.
    pub fn checksum_on_disk(root: &Path) -> Result<Option<String>> {
        let path = Self::path(root);
        match checksum::compute_file_checksum(&path) {
            Ok(sum) => Ok(Some(sum)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(dirrep_fs::Error::io(path, e).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[test]
    fn write_then_read_reports_same_checksum() {
        let dir = tempdir().unwrap();
        let descriptor = Descriptor::new(serde_json::json!({"owner": "lab"}));

        let written = descriptor.write(dir.path()).unwrap();
        let (loaded, read) = Descriptor::read(dir.path()).unwrap();

        assert_eq!(written, read);
        assert_eq!(loaded, descriptor);
        assert_eq!(
            Descriptor::checksum_on_disk(dir.path()).unwrap(),
            Some(written)
        );
    }

    #[test]
    fn missing_descriptor_is_not_a_repository() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            Descriptor::read(dir.path()),
            Err(Error::NotARepository { .. })
        ));
        assert_eq!(Descriptor::checksum_on_disk(dir.path()).unwrap(), None);
    }

    #[test]
    fn newer_version_is_rejected() {
        let dir = tempdir().unwrap();
        let mut descriptor = Descriptor::new(Value::Null);
        descriptor.version = Version::new(supported_version().major + 1, 0, 0);
        descriptor.write(dir.path()).unwrap();

        assert!(matches!(
            Descriptor::read(dir.path()),
            Err(Error::IncompatibleVersion { .. })
        ));
    }

    #[test]
    fn corrupt_descriptor_is_a_json_error() {
        let dir = tempdir().unwrap();
        std::fs::write(Descriptor::path(dir.path()), "{ nope").unwrap();
        assert!(matches!(Descriptor::read(dir.path()), Err(Error::Json(_))));
    }
}
