//! Reserved on-disk names of a dirrep repository.

use std::path::Path;

/// Files the repository owns next to user content.
///
/// Exact names are fixed per directory; suffix names are derived from the
/// tracked entry they describe (`.<entry><suffix>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReservedName {
    /// The root descriptor (`.dirrep`)
    Descriptor,
    /// Lock marker guarding the descriptor (`.dirrep.lock`)
    RepositoryLock,
    /// Per-directory sidecar (`.dirrep_dir`)
    DirectorySidecar,
    /// Per-directory lock marker (`.dirrep_dir.lock`)
    DirectoryLock,
    /// Per-file info sidecar suffix (`.dirrep_file`)
    FileSidecar,
    /// Per-file class-tag sidecar suffix (`.dirrep_class`)
    ClassSidecar,
    /// Per-file lock marker suffix (`.dirrep_lock`)
    FileLock,
    /// Suffix of in-flight temporary files (`.dirrep_tmp`)
    Temporary,
}

impl ReservedName {
    /// Names reserved verbatim.
    pub const EXACT: [ReservedName; 4] = [
        Self::Descriptor,
        Self::RepositoryLock,
        Self::DirectorySidecar,
        Self::DirectoryLock,
    ];

    /// Name endings reserved for sidecars, lock markers and temp files.
    pub const SUFFIXES: [ReservedName; 4] = [
        Self::FileSidecar,
        Self::ClassSidecar,
        Self::FileLock,
        Self::Temporary,
    ];

    /// Get the string representation of the name or suffix.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Descriptor => ".dirrep",
            Self::RepositoryLock => ".dirrep.lock",
            Self::DirectorySidecar => ".dirrep_dir",
            Self::DirectoryLock => ".dirrep_dir.lock",
            Self::FileSidecar => ".dirrep_file",
            Self::ClassSidecar => ".dirrep_class",
            Self::FileLock => ".dirrep_lock",
            Self::Temporary => ".dirrep_tmp",
        }
    }

    /// Whether this is a suffix rather than a complete file name.
    pub fn is_suffix(&self) -> bool {
        Self::SUFFIXES.contains(self)
    }

    /// The on-disk file name of this reserved file for the given entry.
    ///
    /// Exact names ignore `entry`.
    pub fn file_name_for(&self, entry: &str) -> String {
        if self.is_suffix() {
            format!(".{}{}", entry, self.as_str())
        } else {
            self.as_str().to_string()
        }
    }

    /// Classify `name` if it collides with a reserved name or pattern.
    pub fn matches(name: &str) -> Option<ReservedName> {
        if let Some(exact) = Self::EXACT.iter().find(|r| r.as_str() == name) {
            return Some(*exact);
        }
        Self::SUFFIXES
            .iter()
            .find(|r| name.ends_with(r.as_str()))
            .copied()
    }
}

impl AsRef<Path> for ReservedName {
    fn as_ref(&self) -> &Path {
        Path::new(self.as_str())
    }
}

impl AsRef<str> for ReservedName {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl std::fmt::Display for ReservedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
