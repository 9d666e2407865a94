//! Error types for dirrep-core

use std::path::PathBuf;
use std::time::Duration;

/// Result type for dirrep-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in dirrep-core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The path holds no readable repository descriptor
    #[error("Not a repository: {path}")]
    NotARepository { path: PathBuf },

    /// Reserved or otherwise forbidden entry name
    #[error("Name '{name}' is not allowed: {reason}")]
    NameNotAllowed { name: String, reason: String },

    /// A lock could not be taken within its timeout; nothing was changed
    #[error("Timed out after {timeout:?} waiting for lock {key}")]
    LockTimeout { key: PathBuf, timeout: Duration },

    /// The retry budget ran out while racing other writers
    #[error("Concurrent modification: gave up after {trials} attempt(s): {source}")]
    ConcurrentModification {
        trials: u32,
        #[source]
        source: Box<Error>,
    },

    /// The descriptor on disk changed between reload and commit
    #[error("Descriptor changed on disk during the transaction (expected {expected}, found {found})")]
    DescriptorChanged { expected: String, found: String },

    /// A codec failed to dump or pull a value
    #[error("Codec '{codec}' failed for {path}: {message}")]
    Codec {
        codec: String,
        path: PathBuf,
        message: String,
    },

    /// No codec registered under this name
    #[error("Unknown codec: {name}")]
    UnknownCodec { name: String },

    /// A codec with this name is already registered
    #[error("Codec '{name}' is already registered")]
    DuplicateCodec { name: String },

    /// Sidecar metadata belongs to another repository
    #[error("Stale or foreign entry at {path}: {reason}")]
    StaleOrForeign { path: PathBuf, reason: String },

    /// The requested change would break the tree's structure
    #[error("Tree invariant violation: {message}")]
    TreeInvariantViolation { message: String },

    /// No tracked entry at the given path
    #[error("No tracked {kind} at '{path}'")]
    NotFound { kind: &'static str, path: String },

    /// The descriptor was written by a newer version
    #[error("Repository version {found} is newer than supported version {supported}")]
    IncompatibleVersion {
        found: semver::Version,
        supported: semver::Version,
    },

    // Transparent wrappers for underlying crate errors
    /// Filesystem error from dirrep-fs
    #[error(transparent)]
    Filesystem(dirrep_fs::Error),

    /// Standard I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn invariant(message: impl Into<String>) -> Self {
        Self::TreeInvariantViolation {
            message: message.into(),
        }
    }

    pub(crate) fn not_found(kind: &'static str, path: impl ToString) -> Self {
        Self::NotFound {
            kind,
            path: path.to_string(),
        }
    }
}

impl From<dirrep_fs::Error> for Error {
    fn from(err: dirrep_fs::Error) -> Self {
        match err {
            dirrep_fs::Error::NameNotAllowed { name, reason } => {
                Self::NameNotAllowed { name, reason }
            }
            other => Self::Filesystem(other),
        }
    }
}
