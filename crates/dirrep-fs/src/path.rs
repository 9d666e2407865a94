//! Repository-relative path handling
//!
//! Every path inside a repository is stored in one canonical form: forward
//! slashes, no empty or `.` segments, no leading or trailing slash. The empty
//! path is the repository root. Conversion to a platform-native path only
//! happens at I/O boundaries via [`RelPath::to_native`].

use crate::{Error, ReservedName, Result};
use std::path::{Path, PathBuf};

/// A canonical repository-relative path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelPath {
    /// Internal representation always uses forward slashes
    inner: String,
}

impl RelPath {
    /// The repository root.
    pub fn root() -> Self {
        Self::default()
    }

    /// Resolve a user supplied path to canonical form.
    ///
    /// Backslashes are treated as separators, `.` and empty segments are
    /// dropped, and `""`/`"."`/`"/"` all resolve to the root.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPath`] for `..` segments, which could escape
    /// the repository.
    pub fn resolve(raw: impl AsRef<str>) -> Result<Self> {
        let raw = raw.as_ref();
        let unified = raw.replace('\\', "/");
        let mut segments = Vec::new();
        for seg in unified.split('/') {
            match seg {
                "" | "." => continue,
                ".." => {
                    return Err(Error::invalid_path(
                        raw,
                        "parent segments ('..') are not allowed",
                    ));
                }
                _ => segments.push(seg),
            }
        }
        Ok(Self {
            inner: segments.join("/"),
        })
    }

    /// Get the internal normalized string representation.
    pub fn as_str(&self) -> &str {
        &self.inner
    }

    /// Whether this path designates the repository root.
    pub fn is_root(&self) -> bool {
        self.inner.is_empty()
    }

    /// Iterate over the path segments (empty for the root).
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.inner.split('/').filter(|s| !s.is_empty())
    }

    /// Number of segments.
    pub fn depth(&self) -> usize {
        self.segments().count()
    }

    /// Get the parent directory; `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        match self.inner.rfind('/') {
            Some(idx) => Some(Self {
                inner: self.inner[..idx].to_string(),
            }),
            None => Some(Self::root()),
        }
    }

    /// Get the last segment; `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        if self.is_root() {
            return None;
        }
        self.inner.rsplit('/').next()
    }

    /// Append a single, already valid segment.
    pub fn join(&self, segment: &str) -> Self {
        if self.is_root() {
            Self {
                inner: segment.to_string(),
            }
        } else {
            Self {
                inner: format!("{}/{}", self.inner, segment),
            }
        }
    }

    /// Append another relative path.
    pub fn join_path(&self, other: &RelPath) -> Self {
        if other.is_root() {
            return self.clone();
        }
        self.join(other.as_str())
    }

    /// Replace the last segment.
    pub fn with_file_name(&self, name: &str) -> Self {
        match self.parent() {
            Some(parent) => parent.join(name),
            None => Self::root().join(name),
        }
    }

    /// Segment-aware prefix test. Every path starts with the root.
    pub fn starts_with(&self, prefix: &RelPath) -> bool {
        if prefix.is_root() {
            return true;
        }
        self.inner == prefix.inner
            || (self.inner.starts_with(&prefix.inner)
                && self.inner.as_bytes().get(prefix.inner.len()) == Some(&b'/'))
    }

    /// Remove `prefix`, returning the remainder relative to it.
    pub fn strip_prefix(&self, prefix: &RelPath) -> Option<Self> {
        if !self.starts_with(prefix) {
            return None;
        }
        if prefix.is_root() {
            return Some(self.clone());
        }
        let rest = self.inner[prefix.inner.len()..].trim_start_matches('/');
        Some(Self {
            inner: rest.to_string(),
        })
    }

    /// Convert to a platform-native path under `root`.
    pub fn to_native(&self, root: &Path) -> PathBuf {
        self.segments().fold(root.to_path_buf(), |acc, seg| acc.join(seg))
    }
}

impl std::fmt::Display for RelPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_root() {
            write!(f, ".")
        } else {
            write!(f, "{}", self.inner)
        }
    }
}

impl std::str::FromStr for RelPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::resolve(s)
    }
}

impl TryFrom<&str> for RelPath {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        Self::resolve(s)
    }
}

impl TryFrom<String> for RelPath {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::resolve(s)
    }
}

impl AsRef<str> for RelPath {
    fn as_ref(&self) -> &str {
        &self.inner
    }
}

/// Check whether the last segment of `path` may be used as a tracked name.
///
/// Returns `(false, reason)` for the root, exact reserved names, and names
/// ending with a reserved sidecar pattern.
pub fn is_name_allowed(path: &RelPath) -> (bool, Option<String>) {
    let Some(name) = path.file_name() else {
        return (false, Some("the repository root has no name".to_string()));
    };
    if name.trim().is_empty() {
        return (false, Some("name is empty".to_string()));
    }
    match ReservedName::matches(name) {
        Some(reserved) if reserved.is_suffix() => (
            false,
            Some(format!("names ending with '{}' are reserved", reserved)),
        ),
        Some(reserved) => (false, Some(format!("'{}' is a reserved name", reserved))),
        None => (true, None),
    }
}

/// [`is_name_allowed`] as a `Result`.
pub fn check_name(path: &RelPath) -> Result<()> {
    match is_name_allowed(path) {
        (true, _) => Ok(()),
        (false, reason) => Err(Error::NameNotAllowed {
            name: path.to_string(),
            reason: reason.unwrap_or_default(),
        }),
    }
}
