//! Filesystem layer for dirrep repositories
//!
//! Provides repository-relative path resolution, reserved-name rules,
//! atomic I/O, checksums, typed config files and the advisory lock service.

pub mod checksum;
pub mod config;
pub mod constants;
pub mod error;
pub mod io;
pub mod lock;
pub mod path;

pub use config::ConfigStore;
pub use constants::ReservedName;
pub use error::{Error, Result};
pub use lock::{DEFAULT_LOCK_TIMEOUT, FileLockService, LockService, LockToken, MemoryLockService};
pub use path::{RelPath, check_name, is_name_allowed};
