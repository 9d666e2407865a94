//! Versioned object repositories backed by plain directories
//!
//! A repository is a directory plus a root descriptor (`.dirrep`) recording
//! a tree of tracked directories and files. Values are dumped to and pulled
//! from tracked files through named codecs, and every mutation runs as a
//! lock-guarded, bounded-retry transaction so that independent handles in
//! different threads or processes can share one root.
//!
//! # Architecture
//!
//! ```text
//!                 Repository (ops, reads, packaging)
//!                        |
//!        +---------------+---------------+
//!        |               |               |
//!   transaction      reconcile         codec
//!        |               |
//!   descriptor + tree + sidecar
//!        |
//!    dirrep-fs (paths, atomic I/O, checksums, locks)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use dirrep_core::{DumpOptions, Repository, RepositoryOptions, Result};
//! use serde_json::json;
//!
//! fn example() -> Result<()> {
//!     let mut repo = Repository::create("data", json!("results"), RepositoryOptions::default(), false)?;
//!     repo.add_directory("runs/first", None, false)?;
//!     repo.dump_file(&json!({"energy": [1.5, 2.5]}), "runs/first/output", DumpOptions::default())?;
//!     let value = repo.pull_file("runs/first/output", None)?;
//!     assert_eq!(value["energy"][1], json!(2.5));
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod ops;
pub mod outcome;
pub mod package;
pub mod reconcile;
pub mod repository;
pub mod sidecar;
pub mod transaction;
pub mod tree;

pub use codec::{
    BuiltinCodec, Codec, CodecRegistry, CodecResult, DEFAULT_CODEC, describe_rejection,
};
pub use config::RepositoryOptions;
pub use descriptor::Descriptor;
pub use error::{Error, Result};
pub use ops::{DumpOptions, UpdateOptions};
pub use outcome::Outcome;
pub use package::PackageFormat;
pub use reconcile::{ReconcileWarning, WarningKind};
pub use repository::Repository;
pub use tree::{DirectoryNode, FileEntry, Node, Walk};

pub use dirrep_fs::{FileLockService, LockService, MemoryLockService, RelPath};
