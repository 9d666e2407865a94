//! Shared test utilities for the dirrep workspace.
//!
//! Dev-dependency only, never published.
//!
//! # Modules
//!
//! - [`repo`]: [`TestRepo`], a temporary directory holding a repository
//! - [`logging`]: opt-in `tracing` output for tests

pub mod logging;
pub mod repo;

pub use logging::init_tracing;
pub use repo::{TestRepo, fast_options};
