//! Boolean outcome view of operation results

use crate::Result;

/// Collapse a result into a success flag and an optional error message.
///
/// For callers that report failures instead of propagating them:
///
/// ```no_run
/// # use dirrep_core::{Outcome, Repository, RepositoryOptions};
/// # fn demo(repo: &mut Repository) {
/// let (ok, message) = repo.add_directory("runs", None, false).outcome();
/// if !ok {
///     eprintln!("{}", message.unwrap_or_default());
/// }
/// # }
/// ```
pub trait Outcome {
    fn outcome(self) -> (bool, Option<String>);
}

impl<T> Outcome for Result<T> {
    fn outcome(self) -> (bool, Option<String>) {
        match self {
            Ok(_) => (true, None),
            Err(err) => {
                tracing::debug!(error = %err, "operation failed");
                (false, Some(err.to_string()))
            }
        }
    }
}
