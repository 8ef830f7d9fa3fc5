//! Rename transactions.

use crate::error::{DinstallError, Result};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, error};

/// An ordered list of renames executed as one transaction.
///
/// The plan commits pair by pair; if any rename fails, every already
/// committed pair is undone in reverse order before the error propagates.
/// Entries must therefore be reversible: destinations live on the same
/// filesystem as their sources.
#[derive(Debug, Default)]
pub struct RenamePlan {
    renames: Vec<(PathBuf, PathBuf)>,
}

impl RenamePlan {
    /// Create an empty plan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rename.
    pub fn push(&mut self, from: PathBuf, to: PathBuf) {
        self.renames.push((from, to));
    }

    /// Whether a path is already scheduled as a rename source.
    pub fn has_source(&self, path: &std::path::Path) -> bool {
        self.renames.iter().any(|(from, _)| from == path)
    }

    /// Number of scheduled renames.
    pub fn len(&self) -> usize {
        self.renames.len()
    }

    /// Whether the plan is empty.
    pub fn is_empty(&self) -> bool {
        self.renames.is_empty()
    }

    /// Destination paths in plan order.
    pub fn destinations(&self) -> impl Iterator<Item = &std::path::Path> {
        self.renames.iter().map(|(_, to)| to.as_path())
    }

    /// Execute every rename in order.
    ///
    /// On failure the already-applied renames are rolled back in reverse
    /// before the error is returned; a failure during rollback itself is
    /// logged, at that point the archive may be inconsistent.
    pub fn execute(&self) -> Result<()> {
        let mut completed: Vec<&(PathBuf, PathBuf)> = Vec::with_capacity(self.renames.len());
        for pair in &self.renames {
            let (from, to) = pair;
            debug!("renaming {} to {}", from.display(), to.display());
            if let Err(e) = fs::rename(from, to) {
                error!(
                    "failed to rename {} to {} ({}); rolling back {} renames",
                    from.display(),
                    to.display(),
                    e,
                    completed.len()
                );
                for (done_from, done_to) in completed.into_iter().rev() {
                    if let Err(undo_err) = fs::rename(done_to, done_from) {
                        error!(
                            "rollback of {} to {} failed ({}); archive may be inconsistent",
                            done_to.display(),
                            done_from.display(),
                            undo_err
                        );
                    }
                }
                return Err(DinstallError::RenameFailed {
                    from: from.clone(),
                    to: to.clone(),
                    source: e,
                });
            }
            completed.push(pair);
        }
        Ok(())
    }
}
