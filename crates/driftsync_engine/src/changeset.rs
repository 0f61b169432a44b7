//! Paths touched by a sync-down cycle, for reporting.

use serde::Serialize;

/// New, changed and deleted paths of one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSet {
    /// Paths that appeared.
    pub new_files: Vec<String>,
    /// Paths whose content or metadata changed.
    pub changed_files: Vec<String>,
    /// Paths that were removed.
    pub deleted_files: Vec<String>,
}

impl ChangeSet {
    /// Returns true if nothing changed.
    pub fn is_empty(&self) -> bool {
        self.new_files.is_empty() && self.changed_files.is_empty() && self.deleted_files.is_empty()
    }

    /// Total number of recorded paths.
    pub fn len(&self) -> usize {
        self.new_files.len() + self.changed_files.len() + self.deleted_files.len()
    }
}
