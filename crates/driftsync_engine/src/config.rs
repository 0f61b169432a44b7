//! Configuration for sync-down cycles.

use std::path::PathBuf;
use std::time::Duration;

/// How diverging local edits are preserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictStrategy {
    /// Move the local file to a conflicted-copy sibling, then apply the winner.
    RenameLocal,
    /// Keep the local file and skip the winner. Not supported by sync-down.
    KeepLocal,
}

/// Configuration for sync-down cycles.
#[derive(Debug, Clone)]
pub struct SyncDownConfig {
    /// Local replica id.
    pub client_name: String,
    /// Handling of conflicting local edits.
    pub conflict_strategy: ConflictStrategy,
    /// Maximum database versions applied per batch.
    pub max_versions_per_batch: usize,
    /// Label used in conflicted-copy file names.
    pub conflict_label: String,
    /// Number of conflicted-copy names tried before giving up.
    pub max_conflict_attempts: u32,
    /// Age after which a maintenance marker is ignored.
    pub marker_stale_after: Duration,
    /// Directory backing the object cache; memory only if `None`.
    pub cache_dir: Option<PathBuf>,
}

impl SyncDownConfig {
    /// Creates a configuration for the given replica.
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
            conflict_strategy: ConflictStrategy::RenameLocal,
            max_versions_per_batch: 100,
            conflict_label: "conflicted copy".into(),
            max_conflict_attempts: 10,
            marker_stale_after: Duration::from_secs(15 * 60),
            cache_dir: None,
        }
    }

    /// Sets the conflict strategy.
    pub fn with_conflict_strategy(mut self, strategy: ConflictStrategy) -> Self {
        self.conflict_strategy = strategy;
        self
    }

    /// Sets the batch size. Values below one are raised to one.
    pub fn with_max_versions_per_batch(mut self, size: usize) -> Self {
        self.max_versions_per_batch = size.max(1);
        self
    }

    /// Sets the conflicted-copy label.
    pub fn with_conflict_label(mut self, label: impl Into<String>) -> Self {
        self.conflict_label = label.into();
        self
    }

    /// Sets how many conflicted-copy names are tried.
    pub fn with_max_conflict_attempts(mut self, attempts: u32) -> Self {
        self.max_conflict_attempts = attempts;
        self
    }

    /// Sets the marker staleness window.
    pub fn with_marker_stale_after(mut self, age: Duration) -> Self {
        self.marker_stale_after = age;
        self
    }

    /// Backs the object cache with a directory.
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }
}

impl Default for SyncDownConfig {
    fn default() -> Self {
        Self::new("local")
    }
}
