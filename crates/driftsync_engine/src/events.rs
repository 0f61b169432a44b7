//! Lifecycle notifications of a sync-down cycle.

use crate::changeset::ChangeSet;
use crate::error::{PreconditionFailure, SyncError};
use std::sync::mpsc::Sender;

/// Final result of a cycle that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownOutcome {
    /// The remote holds nothing new.
    NoRemoteChanges,
    /// Remote changes were applied locally.
    AppliedRemoteChanges(ChangeSet),
    /// The cycle refused to start. Nothing was changed.
    Aborted(PreconditionFailure),
}

impl DownOutcome {
    /// The result code of this outcome.
    pub fn code(&self) -> DownResultCode {
        match self {
            Self::NoRemoteChanges => DownResultCode::NoRemoteChanges,
            Self::AppliedRemoteChanges(_) => DownResultCode::AppliedRemoteChanges,
            Self::Aborted(_) => DownResultCode::Failed,
        }
    }

    /// Paths touched by the cycle.
    pub fn changes(&self) -> Option<&ChangeSet> {
        match self {
            Self::AppliedRemoteChanges(changes) => Some(changes),
            _ => None,
        }
    }
}

/// Result code reported at the end of every cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownResultCode {
    /// Nothing to do.
    NoRemoteChanges,
    /// Changes were applied.
    AppliedRemoteChanges,
    /// The cycle was aborted or failed.
    Failed,
}

/// Receives lifecycle notifications. All methods default to no-ops.
///
/// Callbacks run synchronously on the thread executing the cycle.
pub trait DownListener {
    /// The cycle started.
    fn on_start(&self) {}

    /// Unknown remote history objects were found.
    fn on_changes_detected(&self) {}

    /// Object `index` of `total` is being downloaded.
    fn on_download_progress(&self, _name: &str, _index: usize, _total: usize) {}

    /// The cycle ended without error.
    fn on_end(&self, _outcome: &DownOutcome) {}

    /// The cycle failed and local metadata was rolled back.
    fn on_failed(&self, _error: &SyncError) {}
}

/// A listener that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopListener;

impl DownListener for NoopListener {}

/// Owned form of a notification, for channel consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownEvent {
    /// See [`DownListener::on_start`].
    Started,
    /// See [`DownListener::on_changes_detected`].
    ChangesDetected,
    /// See [`DownListener::on_download_progress`].
    DownloadProgress {
        /// Object name.
        name: String,
        /// One-based position.
        index: usize,
        /// Number of objects.
        total: usize,
    },
    /// See [`DownListener::on_end`] and [`DownListener::on_failed`].
    Ended {
        /// Result code.
        code: DownResultCode,
        /// Paths touched, empty unless changes were applied.
        changes: ChangeSet,
    },
}

impl DownListener for Sender<DownEvent> {
    fn on_start(&self) {
        let _ = self.send(DownEvent::Started);
    }

    fn on_changes_detected(&self) {
        let _ = self.send(DownEvent::ChangesDetected);
    }

    fn on_download_progress(&self, name: &str, index: usize, total: usize) {
        let _ = self.send(DownEvent::DownloadProgress {
            name: name.to_string(),
            index,
            total,
        });
    }

    fn on_end(&self, outcome: &DownOutcome) {
        let _ = self.send(DownEvent::Ended {
            code: outcome.code(),
            changes: outcome.changes().cloned().unwrap_or_default(),
        });
    }

    fn on_failed(&self, _error: &SyncError) {
        let _ = self.send(DownEvent::Ended {
            code: DownResultCode::Failed,
            changes: ChangeSet::default(),
        });
    }
}
