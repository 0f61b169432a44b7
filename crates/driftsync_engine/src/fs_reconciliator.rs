//! Per-file decisions turning winner metadata into filesystem actions.
//!
//! For every history touched by a batch of winner versions the winning
//! version is compared with the local version on record and with what is
//! actually on disk:
//!
//! | local version | disk vs. local | outcome                               |
//! |---------------|----------------|---------------------------------------|
//! | none          | n/a            | compare disk with winner directly     |
//! | present       | matches        | compare local with winner             |
//! | present       | missing        | restore winner, or nothing if deleted |
//! | present       | diverges       | change flagged as conflict            |

use crate::actions::{ActionOp, FileSystemAction};
use crate::changeset::ChangeSet;
use crate::comparator::{FileChange, FileVersionComparator};
use crate::error::{SyncError, SyncResult};
use crate::filesystem::{FileProperties, LocalFileSystem};
use crate::index::WinnerIndex;
use driftsync_protocol::{FileHistoryId, FileType, FileVersion};
use std::collections::{HashMap, HashSet};
use tracing::{debug, trace};

/// Decides which filesystem actions bring the local tree to the winner state.
pub struct FileSystemActionReconciliator<'a> {
    fs: &'a dyn LocalFileSystem,
}

impl<'a> FileSystemActionReconciliator<'a> {
    /// Creates a reconciliator inspecting `fs`.
    pub fn new(fs: &'a dyn LocalFileSystem) -> Self {
        Self { fs }
    }

    /// Determines the actions for every history in `index`.
    ///
    /// `local` maps history ids to the last version on record locally.
    /// Each emitted action is also recorded in `changes`.
    ///
    /// # Errors
    ///
    /// Fails if the filesystem cannot be inspected, or with a consistency
    /// violation if the comparison yields a state that cannot occur.
    pub fn determine_actions(
        &self,
        index: &WinnerIndex,
        local: &HashMap<FileHistoryId, FileVersion>,
        changes: &mut ChangeSet,
    ) -> SyncResult<Vec<FileSystemAction>> {
        let mut actions = Vec::new();

        for history in index.histories() {
            let Some(winning) = history.last_version() else {
                continue;
            };

            let action = match local.get(&history.id) {
                Some(local) if local.is_deleted() && winning.is_deleted() => None,
                Some(local) if !local.is_deleted() => self.with_local(local, winning)?,
                _ => self.without_local(index, &history.id, winning)?,
            };

            match action {
                Some(action) => {
                    debug!(history = %history.id, action = %action, "reconciled");
                    record(&action, changes);
                    actions.push(action);
                }
                None => trace!(history = %history.id, path = %winning.path, "in sync"),
            }
        }

        Ok(actions)
    }

    /// Deletes for local histories that vanished in a history compaction.
    ///
    /// `captured` holds the last local versions taken before the local
    /// history was discarded; `seen` holds every history id present in the
    /// winner's versions.
    pub fn compaction_deletes(
        &self,
        captured: &HashMap<FileHistoryId, FileVersion>,
        seen: &HashSet<FileHistoryId>,
        changes: &mut ChangeSet,
    ) -> Vec<FileSystemAction> {
        let mut orphaned: Vec<&FileVersion> = captured
            .iter()
            .filter(|(id, version)| !version.is_deleted() && !seen.contains(*id))
            .map(|(_, version)| version)
            .collect();
        orphaned.sort_by(|a, b| a.path.cmp(&b.path));

        orphaned
            .into_iter()
            .map(|version| {
                let action = FileSystemAction::delete(version.clone());
                record(&action, changes);
                action
            })
            .collect()
    }

    fn inspect(&self, path: &str) -> SyncResult<Option<FileProperties>> {
        self.fs
            .properties(path, true)
            .map_err(|e| SyncError::file_system(format!("inspect {path}"), e))
    }

    fn without_local(
        &self,
        index: &WinnerIndex,
        id: &FileHistoryId,
        winning: &FileVersion,
    ) -> SyncResult<Option<FileSystemAction>> {
        let disk = self.inspect(&winning.path)?;
        let changes = FileVersionComparator::compare(winning, disk.as_ref(), true);

        let action = if changes.is_empty() {
            None
        } else if changes.contains(FileChange::Deleted) {
            Some(create(winning))
        } else if changes.contains(FileChange::New) {
            let expected = index
                .previous_live_version(id, winning.version)
                .unwrap_or(winning)
                .clone();
            Some(FileSystemAction::delete(expected))
        } else if changes.contains(FileChange::ChangedPath) {
            return Err(SyncError::consistency(format!(
                "path differs for {} without a local version",
                winning.path
            )));
        } else if changes.contains(FileChange::ChangedLinkTarget) {
            Some(FileSystemAction::new_symlink(winning.clone(), None))
        } else if changes.only(&[FileChange::ChangedAttributes, FileChange::ChangedLastModified]) {
            Some(FileSystemAction::set_attributes(winning.clone()))
        } else {
            Some(create(winning))
        };

        Ok(action)
    }

    fn with_local(
        &self,
        local: &FileVersion,
        winning: &FileVersion,
    ) -> SyncResult<Option<FileSystemAction>> {
        let disk = self.inspect(&local.path)?;
        let integrity = FileVersionComparator::compare(local, disk.as_ref(), true);

        if !integrity.is_empty() {
            let action = match disk {
                None if winning.is_deleted() => None,
                None => Some(FileSystemAction::change(local.clone(), winning.clone(), false)),
                Some(_) => Some(FileSystemAction::change(local.clone(), winning.clone(), true)),
            };
            return Ok(action);
        }

        let changes = FileVersionComparator::compare_versions(winning, local);

        let action = if changes.is_empty() {
            None
        } else if changes.contains(FileChange::Deleted) {
            return Err(SyncError::consistency(format!(
                "live local version of {} compared as deleted",
                local.path
            )));
        } else if changes.contains(FileChange::New) || changes.contains(FileChange::ChangedType) {
            Some(FileSystemAction::change(local.clone(), winning.clone(), false))
        } else if changes.contains(FileChange::ChangedLinkTarget)
            && !changes.contains(FileChange::ChangedPath)
        {
            Some(FileSystemAction::new_symlink(winning.clone(), Some(local.clone())))
        } else if changes.only(&[
            FileChange::ChangedPath,
            FileChange::ChangedLastModified,
            FileChange::ChangedAttributes,
        ]) {
            Some(FileSystemAction::rename(local.clone(), winning.clone()))
        } else {
            Some(FileSystemAction::change(local.clone(), winning.clone(), false))
        };

        Ok(action)
    }
}

fn create(winning: &FileVersion) -> FileSystemAction {
    if winning.file_type == FileType::Symlink {
        FileSystemAction::new_symlink(winning.clone(), None)
    } else {
        FileSystemAction::new_file(winning.clone())
    }
}

fn record(action: &FileSystemAction, changes: &mut ChangeSet) {
    match &action.op {
        ActionOp::New { winning }
        | ActionOp::NewSymlink { winning, .. }
        | ActionOp::SetAttributes { winning } => changes.new_files.push(winning.path.clone()),
        ActionOp::Change {
            expected, winning, ..
        } => {
            if winning.is_deleted() {
                changes.deleted_files.push(expected.path.clone());
            } else {
                changes.changed_files.push(winning.path.clone());
            }
        }
        ActionOp::Rename { winning, .. } => changes.changed_files.push(winning.path.clone()),
        ActionOp::Delete { expected } => changes.deleted_files.push(expected.path.clone()),
    }
}
