//! Comparison of expected file versions against observed state.

use crate::filesystem::FileProperties;
use driftsync_protocol::{FileType, FileVersion};
use std::collections::BTreeSet;

/// One difference between an expected and an actual file state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FileChange {
    /// Expected to exist, but is missing.
    Deleted,
    /// Expected to be gone, but exists.
    New,
    /// Entry kind differs.
    ChangedType,
    /// Path differs.
    ChangedPath,
    /// Modification time differs.
    ChangedLastModified,
    /// Size differs.
    ChangedSize,
    /// Content checksum differs.
    ChangedChecksum,
    /// Permission bits differ.
    ChangedAttributes,
    /// Symlink target differs.
    ChangedLinkTarget,
}

/// The set of differences found by a comparison.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileChanges(BTreeSet<FileChange>);

impl FileChanges {
    /// Returns true if nothing differs.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true if `change` was found.
    pub fn contains(&self, change: FileChange) -> bool {
        self.0.contains(&change)
    }

    /// Returns true if there are differences and all of them are in `allowed`.
    pub fn only(&self, allowed: &[FileChange]) -> bool {
        !self.0.is_empty() && self.0.iter().all(|c| allowed.contains(c))
    }

    /// Iterates over the differences.
    pub fn iter(&self) -> impl Iterator<Item = FileChange> + '_ {
        self.0.iter().copied()
    }

    fn add(&mut self, change: FileChange) {
        self.0.insert(change);
    }
}

impl FromIterator<FileChange> for FileChanges {
    fn from_iter<I: IntoIterator<Item = FileChange>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Compares an expected [`FileVersion`] against an actual state.
pub struct FileVersionComparator;

impl FileVersionComparator {
    /// Compares `expected` with what is on disk.
    ///
    /// `actual` is `None` if nothing exists at the path. Checksums are only
    /// compared if `with_checksum` is set; a size change always implies a
    /// content change.
    pub fn compare(
        expected: &FileVersion,
        actual: Option<&FileProperties>,
        with_checksum: bool,
    ) -> FileChanges {
        let mut changes = FileChanges::default();

        let actual = match (expected.is_deleted(), actual) {
            (true, None) => return changes,
            (false, None) => {
                changes.add(FileChange::Deleted);
                return changes;
            }
            (true, Some(_)) => {
                changes.add(FileChange::New);
                return changes;
            }
            (false, Some(actual)) => actual,
        };

        if expected.file_type != actual.file_type {
            changes.add(FileChange::ChangedType);
            return changes;
        }

        if expected.path != actual.path {
            changes.add(FileChange::ChangedPath);
        }

        match expected.file_type {
            FileType::Folder => {
                Self::compare_attributes(expected, actual, &mut changes);
            }
            FileType::Symlink => {
                if expected.link_target != actual.link_target {
                    changes.add(FileChange::ChangedLinkTarget);
                }
            }
            FileType::File => {
                if expected.last_modified != actual.last_modified {
                    changes.add(FileChange::ChangedLastModified);
                }
                if expected.size != actual.size {
                    changes.add(FileChange::ChangedSize);
                    changes.add(FileChange::ChangedChecksum);
                } else if with_checksum && expected.size > 0 && expected.checksum != actual.checksum {
                    changes.add(FileChange::ChangedChecksum);
                }
                Self::compare_attributes(expected, actual, &mut changes);
            }
        }

        changes
    }

    /// Compares two versions, treating `actual` as the observed state.
    pub fn compare_versions(expected: &FileVersion, actual: &FileVersion) -> FileChanges {
        if actual.is_deleted() {
            Self::compare(expected, None, true)
        } else {
            Self::compare(expected, Some(&FileProperties::from(actual)), true)
        }
    }

    fn compare_attributes(expected: &FileVersion, actual: &FileProperties, changes: &mut FileChanges) {
        if let (Some(want), Some(have)) = (expected.attributes, actual.attributes) {
            if want != have {
                changes.add(FileChange::ChangedAttributes);
            }
        }
    }
}
