//! File history model.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identity of a logical file across renames.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileHistoryId(pub String);

impl FileHistoryId {
    /// Generates a fresh random id.
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }
}

impl fmt::Display for FileHistoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lowercase hex digest of a file or chunk.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checksum(pub String);

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a multichunk container.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MultiChunkId(pub String);

impl fmt::Display for MultiChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of filesystem entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileType {
    /// Regular file.
    File,
    /// Directory.
    Folder,
    /// Symbolic link.
    Symlink,
}

/// How a version relates to its predecessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileStatus {
    /// First version of the history.
    New,
    /// Content or metadata changed.
    Changed,
    /// Path changed.
    Renamed,
    /// The file no longer exists.
    Deleted,
}

/// One state of one logical file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileVersion {
    /// Monotonic per-history version number, starting at 1.
    pub version: u64,
    /// Path relative to the sync root, `/`-separated.
    pub path: String,
    /// Entry kind.
    pub file_type: FileType,
    /// Status relative to the previous version.
    pub status: FileStatus,
    /// Content checksum; `None` for folders, symlinks and empty files.
    pub checksum: Option<Checksum>,
    /// Size in bytes.
    pub size: u64,
    /// Modification time in milliseconds since the Unix epoch.
    pub last_modified: u64,
    /// Unix permission bits; `None` when not tracked.
    pub attributes: Option<u32>,
    /// Symlink target.
    pub link_target: Option<String>,
}

impl FileVersion {
    /// Creates a version with the given path and type, status `New`.
    pub fn new(path: impl Into<String>, file_type: FileType) -> Self {
        Self {
            version: 1,
            path: path.into(),
            file_type,
            status: FileStatus::New,
            checksum: None,
            size: 0,
            last_modified: 0,
            attributes: None,
            link_target: None,
        }
    }

    /// Returns true if this version marks the file as gone.
    pub fn is_deleted(&self) -> bool {
        self.status == FileStatus::Deleted
    }

    /// File name, the last path component.
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Returns the successor version with the given status.
    #[must_use]
    pub fn next(&self, status: FileStatus) -> Self {
        Self {
            version: self.version + 1,
            status,
            ..self.clone()
        }
    }
}

/// Ordered versions of one logical file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHistory {
    /// Stable identity.
    pub id: FileHistoryId,
    /// Versions, oldest first.
    pub versions: Vec<FileVersion>,
}

impl FileHistory {
    /// Creates an empty history.
    pub fn new(id: FileHistoryId) -> Self {
        Self {
            id,
            versions: Vec::new(),
        }
    }

    /// The current state of the file.
    pub fn last_version(&self) -> Option<&FileVersion> {
        self.versions.last()
    }

    /// Adds versions from `other`, keeping version-number order.
    pub fn merge(&mut self, other: &FileHistory) {
        for version in &other.versions {
            if !self.versions.iter().any(|v| v.version == version.version) {
                self.versions.push(version.clone());
            }
        }
        self.versions.sort_by_key(|v| v.version);
    }
}

/// Chunk layout of one distinct file content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContent {
    /// Checksum of the full content.
    pub checksum: Checksum,
    /// Size in bytes.
    pub size: u64,
    /// Chunk checksums in content order.
    pub chunks: Vec<Checksum>,
}

/// Chunks bundled into one multichunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiChunkEntry {
    /// Multichunk id.
    pub id: MultiChunkId,
    /// Chunks stored inside.
    pub chunks: Vec<Checksum>,
}
