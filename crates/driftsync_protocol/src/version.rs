//! Committed change-sets.

use crate::file::{FileContent, FileHistory, MultiChunkEntry, MultiChunkId};
use crate::header::DatabaseVersionHeader;
use serde::{Deserialize, Serialize};

/// One committed change-set: a header plus the metadata it introduced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseVersion {
    /// Identity of this version.
    pub header: DatabaseVersionHeader,
    /// File histories touched, each holding only the versions added here.
    pub file_histories: Vec<FileHistory>,
    /// New file contents.
    pub file_contents: Vec<FileContent>,
    /// New multichunks.
    pub multichunks: Vec<MultiChunkEntry>,
}

impl DatabaseVersion {
    /// Creates an empty version for `header`.
    pub fn new(header: DatabaseVersionHeader) -> Self {
        Self {
            header,
            file_histories: Vec::new(),
            file_contents: Vec::new(),
            multichunks: Vec::new(),
        }
    }

    /// Ids of the multichunks introduced by this version.
    pub fn multichunk_ids(&self) -> impl Iterator<Item = &MultiChunkId> {
        self.multichunks.iter().map(|m| &m.id)
    }
}
