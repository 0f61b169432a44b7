//! Lookup tables over one batch of winner versions.

use driftsync_protocol::{
    Checksum, DatabaseVersion, FileContent, FileHistory, FileHistoryId, FileVersion, MultiChunkId,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Indexes built once per loaded batch of winner database versions.
#[derive(Debug, Clone, Default)]
pub struct WinnerIndex {
    histories: BTreeMap<FileHistoryId, FileHistory>,
    contents: HashMap<Checksum, FileContent>,
    chunk_locations: HashMap<Checksum, MultiChunkId>,
    multichunks: BTreeSet<MultiChunkId>,
}

impl WinnerIndex {
    /// Builds the indexes for `versions`, applied in order.
    pub fn build(versions: &[DatabaseVersion]) -> Self {
        let mut index = Self::default();

        for version in versions {
            for history in &version.file_histories {
                index
                    .histories
                    .entry(history.id.clone())
                    .and_modify(|h| h.merge(history))
                    .or_insert_with(|| history.clone());
            }
            for content in &version.file_contents {
                index
                    .contents
                    .insert(content.checksum.clone(), content.clone());
            }
            for multichunk in &version.multichunks {
                for chunk in &multichunk.chunks {
                    index
                        .chunk_locations
                        .insert(chunk.clone(), multichunk.id.clone());
                }
                index.multichunks.insert(multichunk.id.clone());
            }
        }

        index
    }

    /// File histories touched by the batch, in id order.
    pub fn histories(&self) -> impl Iterator<Item = &FileHistory> {
        self.histories.values()
    }

    /// Ids of the histories touched by the batch.
    pub fn history_ids(&self) -> impl Iterator<Item = &FileHistoryId> {
        self.histories.keys()
    }

    /// Chunk layout of a content, if introduced by the batch.
    pub fn content(&self, checksum: &Checksum) -> Option<&FileContent> {
        self.contents.get(checksum)
    }

    /// Multichunk holding `chunk`, if introduced by the batch.
    pub fn multichunk_for_chunk(&self, chunk: &Checksum) -> Option<&MultiChunkId> {
        self.chunk_locations.get(chunk)
    }

    /// Multichunks introduced by the batch.
    pub fn multichunk_ids(&self) -> &BTreeSet<MultiChunkId> {
        &self.multichunks
    }

    /// The newest non-deleted version of `id` older than `before`.
    pub fn previous_live_version(&self, id: &FileHistoryId, before: u64) -> Option<&FileVersion> {
        self.histories
            .get(id)?
            .versions
            .iter()
            .rev()
            .find(|v| v.version < before && !v.is_deleted())
    }
}
