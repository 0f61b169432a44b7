//! Content resolution, fetching and ordered execution of one batch.

use crate::actions::{ActionContext, ContentSource, FileSystemAction};
use crate::cache::ObjectCache;
use crate::config::SyncDownConfig;
use crate::error::{SyncError, SyncResult};
use crate::events::DownListener;
use crate::filesystem::{checksum_of, LocalFileSystem};
use crate::index::WinnerIndex;
use crate::metadata::MetadataStore;
use crate::transport::TransferManager;
use driftsync_protocol::{Checksum, FileContent, MultiChunk, MultiChunkId, RemoteFile};
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;
use tracing::{debug, info};

/// Where the content of one batch comes from.
#[derive(Debug, Clone, Default)]
pub struct ContentPlan {
    /// Chunk layout per content checksum.
    pub contents: HashMap<Checksum, FileContent>,
    /// Multichunk holding each chunk.
    pub chunk_locations: HashMap<Checksum, MultiChunkId>,
    /// Every multichunk the batch reads from.
    pub required: BTreeSet<MultiChunkId>,
}

/// Fetches content and executes sequenced actions.
pub struct ChangeApplier<'a> {
    fs: &'a dyn LocalFileSystem,
    metadata: &'a dyn MetadataStore,
    transfer: &'a dyn TransferManager,
    cache: &'a ObjectCache,
    config: &'a SyncDownConfig,
    listener: &'a dyn DownListener,
}

impl<'a> ChangeApplier<'a> {
    /// Creates an applier over the given collaborators.
    pub fn new(
        fs: &'a dyn LocalFileSystem,
        metadata: &'a dyn MetadataStore,
        transfer: &'a dyn TransferManager,
        cache: &'a ObjectCache,
        config: &'a SyncDownConfig,
        listener: &'a dyn DownListener,
    ) -> Self {
        Self {
            fs,
            metadata,
            transfer,
            cache,
            config,
            listener,
        }
    }

    /// Resolves, fetches and executes `actions`, which must already be sequenced.
    ///
    /// Returns the plan used, whose `required` set lists every multichunk
    /// the batch read from.
    ///
    /// # Errors
    ///
    /// Stops at the first failing action. Content that cannot be located
    /// is a consistency violation.
    pub fn apply(&self, actions: &[FileSystemAction], index: &WinnerIndex) -> SyncResult<ContentPlan> {
        let plan = self.resolve(actions, index)?;
        self.fetch(&plan)?;

        let source = PlannedContent::new(&plan, self.cache);
        let ctx = ActionContext {
            fs: self.fs,
            content: &source,
            config: self.config,
        };
        for action in actions {
            action.execute(&ctx)?;
        }

        info!(actions = actions.len(), multichunks = plan.required.len(), "batch applied");
        Ok(plan)
    }

    /// Determines which multichunks hold the content written by `actions`.
    ///
    /// Content already fully described by local metadata is preferred over
    /// the winner's batch.
    ///
    /// # Errors
    ///
    /// Returns a consistency violation if a content or chunk cannot be found.
    pub fn resolve(&self, actions: &[FileSystemAction], index: &WinnerIndex) -> SyncResult<ContentPlan> {
        let mut plan = ContentPlan::default();

        for winning in actions.iter().filter_map(FileSystemAction::content_to_materialize) {
            let Some(checksum) = &winning.checksum else {
                continue;
            };
            if plan.contents.contains_key(checksum) {
                continue;
            }

            let local = !self.metadata.multichunks_for_checksum(checksum)?.is_empty();
            let content = if local {
                self.metadata.file_content(checksum)?
            } else {
                match index.content(checksum) {
                    Some(content) => Some(content.clone()),
                    None => self.metadata.file_content(checksum)?,
                }
            };
            let content = content.ok_or_else(|| {
                SyncError::consistency(format!("unknown content {checksum} for {}", winning.path))
            })?;

            let known = self.metadata.multichunks_for_chunks(&content.chunks)?;
            for chunk in &content.chunks {
                let location = known
                    .get(chunk)
                    .or_else(|| index.multichunk_for_chunk(chunk))
                    .ok_or_else(|| {
                        SyncError::consistency(format!("Cannot find multichunk for chunk {chunk}"))
                    })?;
                plan.required.insert(location.clone());
                plan.chunk_locations.insert(chunk.clone(), location.clone());
            }

            debug!(path = %winning.path, local, chunks = content.chunks.len(), "content resolved");
            plan.contents.insert(checksum.clone(), content);
        }

        Ok(plan)
    }

    /// Downloads every required multichunk that is not cached yet.
    ///
    /// # Errors
    ///
    /// Propagates the first transfer failure; objects fetched before it
    /// stay cached.
    pub fn fetch(&self, plan: &ContentPlan) -> SyncResult<()> {
        let missing: Vec<RemoteFile> = plan
            .required
            .iter()
            .map(|id| RemoteFile::MultiChunk(id.clone()))
            .filter(|file| !self.cache.contains(file))
            .collect();

        for (i, file) in missing.iter().enumerate() {
            let name = file.name();
            self.listener.on_download_progress(&name, i + 1, missing.len());
            debug!(name = %name, "downloading multichunk");
            self.cache.fetch(self.transfer, file)?;
        }
        Ok(())
    }
}

/// Assembles file content from cached multichunks.
struct PlannedContent<'a> {
    plan: &'a ContentPlan,
    cache: &'a ObjectCache,
    decoded: RefCell<HashMap<MultiChunkId, Rc<MultiChunk>>>,
}

impl<'a> PlannedContent<'a> {
    fn new(plan: &'a ContentPlan, cache: &'a ObjectCache) -> Self {
        Self {
            plan,
            cache,
            decoded: RefCell::default(),
        }
    }

    fn multichunk(&self, id: &MultiChunkId) -> SyncResult<Rc<MultiChunk>> {
        if let Some(multichunk) = self.decoded.borrow().get(id) {
            return Ok(Rc::clone(multichunk));
        }
        let bytes = self
            .cache
            .get(&RemoteFile::MultiChunk(id.clone()))?
            .ok_or_else(|| SyncError::consistency(format!("multichunk {id} was not fetched")))?;
        let multichunk = Rc::new(MultiChunk::decode(&bytes)?);
        self.decoded
            .borrow_mut()
            .insert(id.clone(), Rc::clone(&multichunk));
        Ok(multichunk)
    }
}

impl ContentSource for PlannedContent<'_> {
    fn assemble(&self, checksum: &Checksum) -> SyncResult<Vec<u8>> {
        let content = self
            .plan
            .contents
            .get(checksum)
            .ok_or_else(|| SyncError::consistency(format!("content {checksum} was not resolved")))?;

        let mut data = Vec::with_capacity(usize::try_from(content.size).unwrap_or_default());
        for chunk in &content.chunks {
            let id = self
                .plan
                .chunk_locations
                .get(chunk)
                .ok_or_else(|| SyncError::consistency(format!("Cannot find multichunk for chunk {chunk}")))?;
            let multichunk = self.multichunk(id)?;
            let bytes = multichunk.chunk(chunk).ok_or_else(|| {
                SyncError::consistency(format!("multichunk {id} lacks chunk {chunk}"))
            })?;
            data.extend_from_slice(bytes);
        }

        if &checksum_of(&data) != checksum {
            return Err(SyncError::consistency(format!(
                "assembled content does not match checksum {checksum}"
            )));
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{DownEvent, NoopListener};
    use crate::filesystem::MemoryFileSystem;
    use crate::metadata::LocalDatabase;
    use crate::transport::MemoryTransfer;
    use driftsync_protocol::{
        ChunkData, DatabaseVersion, DatabaseVersionHeader, FileType, FileVersion, MultiChunkEntry,
    };
    use std::sync::mpsc::channel;

    struct Remote {
        transfer: MemoryTransfer,
        version: DatabaseVersion,
    }

    /// Uploads `data` split in two chunks inside multichunk `id`.
    fn remote_content(id: &str, data: &[u8]) -> (Remote, FileVersion) {
        let (left, right) = data.split_at(data.len() / 2);
        let chunks: Vec<ChunkData> = [left, right]
            .iter()
            .map(|part| ChunkData {
                checksum: checksum_of(part),
                data: part.to_vec(),
            })
            .collect();
        let checksum = checksum_of(data);
        let multichunk = MultiChunk {
            id: MultiChunkId(id.into()),
            chunks: chunks.clone(),
        };

        let transfer = MemoryTransfer::new();
        transfer
            .upload(&RemoteFile::MultiChunk(multichunk.id.clone()), &multichunk.encode().unwrap())
            .unwrap();

        let mut version =
            DatabaseVersion::new(DatabaseVersionHeader::new("B", "B1".parse().unwrap(), 1));
        version.file_contents.push(FileContent {
            checksum: checksum.clone(),
            size: data.len() as u64,
            chunks: chunks.iter().map(|c| c.checksum.clone()).collect(),
        });
        version.multichunks.push(MultiChunkEntry {
            id: multichunk.id.clone(),
            chunks: chunks.iter().map(|c| c.checksum.clone()).collect(),
        });

        let file = FileVersion {
            checksum: Some(checksum),
            size: data.len() as u64,
            last_modified: 42,
            ..FileVersion::new("docs/f", FileType::File)
        };
        (Remote { transfer, version }, file)
    }

    #[test]
    fn fetches_and_materializes_content() {
        let (remote, file) = remote_content("aa01", b"hello multichunk world");
        let index = WinnerIndex::build(std::slice::from_ref(&remote.version));
        let (fs, db, cache, config) = (
            MemoryFileSystem::new(),
            LocalDatabase::in_memory(),
            ObjectCache::in_memory(),
            SyncDownConfig::new("A"),
        );
        let (tx, rx) = channel();
        let applier = ChangeApplier::new(&fs, &db, &remote.transfer, &cache, &config, &tx);

        let plan = applier
            .apply(&[FileSystemAction::new_file(file)], &index)
            .unwrap();

        assert_eq!(plan.required.len(), 1);
        assert_eq!(fs.read("docs/f").unwrap(), b"hello multichunk world");
        drop(applier);
        drop(tx);
        let progress: Vec<DownEvent> = rx.iter().collect();
        assert_eq!(
            progress,
            vec![DownEvent::DownloadProgress {
                name: "multichunk-aa01".into(),
                index: 1,
                total: 1
            }]
        );
    }

    #[test]
    fn cached_multichunks_are_not_downloaded_again() {
        let (remote, file) = remote_content("bb02", b"cached content");
        let index = WinnerIndex::build(std::slice::from_ref(&remote.version));
        let (fs, db, cache, config) = (
            MemoryFileSystem::new(),
            LocalDatabase::in_memory(),
            ObjectCache::in_memory(),
            SyncDownConfig::new("A"),
        );
        let applier = ChangeApplier::new(&fs, &db, &remote.transfer, &cache, &config, &NoopListener);

        let actions = [FileSystemAction::new_file(file)];
        let plan = applier.resolve(&actions, &index).unwrap();
        applier.fetch(&plan).unwrap();

        remote.transfer.fail_download_of("multichunk-bb02");
        applier.apply(&actions, &index).unwrap();
        assert_eq!(fs.read("docs/f").unwrap(), b"cached content");
    }

    #[test]
    fn unresolvable_chunk_is_a_consistency_violation() {
        let (mut remote, file) = remote_content("cc03", b"orphan content");
        remote.version.multichunks.clear();
        let index = WinnerIndex::build(std::slice::from_ref(&remote.version));
        let (fs, db, cache, config) = (
            MemoryFileSystem::new(),
            LocalDatabase::in_memory(),
            ObjectCache::in_memory(),
            SyncDownConfig::new("A"),
        );
        let applier = ChangeApplier::new(&fs, &db, &remote.transfer, &cache, &config, &NoopListener);

        let err = applier
            .apply(&[FileSystemAction::new_file(file)], &index)
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(fs.properties("docs/f", false).unwrap().is_none());
    }

    #[test]
    fn transfer_failure_aborts_before_any_action() {
        let (remote, file) = remote_content("dd04", b"never written");
        let index = WinnerIndex::build(std::slice::from_ref(&remote.version));
        let (fs, db, cache, config) = (
            MemoryFileSystem::new(),
            LocalDatabase::in_memory(),
            ObjectCache::in_memory(),
            SyncDownConfig::new("A"),
        );
        remote.transfer.fail_download_of("multichunk-dd04");
        let applier = ChangeApplier::new(&fs, &db, &remote.transfer, &cache, &config, &NoopListener);

        let folder = FileSystemAction::new_file(FileVersion::new("docs", FileType::Folder));
        let err = applier
            .apply(&[folder, FileSystemAction::new_file(file)], &index)
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(fs.properties("docs", false).unwrap().is_none());
    }
}
