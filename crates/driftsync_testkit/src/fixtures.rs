//! Replica fixtures for multi-replica scenarios.
//!
//! A [`Cloud`] is a shared in-memory remote plus a logical clock used for
//! version timestamps and file modification times. Every [`Replica`] runs
//! the real sync-down orchestrator and a minimal "up" side that commits
//! its local files as a new database version.

use driftsync_engine::{
    checksum_of, DownOutcome, FileVersionComparator, LocalDatabase, LocalFileSystem,
    MemoryFileSystem, MemoryTransfer, MetadataStore, NoopListener, SyncDownConfig,
    SyncDownOrchestrator, SyncResult, TransferManager,
};
use driftsync_protocol::{
    encode_versions, Checksum, ChunkData, DatabaseRemoteFile, DatabaseVersion,
    DatabaseVersionHeader, FileContent, FileHistory, FileHistoryId, FileStatus, FileType,
    FileVersion, MultiChunk, MultiChunkEntry, MultiChunkId, RemoteFile, VectorClock,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Size of the chunks a commit splits file content into.
pub const CHUNK_SIZE: usize = 4096;

/// The orchestrator type every replica runs.
pub type Orchestrator = SyncDownOrchestrator<MemoryTransfer, LocalDatabase, MemoryFileSystem>;

/// A shared remote and logical clock.
#[derive(Clone, Default)]
pub struct Cloud {
    remote: MemoryTransfer,
    ticks: Arc<AtomicU64>,
}

impl Cloud {
    /// Creates an empty cloud.
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared remote store.
    pub fn remote(&self) -> &MemoryTransfer {
        &self.remote
    }

    /// Advances the logical clock and returns the new time.
    pub fn tick(&self) -> u64 {
        self.ticks.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Creates a replica with default configuration.
    pub fn replica(&self, name: &str) -> Replica {
        self.replica_with(SyncDownConfig::new(name))
    }

    /// Creates a replica with the given configuration.
    pub fn replica_with(&self, config: SyncDownConfig) -> Replica {
        let down = SyncDownOrchestrator::new(
            config,
            self.remote.clone(),
            LocalDatabase::in_memory(),
            MemoryFileSystem::new(),
        )
        .expect("Failed to create orchestrator");
        Replica {
            cloud: self.clone(),
            down,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Names of all remote objects.
    pub fn objects(&self) -> Vec<String> {
        self.remote.object_names()
    }
}

/// One entry of a replica's sync folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    /// A folder.
    Folder,
    /// A regular file and its content.
    File(Vec<u8>),
    /// A symlink and its target.
    Symlink(String),
}

/// A replica with its own sync folder and metadata.
pub struct Replica {
    cloud: Cloud,
    down: Orchestrator,
    pending: Mutex<Vec<(RemoteFile, Vec<u8>)>>,
}

impl Replica {
    /// Replica id.
    pub fn name(&self) -> &str {
        &self.down.config().client_name
    }

    /// The sync-down orchestrator.
    pub fn orchestrator(&self) -> &Orchestrator {
        &self.down
    }

    /// The local sync folder.
    pub fn fs(&self) -> &MemoryFileSystem {
        self.down.fs()
    }

    /// The local metadata store.
    pub fn metadata(&self) -> &LocalDatabase {
        self.down.metadata()
    }

    /// Writes a file and stamps it with the current logical time.
    pub fn write(&self, path: &str, content: &[u8]) {
        self.fs().write_file(path, content).expect("Failed to write file");
        self.fs()
            .set_last_modified(path, self.cloud.tick())
            .expect("Failed to set mtime");
    }

    /// Creates a folder.
    pub fn mkdir(&self, path: &str) {
        self.fs().create_folder(path).expect("Failed to create folder");
    }

    /// Creates a symlink.
    pub fn symlink(&self, path: &str, target: &str) {
        self.fs()
            .create_symlink(path, target)
            .expect("Failed to create symlink");
    }

    /// Moves a file or folder.
    pub fn rename(&self, from: &str, to: &str) {
        self.fs().rename(from, to).expect("Failed to rename");
    }

    /// Removes a file, or an empty folder.
    pub fn remove(&self, path: &str) {
        let props = self
            .fs()
            .properties(path, false)
            .expect("Failed to stat")
            .expect("Nothing to remove");
        if props.file_type == FileType::Folder {
            assert!(self.fs().remove_folder(path).expect("Failed to remove folder"));
        } else {
            self.fs().remove_file(path).expect("Failed to remove file");
        }
    }

    /// Content of the sync folder.
    pub fn tree(&self) -> BTreeMap<String, Entry> {
        self.fs()
            .walk(false)
            .expect("Failed to walk")
            .into_iter()
            .map(|p| {
                let entry = match p.file_type {
                    FileType::Folder => Entry::Folder,
                    FileType::File => Entry::File(self.fs().read(&p.path).expect("Failed to read")),
                    FileType::Symlink => Entry::Symlink(p.link_target.unwrap_or_default()),
                };
                (p.path, entry)
            })
            .collect()
    }

    /// Sorted paths of the sync folder.
    pub fn paths(&self) -> Vec<String> {
        self.tree().into_keys().collect()
    }

    /// Content of one file, if it exists.
    pub fn read(&self, path: &str) -> Option<Vec<u8>> {
        match self.tree().remove(path) {
            Some(Entry::File(content)) => Some(content),
            _ => None,
        }
    }

    /// Headers of the local branch.
    pub fn branch(&self) -> Vec<DatabaseVersionHeader> {
        self.metadata()
            .local_branch()
            .expect("Failed to read branch")
            .headers()
            .to_vec()
    }

    /// Runs one sync-down cycle.
    pub fn down(&self) -> SyncResult<DownOutcome> {
        self.down.sync_down(&NoopListener)
    }

    /// Commits local changes and uploads them.
    pub fn up(&self) -> Option<DatabaseVersionHeader> {
        let header = self.commit();
        self.push();
        header
    }

    /// Runs sync-down, then commits and uploads local changes.
    pub fn sync(&self) -> SyncResult<DownOutcome> {
        let outcome = self.down()?;
        self.up();
        Ok(outcome)
    }

    /// Uploads objects of earlier commits.
    pub fn push(&self) {
        for (file, data) in self.pending.lock().drain(..) {
            self.cloud
                .remote
                .upload(&file, &data)
                .expect("Failed to upload");
        }
    }

    /// Records local changes as a new database version without uploading.
    ///
    /// Returns `None` if nothing changed since the last known version.
    pub fn commit(&self) -> Option<DatabaseVersionHeader> {
        let metadata = self.metadata();
        let last = metadata.last_versions().expect("Failed to read last versions");
        let mut known: HashMap<String, (FileHistoryId, FileVersion)> = last
            .into_iter()
            .filter(|(_, v)| !v.is_deleted())
            .map(|(id, v)| (v.path.clone(), (id, v)))
            .collect();

        let mut histories = Vec::new();
        let mut added = Vec::new();
        for props in self.fs().walk(true).expect("Failed to walk") {
            let observed = FileVersion {
                checksum: props.checksum.clone(),
                size: props.size,
                last_modified: props.last_modified,
                attributes: props.attributes,
                link_target: props.link_target.clone(),
                ..FileVersion::new(&props.path, props.file_type)
            };
            match known.remove(&props.path) {
                Some((id, previous)) if previous.file_type == props.file_type => {
                    if !FileVersionComparator::compare(&previous, Some(&props), true).is_empty() {
                        histories.push(successor(id, &previous, observed, FileStatus::Changed));
                    }
                }
                Some((id, previous)) => {
                    histories.push(successor(id, &previous, previous.clone(), FileStatus::Deleted));
                    added.push(observed);
                }
                None => added.push(observed),
            }
        }

        // Unmatched files with identical non-empty content were renamed.
        let mut vanished: Vec<(FileHistoryId, FileVersion)> = known.into_values().collect();
        vanished.sort_by(|a, b| a.1.path.cmp(&b.1.path));
        for observed in added {
            let renamed = vanished.iter().position(|(_, v)| {
                v.file_type == FileType::File
                    && observed.file_type == FileType::File
                    && v.checksum.is_some()
                    && v.checksum == observed.checksum
            });
            match renamed {
                Some(i) => {
                    let (id, previous) = vanished.remove(i);
                    histories.push(successor(id, &previous, observed, FileStatus::Renamed));
                }
                None => {
                    let mut history = FileHistory::new(FileHistoryId::random());
                    history.versions.push(observed);
                    histories.push(history);
                }
            }
        }
        for (id, previous) in vanished {
            histories.push(successor(id, &previous, previous.clone(), FileStatus::Deleted));
        }

        if histories.is_empty() {
            return None;
        }
        histories.sort_by(|a, b| a.id.cmp(&b.id));

        let header = self.next_header();
        let mut version = DatabaseVersion::new(header.clone());
        version.file_histories = histories;
        self.add_content(&mut version);

        let db = RemoteFile::Database(DatabaseRemoteFile::new(self.name(), header.own_counter()));
        let bytes = encode_versions(std::slice::from_ref(&version)).expect("Failed to encode");
        metadata.remove_dirty_versions().expect("Failed to drop dirty versions");
        metadata.persist_version(&version).expect("Failed to persist");
        metadata
            .add_known_databases(&[db.name()])
            .expect("Failed to record own database");
        self.pending.lock().push((db, bytes));
        Some(header)
    }

    fn next_header(&self) -> DatabaseVersionHeader {
        let name = self.name().to_string();
        let stored = self.metadata().versions();
        let highest_own = stored
            .iter()
            .map(|s| s.version.header.vector_clock.get(&name))
            .max()
            .unwrap_or(0);
        let mut clock = self
            .metadata()
            .local_branch()
            .expect("Failed to read branch")
            .last()
            .map(|h| h.vector_clock.clone())
            .unwrap_or_else(VectorClock::new);
        clock.set(name.clone(), highest_own + 1);
        DatabaseVersionHeader::new(name, clock, self.cloud.tick())
    }

    /// Adds content and chunk layout for files whose content is not known yet.
    fn add_content(&self, version: &mut DatabaseVersion) {
        let metadata = self.metadata();
        let mut chunks: Vec<ChunkData> = Vec::new();
        let mut chunked: HashSet<Checksum> = HashSet::new();

        let files: Vec<FileVersion> = version
            .file_histories
            .iter()
            .filter_map(FileHistory::last_version)
            .filter(|v| !v.is_deleted() && v.file_type == FileType::File)
            .cloned()
            .collect();
        for file in files {
            let Some(checksum) = &file.checksum else {
                continue;
            };
            let known = metadata.file_content(checksum).expect("Failed to read content").is_some()
                || version.file_contents.iter().any(|c| &c.checksum == checksum);
            if known {
                continue;
            }

            let data = self.fs().read(&file.path).expect("Failed to read file");
            let parts: Vec<ChunkData> = data
                .chunks(CHUNK_SIZE)
                .map(|part| ChunkData {
                    checksum: checksum_of(part),
                    data: part.to_vec(),
                })
                .collect();
            let ids: Vec<Checksum> = parts.iter().map(|c| c.checksum.clone()).collect();
            let stored = metadata.multichunks_for_chunks(&ids).expect("Failed to locate chunks");
            for part in parts {
                if !stored.contains_key(&part.checksum) && chunked.insert(part.checksum.clone()) {
                    chunks.push(part);
                }
            }
            version.file_contents.push(FileContent {
                checksum: checksum.clone(),
                size: data.len() as u64,
                chunks: ids,
            });
        }

        if chunks.is_empty() {
            return;
        }
        let multichunk = MultiChunk {
            id: MultiChunkId(uuid::Uuid::new_v4().simple().to_string()),
            chunks,
        };
        version.multichunks.push(MultiChunkEntry {
            id: multichunk.id.clone(),
            chunks: multichunk.chunks.iter().map(|c| c.checksum.clone()).collect(),
        });
        let bytes = multichunk.encode().expect("Failed to encode multichunk");
        self.pending
            .lock()
            .push((RemoteFile::MultiChunk(multichunk.id), bytes));
    }
}

fn successor(id: FileHistoryId, previous: &FileVersion, observed: FileVersion, status: FileStatus) -> FileHistory {
    let mut history = FileHistory::new(id);
    history.versions.push(FileVersion {
        version: previous.version + 1,
        status,
        ..observed
    });
    history
}
