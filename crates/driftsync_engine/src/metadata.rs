//! Local metadata store.
//!
//! The store holds every database version applied or committed locally,
//! each with a dirty flag, plus the bookkeeping a sync-down cycle needs:
//! known remote history objects, muddy multichunks and the compaction
//! counter.
//!
//! ## Transactions
//!
//! [`MetadataStore::begin`] snapshots the current state. Writes go to the
//! live state; [`MetadataStore::rollback`] restores the snapshot and
//! [`MetadataStore::commit`] drops it and persists. Writes outside a
//! transaction are persisted immediately.

use crate::error::{MetadataError, MetadataResult};
use driftsync_protocol::{
    Branch, Checksum, DatabaseVersion, DatabaseVersionHeader, FileContent, FileHistoryId,
    FileVersion, MultiChunkId,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Local metadata consumed and produced by sync-down.
pub trait MetadataStore: Send + Sync {
    /// Starts a transaction.
    fn begin(&self) -> MetadataResult<()>;

    /// Commits the open transaction.
    fn commit(&self) -> MetadataResult<()>;

    /// Discards every write since [`MetadataStore::begin`].
    fn rollback(&self) -> MetadataResult<()>;

    /// Headers of all non-dirty versions, in application order.
    fn local_branch(&self) -> MetadataResult<Branch>;

    /// Headers of all dirty versions.
    fn dirty_headers(&self) -> MetadataResult<Vec<DatabaseVersionHeader>>;

    /// Current version of every file history, from non-dirty versions.
    fn last_versions(&self) -> MetadataResult<HashMap<FileHistoryId, FileVersion>>;

    /// Appends a version, or clears the dirty flag of an identical one.
    fn persist_version(&self, version: &DatabaseVersion) -> MetadataResult<()>;

    /// Flags the version with this header as dirty.
    fn mark_dirty(&self, header: &DatabaseVersionHeader) -> MetadataResult<()>;

    /// Drops all dirty versions.
    fn remove_dirty_versions(&self) -> MetadataResult<()>;

    /// Multichunks holding the complete content with this checksum.
    ///
    /// Empty if the content is unknown or not fully stored locally.
    fn multichunks_for_checksum(&self, checksum: &Checksum) -> MetadataResult<Vec<MultiChunkId>>;

    /// Maps each known chunk to the multichunk holding it.
    fn multichunks_for_chunks(
        &self,
        chunks: &[Checksum],
    ) -> MetadataResult<HashMap<Checksum, MultiChunkId>>;

    /// Chunk layout of a content.
    fn file_content(&self, checksum: &Checksum) -> MetadataResult<Option<FileContent>>;

    /// Multichunks retained for superseded versions of other replicas.
    fn muddy_multichunks(&self) -> MetadataResult<BTreeMap<MultiChunkId, DatabaseVersionHeader>>;

    /// Records muddy multichunks with the header that referenced them.
    fn write_muddy_multichunks(
        &self,
        muddy: &BTreeMap<MultiChunkId, DatabaseVersionHeader>,
    ) -> MetadataResult<()>;

    /// Forgets muddy multichunks.
    fn remove_muddy_multichunks(&self, ids: &BTreeSet<MultiChunkId>) -> MetadataResult<()>;

    /// Last compaction counter seen on the remote.
    fn cleanup_number(&self) -> MetadataResult<u64>;

    /// Records the compaction counter.
    fn set_cleanup_number(&self, number: u64) -> MetadataResult<()>;

    /// Names of remote history objects already processed.
    fn known_databases(&self) -> MetadataResult<BTreeSet<String>>;

    /// Records processed remote history objects.
    fn add_known_databases(&self, names: &[String]) -> MetadataResult<()>;

    /// Drops all versions and known history objects.
    fn discard_all(&self) -> MetadataResult<()>;
}

/// One stored database version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredVersion {
    /// The version.
    pub version: DatabaseVersion,
    /// Superseded by a winner and excluded from reconciliation.
    pub dirty: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DatabaseState {
    versions: Vec<StoredVersion>,
    known_databases: BTreeSet<String>,
    muddy_multichunks: BTreeMap<MultiChunkId, DatabaseVersionHeader>,
    cleanup_number: u64,
}

impl DatabaseState {
    fn live(&self) -> impl Iterator<Item = &DatabaseVersion> {
        self.versions.iter().filter(|s| !s.dirty).map(|s| &s.version)
    }

    fn chunk_locations(&self) -> HashMap<&Checksum, &MultiChunkId> {
        self.live()
            .flat_map(|v| &v.multichunks)
            .flat_map(|m| m.chunks.iter().map(move |c| (c, &m.id)))
            .collect()
    }

    fn content(&self, checksum: &Checksum) -> Option<&FileContent> {
        self.live()
            .flat_map(|v| &v.file_contents)
            .find(|c| &c.checksum == checksum)
    }
}

#[derive(Debug, Default)]
struct Inner {
    state: DatabaseState,
    snapshot: Option<DatabaseState>,
}

/// A [`MetadataStore`] kept in memory, optionally persisted as JSON.
#[derive(Debug, Default)]
pub struct LocalDatabase {
    inner: RwLock<Inner>,
    path: Option<PathBuf>,
}

impl LocalDatabase {
    /// Creates an empty store that is never persisted.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Opens the store at `path`, starting empty if the file does not exist.
    ///
    /// # Errors
    ///
    /// Fails if the file exists but cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> MetadataResult<Self> {
        let path = path.into();
        let state = if path.exists() {
            serde_json::from_slice(&fs::read(&path)?)?
        } else {
            DatabaseState::default()
        };
        Ok(Self {
            inner: RwLock::new(Inner {
                state,
                snapshot: None,
            }),
            path: Some(path),
        })
    }

    /// The backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// All stored versions in application order, dirty ones included.
    pub fn versions(&self) -> Vec<StoredVersion> {
        self.inner.read().state.versions.clone()
    }

    fn save(&self, state: &DatabaseState) -> MetadataResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let partial = path.with_extension("json.part");
        fs::write(&partial, serde_json::to_vec_pretty(state)?)?;
        fs::rename(&partial, path)?;
        debug!(path = %path.display(), versions = state.versions.len(), "metadata saved");
        Ok(())
    }

    fn read<T>(&self, f: impl FnOnce(&DatabaseState) -> T) -> MetadataResult<T> {
        Ok(f(&self.inner.read().state))
    }

    fn write<T>(&self, f: impl FnOnce(&mut DatabaseState) -> MetadataResult<T>) -> MetadataResult<T> {
        let mut inner = self.inner.write();
        let result = f(&mut inner.state)?;
        if inner.snapshot.is_none() {
            self.save(&inner.state)?;
        }
        Ok(result)
    }
}

impl MetadataStore for LocalDatabase {
    fn begin(&self) -> MetadataResult<()> {
        let mut inner = self.inner.write();
        if inner.snapshot.is_some() {
            return Err(MetadataError::TransactionActive);
        }
        inner.snapshot = Some(inner.state.clone());
        Ok(())
    }

    fn commit(&self) -> MetadataResult<()> {
        let mut inner = self.inner.write();
        if inner.snapshot.is_none() {
            return Err(MetadataError::NoTransaction);
        }
        self.save(&inner.state)?;
        inner.snapshot = None;
        Ok(())
    }

    fn rollback(&self) -> MetadataResult<()> {
        let mut inner = self.inner.write();
        let snapshot = inner.snapshot.take().ok_or(MetadataError::NoTransaction)?;
        inner.state = snapshot;
        Ok(())
    }

    fn local_branch(&self) -> MetadataResult<Branch> {
        self.read(|s| s.live().map(|v| v.header.clone()).collect())
    }

    fn dirty_headers(&self) -> MetadataResult<Vec<DatabaseVersionHeader>> {
        self.read(|s| {
            s.versions
                .iter()
                .filter(|v| v.dirty)
                .map(|v| v.version.header.clone())
                .collect()
        })
    }

    fn last_versions(&self) -> MetadataResult<HashMap<FileHistoryId, FileVersion>> {
        self.read(|s| {
            let mut last: HashMap<FileHistoryId, FileVersion> = HashMap::new();
            for history in s.live().flat_map(|v| &v.file_histories) {
                for version in &history.versions {
                    let newer = last
                        .get(&history.id)
                        .map_or(true, |known| known.version <= version.version);
                    if newer {
                        last.insert(history.id.clone(), version.clone());
                    }
                }
            }
            last
        })
    }

    fn persist_version(&self, version: &DatabaseVersion) -> MetadataResult<()> {
        self.write(|s| {
            match s.versions.iter_mut().find(|v| v.version.header == version.header) {
                Some(stored) => {
                    stored.version = version.clone();
                    stored.dirty = false;
                }
                None => s.versions.push(StoredVersion {
                    version: version.clone(),
                    dirty: false,
                }),
            }
            Ok(())
        })
    }

    fn mark_dirty(&self, header: &DatabaseVersionHeader) -> MetadataResult<()> {
        self.write(|s| {
            let stored = s
                .versions
                .iter_mut()
                .find(|v| &v.version.header == header)
                .ok_or_else(|| MetadataError::UnknownVersion(header.to_string()))?;
            stored.dirty = true;
            Ok(())
        })
    }

    fn remove_dirty_versions(&self) -> MetadataResult<()> {
        self.write(|s| {
            s.versions.retain(|v| !v.dirty);
            Ok(())
        })
    }

    fn multichunks_for_checksum(&self, checksum: &Checksum) -> MetadataResult<Vec<MultiChunkId>> {
        self.read(|s| {
            let Some(content) = s.content(checksum) else {
                return Vec::new();
            };
            let locations = s.chunk_locations();
            let mut ids = BTreeSet::new();
            for chunk in &content.chunks {
                match locations.get(chunk) {
                    Some(id) => {
                        ids.insert((*id).clone());
                    }
                    None => return Vec::new(),
                }
            }
            ids.into_iter().collect()
        })
    }

    fn multichunks_for_chunks(
        &self,
        chunks: &[Checksum],
    ) -> MetadataResult<HashMap<Checksum, MultiChunkId>> {
        self.read(|s| {
            let locations = s.chunk_locations();
            chunks
                .iter()
                .filter_map(|c| locations.get(c).map(|id| (c.clone(), (*id).clone())))
                .collect()
        })
    }

    fn file_content(&self, checksum: &Checksum) -> MetadataResult<Option<FileContent>> {
        self.read(|s| s.content(checksum).cloned())
    }

    fn muddy_multichunks(&self) -> MetadataResult<BTreeMap<MultiChunkId, DatabaseVersionHeader>> {
        self.read(|s| s.muddy_multichunks.clone())
    }

    fn write_muddy_multichunks(
        &self,
        muddy: &BTreeMap<MultiChunkId, DatabaseVersionHeader>,
    ) -> MetadataResult<()> {
        self.write(|s| {
            s.muddy_multichunks
                .extend(muddy.iter().map(|(id, h)| (id.clone(), h.clone())));
            Ok(())
        })
    }

    fn remove_muddy_multichunks(&self, ids: &BTreeSet<MultiChunkId>) -> MetadataResult<()> {
        self.write(|s| {
            s.muddy_multichunks.retain(|id, _| !ids.contains(id));
            Ok(())
        })
    }

    fn cleanup_number(&self) -> MetadataResult<u64> {
        self.read(|s| s.cleanup_number)
    }

    fn set_cleanup_number(&self, number: u64) -> MetadataResult<()> {
        self.write(|s| {
            s.cleanup_number = number;
            Ok(())
        })
    }

    fn known_databases(&self) -> MetadataResult<BTreeSet<String>> {
        self.read(|s| s.known_databases.clone())
    }

    fn add_known_databases(&self, names: &[String]) -> MetadataResult<()> {
        self.write(|s| {
            s.known_databases.extend(names.iter().cloned());
            Ok(())
        })
    }

    fn discard_all(&self) -> MetadataResult<()> {
        self.write(|s| {
            s.versions.clear();
            s.known_databases.clear();
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftsync_protocol::{FileHistory, FileStatus, FileType, MultiChunkEntry};
    use tempfile::TempDir;

    fn version(client: &str, clock: &str, path: &str) -> DatabaseVersion {
        let header = DatabaseVersionHeader::new(client, clock.parse().unwrap(), 1);
        let mut version = DatabaseVersion::new(header);
        let mut history = FileHistory::new(FileHistoryId(path.into()));
        history.versions.push(FileVersion::new(path, FileType::File));
        version.file_histories.push(history);
        version
    }

    #[test]
    fn rollback_restores_snapshot() {
        let db = LocalDatabase::in_memory();
        db.persist_version(&version("A", "A1", "a")).unwrap();

        db.begin().unwrap();
        db.persist_version(&version("A", "A2", "b")).unwrap();
        db.set_cleanup_number(3).unwrap();
        assert_eq!(db.local_branch().unwrap().len(), 2);
        db.rollback().unwrap();

        assert_eq!(db.local_branch().unwrap().len(), 1);
        assert_eq!(db.cleanup_number().unwrap(), 0);
        assert!(matches!(db.commit(), Err(MetadataError::NoTransaction)));
    }

    #[test]
    fn nested_begin_rejected() {
        let db = LocalDatabase::in_memory();
        db.begin().unwrap();
        assert!(matches!(db.begin(), Err(MetadataError::TransactionActive)));
    }

    #[test]
    fn dirty_versions_leave_branch_and_last_versions() {
        let db = LocalDatabase::in_memory();
        let first = version("A", "A1", "a");
        let second = version("A", "A2", "b");
        db.persist_version(&first).unwrap();
        db.persist_version(&second).unwrap();

        db.mark_dirty(&second.header).unwrap();
        assert_eq!(db.local_branch().unwrap().len(), 1);
        assert_eq!(db.dirty_headers().unwrap(), vec![second.header.clone()]);
        assert!(!db.last_versions().unwrap().contains_key(&FileHistoryId("b".into())));

        db.remove_dirty_versions().unwrap();
        assert!(db.dirty_headers().unwrap().is_empty());
        assert!(db.mark_dirty(&second.header).is_err());
    }

    #[test]
    fn last_versions_follow_history() {
        let db = LocalDatabase::in_memory();
        let first = version("A", "A1", "a");
        let mut second = DatabaseVersion::new(DatabaseVersionHeader::new("A", "A2".parse().unwrap(), 2));
        let mut history = FileHistory::new(FileHistoryId("a".into()));
        let deleted = first.file_histories[0].versions[0].next(FileStatus::Deleted);
        history.versions.push(deleted.clone());
        second.file_histories.push(history);

        db.persist_version(&first).unwrap();
        db.persist_version(&second).unwrap();
        assert_eq!(db.last_versions().unwrap()[&FileHistoryId("a".into())], deleted);
    }

    #[test]
    fn multichunk_lookups() {
        let db = LocalDatabase::in_memory();
        let mut v = version("A", "A1", "a");
        let (c1, c2) = (Checksum("c1".into()), Checksum("c2".into()));
        v.file_contents.push(FileContent {
            checksum: Checksum("full".into()),
            size: 10,
            chunks: vec![c1.clone(), c2.clone()],
        });
        v.file_contents.push(FileContent {
            checksum: Checksum("partial".into()),
            size: 10,
            chunks: vec![c1.clone(), Checksum("missing".into())],
        });
        v.multichunks.push(MultiChunkEntry {
            id: MultiChunkId("m1".into()),
            chunks: vec![c1.clone(), c2.clone()],
        });
        db.persist_version(&v).unwrap();

        assert_eq!(
            db.multichunks_for_checksum(&Checksum("full".into())).unwrap(),
            vec![MultiChunkId("m1".into())]
        );
        assert!(db
            .multichunks_for_checksum(&Checksum("partial".into()))
            .unwrap()
            .is_empty());
        assert_eq!(db.multichunks_for_chunks(&[c2.clone()]).unwrap().len(), 1);
        assert!(db.file_content(&Checksum("nope".into())).unwrap().is_none());
    }

    #[test]
    fn persisted_state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("meta/metadata.json");
        {
            let db = LocalDatabase::open(&path).unwrap();
            db.begin().unwrap();
            db.persist_version(&version("A", "A1", "a")).unwrap();
            db.add_known_databases(&["db-A-0000000001".into()]).unwrap();
            db.commit().unwrap();

            db.begin().unwrap();
            db.set_cleanup_number(9).unwrap();
            db.rollback().unwrap();
        }

        let db = LocalDatabase::open(&path).unwrap();
        assert_eq!(db.local_branch().unwrap().len(), 1);
        assert!(db.known_databases().unwrap().contains("db-A-0000000001"));
        assert_eq!(db.cleanup_number().unwrap(), 0);
    }

    #[test]
    fn muddy_bookkeeping() {
        let db = LocalDatabase::in_memory();
        let header = DatabaseVersionHeader::new("B", "B1".parse().unwrap(), 1);
        let muddy = BTreeMap::from([
            (MultiChunkId("m1".into()), header.clone()),
            (MultiChunkId("m2".into()), header),
        ]);
        db.write_muddy_multichunks(&muddy).unwrap();
        db.remove_muddy_multichunks(&BTreeSet::from([MultiChunkId("m1".into())]))
            .unwrap();
        assert_eq!(
            db.muddy_multichunks().unwrap().keys().cloned().collect::<Vec<_>>(),
            vec![MultiChunkId("m2".into())]
        );
    }
}
