//! Sync-down state machine.

use crate::actions::FileSystemAction;
use crate::applier::ChangeApplier;
use crate::cache::ObjectCache;
use crate::changeset::ChangeSet;
use crate::config::{ConflictStrategy, SyncDownConfig};
use crate::error::{PreconditionFailure, SyncError, SyncResult};
use crate::events::{DownListener, DownOutcome};
use crate::filesystem::LocalFileSystem;
use crate::fs_reconciliator::FileSystemActionReconciliator;
use crate::index::WinnerIndex;
use crate::metadata::MetadataStore;
use crate::reconciliator::DatabaseReconciliator;
use crate::sequencer::ActionSequencer;
use crate::transport::TransferManager;
use driftsync_protocol::{
    read_headers, read_versions, read_versions_in_range, ActionRemoteFile, Branch, Branches,
    DatabaseRemoteFile, DatabaseVersion, DatabaseVersionHeader, FileHistoryId, FileVersion,
    MaintenanceOperation, MultiChunkId, RemoteFile, RemoteFileKind,
};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// The current state of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownState {
    /// No cycle has run yet.
    Idle,
    /// Checking maintenance markers and options.
    CheckPreconditions,
    /// Listing remote history objects.
    ListRemote,
    /// Downloading unknown history objects.
    DownloadUnknown,
    /// Reading headers of downloaded history objects.
    ReadHeaders,
    /// Combining local and remote branches.
    BuildBranches,
    /// Selecting the winner branch.
    DetermineWinner,
    /// Marking superseded local versions dirty.
    PruneLocal,
    /// Applying winner versions batch by batch.
    ApplyWinner,
    /// Recording content of losing remote versions.
    TrackMuddyContent,
    /// Committing local metadata.
    Commit,
    /// The last cycle applied remote changes.
    Succeeded,
    /// The last cycle found nothing to do.
    NoOp,
    /// The last cycle was aborted or failed.
    Failed,
}

impl DownState {
    /// Returns true while a cycle is running.
    pub fn is_active(&self) -> bool {
        !matches!(
            self,
            DownState::Idle | DownState::Succeeded | DownState::NoOp | DownState::Failed
        )
    }
}

/// Statistics about sync-down cycles.
#[derive(Debug, Clone, Default)]
pub struct DownStats {
    /// Cycles that ended without error.
    pub cycles_completed: u64,
    /// Winner versions applied locally.
    pub versions_applied: u64,
    /// Local versions marked dirty.
    pub versions_pruned: u64,
    /// Filesystem actions executed.
    pub actions_executed: u64,
    /// Duration of the last cycle.
    pub last_duration: Option<Duration>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// What a cycle learned from the remote listing.
struct RemoteView {
    unknown: Vec<DatabaseRemoteFile>,
    cleanup_number: u64,
    compaction: bool,
}

/// Headers of downloaded history objects.
struct RemoteHeaders {
    branches: Branches,
    sources: HashMap<DatabaseVersionHeader, DatabaseRemoteFile>,
}

/// Runs sync-down cycles for one local replica.
pub struct SyncDownOrchestrator<T: TransferManager, M: MetadataStore, F: LocalFileSystem> {
    config: SyncDownConfig,
    transfer: Arc<T>,
    metadata: Arc<M>,
    fs: Arc<F>,
    cache: ObjectCache,
    state: RwLock<DownState>,
    stats: RwLock<DownStats>,
}

impl<T: TransferManager, M: MetadataStore, F: LocalFileSystem> SyncDownOrchestrator<T, M, F> {
    /// Creates an orchestrator.
    ///
    /// # Errors
    ///
    /// Fails if the configured cache directory cannot be created.
    pub fn new(config: SyncDownConfig, transfer: T, metadata: M, fs: F) -> SyncResult<Self> {
        let cache = match &config.cache_dir {
            Some(dir) => ObjectCache::open(dir)?,
            None => ObjectCache::in_memory(),
        };
        Ok(Self {
            config,
            transfer: Arc::new(transfer),
            metadata: Arc::new(metadata),
            fs: Arc::new(fs),
            cache,
            state: RwLock::new(DownState::Idle),
            stats: RwLock::new(DownStats::default()),
        })
    }

    /// Gets the current state.
    pub fn state(&self) -> DownState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> DownStats {
        self.stats.read().clone()
    }

    /// The configuration.
    pub fn config(&self) -> &SyncDownConfig {
        &self.config
    }

    /// The remote store.
    pub fn transfer(&self) -> &T {
        &self.transfer
    }

    /// The local metadata store.
    pub fn metadata(&self) -> &M {
        &self.metadata
    }

    /// The local filesystem.
    pub fn fs(&self) -> &F {
        &self.fs
    }

    fn set_state(&self, state: DownState) {
        debug!(?state, "sync-down state");
        *self.state.write() = state;
    }

    /// Runs one sync-down cycle.
    ///
    /// Precondition failures are reported as [`DownOutcome::Aborted`]; all
    /// other failures roll local metadata back and return `Err`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidStateTransition`] if a cycle is already
    /// running, or the failure that aborted the cycle.
    pub fn sync_down(&self, listener: &dyn DownListener) -> SyncResult<DownOutcome> {
        {
            let mut state = self.state.write();
            if state.is_active() {
                return Err(SyncError::InvalidStateTransition {
                    from: format!("{:?}", *state),
                    to: format!("{:?}", DownState::CheckPreconditions),
                });
            }
            *state = DownState::CheckPreconditions;
        }

        let start = Instant::now();
        listener.on_start();

        let marker = match self.check_preconditions() {
            Ok(marker) => marker,
            Err(SyncError::Precondition(failure)) => {
                info!(%failure, "sync-down aborted");
                self.set_state(DownState::Failed);
                let outcome = DownOutcome::Aborted(failure);
                listener.on_end(&outcome);
                return Ok(outcome);
            }
            Err(e) => return Err(self.fail(e, start, listener)),
        };

        let result = self.run_cycle(listener);

        if let Err(e) = self.transfer.delete(&marker) {
            warn!(marker = %marker, error = %e, "could not remove maintenance marker");
        }

        match result {
            Ok(outcome) => {
                self.set_state(match outcome {
                    DownOutcome::NoRemoteChanges => DownState::NoOp,
                    _ => DownState::Succeeded,
                });
                {
                    let mut stats = self.stats.write();
                    stats.cycles_completed += 1;
                    stats.last_duration = Some(start.elapsed());
                    stats.last_error = None;
                }
                info!(code = ?outcome.code(), "sync-down finished");
                listener.on_end(&outcome);
                Ok(outcome)
            }
            Err(e) => Err(self.fail(e, start, listener)),
        }
    }

    fn fail(&self, error: SyncError, start: Instant, listener: &dyn DownListener) -> SyncError {
        warn!(error = %error, "sync-down failed");
        self.set_state(DownState::Failed);
        {
            let mut stats = self.stats.write();
            stats.last_duration = Some(start.elapsed());
            stats.last_error = Some(error.to_string());
        }
        listener.on_failed(&error);
        error
    }

    /// Rejects the cycle if it must not run, then announces it on the remote.
    fn check_preconditions(&self) -> SyncResult<RemoteFile> {
        if self.config.conflict_strategy != ConflictStrategy::RenameLocal {
            return Err(SyncError::Precondition(PreconditionFailure::UnsupportedOption(format!(
                "conflict strategy {:?}",
                self.config.conflict_strategy
            ))));
        }

        let now = now_millis();
        let stale_after = u64::try_from(self.config.marker_stale_after.as_millis()).unwrap_or(u64::MAX);
        let own = &self.config.client_name;

        for file in self.transfer.list(RemoteFileKind::Action)? {
            let RemoteFile::Action(marker) = file else {
                continue;
            };
            if now.saturating_sub(marker.timestamp) > stale_after {
                debug!(client = %marker.client, "ignoring stale maintenance marker");
                continue;
            }
            let blocking = if &marker.client == own {
                marker.operation != MaintenanceOperation::Cleanup
            } else {
                marker.operation == MaintenanceOperation::Cleanup
            };
            if blocking {
                return Err(SyncError::Precondition(PreconditionFailure::ConcurrentMaintenance {
                    client: marker.client,
                    operation: marker.operation.as_str().to_string(),
                }));
            }
        }

        let marker = RemoteFile::Action(ActionRemoteFile {
            operation: MaintenanceOperation::Down,
            client: own.clone(),
            timestamp: now,
        });
        self.transfer.upload(&marker, &[])?;
        Ok(marker)
    }

    fn run_cycle(&self, listener: &dyn DownListener) -> SyncResult<DownOutcome> {
        self.set_state(DownState::ListRemote);
        let remote = self.list_remote()?;
        if remote.unknown.is_empty() {
            info!("no unknown remote databases");
            return Ok(DownOutcome::NoRemoteChanges);
        }
        info!(count = remote.unknown.len(), compaction = remote.compaction, "unknown remote databases found");
        listener.on_changes_detected();

        self.set_state(DownState::DownloadUnknown);
        let total = remote.unknown.len();
        for (i, db) in remote.unknown.iter().enumerate() {
            let file = RemoteFile::Database(db.clone());
            listener.on_download_progress(&file.name(), i + 1, total);
            self.cache.fetch(self.transfer.as_ref(), &file)?;
        }

        self.set_state(DownState::ReadHeaders);
        let headers = self.read_remote_headers(&remote.unknown)?;

        self.metadata.begin()?;
        match self.reconcile(&remote, &headers, listener) {
            Ok(outcome) => {
                self.set_state(DownState::Commit);
                self.metadata.commit()?;
                Ok(outcome)
            }
            Err(e) => {
                if let Err(rollback) = self.metadata.rollback() {
                    warn!(error = %rollback, "metadata rollback failed");
                }
                Err(e)
            }
        }
    }

    fn list_remote(&self) -> SyncResult<RemoteView> {
        let cleanup_number = self
            .transfer
            .list(RemoteFileKind::Cleanup)?
            .into_iter()
            .filter_map(|file| match file {
                RemoteFile::Cleanup(n) => Some(n),
                _ => None,
            })
            .max()
            .unwrap_or(0);
        let compaction = cleanup_number > self.metadata.cleanup_number()?;

        let known = if compaction {
            BTreeSet::new()
        } else {
            self.metadata.known_databases()?
        };

        let unknown = self
            .transfer
            .list(RemoteFileKind::Database)?
            .into_iter()
            .filter_map(|file| match file {
                RemoteFile::Database(db) => Some(db),
                _ => None,
            })
            .filter(|db| !known.contains(&RemoteFile::Database(db.clone()).name()))
            .collect();

        Ok(RemoteView {
            unknown,
            cleanup_number,
            compaction,
        })
    }

    fn cached(&self, db: &DatabaseRemoteFile) -> SyncResult<Arc<Vec<u8>>> {
        self.cache.fetch(self.transfer.as_ref(), &RemoteFile::Database(db.clone()))
    }

    fn read_remote_headers(&self, unknown: &[DatabaseRemoteFile]) -> SyncResult<RemoteHeaders> {
        let mut branches = Branches::new();
        let mut sources = HashMap::new();

        for db in unknown {
            let bytes = self.cached(db)?;
            for header in read_headers(bytes.as_slice())? {
                branches.get_or_create(&db.client).add(header.clone());
                sources.insert(header, db.clone());
            }
        }

        Ok(RemoteHeaders { branches, sources })
    }

    fn reconcile(
        &self,
        remote: &RemoteView,
        headers: &RemoteHeaders,
        listener: &dyn DownListener,
    ) -> SyncResult<DownOutcome> {
        let own = self.config.client_name.as_str();

        let captured = if remote.compaction {
            info!(cleanup = remote.cleanup_number, "remote history was compacted, discarding local branch");
            let last = self.metadata.last_versions()?;
            self.metadata.discard_all()?;
            self.metadata.set_cleanup_number(remote.cleanup_number)?;
            Some(last)
        } else {
            None
        };

        self.set_state(DownState::BuildBranches);
        let local_branch = self.metadata.local_branch()?;
        let mut all = headers.branches.clone();
        all.get_or_create(own).merge(&local_branch);

        self.set_state(DownState::DetermineWinner);
        let Some((winner, winner_branch)) = DatabaseReconciliator::find_winner_branch(&all)? else {
            return Ok(DownOutcome::NoRemoteChanges);
        };
        info!(winner = %winner, length = winner_branch.len(), "winner determined");

        self.set_state(DownState::PruneLocal);
        let prune = DatabaseReconciliator::find_losers_prune_branch(&local_branch, &winner_branch);
        self.prune(&prune)?;

        self.set_state(DownState::ApplyWinner);
        let apply = DatabaseReconciliator::find_winners_apply_branch(&local_branch, &winner_branch);
        let mut changes = ChangeSet::default();
        let mut seen = HashSet::new();
        let mut applied = BTreeSet::new();
        for batch in batches(&apply, &headers.sources, self.config.max_versions_per_batch)? {
            self.apply_batch(&batch, &mut changes, &mut seen, &mut applied, listener)?;
        }
        if let Some(captured) = &captured {
            self.apply_compaction_deletes(captured, &seen, &mut changes, listener)?;
        }

        self.set_state(DownState::TrackMuddyContent);
        self.track_muddy(headers, &winner_branch, &applied)?;

        self.set_state(DownState::Commit);
        let names: Vec<String> = remote
            .unknown
            .iter()
            .map(|db| RemoteFile::Database(db.clone()).name())
            .collect();
        self.metadata.add_known_databases(&names)?;

        if apply.is_empty() && changes.is_empty() {
            Ok(DownOutcome::NoRemoteChanges)
        } else {
            Ok(DownOutcome::AppliedRemoteChanges(changes))
        }
    }

    fn prune(&self, prune: &Branch) -> SyncResult<()> {
        let own = self.config.client_name.as_str();
        for header in prune {
            debug!(header = %header, "marking superseded version dirty");
            self.metadata.mark_dirty(header)?;
            if header.client == own {
                let file = RemoteFile::Database(DatabaseRemoteFile::new(own, header.own_counter()));
                if self.transfer.delete(&file)? {
                    info!(name = %file, "deleted superseded own database");
                }
            }
        }
        self.stats.write().versions_pruned += prune.len() as u64;
        Ok(())
    }

    fn load_batch(&self, batch: &Batch) -> SyncResult<Vec<DatabaseVersion>> {
        let bytes = self.cached(&batch.source)?;
        let (Some(first), Some(last)) = (batch.headers.first(), batch.headers.last()) else {
            return Ok(Vec::new());
        };
        let mut versions = read_versions_in_range(bytes.as_slice(), &first.vector_clock, &last.vector_clock)?;
        versions.retain(|v| batch.headers.contains(&v.header));
        versions.sort_by_key(|v| batch.headers.iter().position(|h| h == &v.header));

        if versions.len() != batch.headers.len() {
            return Err(SyncError::consistency(format!(
                "expected {} versions in {}, found {}",
                batch.headers.len(),
                RemoteFile::Database(batch.source.clone()),
                versions.len()
            )));
        }
        Ok(versions)
    }

    fn applier<'a>(&'a self, listener: &'a dyn DownListener) -> ChangeApplier<'a> {
        ChangeApplier::new(
            self.fs.as_ref(),
            self.metadata.as_ref(),
            self.transfer.as_ref(),
            &self.cache,
            &self.config,
            listener,
        )
    }

    fn apply_batch(
        &self,
        batch: &Batch,
        changes: &mut ChangeSet,
        seen: &mut HashSet<FileHistoryId>,
        applied: &mut BTreeSet<MultiChunkId>,
        listener: &dyn DownListener,
    ) -> SyncResult<()> {
        let versions = self.load_batch(batch)?;
        let index = WinnerIndex::build(&versions);
        let local = self.metadata.last_versions()?;

        let actions = FileSystemActionReconciliator::new(self.fs.as_ref())
            .determine_actions(&index, &local, changes)?;
        seen.extend(index.history_ids().cloned());

        let sequenced = ActionSequencer::sequence(actions);
        let plan = self.applier(listener).apply(&sequenced, &index)?;
        applied.extend(plan.required);
        applied.extend(index.multichunk_ids().iter().cloned());

        for version in &versions {
            self.metadata.persist_version(version)?;
        }

        let mut stats = self.stats.write();
        stats.versions_applied += versions.len() as u64;
        stats.actions_executed += sequenced.len() as u64;
        Ok(())
    }

    fn apply_compaction_deletes(
        &self,
        captured: &HashMap<FileHistoryId, FileVersion>,
        seen: &HashSet<FileHistoryId>,
        changes: &mut ChangeSet,
        listener: &dyn DownListener,
    ) -> SyncResult<()> {
        let deletes: Vec<FileSystemAction> =
            FileSystemActionReconciliator::new(self.fs.as_ref()).compaction_deletes(captured, seen, changes);
        if deletes.is_empty() {
            return Ok(());
        }
        let sequenced = ActionSequencer::sequence(deletes);
        self.applier(listener).apply(&sequenced, &WinnerIndex::default())?;
        self.stats.write().actions_executed += sequenced.len() as u64;
        Ok(())
    }

    /// Records content referenced only by losing versions of other replicas.
    fn track_muddy(
        &self,
        headers: &RemoteHeaders,
        winner_branch: &Branch,
        applied: &BTreeSet<MultiChunkId>,
    ) -> SyncResult<()> {
        let own = self.config.client_name.as_str();
        let mut losing: BTreeMap<DatabaseRemoteFile, Vec<&DatabaseVersionHeader>> = BTreeMap::new();
        for (client, branch) in headers.branches.iter() {
            if client == own {
                continue;
            }
            for header in branch.iter().filter(|h| !winner_branch.contains(h)) {
                if let Some(source) = headers.sources.get(header) {
                    losing.entry(source.clone()).or_default().push(header);
                }
            }
        }

        let mut muddy = BTreeMap::new();
        for (source, losers) in &losing {
            let bytes = self.cached(source)?;
            for version in read_versions(bytes.as_slice())? {
                if !losers.contains(&&version.header) {
                    continue;
                }
                for id in version.multichunk_ids() {
                    if !applied.contains(id) {
                        muddy.insert(id.clone(), version.header.clone());
                    }
                }
            }
        }

        if !muddy.is_empty() {
            info!(count = muddy.len(), "retaining muddy multichunks");
            self.metadata.write_muddy_multichunks(&muddy)?;
        }
        self.metadata.remove_muddy_multichunks(applied)?;
        Ok(())
    }
}

/// Consecutive apply headers read from the same history object.
#[derive(Debug, Clone)]
struct Batch {
    source: DatabaseRemoteFile,
    headers: Vec<DatabaseVersionHeader>,
}

fn batches(
    apply: &Branch,
    sources: &HashMap<DatabaseVersionHeader, DatabaseRemoteFile>,
    max_versions: usize,
) -> SyncResult<Vec<Batch>> {
    let mut batches: Vec<Batch> = Vec::new();
    for header in apply {
        let source = sources.get(header).ok_or_else(|| {
            SyncError::consistency(format!("winner version {header} has no remote source"))
        })?;
        match batches.last_mut() {
            Some(batch) if &batch.source == source && batch.headers.len() < max_versions.max(1) => {
                batch.headers.push(header.clone());
            }
            _ => batches.push(Batch {
                source: source.clone(),
                headers: vec![header.clone()],
            }),
        }
    }
    Ok(batches)
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoopListener;
    use crate::filesystem::MemoryFileSystem;
    use crate::metadata::LocalDatabase;
    use crate::transport::MemoryTransfer;
    use driftsync_protocol::{
        encode_versions, Checksum, FileContent, FileHistory, FileType, MultiChunkEntry,
    };

    type Orchestrator = SyncDownOrchestrator<MemoryTransfer, LocalDatabase, MemoryFileSystem>;

    fn orchestrator(config: SyncDownConfig, transfer: &MemoryTransfer) -> Orchestrator {
        SyncDownOrchestrator::new(
            config,
            transfer.clone(),
            LocalDatabase::in_memory(),
            MemoryFileSystem::new(),
        )
        .unwrap()
    }

    fn header(client: &str, clock: &str, timestamp: u64) -> DatabaseVersionHeader {
        DatabaseVersionHeader::new(client, clock.parse().unwrap(), timestamp)
    }

    /// Uploads a history object of `client` whose versions each add one empty file.
    fn upload(transfer: &MemoryTransfer, client: &str, versions: &[(&str, &str)]) {
        let versions: Vec<DatabaseVersion> = versions
            .iter()
            .enumerate()
            .map(|(i, (clock, path))| {
                let mut version = DatabaseVersion::new(header(client, clock, 10 + i as u64));
                let mut history = FileHistory::new(FileHistoryId(format!("{client}-{path}")));
                history.versions.push(FileVersion::new(*path, FileType::File));
                version.file_histories.push(history);
                version
            })
            .collect();
        let last = versions.last().map(|v| v.header.own_counter()).unwrap_or(0);
        transfer
            .upload(
                &RemoteFile::Database(DatabaseRemoteFile::new(client, last)),
                &encode_versions(&versions).unwrap(),
            )
            .unwrap();
    }

    #[test]
    fn empty_remote_is_a_no_op() {
        let transfer = MemoryTransfer::new();
        let down = orchestrator(SyncDownConfig::new("A"), &transfer);

        assert_eq!(down.sync_down(&NoopListener).unwrap(), DownOutcome::NoRemoteChanges);
        assert_eq!(down.state(), DownState::NoOp);
        assert!(transfer.object_names().is_empty(), "marker must be removed");
    }

    #[test]
    fn unsupported_strategy_aborts_cleanly() {
        let transfer = MemoryTransfer::new();
        let config = SyncDownConfig::new("A").with_conflict_strategy(ConflictStrategy::KeepLocal);
        let down = orchestrator(config, &transfer);

        let outcome = down.sync_down(&NoopListener).unwrap();
        assert!(matches!(
            outcome,
            DownOutcome::Aborted(PreconditionFailure::UnsupportedOption(_))
        ));
        assert_eq!(down.state(), DownState::Failed);
        assert!(transfer.object_names().is_empty());
    }

    #[test]
    fn fresh_cleanup_marker_blocks_cycle() {
        let transfer = MemoryTransfer::new();
        let marker = RemoteFile::Action(ActionRemoteFile {
            operation: MaintenanceOperation::Cleanup,
            client: "B".into(),
            timestamp: now_millis(),
        });
        transfer.upload(&marker, &[]).unwrap();
        upload(&transfer, "B", &[("B1", "b")]);
        let down = orchestrator(SyncDownConfig::new("A"), &transfer);

        let outcome = down.sync_down(&NoopListener).unwrap();
        assert_eq!(
            outcome,
            DownOutcome::Aborted(PreconditionFailure::ConcurrentMaintenance {
                client: "B".into(),
                operation: "cleanup".into()
            })
        );
        assert!(down.fs().properties("b", false).unwrap().is_none());
    }

    #[test]
    fn stale_marker_is_ignored() {
        let transfer = MemoryTransfer::new();
        let marker = RemoteFile::Action(ActionRemoteFile {
            operation: MaintenanceOperation::Cleanup,
            client: "B".into(),
            timestamp: 1,
        });
        transfer.upload(&marker, &[]).unwrap();
        let down = orchestrator(SyncDownConfig::new("A"), &transfer);
        assert_eq!(down.sync_down(&NoopListener).unwrap(), DownOutcome::NoRemoteChanges);
    }

    #[test]
    fn applies_remote_versions_in_batches() {
        let transfer = MemoryTransfer::new();
        upload(&transfer, "B", &[("B1", "one"), ("B2", "two"), ("B3", "three")]);
        let config = SyncDownConfig::new("A").with_max_versions_per_batch(2);
        let down = orchestrator(config, &transfer);

        let outcome = down.sync_down(&NoopListener).unwrap();
        let changes = outcome.changes().cloned().unwrap_or_default();
        assert_eq!(changes.new_files, vec!["one", "two", "three"]);
        assert_eq!(down.state(), DownState::Succeeded);
        assert_eq!(down.metadata().local_branch().unwrap().len(), 3);
        assert_eq!(down.stats().versions_applied, 3);
        for path in ["one", "two", "three"] {
            assert!(down.fs().properties(path, false).unwrap().is_some());
        }

        assert_eq!(down.sync_down(&NoopListener).unwrap(), DownOutcome::NoRemoteChanges);
    }

    #[test]
    fn losing_local_version_is_pruned_and_its_object_deleted() {
        let transfer = MemoryTransfer::new();
        upload(&transfer, "A", &[("A1", "first")]);
        let down = orchestrator(SyncDownConfig::new("B"), &transfer);
        down.sync_down(&NoopListener).unwrap();

        // B committed (A1,B1) locally and uploaded it; A concurrently committed (A2) earlier.
        let own = DatabaseVersion::new(header("B", "A1,B1", 30));
        down.metadata().persist_version(&own).unwrap();
        transfer
            .upload(
                &RemoteFile::Database(DatabaseRemoteFile::new("B", 1)),
                &encode_versions(std::slice::from_ref(&own)).unwrap(),
            )
            .unwrap();
        down.metadata()
            .add_known_databases(&["db-B-0000000001".into()])
            .unwrap();
        let mut a2 = DatabaseVersion::new(header("A", "A2", 20));
        let mut history = FileHistory::new(FileHistoryId("A-second".into()));
        history.versions.push(FileVersion::new("second", FileType::File));
        a2.file_histories.push(history);
        transfer
            .upload(
                &RemoteFile::Database(DatabaseRemoteFile::new("A", 2)),
                &encode_versions(&[a2]).unwrap(),
            )
            .unwrap();

        let outcome = down.sync_down(&NoopListener).unwrap();
        assert!(matches!(outcome, DownOutcome::AppliedRemoteChanges(_)));
        assert_eq!(down.metadata().dirty_headers().unwrap(), vec![own.header]);
        assert!(!transfer.contains("db-B-0000000001"));
        assert!(down.fs().properties("second", false).unwrap().is_some());
    }

    #[test]
    fn transfer_failure_rolls_back_metadata() {
        let transfer = MemoryTransfer::new();
        let chunk = Checksum("c1".into());
        let mut version = DatabaseVersion::new(header("B", "B1", 10));
        let mut history = FileHistory::new(FileHistoryId("h".into()));
        history.versions.push(FileVersion {
            checksum: Some(Checksum("full".into())),
            size: 3,
            ..FileVersion::new("f", FileType::File)
        });
        version.file_histories.push(history);
        version.file_contents.push(FileContent {
            checksum: Checksum("full".into()),
            size: 3,
            chunks: vec![chunk.clone()],
        });
        version.multichunks.push(MultiChunkEntry {
            id: MultiChunkId("ee".into()),
            chunks: vec![chunk],
        });
        transfer
            .upload(
                &RemoteFile::Database(DatabaseRemoteFile::new("B", 1)),
                &encode_versions(&[version]).unwrap(),
            )
            .unwrap();
        let down = orchestrator(SyncDownConfig::new("A"), &transfer);

        let err = down.sync_down(&NoopListener).unwrap_err();
        assert!(matches!(err, SyncError::Transfer { .. }));
        assert_eq!(down.state(), DownState::Failed);
        assert!(down.metadata().local_branch().unwrap().is_empty());
        assert!(down.metadata().known_databases().unwrap().is_empty());
        assert_eq!(transfer.object_names(), vec!["db-B-0000000001".to_string()]);
        assert!(down.stats().last_error.is_some());
    }

    #[test]
    fn batches_split_on_source_and_size() {
        let a = DatabaseRemoteFile::new("A", 3);
        let b = DatabaseRemoteFile::new("B", 1);
        let headers = [
            header("A", "A1", 1),
            header("A", "A2", 2),
            header("A", "A3", 3),
            header("B", "A3,B1", 4),
        ];
        let sources = HashMap::from([
            (headers[0].clone(), a.clone()),
            (headers[1].clone(), a.clone()),
            (headers[2].clone(), a.clone()),
            (headers[3].clone(), b.clone()),
        ]);
        let apply: Branch = headers.iter().cloned().collect();

        let sizes: Vec<usize> = batches(&apply, &sources, 2)
            .unwrap()
            .iter()
            .map(|batch| batch.headers.len())
            .collect();
        assert_eq!(sizes, vec![2, 1, 1]);

        let missing = HashMap::new();
        assert!(batches(&apply, &missing, 2).unwrap_err().is_fatal());
    }

    #[test]
    fn active_states() {
        assert!(DownState::ApplyWinner.is_active());
        assert!(!DownState::Succeeded.is_active());
        assert!(!DownState::Idle.is_active());
    }
}
