//! End-to-end sync-down against on-disk collaborators.

use driftsync_engine::{
    checksum_of, DiskFileSystem, DownEvent, DownOutcome, DownResultCode, LocalDatabase,
    LocalFileSystem, LocalFolderTransfer, MetadataStore, SyncDownConfig, SyncDownOrchestrator,
    TransferManager,
};
use driftsync_protocol::{
    encode_versions, ChunkData, DatabaseRemoteFile, DatabaseVersion, DatabaseVersionHeader,
    FileContent, FileHistory, FileHistoryId, FileType, FileVersion, MultiChunk,
    MultiChunkEntry, MultiChunkId, RemoteFile,
};
use std::fs;
use std::sync::mpsc::channel;
use tempfile::TempDir;

struct Dirs {
    _tmp: TempDir,
    remote: std::path::PathBuf,
    local: std::path::PathBuf,
    metadata: std::path::PathBuf,
    cache: std::path::PathBuf,
}

fn dirs() -> Dirs {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();
    let local = root.join("local");
    fs::create_dir_all(&local).unwrap();
    Dirs {
        remote: root.join("remote"),
        local,
        metadata: root.join("meta").join("metadata.json"),
        cache: root.join("cache"),
        _tmp: tmp,
    }
}

fn orchestrator(
    dirs: &Dirs,
) -> SyncDownOrchestrator<LocalFolderTransfer, LocalDatabase, DiskFileSystem> {
    SyncDownOrchestrator::new(
        SyncDownConfig::new("A").with_cache_dir(&dirs.cache),
        LocalFolderTransfer::open(&dirs.remote).unwrap(),
        LocalDatabase::open(&dirs.metadata).unwrap(),
        DiskFileSystem::new(&dirs.local),
    )
    .unwrap()
}

/// Publishes a version of replica B holding `docs/` and `docs/readme.txt`.
fn publish_first_version(remote: &LocalFolderTransfer, data: &[u8]) {
    let chunk = ChunkData {
        checksum: checksum_of(data),
        data: data.to_vec(),
    };
    let multichunk = MultiChunk {
        id: MultiChunkId("0a1b2c".into()),
        chunks: vec![chunk.clone()],
    };
    remote
        .upload(&RemoteFile::MultiChunk(multichunk.id.clone()), &multichunk.encode().unwrap())
        .unwrap();

    let file = FileVersion {
        checksum: Some(checksum_of(data)),
        size: data.len() as u64,
        last_modified: 1_600_000_000_000,
        ..FileVersion::new("docs/readme.txt", FileType::File)
    };
    let mut version =
        DatabaseVersion::new(DatabaseVersionHeader::new("B", "B1".parse().unwrap(), 100));
    let mut folder = FileHistory::new(FileHistoryId("folder".into()));
    folder.versions.push(FileVersion::new("docs", FileType::Folder));
    let mut readme = FileHistory::new(FileHistoryId("readme".into()));
    readme.versions.push(file);
    version.file_histories = vec![folder, readme];
    version.file_contents.push(FileContent {
        checksum: checksum_of(data),
        size: data.len() as u64,
        chunks: vec![chunk.checksum.clone()],
    });
    version.multichunks.push(MultiChunkEntry {
        id: multichunk.id,
        chunks: vec![chunk.checksum],
    });

    remote
        .upload(
            &RemoteFile::Database(DatabaseRemoteFile::new("B", 1)),
            &encode_versions(&[version]).unwrap(),
        )
        .unwrap();
}

#[test]
fn downloads_and_materializes_remote_files() {
    let dirs = dirs();
    let down = orchestrator(&dirs);
    publish_first_version(down.transfer(), b"hello from B");

    let (tx, rx) = channel();
    let outcome = down.sync_down(&tx).unwrap();
    drop(tx);

    let changes = outcome.changes().cloned().unwrap();
    assert_eq!(changes.new_files, vec!["docs", "docs/readme.txt"]);
    assert_eq!(
        fs::read(dirs.local.join("docs/readme.txt")).unwrap(),
        b"hello from B"
    );
    let props = down.fs().properties("docs/readme.txt", false).unwrap().unwrap();
    assert_eq!(props.last_modified, 1_600_000_000_000);

    let events: Vec<DownEvent> = rx.iter().collect();
    assert_eq!(events.first(), Some(&DownEvent::Started));
    assert!(events.contains(&DownEvent::ChangesDetected));
    assert!(matches!(
        events.last(),
        Some(DownEvent::Ended {
            code: DownResultCode::AppliedRemoteChanges,
            ..
        })
    ));

    // Only history and content objects remain; the marker is gone.
    let mut names: Vec<String> = fs::read_dir(&dirs.remote)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, vec!["db-B-0000000001", "multichunk-0a1b2c"]);
}

#[test]
fn metadata_survives_reopen() {
    let dirs = dirs();
    {
        let down = orchestrator(&dirs);
        publish_first_version(down.transfer(), b"persisted");
        down.sync_down(&driftsync_engine::NoopListener).unwrap();
    }

    let down = orchestrator(&dirs);
    assert_eq!(down.metadata().local_branch().unwrap().len(), 1);
    assert!(down
        .metadata()
        .known_databases()
        .unwrap()
        .contains("db-B-0000000001"));
    assert_eq!(
        down.sync_down(&driftsync_engine::NoopListener).unwrap(),
        DownOutcome::NoRemoteChanges
    );
}

#[test]
fn diverging_local_file_becomes_conflicted_copy() {
    let dirs = dirs();
    let down = orchestrator(&dirs);
    publish_first_version(down.transfer(), b"remote text");
    fs::create_dir_all(dirs.local.join("docs")).unwrap();
    fs::write(dirs.local.join("docs/readme.txt"), b"local edit").unwrap();

    let outcome = down.sync_down(&driftsync_engine::NoopListener).unwrap();
    assert!(outcome.changes().is_some());

    assert_eq!(
        fs::read(dirs.local.join("docs/readme.txt")).unwrap(),
        b"remote text"
    );
    assert_eq!(
        fs::read(dirs.local.join("docs/readme (conflicted copy).txt")).unwrap(),
        b"local edit"
    );
}

#[test]
fn cached_objects_are_reused_after_failure() {
    let dirs = dirs();
    let down = orchestrator(&dirs);
    publish_first_version(down.transfer(), b"cached content");

    // Without the multichunk the cycle fails after the history object was cached.
    let multichunk = RemoteFile::MultiChunk(MultiChunkId("0a1b2c".into()));
    let saved = down.transfer().download(&multichunk).unwrap();
    down.transfer().delete(&multichunk).unwrap();
    let err = down.sync_down(&driftsync_engine::NoopListener).unwrap_err();
    assert!(!err.is_retryable());
    assert!(dirs.cache.join("db-B-0000000001").is_file());
    assert!(down.metadata().local_branch().unwrap().is_empty());

    down.transfer().upload(&multichunk, &saved).unwrap();
    let outcome = down.sync_down(&driftsync_engine::NoopListener).unwrap();
    assert!(matches!(outcome, DownOutcome::AppliedRemoteChanges(_)));
    assert_eq!(
        fs::read(dirs.local.join("docs/readme.txt")).unwrap(),
        b"cached content"
    );
}

#[test]
fn remote_path_outside_root_fails_the_cycle() {
    let dirs = dirs();
    let down = orchestrator(&dirs);

    let mut version =
        DatabaseVersion::new(DatabaseVersionHeader::new("B", "B1".parse().unwrap(), 100));
    let mut history = FileHistory::new(FileHistoryId("escape".into()));
    history
        .versions
        .push(FileVersion::new("../escaped", FileType::Folder));
    version.file_histories.push(history);
    down.transfer()
        .upload(
            &RemoteFile::Database(DatabaseRemoteFile::new("B", 1)),
            &encode_versions(&[version]).unwrap(),
        )
        .unwrap();

    assert!(down.sync_down(&driftsync_engine::NoopListener).is_err());
    assert!(!dirs.local.join("../escaped").exists());
    assert!(down.metadata().local_branch().unwrap().is_empty());
}
