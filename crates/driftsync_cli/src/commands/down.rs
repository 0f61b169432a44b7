//! Down command implementation.

use driftsync_engine::{
    DiskFileSystem, DownListener, DownOutcome, LocalDatabase, LocalFolderTransfer, SyncDownConfig,
    SyncDownOrchestrator, SyncError,
};
use std::path::PathBuf;
use tracing::{info, warn};

/// Options of one sync-down run.
#[derive(Debug, Clone)]
pub struct DownOptions {
    /// Replica id of this machine.
    pub client: String,
    /// Folder holding the remote objects.
    pub remote: PathBuf,
    /// Local sync folder.
    pub local: PathBuf,
    /// Metadata file of this replica.
    pub metadata: PathBuf,
    /// Folder for downloaded objects.
    pub cache: Option<PathBuf>,
    /// Maximum versions applied per batch.
    pub batch: Option<usize>,
}

struct LogListener;

impl DownListener for LogListener {
    fn on_changes_detected(&self) {
        info!("remote changes detected");
    }

    fn on_download_progress(&self, name: &str, index: usize, total: usize) {
        info!("downloading {} ({}/{})", name, index, total);
    }

    fn on_failed(&self, error: &SyncError) {
        warn!(retryable = error.is_retryable(), "sync down failed: {}", error);
    }
}

/// Runs the down command.
pub fn run(options: &DownOptions) -> Result<(), Box<dyn std::error::Error>> {
    let outcome = sync(options)?;

    match &outcome {
        DownOutcome::NoRemoteChanges => println!("No remote changes"),
        DownOutcome::Aborted(reason) => {
            return Err(format!("Sync down aborted: {reason}").into());
        }
        DownOutcome::AppliedRemoteChanges(changes) => {
            println!("Applied remote changes:");
            for path in &changes.new_files {
                println!("  A {path}");
            }
            for path in &changes.changed_files {
                println!("  M {path}");
            }
            for path in &changes.deleted_files {
                println!("  D {path}");
            }
        }
    }

    Ok(())
}

/// Opens the on-disk collaborators and runs one cycle.
pub fn sync(options: &DownOptions) -> Result<DownOutcome, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(&options.local)?;

    let mut config = SyncDownConfig::new(options.client.clone());
    if let Some(cache) = &options.cache {
        config = config.with_cache_dir(cache);
    }
    if let Some(batch) = options.batch {
        config = config.with_max_versions_per_batch(batch);
    }

    info!("syncing {:?} from {:?}", options.local, options.remote);
    let down = SyncDownOrchestrator::new(
        config,
        LocalFolderTransfer::open(&options.remote)?,
        LocalDatabase::open(&options.metadata)?,
        DiskFileSystem::new(&options.local),
    )?;

    Ok(down.sync_down(&LogListener)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn empty_remote_has_no_changes() {
        let tmp = TempDir::new().unwrap();
        let options = DownOptions {
            client: "A".into(),
            remote: tmp.path().join("remote"),
            local: tmp.path().join("local"),
            metadata: tmp.path().join("metadata.json"),
            cache: Some(tmp.path().join("cache")),
            batch: Some(2),
        };

        assert_eq!(sync(&options).unwrap(), DownOutcome::NoRemoteChanges);
        assert!(options.local.is_dir());
        // The cycle's own marker is removed again.
        assert_eq!(std::fs::read_dir(&options.remote).unwrap().count(), 0);
    }
}
