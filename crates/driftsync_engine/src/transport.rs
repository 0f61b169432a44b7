//! Transfer layer abstraction for the remote object store.

use crate::error::{SyncError, SyncResult};
use driftsync_protocol::{RemoteFile, RemoteFileKind};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace};

/// A transfer manager moves named objects to and from the remote store.
///
/// Retries and backoff are the implementation's concern; every call here
/// either returns data or fails.
pub trait TransferManager: Send + Sync {
    /// Lists remote objects of one kind, sorted by name.
    fn list(&self, kind: RemoteFileKind) -> SyncResult<Vec<RemoteFile>>;

    /// Downloads an object.
    fn download(&self, file: &RemoteFile) -> SyncResult<Vec<u8>>;

    /// Uploads an object, replacing any existing one.
    fn upload(&self, file: &RemoteFile, data: &[u8]) -> SyncResult<()>;

    /// Deletes an object. Returns false if it did not exist.
    fn delete(&self, file: &RemoteFile) -> SyncResult<bool>;
}

fn parse_listing<'a>(names: impl Iterator<Item = &'a str>, kind: RemoteFileKind) -> Vec<RemoteFile> {
    let mut files: Vec<RemoteFile> = names
        .filter_map(|name| match RemoteFile::parse(name) {
            Ok(file) => Some(file),
            Err(_) => {
                trace!(name, "skipping foreign object");
                None
            }
        })
        .filter(|file| file.kind() == kind)
        .collect();
    files.sort_by_key(RemoteFile::name);
    files
}

/// An in-memory remote store.
///
/// Clones share the same objects, so several replicas can sync against
/// one store in tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransfer {
    objects: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
    failing: Arc<RwLock<HashSet<String>>>,
}

impl MemoryTransfer {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes downloads of `name` fail with a retryable error.
    pub fn fail_download_of(&self, name: impl Into<String>) {
        self.failing.write().insert(name.into());
    }

    /// Clears injected failures.
    pub fn clear_failures(&self) {
        self.failing.write().clear();
    }

    /// Names of all stored objects.
    pub fn object_names(&self) -> Vec<String> {
        self.objects.read().keys().cloned().collect()
    }

    /// Returns true if an object with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.objects.read().contains_key(name)
    }
}

impl TransferManager for MemoryTransfer {
    fn list(&self, kind: RemoteFileKind) -> SyncResult<Vec<RemoteFile>> {
        let objects = self.objects.read();
        Ok(parse_listing(objects.keys().map(String::as_str), kind))
    }

    fn download(&self, file: &RemoteFile) -> SyncResult<Vec<u8>> {
        let name = file.name();
        if self.failing.read().contains(&name) {
            return Err(SyncError::transfer_retryable(format!("download of {name} failed")));
        }
        self.objects
            .read()
            .get(&name)
            .cloned()
            .ok_or_else(|| SyncError::transfer_fatal(format!("{name} not found")))
    }

    fn upload(&self, file: &RemoteFile, data: &[u8]) -> SyncResult<()> {
        self.objects.write().insert(file.name(), data.to_vec());
        Ok(())
    }

    fn delete(&self, file: &RemoteFile) -> SyncResult<bool> {
        Ok(self.objects.write().remove(&file.name()).is_some())
    }
}

/// A remote store backed by a plain directory.
#[derive(Debug, Clone)]
pub struct LocalFolderTransfer {
    root: PathBuf,
}

impl LocalFolderTransfer {
    /// Opens `root` as a remote store, creating it if needed.
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> SyncResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| io_error(&root, &e))?;
        Ok(Self { root })
    }

    /// The backing directory.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn io_error(path: &Path, error: &io::Error) -> SyncError {
    let message = format!("{}: {error}", path.display());
    match error.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
            SyncError::transfer_fatal(message)
        }
        _ => SyncError::transfer_retryable(message),
    }
}

impl TransferManager for LocalFolderTransfer {
    fn list(&self, kind: RemoteFileKind) -> SyncResult<Vec<RemoteFile>> {
        let mut names = Vec::new();
        let entries = fs::read_dir(&self.root).map_err(|e| io_error(&self.root, &e))?;
        for entry in entries {
            let entry = entry.map_err(|e| io_error(&self.root, &e))?;
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        Ok(parse_listing(names.iter().map(String::as_str), kind))
    }

    fn download(&self, file: &RemoteFile) -> SyncResult<Vec<u8>> {
        let path = self.root.join(file.name());
        debug!(path = %path.display(), "downloading");
        fs::read(&path).map_err(|e| io_error(&path, &e))
    }

    fn upload(&self, file: &RemoteFile, data: &[u8]) -> SyncResult<()> {
        let path = self.root.join(file.name());
        let partial = self.root.join(format!(".{}.part", file.name()));
        fs::write(&partial, data).map_err(|e| io_error(&partial, &e))?;
        fs::rename(&partial, &path).map_err(|e| io_error(&path, &e))
    }

    fn delete(&self, file: &RemoteFile) -> SyncResult<bool> {
        let path = self.root.join(file.name());
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error(&path, &e)),
        }
    }
}
