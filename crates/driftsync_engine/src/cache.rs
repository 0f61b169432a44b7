//! Local cache of downloaded remote objects.
//!
//! Downloads survive a failed cycle when the cache is backed by a
//! directory, so a retry does not fetch them again.

use crate::error::{SyncError, SyncResult};
use crate::transport::TransferManager;
use driftsync_protocol::RemoteFile;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::trace;

/// Cache of remote objects keyed by object name.
#[derive(Debug, Default)]
pub struct ObjectCache {
    memory: RwLock<HashMap<String, Arc<Vec<u8>>>>,
    dir: Option<PathBuf>,
}

impl ObjectCache {
    /// Creates a memory-only cache.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Creates a cache persisted under `dir`.
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> SyncResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| SyncError::Cache {
            name: dir.display().to_string(),
            source,
        })?;
        Ok(Self {
            memory: RwLock::default(),
            dir: Some(dir),
        })
    }

    /// Returns true if the object is cached.
    pub fn contains(&self, file: &RemoteFile) -> bool {
        let name = file.name();
        self.memory.read().contains_key(&name)
            || self.dir.as_ref().is_some_and(|d| d.join(&name).is_file())
    }

    /// Returns the cached bytes of an object.
    ///
    /// # Errors
    ///
    /// Fails if the cache directory cannot be read.
    pub fn get(&self, file: &RemoteFile) -> SyncResult<Option<Arc<Vec<u8>>>> {
        let name = file.name();
        if let Some(data) = self.memory.read().get(&name) {
            return Ok(Some(Arc::clone(data)));
        }
        let Some(dir) = &self.dir else {
            return Ok(None);
        };

        match fs::read(dir.join(&name)) {
            Ok(bytes) => {
                let data = Arc::new(bytes);
                self.memory.write().insert(name, Arc::clone(&data));
                Ok(Some(data))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(SyncError::Cache { name, source }),
        }
    }

    /// Stores an object.
    ///
    /// # Errors
    ///
    /// Fails if the object cannot be written to the cache directory.
    pub fn put(&self, file: &RemoteFile, bytes: Vec<u8>) -> SyncResult<Arc<Vec<u8>>> {
        let name = file.name();
        if let Some(dir) = &self.dir {
            fs::write(dir.join(&name), &bytes).map_err(|source| SyncError::Cache {
                name: name.clone(),
                source,
            })?;
        }
        let data = Arc::new(bytes);
        self.memory.write().insert(name, Arc::clone(&data));
        Ok(data)
    }

    /// Returns the cached object, downloading it first if needed.
    ///
    /// # Errors
    ///
    /// Propagates transfer and cache failures.
    pub fn fetch(&self, transfer: &dyn TransferManager, file: &RemoteFile) -> SyncResult<Arc<Vec<u8>>> {
        if let Some(data) = self.get(file)? {
            trace!(name = %file, "cache hit");
            return Ok(data);
        }
        let bytes = transfer.download(file)?;
        self.put(file, bytes)
    }

    /// Drops the in-memory copies. Persisted objects stay on disk.
    pub fn clear_memory(&self) {
        self.memory.write().clear();
    }
}
