//! Names of objects in the remote store.
//!
//! | Object            | Name                                     |
//! |-------------------|------------------------------------------|
//! | history object    | `db-{client}-{version:010}`              |
//! | multichunk        | `multichunk-{id}`                        |
//! | maintenance marker| `action-{operation}-{client}-{timestamp}`|
//! | compaction counter| `cleanup-{n:010}`                        |

use crate::error::{ProtocolError, ProtocolResult};
use crate::file::MultiChunkId;
use std::fmt;

/// Category of remote object, used for listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteFileKind {
    /// History objects.
    Database,
    /// Content containers.
    MultiChunk,
    /// Maintenance markers.
    Action,
    /// Compaction counters.
    Cleanup,
}

/// A history object holding versions of one author.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DatabaseRemoteFile {
    /// Authoring replica.
    pub client: String,
    /// Author's own clock entry of the newest version inside.
    pub version: u64,
}

impl DatabaseRemoteFile {
    /// Creates a history object name.
    pub fn new(client: impl Into<String>, version: u64) -> Self {
        Self {
            client: client.into(),
            version,
        }
    }
}

/// Operation announced by a maintenance marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaintenanceOperation {
    /// A sync-down cycle.
    Down,
    /// An upload of local changes.
    Up,
    /// History compaction / garbage collection.
    Cleanup,
}

impl MaintenanceOperation {
    /// Name used in marker objects.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Down => "down",
            Self::Up => "up",
            Self::Cleanup => "cleanup",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "down" => Some(Self::Down),
            "up" => Some(Self::Up),
            "cleanup" => Some(Self::Cleanup),
            _ => None,
        }
    }
}

/// A maintenance marker announcing a running operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActionRemoteFile {
    /// Announced operation.
    pub operation: MaintenanceOperation,
    /// Replica running it.
    pub client: String,
    /// Start time in milliseconds since the Unix epoch.
    pub timestamp: u64,
}

/// Any object in the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RemoteFile {
    /// History object.
    Database(DatabaseRemoteFile),
    /// Content container.
    MultiChunk(MultiChunkId),
    /// Maintenance marker.
    Action(ActionRemoteFile),
    /// Compaction counter.
    Cleanup(u64),
}

impl RemoteFile {
    /// The kind of this object.
    pub fn kind(&self) -> RemoteFileKind {
        match self {
            Self::Database(_) => RemoteFileKind::Database,
            Self::MultiChunk(_) => RemoteFileKind::MultiChunk,
            Self::Action(_) => RemoteFileKind::Action,
            Self::Cleanup(_) => RemoteFileKind::Cleanup,
        }
    }

    /// Object name in the remote store.
    pub fn name(&self) -> String {
        self.to_string()
    }

    /// Parses an object name.
    pub fn parse(name: &str) -> ProtocolResult<Self> {
        let invalid = || ProtocolError::InvalidRemoteName(name.to_string());

        if let Some(rest) = name.strip_prefix("db-") {
            let (client, version) = rest.rsplit_once('-').ok_or_else(invalid)?;
            if client.is_empty() {
                return Err(invalid());
            }
            let version = version.parse().map_err(|_| invalid())?;
            return Ok(Self::Database(DatabaseRemoteFile::new(client, version)));
        }

        if let Some(id) = name.strip_prefix("multichunk-") {
            if id.is_empty() || !id.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(invalid());
            }
            return Ok(Self::MultiChunk(MultiChunkId(id.to_string())));
        }

        if let Some(rest) = name.strip_prefix("action-") {
            let (operation, rest) = rest.split_once('-').ok_or_else(invalid)?;
            let (client, timestamp) = rest.rsplit_once('-').ok_or_else(invalid)?;
            let operation = MaintenanceOperation::parse(operation).ok_or_else(invalid)?;
            if client.is_empty() {
                return Err(invalid());
            }
            return Ok(Self::Action(ActionRemoteFile {
                operation,
                client: client.to_string(),
                timestamp: timestamp.parse().map_err(|_| invalid())?,
            }));
        }

        if let Some(n) = name.strip_prefix("cleanup-") {
            return Ok(Self::Cleanup(n.parse().map_err(|_| invalid())?));
        }

        Err(invalid())
    }
}

impl fmt::Display for RemoteFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Database(db) => write!(f, "db-{}-{:010}", db.client, db.version),
            Self::MultiChunk(id) => write!(f, "multichunk-{id}"),
            Self::Action(action) => write!(
                f,
                "action-{}-{}-{}",
                action.operation.as_str(),
                action.client,
                action.timestamp
            ),
            Self::Cleanup(n) => write!(f, "cleanup-{n:010}"),
        }
    }
}

impl From<DatabaseRemoteFile> for RemoteFile {
    fn from(file: DatabaseRemoteFile) -> Self {
        Self::Database(file)
    }
}
