//! # driftsync Protocol
//!
//! Version history model and history-object codec for driftsync.
//!
//! This crate provides:
//! - `VectorClock` and causal comparison
//! - `DatabaseVersionHeader` and its comparator
//! - `Branch` / `Branches` for per-replica header sequences
//! - File history types (`FileVersion`, `FileHistory`, `FileContent`)
//! - Remote object naming and multichunk containers
//! - CBOR encoding/decoding of history objects
//!
//! This is a pure protocol crate; the only I/O it performs is through
//! caller-supplied readers and writers.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod branch;
mod codec;
mod error;
mod file;
mod header;
mod multichunk;
mod remote;
mod vector_clock;
mod version;

pub use branch::{Branch, Branches};
pub use codec::{encode_versions, read_headers, read_versions, read_versions_in_range, write_versions};
pub use error::{ProtocolError, ProtocolResult};
pub use file::{
    Checksum, FileContent, FileHistory, FileHistoryId, FileStatus, FileType, FileVersion,
    MultiChunkEntry, MultiChunkId,
};
pub use header::{causal_order, DatabaseVersionHeader, HeaderComparator};
pub use multichunk::{ChunkData, MultiChunk};
pub use remote::{ActionRemoteFile, DatabaseRemoteFile, MaintenanceOperation, RemoteFile, RemoteFileKind};
pub use vector_clock::{VectorClock, VectorClockComparison};
pub use version::DatabaseVersion;
