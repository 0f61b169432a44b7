//! # driftsync Engine
//!
//! Sync-down core for driftsync.
//!
//! This crate provides:
//! - Winner selection among diverging replica histories
//! - Per-file reconciliation of winner versions against the local disk
//! - Ordering and execution of filesystem actions, with conflicted copies
//! - Content assembly from downloaded multichunks
//! - The sync-down state machine and its lifecycle events
//! - Collaborator traits for the remote store, local metadata and the
//!   local filesystem, with in-memory and on-disk implementations
//!
//! ## Architecture
//!
//! A sync-down cycle runs as one sequential pipeline:
//! 1. Check maintenance markers and announce the cycle
//! 2. Download unknown history objects and read their headers
//! 3. Pick the winner branch, prune superseded local versions
//! 4. Apply winner versions in batches: reconcile, sequence, execute
//! 5. Record content of losing versions, commit local metadata
//!
//! ## Key Invariants
//!
//! - Local metadata changes of a cycle commit together or not at all
//! - Within a batch, actions execute in sequencer order
//! - A diverging local file is never overwritten, only moved aside
//! - Content is fetched before any action of its batch runs

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod actions;
mod applier;
mod cache;
mod changeset;
mod comparator;
mod config;
mod error;
mod events;
mod filesystem;
mod fs_reconciliator;
mod index;
mod metadata;
mod reconciliator;
mod sequencer;
mod state;
mod transport;

pub use actions::{ActionContext, ActionOp, ActionTarget, ContentSource, Effect, FileSystemAction};
pub use applier::{ChangeApplier, ContentPlan};
pub use cache::ObjectCache;
pub use changeset::ChangeSet;
pub use comparator::{FileChange, FileChanges, FileVersionComparator};
pub use config::{ConflictStrategy, SyncDownConfig};
pub use error::{
    FileSystemError, FileSystemResult, MetadataError, MetadataResult, PreconditionFailure,
    SyncError, SyncResult,
};
pub use events::{DownEvent, DownListener, DownOutcome, DownResultCode, NoopListener};
pub use filesystem::{checksum_of, DiskFileSystem, FileProperties, LocalFileSystem, MemoryFileSystem};
pub use fs_reconciliator::FileSystemActionReconciliator;
pub use index::WinnerIndex;
pub use metadata::{LocalDatabase, MetadataStore, StoredVersion};
pub use reconciliator::DatabaseReconciliator;
pub use sequencer::ActionSequencer;
pub use state::{DownState, DownStats, SyncDownOrchestrator};
pub use transport::{LocalFolderTransfer, MemoryTransfer, TransferManager};
