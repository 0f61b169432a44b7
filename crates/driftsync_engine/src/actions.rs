//! Filesystem actions and their execution.
//!
//! Every action carries an [`ActionTarget`] describing the path it
//! occupies or frees; the sequencer orders actions by that descriptor
//! alone. Execution never destroys a file whose on-disk state differs
//! from what the action expects: such files are moved to a
//! conflicted-copy sibling first.

use crate::comparator::FileVersionComparator;
use crate::config::SyncDownConfig;
use crate::error::{FileSystemError, FileSystemResult, SyncError, SyncResult};
use crate::filesystem::{FileProperties, LocalFileSystem};
use driftsync_protocol::{Checksum, FileType, FileVersion};
use std::fmt;
use tracing::{debug, warn};

/// What an action does to its target path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Effect {
    /// Frees the path.
    Remove,
    /// Occupies a path that is expected to be free.
    Create,
    /// Moves an entry onto the path.
    Move,
    /// Rewrites content or metadata in place.
    Update,
}

/// The shared descriptor consumed by the sequencer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionTarget {
    /// Path the action occupies or frees.
    pub path: String,
    /// Kind of entry at that path.
    pub file_type: FileType,
    /// Effect on the path.
    pub effect: Effect,
}

/// The action variants with the versions needed to execute them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOp {
    /// Materialize the winning version.
    New {
        /// Version to materialize.
        winning: FileVersion,
    },
    /// Remove the entry described by `expected`.
    Delete {
        /// What is believed to be on disk.
        expected: FileVersion,
    },
    /// Replace the local version with the winning one.
    Change {
        /// Local version on record.
        expected: FileVersion,
        /// Version to end up with; may be deleted.
        winning: FileVersion,
        /// The disk diverged from the local version.
        conflict: bool,
    },
    /// Move the local entry to the winning path and metadata.
    Rename {
        /// Local version on record.
        expected: FileVersion,
        /// Version to end up with.
        winning: FileVersion,
    },
    /// Apply modification time and permissions only.
    SetAttributes {
        /// Version whose metadata to apply.
        winning: FileVersion,
    },
    /// Create a symlink for the winning version.
    NewSymlink {
        /// Version to materialize.
        winning: FileVersion,
        /// Local symlink on record that may be replaced without a conflicted copy.
        replaces: Option<FileVersion>,
    },
}

/// One concrete filesystem mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSystemAction {
    /// Sequencing descriptor.
    pub target: ActionTarget,
    /// The operation.
    pub op: ActionOp,
}

/// Source of assembled file content, keyed by content checksum.
pub trait ContentSource {
    /// Returns the full content for `checksum`.
    fn assemble(&self, checksum: &Checksum) -> SyncResult<Vec<u8>>;
}

/// Everything an action needs to execute.
pub struct ActionContext<'a> {
    /// Local filesystem.
    pub fs: &'a dyn LocalFileSystem,
    /// Assembled content.
    pub content: &'a dyn ContentSource,
    /// Cycle configuration.
    pub config: &'a SyncDownConfig,
}

impl FileSystemAction {
    fn with(op: ActionOp, path: &str, file_type: FileType, effect: Effect) -> Self {
        Self {
            target: ActionTarget {
                path: path.to_string(),
                file_type,
                effect,
            },
            op,
        }
    }

    /// Materializes `winning` at its path.
    pub fn new_file(winning: FileVersion) -> Self {
        let (path, file_type) = (winning.path.clone(), winning.file_type);
        Self::with(ActionOp::New { winning }, &path, file_type, Effect::Create)
    }

    /// Removes the entry described by `expected`.
    pub fn delete(expected: FileVersion) -> Self {
        let (path, file_type) = (expected.path.clone(), expected.file_type);
        Self::with(ActionOp::Delete { expected }, &path, file_type, Effect::Remove)
    }

    /// Replaces `expected` with `winning`. A deleted winner makes this a removal.
    pub fn change(expected: FileVersion, winning: FileVersion, conflict: bool) -> Self {
        let (path, file_type, effect) = if winning.is_deleted() {
            (expected.path.clone(), expected.file_type, Effect::Remove)
        } else {
            (winning.path.clone(), winning.file_type, Effect::Update)
        };
        Self::with(
            ActionOp::Change {
                expected,
                winning,
                conflict,
            },
            &path,
            file_type,
            effect,
        )
    }

    /// Moves `expected` to the path and metadata of `winning`.
    pub fn rename(expected: FileVersion, winning: FileVersion) -> Self {
        let (path, file_type) = (winning.path.clone(), winning.file_type);
        Self::with(ActionOp::Rename { expected, winning }, &path, file_type, Effect::Move)
    }

    /// Applies the metadata of `winning`.
    pub fn set_attributes(winning: FileVersion) -> Self {
        let (path, file_type) = (winning.path.clone(), winning.file_type);
        Self::with(ActionOp::SetAttributes { winning }, &path, file_type, Effect::Update)
    }

    /// Creates the symlink described by `winning`, replacing `replaces` if
    /// it is still on disk unchanged.
    pub fn new_symlink(winning: FileVersion, replaces: Option<FileVersion>) -> Self {
        let path = winning.path.clone();
        Self::with(
            ActionOp::NewSymlink { winning, replaces },
            &path,
            FileType::Symlink,
            Effect::Create,
        )
    }

    /// Short name of the variant.
    pub fn kind(&self) -> &'static str {
        match self.op {
            ActionOp::New { .. } => "new",
            ActionOp::Delete { .. } => "delete",
            ActionOp::Change { .. } => "change",
            ActionOp::Rename { .. } => "rename",
            ActionOp::SetAttributes { .. } => "set-attributes",
            ActionOp::NewSymlink { .. } => "new-symlink",
        }
    }

    /// The winning version this action materializes, if it writes content.
    pub fn content_to_materialize(&self) -> Option<&FileVersion> {
        match &self.op {
            ActionOp::New { winning } | ActionOp::Change { winning, .. }
                if !winning.is_deleted() && winning.file_type == FileType::File =>
            {
                Some(winning)
            }
            _ => None,
        }
    }

    /// Executes the action.
    ///
    /// # Errors
    ///
    /// Fails with [`SyncError::FileSystemAction`] if the filesystem rejects
    /// an operation or no longer looks the way the action expects.
    pub fn execute(&self, ctx: &ActionContext<'_>) -> SyncResult<()> {
        debug!(action = %self, "executing");
        let exec = Executor { ctx, action: self };
        match &self.op {
            ActionOp::New { winning } => exec.create(winning, None),
            ActionOp::NewSymlink { winning, replaces } => exec.create(winning, replaces.as_ref()),
            ActionOp::Delete { expected } => exec.delete(expected),
            ActionOp::Change {
                expected,
                winning,
                conflict,
            } => exec.change(expected, winning, *conflict),
            ActionOp::Rename { expected, winning } => exec.rename(expected, winning),
            ActionOp::SetAttributes { winning } => {
                if exec.observe(&winning.path)?.is_none() {
                    return Err(exec.unexpected(&winning.path, "entry vanished"));
                }
                exec.apply_metadata(winning)
            }
        }
    }
}

impl fmt::Display for FileSystemAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?} {}", self.kind(), self.target.file_type, self.target.path)?;
        if let ActionOp::Rename { expected, .. } = &self.op {
            write!(f, " (from {})", expected.path)?;
        }
        if let ActionOp::Change { conflict: true, .. } = &self.op {
            f.write_str(" [conflict]")?;
        }
        Ok(())
    }
}

/// Splits `dir/name.ext` into `("dir/name", ".ext")`.
fn split_extension(path: &str) -> (&str, &str) {
    let name_start = path.rfind('/').map(|i| i + 1).unwrap_or(0);
    match path[name_start..].rfind('.') {
        Some(dot) if dot > 0 => path.split_at(name_start + dot),
        _ => (path, ""),
    }
}

struct Executor<'a, 'b> {
    ctx: &'a ActionContext<'b>,
    action: &'a FileSystemAction,
}

impl Executor<'_, '_> {
    fn fs<T>(&self, result: FileSystemResult<T>) -> SyncResult<T> {
        result.map_err(|e| SyncError::file_system(self.action.to_string(), e))
    }

    fn unexpected(&self, path: &str, reason: &str) -> SyncError {
        SyncError::file_system(self.action.to_string(), FileSystemError::unexpected(path, reason))
    }

    fn observe(&self, path: &str) -> SyncResult<Option<FileProperties>> {
        self.fs(self.ctx.fs.properties(path, true))
    }

    fn matches(expected: &FileVersion, observed: Option<&FileProperties>) -> bool {
        FileVersionComparator::compare(expected, observed, true).is_empty()
    }

    /// Like [`Self::matches`], ignoring where the entry lives.
    fn matches_moved(expected: &FileVersion, observed: &FileProperties) -> bool {
        let relocated = FileProperties {
            path: expected.path.clone(),
            ..observed.clone()
        };
        Self::matches(expected, Some(&relocated))
    }

    fn move_to_conflict(&self, path: &str) -> SyncResult<String> {
        let is_folder = self
            .observe(path)?
            .is_some_and(|p| p.file_type == FileType::Folder);
        let (stem, ext) = if is_folder { (path, "") } else { split_extension(path) };
        let label = &self.ctx.config.conflict_label;

        for attempt in 1..=self.ctx.config.max_conflict_attempts {
            let candidate = if attempt == 1 {
                format!("{stem} ({label}){ext}")
            } else {
                format!("{stem} ({label} {attempt}){ext}")
            };
            if self.observe(&candidate)?.is_none() {
                self.fs(self.ctx.fs.rename(path, &candidate))?;
                warn!(from = path, to = %candidate, "moved diverging local file to conflicted copy");
                return Ok(candidate);
            }
        }

        Err(self.unexpected(path, "no free conflicted-copy name"))
    }

    /// Frees the winning path. Returns true if the entry already there can stay.
    fn clear_target(&self, winning: &FileVersion, replaceable: Option<&FileVersion>) -> SyncResult<bool> {
        let Some(observed) = self.observe(&winning.path)? else {
            return Ok(false);
        };
        if Self::matches(winning, Some(&observed)) {
            return Ok(true);
        }
        if observed.file_type != FileType::Folder
            && replaceable.is_some_and(|r| Self::matches(r, Some(&observed)))
        {
            self.fs(self.ctx.fs.remove_file(&winning.path))?;
            return Ok(false);
        }

        match (observed.file_type, winning.file_type) {
            (FileType::Folder, FileType::Folder) => Ok(true),
            (FileType::Folder, _) => {
                if !self.fs(self.ctx.fs.remove_folder(&winning.path))? {
                    self.move_to_conflict(&winning.path)?;
                }
                Ok(false)
            }
            _ => {
                self.move_to_conflict(&winning.path)?;
                Ok(false)
            }
        }
    }

    fn materialize(&self, winning: &FileVersion) -> SyncResult<()> {
        let fs = self.ctx.fs;
        match winning.file_type {
            FileType::Folder => self.fs(fs.create_folder(&winning.path))?,
            FileType::File => {
                let data = match &winning.checksum {
                    Some(checksum) => self.ctx.content.assemble(checksum)?,
                    None => Vec::new(),
                };
                if data.len() as u64 != winning.size {
                    return Err(SyncError::consistency(format!(
                        "assembled {} bytes for {}, expected {}",
                        data.len(),
                        winning.path,
                        winning.size
                    )));
                }
                self.fs(fs.write_file(&winning.path, &data))?;
            }
            FileType::Symlink => {
                let target = winning
                    .link_target
                    .as_deref()
                    .ok_or_else(|| self.unexpected(&winning.path, "symlink without target"))?;
                self.fs(fs.create_symlink(&winning.path, target))?;
            }
        }
        self.apply_metadata(winning)
    }

    fn apply_metadata(&self, winning: &FileVersion) -> SyncResult<()> {
        if winning.file_type == FileType::Symlink {
            return Ok(());
        }
        if let Some(mode) = winning.attributes {
            self.fs(self.ctx.fs.set_attributes(&winning.path, mode))?;
        }
        if winning.file_type == FileType::File {
            self.fs(self.ctx.fs.set_last_modified(&winning.path, winning.last_modified))?;
        }
        Ok(())
    }

    fn create(&self, winning: &FileVersion, replaceable: Option<&FileVersion>) -> SyncResult<()> {
        if self.clear_target(winning, replaceable)? {
            self.apply_metadata(winning)
        } else {
            self.materialize(winning)
        }
    }

    fn delete(&self, expected: &FileVersion) -> SyncResult<()> {
        let Some(observed) = self.observe(&expected.path)? else {
            debug!(path = %expected.path, "already gone");
            return Ok(());
        };

        if expected.file_type == FileType::Folder {
            if observed.file_type != FileType::Folder {
                debug!(path = %expected.path, "path now holds a different kind of entry, leaving it");
            } else if !self.fs(self.ctx.fs.remove_folder(&expected.path))? {
                warn!(path = %expected.path, "folder not empty, keeping it");
            }
            return Ok(());
        }

        if Self::matches(expected, Some(&observed)) {
            self.fs(self.ctx.fs.remove_file(&expected.path))
        } else {
            self.move_to_conflict(&expected.path).map(|_| ())
        }
    }

    fn change(&self, expected: &FileVersion, winning: &FileVersion, conflict: bool) -> SyncResult<()> {
        if let Some(observed) = self.observe(&expected.path)? {
            if observed.file_type == FileType::Folder {
                let keep = !winning.is_deleted()
                    && winning.file_type == FileType::Folder
                    && winning.path == expected.path;
                if !keep && !self.fs(self.ctx.fs.remove_folder(&expected.path))? {
                    if winning.is_deleted() {
                        warn!(path = %expected.path, "folder not empty, keeping it");
                    } else {
                        self.move_to_conflict(&expected.path)?;
                    }
                }
            } else if conflict || !Self::matches(expected, Some(&observed)) {
                self.move_to_conflict(&expected.path)?;
            } else {
                self.fs(self.ctx.fs.remove_file(&expected.path))?;
            }
        }

        if winning.is_deleted() {
            return Ok(());
        }
        self.create(winning, None)
    }

    fn rename(&self, expected: &FileVersion, winning: &FileVersion) -> SyncResult<()> {
        let moved = winning.path != expected.path;

        if moved {
            if let Some(target) = self.observe(&winning.path)? {
                if Self::matches(winning, Some(&target)) || Self::matches_moved(expected, &target) {
                    debug!(path = %winning.path, "already at destination");
                    return self.apply_metadata(winning);
                }
            }
        }

        match self.observe(&expected.path)? {
            None => return Err(self.unexpected(&expected.path, "rename source vanished")),
            Some(source) if !Self::matches(expected, Some(&source)) => {
                return Err(self.unexpected(&expected.path, "rename source changed"));
            }
            Some(_) => {}
        }

        if moved {
            if self.observe(&winning.path)?.is_some() {
                self.move_to_conflict(&winning.path)?;
            }
            self.fs(self.ctx.fs.rename(&expected.path, &winning.path))?;
        }
        self.apply_metadata(winning)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::{checksum_of, MemoryFileSystem};
    use driftsync_protocol::FileStatus;
    use std::collections::HashMap;

    #[derive(Default)]
    struct Contents(HashMap<Checksum, Vec<u8>>);

    impl Contents {
        fn file(&mut self, path: &str, data: &[u8], mtime: u64) -> FileVersion {
            let checksum = checksum_of(data);
            self.0.insert(checksum.clone(), data.to_vec());
            FileVersion {
                checksum: (!data.is_empty()).then_some(checksum),
                size: data.len() as u64,
                last_modified: mtime,
                ..FileVersion::new(path, FileType::File)
            }
        }
    }

    impl ContentSource for Contents {
        fn assemble(&self, checksum: &Checksum) -> SyncResult<Vec<u8>> {
            self.0
                .get(checksum)
                .cloned()
                .ok_or_else(|| SyncError::consistency("unknown content"))
        }
    }

    fn run(fs: &MemoryFileSystem, contents: &Contents, action: FileSystemAction) -> SyncResult<()> {
        let config = SyncDownConfig::new("A");
        let ctx = ActionContext {
            fs,
            content: contents,
            config: &config,
        };
        action.execute(&ctx)
    }

    fn put(fs: &MemoryFileSystem, version: &FileVersion, data: &[u8]) {
        fs.write_file(&version.path, data).unwrap();
        fs.set_last_modified(&version.path, version.last_modified).unwrap();
    }

    #[test]
    fn split_extension_cases() {
        assert_eq!(split_extension("dir/x.txt"), ("dir/x", ".txt"));
        assert_eq!(split_extension("x"), ("x", ""));
        assert_eq!(split_extension("dir.d/.bashrc"), ("dir.d/.bashrc", ""));
    }

    #[test]
    fn new_file_moves_diverging_entry_to_conflicted_copy() {
        let fs = MemoryFileSystem::new();
        let mut contents = Contents::default();
        let winning = contents.file("x", b"winner", 100);
        fs.write_file("x", b"mine").unwrap();

        run(&fs, &contents, FileSystemAction::new_file(winning)).unwrap();

        assert_eq!(fs.read("x").unwrap(), b"winner");
        assert_eq!(fs.read("x (conflicted copy)").unwrap(), b"mine");
        assert_eq!(fs.properties("x", false).unwrap().unwrap().last_modified, 100);
    }

    #[test]
    fn conflicted_copy_names_are_numbered() {
        let fs = MemoryFileSystem::new();
        let mut contents = Contents::default();
        let winning = contents.file("a.txt", b"winner", 1);
        fs.write_file("a.txt", b"mine").unwrap();
        fs.write_file("a (conflicted copy).txt", b"older").unwrap();

        run(&fs, &contents, FileSystemAction::new_file(winning)).unwrap();
        assert_eq!(fs.read("a (conflicted copy 2).txt").unwrap(), b"mine");
    }

    #[test]
    fn delete_removes_only_matching_files() {
        let fs = MemoryFileSystem::new();
        let mut contents = Contents::default();
        let expected = contents.file("a", b"known", 5);
        put(&fs, &expected, b"known");
        run(&fs, &contents, FileSystemAction::delete(expected.clone())).unwrap();
        assert!(fs.properties("a", false).unwrap().is_none());

        put(&fs, &expected, b"edited");
        run(&fs, &contents, FileSystemAction::delete(expected)).unwrap();
        assert!(fs.properties("a", false).unwrap().is_none());
        assert_eq!(fs.read("a (conflicted copy)").unwrap(), b"edited");
    }

    #[test]
    fn delete_keeps_non_empty_folder() {
        let fs = MemoryFileSystem::new();
        let contents = Contents::default();
        fs.write_file("d/untracked", b"u").unwrap();
        let folder = FileVersion::new("d", FileType::Folder);
        run(&fs, &contents, FileSystemAction::delete(folder)).unwrap();
        assert!(fs.properties("d", false).unwrap().is_some());
    }

    #[test]
    fn change_replaces_matching_file() {
        let fs = MemoryFileSystem::new();
        let mut contents = Contents::default();
        let local = contents.file("a", b"v1", 5);
        put(&fs, &local, b"v1");
        let winning = FileVersion {
            version: 2,
            status: FileStatus::Changed,
            ..contents.file("a", b"v2 content", 9)
        };

        run(&fs, &contents, FileSystemAction::change(local, winning, false)).unwrap();
        assert_eq!(fs.read("a").unwrap(), b"v2 content");
        assert!(fs.properties("a (conflicted copy)", false).unwrap().is_none());
    }

    #[test]
    fn conflicting_change_preserves_local_edit() {
        let fs = MemoryFileSystem::new();
        let mut contents = Contents::default();
        let local = contents.file("a", b"v1", 5);
        fs.write_file("a", b"local edit").unwrap();
        let winning = contents.file("a", b"remote edit", 9);

        run(&fs, &contents, FileSystemAction::change(local, winning, true)).unwrap();
        assert_eq!(fs.read("a").unwrap(), b"remote edit");
        assert_eq!(fs.read("a (conflicted copy)").unwrap(), b"local edit");
    }

    #[test]
    fn change_to_deleted_winner_removes_file() {
        let fs = MemoryFileSystem::new();
        let mut contents = Contents::default();
        let local = contents.file("a", b"v1", 5);
        put(&fs, &local, b"v1");
        let winning = local.next(FileStatus::Deleted);

        let action = FileSystemAction::change(local, winning, false);
        assert_eq!(action.target.effect, Effect::Remove);
        run(&fs, &contents, action).unwrap();
        assert!(fs.properties("a", false).unwrap().is_none());
    }

    #[test]
    fn rename_moves_file_and_tolerates_moved_parent() {
        let fs = MemoryFileSystem::new();
        let mut contents = Contents::default();
        let local = contents.file("old/a", b"data", 5);
        put(&fs, &local, b"data");
        let winning = FileVersion {
            path: "new/a".into(),
            status: FileStatus::Renamed,
            version: 2,
            ..local.clone()
        };

        run(&fs, &contents, FileSystemAction::rename(local.clone(), winning.clone())).unwrap();
        assert_eq!(fs.read("new/a").unwrap(), b"data");

        // Running it again finds the entry already at its destination.
        run(&fs, &contents, FileSystemAction::rename(local, winning)).unwrap();
    }

    #[test]
    fn rename_with_changed_source_fails() {
        let fs = MemoryFileSystem::new();
        let mut contents = Contents::default();
        let local = contents.file("a", b"data", 5);
        fs.write_file("a", b"other").unwrap();
        let winning = FileVersion {
            path: "b".into(),
            ..local.clone()
        };

        let err = run(&fs, &contents, FileSystemAction::rename(local, winning)).unwrap_err();
        assert!(matches!(err, SyncError::FileSystemAction { .. }));
        assert_eq!(fs.read("a").unwrap(), b"other");
    }

    #[test]
    fn new_folder_moves_file_out_of_the_way() {
        let fs = MemoryFileSystem::new();
        let contents = Contents::default();
        fs.write_file("x", b"file in the way").unwrap();
        let folder = FileVersion::new("x", FileType::Folder);

        run(&fs, &contents, FileSystemAction::new_file(folder)).unwrap();
        assert_eq!(
            fs.properties("x", false).unwrap().map(|p| p.file_type),
            Some(FileType::Folder)
        );
        assert_eq!(fs.read("x (conflicted copy)").unwrap(), b"file in the way");
    }

    #[test]
    fn symlink_creation() {
        let fs = MemoryFileSystem::new();
        let contents = Contents::default();
        let link = FileVersion {
            link_target: Some("target".into()),
            ..FileVersion::new("l", FileType::Symlink)
        };
        run(&fs, &contents, FileSystemAction::new_symlink(link.clone(), None)).unwrap();
        assert_eq!(
            fs.properties("l", false).unwrap().and_then(|p| p.link_target),
            Some("target".to_string())
        );

        let retargeted = FileVersion {
            link_target: Some("elsewhere".into()),
            ..link.next(FileStatus::Changed)
        };
        run(&fs, &contents, FileSystemAction::new_symlink(retargeted, Some(link))).unwrap();
        assert!(fs.properties("l (conflicted copy)", false).unwrap().is_none());
        assert_eq!(
            fs.properties("l", false).unwrap().and_then(|p| p.link_target),
            Some("elsewhere".to_string())
        );
    }
}
