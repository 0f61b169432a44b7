//! Local filesystem collaborator.
//!
//! Paths are relative to the sync root and `/`-separated, the same form
//! stored in [`FileVersion::path`].

use crate::error::{FileSystemError, FileSystemResult};
use driftsync_protocol::{Checksum, FileType, FileVersion};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Observed state of one filesystem entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileProperties {
    /// Relative path.
    pub path: String,
    /// Entry kind.
    pub file_type: FileType,
    /// Size in bytes; zero for folders and symlinks.
    pub size: u64,
    /// Modification time in milliseconds since the Unix epoch.
    pub last_modified: u64,
    /// Unix permission bits, if the platform reports them.
    pub attributes: Option<u32>,
    /// Symlink target.
    pub link_target: Option<String>,
    /// Content checksum, computed only on request and for non-empty files.
    pub checksum: Option<Checksum>,
}

impl From<&FileVersion> for FileProperties {
    fn from(version: &FileVersion) -> Self {
        Self {
            path: version.path.clone(),
            file_type: version.file_type,
            size: version.size,
            last_modified: version.last_modified,
            attributes: version.attributes,
            link_target: version.link_target.clone(),
            checksum: version.checksum.clone(),
        }
    }
}

/// Computes the content checksum used throughout driftsync.
pub fn checksum_of(data: &[u8]) -> Checksum {
    Checksum(format!("{:x}", Sha256::digest(data)))
}

/// Operations the sync engine needs from the local filesystem.
pub trait LocalFileSystem: Send + Sync {
    /// Returns the entry at `path`, or `None` if nothing is there.
    ///
    /// Symlinks are reported as symlinks, never followed.
    fn properties(&self, path: &str, with_checksum: bool) -> FileSystemResult<Option<FileProperties>>;

    /// Reads the full content of a regular file.
    fn read(&self, path: &str) -> FileSystemResult<Vec<u8>>;

    /// Writes a regular file, creating parent folders.
    fn write_file(&self, path: &str, content: &[u8]) -> FileSystemResult<()>;

    /// Creates a folder and its parents; succeeds if it already exists.
    fn create_folder(&self, path: &str) -> FileSystemResult<()>;

    /// Creates a symlink, creating parent folders.
    fn create_symlink(&self, path: &str, target: &str) -> FileSystemResult<()>;

    /// Moves an entry, creating parent folders of the destination.
    fn rename(&self, from: &str, to: &str) -> FileSystemResult<()>;

    /// Removes a regular file or symlink.
    fn remove_file(&self, path: &str) -> FileSystemResult<()>;

    /// Removes an empty folder. Returns `false` and leaves it in place if
    /// it still has entries.
    fn remove_folder(&self, path: &str) -> FileSystemResult<bool>;

    /// Sets the modification time.
    fn set_last_modified(&self, path: &str, millis: u64) -> FileSystemResult<()>;

    /// Sets Unix permission bits; a no-op where unsupported.
    fn set_attributes(&self, path: &str, mode: u32) -> FileSystemResult<()>;

    /// Lists every entry below the root, sorted by path.
    fn walk(&self, with_checksum: bool) -> FileSystemResult<Vec<FileProperties>>;
}

/// A [`LocalFileSystem`] rooted at a directory on disk.
#[derive(Debug, Clone)]
pub struct DiskFileSystem {
    root: PathBuf,
}

impl DiskFileSystem {
    /// Creates a filesystem rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The sync root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a relative path below the root. Anything that could leave the
    /// root (`..`, `.`, absolute paths, drive prefixes) is rejected.
    fn resolve(&self, path: &str) -> FileSystemResult<PathBuf> {
        if path.starts_with('/') {
            return Err(FileSystemError::unexpected(path, "absolute path"));
        }

        let mut full = self.root.clone();
        for part in path.split('/').filter(|c| !c.is_empty()) {
            let mut components = Path::new(part).components();
            match (components.next(), components.next()) {
                (Some(Component::Normal(_)), None) => full.push(part),
                _ => {
                    return Err(FileSystemError::unexpected(
                        path,
                        format!("component {part:?} leaves the sync root"),
                    ))
                }
            }
        }
        Ok(full)
    }

    fn create_parent(&self, full: &Path) -> FileSystemResult<()> {
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).map_err(|e| FileSystemError::io(parent, e))?;
        }
        Ok(())
    }

    fn stat(&self, path: &str, full: &Path, with_checksum: bool) -> FileSystemResult<FileProperties> {
        let meta = fs::symlink_metadata(full).map_err(|e| FileSystemError::io(full, e))?;
        let file_type = if meta.file_type().is_symlink() {
            FileType::Symlink
        } else if meta.is_dir() {
            FileType::Folder
        } else {
            FileType::File
        };

        let last_modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        let link_target = if file_type == FileType::Symlink {
            let target = fs::read_link(full).map_err(|e| FileSystemError::io(full, e))?;
            Some(target.to_string_lossy().replace('\\', "/"))
        } else {
            None
        };

        let size = if file_type == FileType::File { meta.len() } else { 0 };
        let checksum = if with_checksum && file_type == FileType::File && size > 0 {
            Some(hash_file(full)?)
        } else {
            None
        };

        Ok(FileProperties {
            path: path.to_string(),
            file_type,
            size,
            last_modified,
            attributes: mode_of(&meta),
            link_target,
            checksum,
        })
    }

    fn walk_dir(
        &self,
        dir: &Path,
        prefix: &str,
        with_checksum: bool,
        out: &mut Vec<FileProperties>,
    ) -> FileSystemResult<()> {
        let entries = fs::read_dir(dir).map_err(|e| FileSystemError::io(dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| FileSystemError::io(dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let path = if prefix.is_empty() {
                name
            } else {
                format!("{prefix}/{name}")
            };
            let props = self.stat(&path, &entry.path(), with_checksum)?;
            if props.file_type == FileType::Folder {
                self.walk_dir(&entry.path(), &path, with_checksum, out)?;
            }
            out.push(props);
        }
        Ok(())
    }
}

#[cfg(unix)]
fn mode_of(meta: &fs::Metadata) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    if meta.file_type().is_symlink() {
        None
    } else {
        Some(meta.permissions().mode() & 0o7777)
    }
}

#[cfg(not(unix))]
fn mode_of(_meta: &fs::Metadata) -> Option<u32> {
    None
}

fn hash_file(full: &Path) -> FileSystemResult<Checksum> {
    let mut file = fs::File::open(full).map_err(|e| FileSystemError::io(full, e))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).map_err(|e| FileSystemError::io(full, e))?;
    Ok(Checksum(format!("{:x}", hasher.finalize())))
}

impl LocalFileSystem for DiskFileSystem {
    fn properties(&self, path: &str, with_checksum: bool) -> FileSystemResult<Option<FileProperties>> {
        let full = self.resolve(path)?;
        match fs::symlink_metadata(&full) {
            Ok(_) => self.stat(path, &full, with_checksum).map(Some),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(FileSystemError::io(full, e)),
        }
    }

    fn read(&self, path: &str) -> FileSystemResult<Vec<u8>> {
        let full = self.resolve(path)?;
        fs::read(&full).map_err(|e| FileSystemError::io(full, e))
    }

    fn write_file(&self, path: &str, content: &[u8]) -> FileSystemResult<()> {
        let full = self.resolve(path)?;
        self.create_parent(&full)?;

        let name = full
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| FileSystemError::unexpected(&full, "not a file path"))?;
        let temp = full.with_file_name(format!(".{name}.driftsync-tmp"));

        fs::write(&temp, content).map_err(|e| FileSystemError::io(&temp, e))?;
        fs::rename(&temp, &full).map_err(|e| FileSystemError::io(&full, e))
    }

    fn create_folder(&self, path: &str) -> FileSystemResult<()> {
        let full = self.resolve(path)?;
        fs::create_dir_all(&full).map_err(|e| FileSystemError::io(full, e))
    }

    fn create_symlink(&self, path: &str, target: &str) -> FileSystemResult<()> {
        let full = self.resolve(path)?;
        self.create_parent(&full)?;
        make_symlink(target, &full).map_err(|e| FileSystemError::io(full, e))
    }

    fn rename(&self, from: &str, to: &str) -> FileSystemResult<()> {
        let source = self.resolve(from)?;
        let dest = self.resolve(to)?;
        self.create_parent(&dest)?;
        fs::rename(&source, &dest).map_err(|e| FileSystemError::io(source, e))
    }

    fn remove_file(&self, path: &str) -> FileSystemResult<()> {
        let full = self.resolve(path)?;
        fs::remove_file(&full).map_err(|e| FileSystemError::io(full, e))
    }

    fn remove_folder(&self, path: &str) -> FileSystemResult<bool> {
        let full = self.resolve(path)?;
        let mut entries = fs::read_dir(&full).map_err(|e| FileSystemError::io(&full, e))?;
        if entries.next().is_some() {
            return Ok(false);
        }
        fs::remove_dir(&full).map_err(|e| FileSystemError::io(full, e))?;
        Ok(true)
    }

    fn set_last_modified(&self, path: &str, millis: u64) -> FileSystemResult<()> {
        let full = self.resolve(path)?;
        let time = SystemTime::UNIX_EPOCH + Duration::from_millis(millis);
        let file = fs::File::open(&full).map_err(|e| FileSystemError::io(&full, e))?;
        file.set_modified(time)
            .map_err(|e| FileSystemError::io(full, e))
    }

    #[cfg(unix)]
    fn set_attributes(&self, path: &str, mode: u32) -> FileSystemResult<()> {
        use std::os::unix::fs::PermissionsExt;
        let full = self.resolve(path)?;
        fs::set_permissions(&full, fs::Permissions::from_mode(mode))
            .map_err(|e| FileSystemError::io(full, e))
    }

    #[cfg(not(unix))]
    fn set_attributes(&self, _path: &str, _mode: u32) -> FileSystemResult<()> {
        Ok(())
    }

    fn walk(&self, with_checksum: bool) -> FileSystemResult<Vec<FileProperties>> {
        let mut out = Vec::new();
        if self.root.exists() {
            self.walk_dir(&self.root, "", with_checksum, &mut out)?;
        }
        out.retain(|p| !p.path.ends_with(".driftsync-tmp"));
        out.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(out)
    }
}

#[cfg(unix)]
fn make_symlink(target: &str, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn make_symlink(target: &str, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}

#[cfg(not(any(unix, windows)))]
fn make_symlink(_target: &str, _link: &Path) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "symlinks are not supported"))
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    file_type: FileType,
    content: Vec<u8>,
    last_modified: u64,
    attributes: Option<u32>,
    link_target: Option<String>,
}

impl MemoryEntry {
    fn folder() -> Self {
        Self {
            file_type: FileType::Folder,
            content: Vec::new(),
            last_modified: 0,
            attributes: None,
            link_target: None,
        }
    }
}

/// An in-memory [`LocalFileSystem`] for tests.
#[derive(Debug, Default)]
pub struct MemoryFileSystem {
    entries: RwLock<BTreeMap<String, MemoryEntry>>,
}

impl MemoryFileSystem {
    /// Creates an empty filesystem.
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_parents(entries: &mut BTreeMap<String, MemoryEntry>, path: &str) -> FileSystemResult<()> {
        let mut current = String::new();
        let components: Vec<&str> = path.split('/').collect();
        for component in &components[..components.len().saturating_sub(1)] {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(component);
            match entries.get(&current) {
                Some(e) if e.file_type != FileType::Folder => {
                    return Err(FileSystemError::unexpected(&current, "parent is not a folder"));
                }
                Some(_) => {}
                None => {
                    entries.insert(current.clone(), MemoryEntry::folder());
                }
            }
        }
        Ok(())
    }

    fn has_children(entries: &BTreeMap<String, MemoryEntry>, path: &str) -> bool {
        let prefix = format!("{path}/");
        entries
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(k, _)| k.starts_with(&prefix))
    }

    fn not_found(path: &str) -> FileSystemError {
        FileSystemError::io(path, io::Error::new(io::ErrorKind::NotFound, "no such entry"))
    }

    fn props(path: &str, entry: &MemoryEntry, with_checksum: bool) -> FileProperties {
        let is_file = entry.file_type == FileType::File;
        FileProperties {
            path: path.to_string(),
            file_type: entry.file_type,
            size: if is_file { entry.content.len() as u64 } else { 0 },
            last_modified: entry.last_modified,
            attributes: entry.attributes,
            link_target: entry.link_target.clone(),
            checksum: (with_checksum && is_file && !entry.content.is_empty())
                .then(|| checksum_of(&entry.content)),
        }
    }
}

impl LocalFileSystem for MemoryFileSystem {
    fn properties(&self, path: &str, with_checksum: bool) -> FileSystemResult<Option<FileProperties>> {
        Ok(self
            .entries
            .read()
            .get(path)
            .map(|e| Self::props(path, e, with_checksum)))
    }

    fn read(&self, path: &str) -> FileSystemResult<Vec<u8>> {
        match self.entries.read().get(path) {
            Some(e) if e.file_type == FileType::File => Ok(e.content.clone()),
            Some(_) => Err(FileSystemError::unexpected(path, "not a regular file")),
            None => Err(Self::not_found(path)),
        }
    }

    fn write_file(&self, path: &str, content: &[u8]) -> FileSystemResult<()> {
        let mut entries = self.entries.write();
        Self::ensure_parents(&mut entries, path)?;
        if entries.get(path).is_some_and(|e| e.file_type == FileType::Folder) {
            return Err(FileSystemError::unexpected(path, "is a folder"));
        }
        entries.insert(
            path.to_string(),
            MemoryEntry {
                file_type: FileType::File,
                content: content.to_vec(),
                last_modified: 0,
                attributes: None,
                link_target: None,
            },
        );
        Ok(())
    }

    fn create_folder(&self, path: &str) -> FileSystemResult<()> {
        let mut entries = self.entries.write();
        Self::ensure_parents(&mut entries, path)?;
        match entries.get(path) {
            Some(e) if e.file_type == FileType::Folder => Ok(()),
            Some(_) => Err(FileSystemError::unexpected(path, "exists and is not a folder")),
            None => {
                entries.insert(path.to_string(), MemoryEntry::folder());
                Ok(())
            }
        }
    }

    fn create_symlink(&self, path: &str, target: &str) -> FileSystemResult<()> {
        let mut entries = self.entries.write();
        Self::ensure_parents(&mut entries, path)?;
        if entries.contains_key(path) {
            return Err(FileSystemError::unexpected(path, "already exists"));
        }
        entries.insert(
            path.to_string(),
            MemoryEntry {
                file_type: FileType::Symlink,
                content: Vec::new(),
                last_modified: 0,
                attributes: None,
                link_target: Some(target.to_string()),
            },
        );
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> FileSystemResult<()> {
        let mut entries = self.entries.write();
        let entry = entries.remove(from).ok_or_else(|| Self::not_found(from))?;
        Self::ensure_parents(&mut entries, to)?;

        let prefix = format!("{from}/");
        let children: Vec<String> = entries
            .keys()
            .filter(|k| k.starts_with(&prefix))
            .cloned()
            .collect();
        for child in children {
            if let Some(e) = entries.remove(&child) {
                entries.insert(format!("{to}/{}", &child[prefix.len()..]), e);
            }
        }
        entries.insert(to.to_string(), entry);
        Ok(())
    }

    fn remove_file(&self, path: &str) -> FileSystemResult<()> {
        let mut entries = self.entries.write();
        match entries.get(path) {
            Some(e) if e.file_type == FileType::Folder => {
                Err(FileSystemError::unexpected(path, "is a folder"))
            }
            Some(_) => {
                entries.remove(path);
                Ok(())
            }
            None => Err(Self::not_found(path)),
        }
    }

    fn remove_folder(&self, path: &str) -> FileSystemResult<bool> {
        let mut entries = self.entries.write();
        match entries.get(path) {
            Some(e) if e.file_type == FileType::Folder => {
                if Self::has_children(&entries, path) {
                    return Ok(false);
                }
                entries.remove(path);
                Ok(true)
            }
            Some(_) => Err(FileSystemError::unexpected(path, "not a folder")),
            None => Err(Self::not_found(path)),
        }
    }

    fn set_last_modified(&self, path: &str, millis: u64) -> FileSystemResult<()> {
        let mut entries = self.entries.write();
        let entry = entries.get_mut(path).ok_or_else(|| Self::not_found(path))?;
        entry.last_modified = millis;
        Ok(())
    }

    fn set_attributes(&self, path: &str, mode: u32) -> FileSystemResult<()> {
        let mut entries = self.entries.write();
        let entry = entries.get_mut(path).ok_or_else(|| Self::not_found(path))?;
        entry.attributes = Some(mode);
        Ok(())
    }

    fn walk(&self, with_checksum: bool) -> FileSystemResult<Vec<FileProperties>> {
        Ok(self
            .entries
            .read()
            .iter()
            .map(|(path, e)| Self::props(path, e, with_checksum))
            .collect())
    }
}
