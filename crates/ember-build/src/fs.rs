//! Project file access
//!
//! The build pipeline never touches the filesystem directly. It reads through
//! a [`FileStore`], which hands out point-in-time [`FileNode`] snapshots of the
//! whole project tree. Paths are always `/`-separated and relative to the
//! project root.

use crate::error::{BuildError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// A node of a project snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FileNode {
    Folder {
        #[serde(default)]
        children: BTreeMap<String, FileNode>,
    },
    File {
        content: String,
    },
}

impl FileNode {
    /// An empty folder
    pub fn folder() -> Self {
        Self::Folder {
            children: BTreeMap::new(),
        }
    }

    /// A file leaf
    pub fn file(content: impl Into<String>) -> Self {
        Self::File {
            content: content.into(),
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self, Self::Folder { .. })
    }

    /// Insert a file, creating intermediate folders
    pub fn insert(&mut self, path: &str, content: impl Into<String>) -> Result<()> {
        let normalized = normalize_path(path);
        let mut segments: Vec<&str> = normalized.split('/').collect();
        let Some(name) = segments.pop().filter(|n| !n.is_empty()) else {
            return Err(BuildError::store(path, "empty path"));
        };

        let mut node = self;
        for segment in segments {
            let Self::Folder { children } = node else {
                return Err(BuildError::store(path, "parent is a file"));
            };
            node = children
                .entry(segment.to_string())
                .or_insert_with(FileNode::folder);
        }

        match node {
            Self::Folder { children } => {
                if children.get(name).is_some_and(FileNode::is_folder) {
                    return Err(BuildError::store(path, "path is a folder"));
                }
                children.insert(name.to_string(), FileNode::file(content));
                Ok(())
            }
            Self::File { .. } => Err(BuildError::store(path, "parent is a file")),
        }
    }

    /// Look up a node by path
    pub fn get(&self, path: &str) -> Option<&FileNode> {
        let normalized = normalize_path(path);
        if normalized.is_empty() {
            return Some(self);
        }

        let mut node = self;
        for segment in normalized.split('/') {
            match node {
                Self::Folder { children } => node = children.get(segment)?,
                Self::File { .. } => return None,
            }
        }
        Some(node)
    }

    /// Content of the file at `path`, if it is a file
    pub fn read(&self, path: &str) -> Option<&str> {
        match self.get(path)? {
            Self::File { content } => Some(content),
            Self::Folder { .. } => None,
        }
    }

    /// Remove a file or folder; returns whether anything was removed
    pub fn remove(&mut self, path: &str) -> bool {
        let normalized = normalize_path(path);
        let mut segments: Vec<&str> = normalized.split('/').collect();
        let Some(name) = segments.pop() else {
            return false;
        };

        let mut node = self;
        for segment in segments {
            match node {
                Self::Folder { children } => match children.get_mut(segment) {
                    Some(child) => node = child,
                    None => return false,
                },
                Self::File { .. } => return false,
            }
        }

        match node {
            Self::Folder { children } => children.remove(name).is_some(),
            Self::File { .. } => false,
        }
    }

    /// Flatten into `path -> content`, sorted by path
    pub fn files(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        self.collect_files("", &mut out);
        out
    }

    pub fn file_count(&self) -> usize {
        match self {
            Self::File { .. } => 1,
            Self::Folder { children } => children.values().map(FileNode::file_count).sum(),
        }
    }

    fn collect_files(&self, prefix: &str, out: &mut BTreeMap<String, String>) {
        match self {
            Self::File { content } => {
                out.insert(prefix.to_string(), content.clone());
            }
            Self::Folder { children } => {
                for (name, child) in children {
                    let path = if prefix.is_empty() {
                        name.clone()
                    } else {
                        format!("{}/{}", prefix, name)
                    };
                    child.collect_files(&path, out);
                }
            }
        }
    }
}

impl Default for FileNode {
    fn default() -> Self {
        Self::folder()
    }
}

/// Normalize a project path: `/` separators, no leading `./` or `/`, no empty
/// or `.` segments. `..` segments are kept.
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Source of project files for the build pipeline
pub trait FileStore: Send + Sync {
    /// Read a file; `None` when it does not exist or is not readable as text
    fn read_file(&self, path: &str) -> Option<String>;

    fn write_file(&self, path: &str, content: &str) -> Result<()>;

    /// Remove a file; returns whether it existed
    fn remove_file(&self, path: &str) -> Result<bool>;

    fn exists(&self, path: &str) -> bool;

    /// Point-in-time copy of the whole project tree
    fn snapshot(&self) -> FileNode;
}

/// In-memory project tree, used by editors that keep files in memory
#[derive(Debug, Default)]
pub struct MemoryFileStore {
    root: RwLock<FileNode>,
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from `(path, content)` pairs
    pub fn from_files<I, P, C>(files: I) -> Result<Self>
    where
        I: IntoIterator<Item = (P, C)>,
        P: AsRef<str>,
        C: Into<String>,
    {
        let mut root = FileNode::folder();
        for (path, content) in files {
            root.insert(path.as_ref(), content)?;
        }
        Ok(Self {
            root: RwLock::new(root),
        })
    }
}

impl FileStore for MemoryFileStore {
    fn read_file(&self, path: &str) -> Option<String> {
        let root = self.root.read().unwrap_or_else(|e| e.into_inner());
        root.read(path).map(str::to_string)
    }

    fn write_file(&self, path: &str, content: &str) -> Result<()> {
        let mut root = self.root.write().unwrap_or_else(|e| e.into_inner());
        root.insert(path, content)
    }

    fn remove_file(&self, path: &str) -> Result<bool> {
        let mut root = self.root.write().unwrap_or_else(|e| e.into_inner());
        Ok(root.remove(path))
    }

    fn exists(&self, path: &str) -> bool {
        let root = self.root.read().unwrap_or_else(|e| e.into_inner());
        matches!(root.get(path), Some(FileNode::File { .. }))
    }

    fn snapshot(&self) -> FileNode {
        self.root.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Project tree backed by a directory on disk
///
/// Files that are not valid UTF-8 are represented in snapshots by a digest of
/// their bytes, so binary assets still fingerprint correctly.
#[derive(Debug, Clone)]
pub struct DiskFileStore {
    root: PathBuf,
    ignore: Vec<String>,
}

impl DiskFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ignore: Vec::new(),
        }
    }

    /// Directory or file names skipped while walking the tree
    pub fn with_ignore(mut self, ignore: Vec<String>) -> Self {
        self.ignore = ignore;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let normalized = normalize_path(path);
        let relative = Path::new(&normalized);
        if normalized.is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(BuildError::store(path, "path escapes the project root"));
        }
        Ok(self.root.join(relative))
    }

    fn is_ignored(&self, name: &str) -> bool {
        self.ignore.iter().any(|ignored| ignored == name)
    }

    fn relative_path(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let segments: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(segments.join("/"))
    }
}

impl FileStore for DiskFileStore {
    fn read_file(&self, path: &str) -> Option<String> {
        let full = self.resolve(path).ok()?;
        fs::read_to_string(full).ok()
    }

    fn write_file(&self, path: &str, content: &str) -> Result<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).map_err(|e| BuildError::store(path, e))?;
        }
        fs::write(&full, content).map_err(|e| BuildError::store(path, e))
    }

    fn remove_file(&self, path: &str) -> Result<bool> {
        let full = self.resolve(path)?;
        match fs::remove_file(&full) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(BuildError::store(path, e)),
        }
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).map(|full| full.is_file()).unwrap_or(false)
    }

    fn snapshot(&self) -> FileNode {
        let mut root = FileNode::folder();

        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0 || !self.is_ignored(&entry.file_name().to_string_lossy())
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(path) = self.relative_path(entry.path()) else {
                continue;
            };

            let content = match fs::read(entry.path()) {
                Ok(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => text,
                    Err(e) => binary_placeholder(e.as_bytes()),
                },
                Err(e) => {
                    debug!(path = %path, error = %e, "skipping unreadable file");
                    continue;
                }
            };

            if let Err(e) = root.insert(&path, content) {
                debug!(path = %path, error = %e, "skipping file");
            }
        }

        root
    }
}

fn binary_placeholder(bytes: &[u8]) -> String {
    format!("binary:sha256:{:x}", Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("./src//main.ts"), "src/main.ts");
        assert_eq!(normalize_path("/src/main.ts"), "src/main.ts");
        assert_eq!(normalize_path("src\\lib\\a.ts"), "src/lib/a.ts");
        assert_eq!(normalize_path("src/./a/../b.ts"), "src/a/../b.ts");
    }

    #[test]
    fn test_insert_and_flatten() {
        let mut root = FileNode::folder();
        root.insert("src/main.ts", "main").unwrap();
        root.insert("src/util/math.ts", "math").unwrap();
        root.insert("README.md", "readme").unwrap();

        let files = root.files();
        let paths: Vec<&str> = files.keys().map(String::as_str).collect();
        assert_eq!(paths, vec!["README.md", "src/main.ts", "src/util/math.ts"]);
        assert_eq!(root.read("src/util/math.ts"), Some("math"));
        assert_eq!(root.file_count(), 3);
    }

    #[test]
    fn test_insert_under_file_fails() {
        let mut root = FileNode::folder();
        root.insert("a", "file").unwrap();
        assert!(root.insert("a/b", "nested").is_err());
    }

    #[test]
    fn test_remove() {
        let mut root = FileNode::folder();
        root.insert("src/a.ts", "a").unwrap();
        assert!(root.remove("src/a.ts"));
        assert!(!root.remove("src/a.ts"));
        assert_eq!(root.file_count(), 0);
    }

    #[test]
    fn test_snapshot_serializes_with_type_tags() {
        let mut root = FileNode::folder();
        root.insert("a.js", "x").unwrap();
        let json = serde_json::to_value(&root).unwrap();
        assert_eq!(json["type"], "folder");
        assert_eq!(json["children"]["a.js"]["type"], "file");
        assert_eq!(json["children"]["a.js"]["content"], "x");
    }

    #[test]
    fn test_memory_store_snapshot_is_a_copy() {
        let store = MemoryFileStore::from_files([("src/main.ts", "v1")]).unwrap();
        let snapshot = store.snapshot();
        store.write_file("src/main.ts", "v2").unwrap();

        assert_eq!(snapshot.read("src/main.ts"), Some("v1"));
        assert_eq!(store.read_file("src/main.ts").as_deref(), Some("v2"));
    }

    #[test]
    fn test_disk_store_skips_ignored_directories() {
        let temp_dir = TempDir::new().unwrap();
        let store = DiskFileStore::new(temp_dir.path()).with_ignore(vec!["node_modules".into()]);
        store.write_file("src/main.js", "main").unwrap();
        store.write_file("node_modules/dep/index.js", "dep").unwrap();

        let files = store.snapshot().files();
        assert_eq!(files.keys().collect::<Vec<_>>(), vec!["src/main.js"]);
    }

    #[test]
    fn test_disk_store_binary_files_are_digested() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("logo.png"), [0xff, 0xfe, 0x00, 0x81]).unwrap();

        let store = DiskFileStore::new(temp_dir.path());
        let snapshot = store.snapshot();
        let content = snapshot.read("logo.png").unwrap();
        assert!(content.starts_with("binary:sha256:"));
    }

    #[test]
    fn test_disk_store_rejects_escaping_paths() {
        let temp_dir = TempDir::new().unwrap();
        let store = DiskFileStore::new(temp_dir.path());
        assert!(store.write_file("../outside.js", "x").is_err());
        assert!(!store.exists("../outside.js"));
    }
}
