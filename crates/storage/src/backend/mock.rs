//! In-memory storage backend for testing.

use super::{BoxSyncRead, BoxSyncWrite};
use crate::error::{ErrorKind, Result};
use crate::path::validate as validate_path;
use crate::{Entry, StorageBackend};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io::{Cursor, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use time::UtcDateTime;

#[derive(Clone)]
struct Node {
    modified: UtcDateTime,
    /// `None` for directories.
    data: Option<Vec<u8>>,
}
impl Node {
    fn dir() -> Self {
        Self { modified: now(), data: None }
    }

    fn file(data: Vec<u8>) -> Self {
        Self {
            modified: now(),
            data: Some(data),
        }
    }

    fn entry(&self, path: &Path) -> Entry {
        match &self.data {
            Some(data) => Entry::file(path, data.len() as u64, self.modified),
            None => Entry::dir(path, self.modified),
        }
    }
}

/// Second precision, same as the local backend.
fn now() -> UtcDateTime {
    let now = UtcDateTime::now();
    now.replace_nanosecond(0).unwrap_or(now)
}

type Tree = BTreeMap<PathBuf, Node>;

/// In-memory storage backend for testing.
///
/// Files and directories live in a `BTreeMap` behind a [`RwLock`], so all
/// trait methods can operate on `&self` without external synchronisation.
/// The lock is a blocking one: no method holds it across an await point and
/// streaming writers need it from synchronous code.
/// Parent directories spring into existence whenever something is written
/// below them, just like the local backend.
///
/// # Examples
///
/// ```
/// use strata_storage::backend::{MockBackend, StorageBackend};
/// use std::path::Path;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = MockBackend::with_files([
///     ("1/docs/report.txt", b"hello"),
/// ]);
/// assert!(backend.exists(Path::new("1/docs")).await?);
///
/// backend.write(Path::new("1/notes.txt"), b"data...").await?;
/// assert!(backend.exists(Path::new("1/notes.txt")).await?);
/// # Ok(())
/// # }
/// ```
pub struct MockBackend {
    name: String,
    storage: Arc<RwLock<Tree>>,
}

impl MockBackend {
    /// Create a mock backend pre-populated with files.
    ///
    /// Panics if any path fails validation (e.g. path traversal). If test
    /// setup is wrong, then test should not pass.
    pub fn with_files(files: impl IntoIterator<Item = (impl Into<PathBuf>, impl Into<Vec<u8>>)>) -> Self {
        let mut tree = Tree::new();
        for (path, data) in files {
            let path = path.into();
            let Ok(validated) = validate_path(&path) else {
                // The panic here is DELIBERATE. MockBackend is intended to be
                // used in tests; panics are expected. There is no error result.
                panic!("MockBackend::with_files: invalid path {}", path.display());
            };
            Self::insert_parents(&mut tree, &validated);
            tree.insert(validated, Node::file(data.into()));
        }
        Self {
            name: "mock".to_string(),
            storage: Arc::new(RwLock::new(tree)),
        }
    }

    /// Change the name of the mock backend.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Overwrite the modification time of a node, to simulate ageing.
    pub fn set_modified(&self, path: impl AsRef<Path>, modified: UtcDateTime) -> Result<()> {
        let path = validate_path(path)?;
        let mut guard = self.write_lock();
        let node = guard.get_mut(&path).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path.clone())))?;
        node.modified = modified;
        Ok(())
    }

    fn read_lock(&self) -> RwLockReadGuard<'_, Tree> {
        self.storage.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_lock(&self) -> RwLockWriteGuard<'_, Tree> {
        self.storage.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert_parents(tree: &mut Tree, path: &Path) {
        for ancestor in path.ancestors().skip(1) {
            if ancestor.as_os_str().is_empty() {
                break;
            }
            tree.entry(ancestor.to_path_buf()).or_insert_with(Node::dir);
        }
    }

    fn ensure_parent_is_dir(tree: &Tree, path: &Path) -> Result<()> {
        for ancestor in path.ancestors().skip(1) {
            if let Some(Node { data: Some(_), .. }) = tree.get(ancestor) {
                exn::bail!(ErrorKind::NotADirectory(ancestor.to_path_buf()));
            }
        }
        Ok(())
    }

    fn get<'t>(tree: &'t Tree, path: &Path) -> Result<&'t Node> {
        tree.get(path).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path.to_path_buf())))
    }

    fn put(tree: &mut Tree, path: PathBuf, node: Node) -> Result<()> {
        Self::ensure_parent_is_dir(tree, &path)?;
        Self::insert_parents(tree, &path);
        tree.insert(path, node);
        Ok(())
    }

    fn ensure_absent(tree: &Tree, path: &Path) -> Result<()> {
        if tree.contains_key(path) {
            exn::bail!(ErrorKind::AlreadyExists(path.to_path_buf()));
        }
        Ok(())
    }

    /// Keys at or below `path`.
    fn subtree(tree: &Tree, path: &Path) -> Vec<PathBuf> {
        tree.keys().filter(|key| key.starts_with(path)).cloned().collect()
    }
}
impl Default for MockBackend {
    fn default() -> Self {
        let files: [(&str, &str); 0] = [];
        Self::with_files(files)
    }
}

/// Writes straight into the stored node, so there is nothing to flush.
struct MockWriter {
    path: PathBuf,
    position: u64,
    storage: Arc<RwLock<Tree>>,
}
impl MockWriter {
    fn len(&self) -> u64 {
        let guard = self.storage.read().unwrap_or_else(PoisonError::into_inner);
        guard.get(&self.path).and_then(|node| node.data.as_ref()).map_or(0, |data| data.len() as u64)
    }
}
impl Write for MockWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let start = usize::try_from(self.position).map_err(std::io::Error::other)?;
        let end = start + buf.len();
        let mut guard = self.storage.write().unwrap_or_else(PoisonError::into_inner);
        let node = guard.entry(self.path.clone()).or_insert_with(|| Node::file(Vec::new()));
        let data = node.data.get_or_insert_with(Vec::new);
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(buf);
        node.modified = now();
        self.position = end as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
impl Seek for MockWriter {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let position = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(offset) => self.len().checked_add_signed(offset),
            SeekFrom::Current(offset) => self.position.checked_add_signed(offset),
        };
        self.position = position
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "seek before start of file"))?;
        Ok(self.position)
    }
}

#[async_trait]
impl StorageBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_dir(&self, path: Option<&Path>) -> Result<Vec<Entry>> {
        let dir = path.map(validate_path).transpose()?.unwrap_or_default();
        let guard = self.read_lock();
        if !dir.as_os_str().is_empty() && Self::get(&guard, &dir)?.data.is_some() {
            exn::bail!(ErrorKind::NotADirectory(dir));
        }
        Ok(guard
            .iter()
            .filter(|(key, _)| key.parent() == Some(dir.as_path()))
            .map(|(key, node)| node.entry(key))
            .collect())
    }

    async fn stat(&self, path: &Path) -> Result<Entry> {
        let path = validate_path(path)?;
        let guard = self.read_lock();
        Ok(Self::get(&guard, &path)?.entry(&path))
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let path = validate_path(path)?;
        Ok(self.read_lock().contains_key(&path))
    }

    async fn create_dir(&self, path: &Path) -> Result<bool> {
        let path = validate_path(path)?;
        let mut guard = self.write_lock();
        match guard.get(&path) {
            Some(Node { data: None, .. }) => Ok(false),
            Some(_) => exn::bail!(ErrorKind::NotADirectory(path)),
            None => {
                Self::put(&mut guard, path, Node::dir())?;
                Ok(true)
            },
        }
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let path = validate_path(path)?;
        let guard = self.read_lock();
        match &Self::get(&guard, &path)?.data {
            Some(data) => Ok(data.clone()),
            None => exn::bail!(ErrorKind::BackendError(format!("cannot read directory {}", path.display()))),
        }
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let path = validate_path(path)?;
        Self::put(&mut self.write_lock(), path, Node::file(data.to_vec()))
    }

    async fn reader(&self, path: &Path) -> Result<BoxSyncRead> {
        let data = self.read(path).await?;
        Ok(Box::new(Cursor::new(data)))
    }

    async fn writer(&self, path: &Path) -> Result<BoxSyncWrite> {
        let path = validate_path(path)?;
        Self::put(&mut self.write_lock(), path.clone(), Node::file(Vec::new()))?;
        Ok(Box::new(MockWriter {
            path,
            position: 0,
            storage: Arc::clone(&self.storage),
        }))
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let from = validate_path(from)?;
        let to = validate_path(to)?;
        let mut guard = self.write_lock();
        Self::get(&guard, &from)?;
        Self::ensure_absent(&guard, &to)?;
        for key in Self::subtree(&guard, &from) {
            let Some(node) = guard.remove(&key) else { continue };
            let Ok(suffix) = key.strip_prefix(&from) else { continue };
            let target = match suffix.as_os_str().is_empty() {
                true => to.clone(),
                false => to.join(suffix),
            };
            Self::put(&mut guard, target, node)?;
        }
        Ok(())
    }

    async fn copy(&self, from: &Path, to: &Path) -> Result<()> {
        let from = validate_path(from)?;
        let to = validate_path(to)?;
        let mut guard = self.write_lock();
        let node = Self::get(&guard, &from)?.clone();
        if node.data.is_none() {
            exn::bail!(ErrorKind::BackendError(format!("cannot copy directory {}", from.display())));
        }
        Self::ensure_absent(&guard, &to)?;
        Self::put(&mut guard, to, Node { modified: now(), ..node })
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let path = validate_path(path)?;
        let mut guard = self.write_lock();
        Self::get(&guard, &path)?;
        for key in Self::subtree(&guard, &path) {
            guard.remove(&key);
        }
        Ok(())
    }
}
