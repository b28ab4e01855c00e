//! Local filesystem storage backend.
//!
//! This module provides a storage backend implementation for the local filesystem.
//! Files are stored in a configured directory and accessed using standard filesystem
//! operations via `tokio::fs` for async I/O.

use crate::backend::{BoxSyncRead, BoxSyncWrite};
use crate::error::ErrorKind;
use crate::{Entry, StorageBackend, error::Result, path::validate as validate_path};
use async_trait::async_trait;
use exn::ResultExt;
use std::fs::{Metadata, create_dir_all as sync_create_dir};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use time::UtcDateTime;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Local filesystem storage backend.
///
/// Stores files in a directory on the local filesystem. All paths are relative
/// to the configured root directory.
///
/// # Examples
///
/// ```no_run
/// use strata_storage::backend::LocalBackend;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = LocalBackend::new("local", "/srv/strata/files")?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct LocalBackend {
    name: String,
    /// Base directory that every user directory lives under
    root: PathBuf,
}
impl LocalBackend {
    /// Create a new local filesystem backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is not absolute, or exists and is not a
    /// directory.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidPath(root));
        }
        if root.exists() {
            if !root.is_dir() {
                exn::bail!(ErrorKind::NotADirectory(root));
            }
        } else {
            // Use non-async here; it'll only happen once on startup and it's
            // not worth the hassle of making the constructor async.
            sync_create_dir(&root).map_err(|e| Self::map_io_error(e, &root))?;
        }

        Ok(Self { name: name.into(), root })
    }

    /// Get the absolute path for a relative storage path.
    ///
    /// Validates the path and joins it with the root directory.
    fn absolute_path(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let validated = validate_path(path.as_ref())?;
        Ok(self.root.join(validated))
    }

    /// Re-use same data collection from file metadata for list and stat.
    fn entry(path: &Path, metadata: &Metadata) -> Result<Entry> {
        let modified = metadata.modified().map_err(ErrorKind::Io)?;
        // Pre-epoch timestamps are clamped; nothing sensible lives there.
        let seconds = modified.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or_default();
        let seconds = i64::try_from(seconds).unwrap_or(i64::MAX);
        let modified = UtcDateTime::from_unix_timestamp(seconds)
            .or_raise(|| ErrorKind::BackendError(format!("modification time out of range: {}", path.display())))?;
        Ok(match metadata.is_dir() {
            true => Entry::dir(path, modified),
            false => Entry::file(path, metadata.len(), modified),
        })
    }

    fn map_io_error(e: std::io::Error, path: &Path) -> ErrorKind {
        match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied(path.to_path_buf()),
            std::io::ErrorKind::AlreadyExists => ErrorKind::AlreadyExists(path.to_path_buf()),
            std::io::ErrorKind::NotADirectory => ErrorKind::NotADirectory(path.to_path_buf()),
            _ => ErrorKind::Io(e),
        }
    }

    /// Fail with [`AlreadyExists`](ErrorKind::AlreadyExists) if anything,
    /// even a dangling symlink, is at `abs_path`.
    async fn ensure_absent(abs_path: &Path, path: &Path) -> Result<()> {
        match fs::symlink_metadata(abs_path).await {
            Ok(_) => exn::bail!(ErrorKind::AlreadyExists(path.to_path_buf())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => exn::bail!(Self::map_io_error(e, path)),
        }
    }

    async fn create_parent(&self, abs_path: &Path, path: &Path) -> Result<()> {
        if let Some(parent) = abs_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| Self::map_io_error(e, path))?;
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_dir(&self, path: Option<&Path>) -> Result<Vec<Entry>> {
        let (abs_dir, relative_dir) = match path {
            Some(path) => (self.absolute_path(path)?, validate_path(path)?),
            None => (self.root.clone(), PathBuf::new()),
        };
        let mut reader = fs::read_dir(&abs_dir).await.map_err(|e| Self::map_io_error(e, &relative_dir))?;
        let mut entries = Vec::new();
        while let Some(child) = reader.next_entry().await.map_err(|e| Self::map_io_error(e, &relative_dir))? {
            let Some(name) = child.file_name().to_str().map(str::to_string) else {
                tracing::warn!(backend = %self.name, path = %child.path().display(), "Skipping non-UTF8 file name");
                continue;
            };
            let relative = relative_dir.join(&name);
            // Follow symlinks; a dangling one simply is not listed.
            let metadata = match fs::metadata(child.path()).await {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => exn::bail!(Self::map_io_error(e, &relative)),
            };
            if metadata.is_dir() || metadata.is_file() {
                entries.push(Self::entry(&relative, &metadata)?);
            }
        }
        Ok(entries)
    }

    async fn stat(&self, path: &Path) -> Result<Entry> {
        let abs_path = self.absolute_path(path)?;
        let metadata = fs::metadata(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?;
        Self::entry(&validate_path(path)?, &metadata)
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let abs_path = self.absolute_path(path)?;
        Ok(fs::try_exists(&abs_path).await.map_err(ErrorKind::Io)?)
    }

    async fn create_dir(&self, path: &Path) -> Result<bool> {
        let abs_path = self.absolute_path(path)?;
        match fs::metadata(&abs_path).await {
            Ok(metadata) if metadata.is_dir() => return Ok(false),
            Ok(_) => exn::bail!(ErrorKind::NotADirectory(path.to_path_buf())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
            Err(e) => exn::bail!(Self::map_io_error(e, path)),
        }
        fs::create_dir_all(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?;
        Ok(true)
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let abs_path = self.absolute_path(path)?;
        Ok(fs::read(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?)
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let abs_path = self.absolute_path(path)?;
        self.create_parent(&abs_path, path).await?;
        Ok(fs::write(&abs_path, data).await.map_err(|e| Self::map_io_error(e, path))?)
    }

    async fn reader(&self, path: &Path) -> Result<BoxSyncRead> {
        let abs_path = self.absolute_path(path)?;
        let file = fs::File::open(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?;
        Ok(Box::new(file.into_std().await))
    }

    async fn writer(&self, path: &Path) -> Result<BoxSyncWrite> {
        let abs_path = self.absolute_path(path)?;
        self.create_parent(&abs_path, path).await?;
        let file = fs::File::create(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?;
        Ok(Box::new(file.into_std().await))
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let from_path = self.absolute_path(from)?;
        let to_path = self.absolute_path(to)?;
        fs::symlink_metadata(&from_path).await.map_err(|e| Self::map_io_error(e, from))?;
        Self::ensure_absent(&to_path, to).await?;
        self.create_parent(&to_path, to).await?;
        Ok(fs::rename(&from_path, &to_path).await.map_err(|e| Self::map_io_error(e, from))?)
    }

    async fn copy(&self, from: &Path, to: &Path) -> Result<()> {
        let from_path = self.absolute_path(from)?;
        let to_path = self.absolute_path(to)?;
        let mut source = fs::File::open(&from_path).await.map_err(|e| Self::map_io_error(e, from))?;
        self.create_parent(&to_path, to).await?;
        // `create_new` makes the existence check and the creation one step.
        let mut target = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&to_path)
            .await
            .map_err(|e| Self::map_io_error(e, to))?;
        let copied = async {
            tokio::io::copy(&mut source, &mut target).await?;
            target.flush().await
        };
        if let Err(e) = copied.await {
            drop(target);
            if let Err(cleanup) = fs::remove_file(&to_path).await {
                tracing::warn!(backend = %self.name, path = %to.display(), error = %cleanup, "Could not remove partial copy");
            }
            exn::bail!(Self::map_io_error(e, to));
        }
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let abs_path = self.absolute_path(path)?;
        let metadata = fs::symlink_metadata(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?;
        match metadata.is_dir() {
            true => fs::remove_dir_all(&abs_path).await,
            false => fs::remove_file(&abs_path).await,
        }
        .map_err(|e| Self::map_io_error(e, path))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn backend() -> (tempfile::TempDir, LocalBackend) {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new("local", temp_dir.path()).unwrap();
        (temp_dir, backend)
    }

    #[test]
    fn test_new_requires_absolute_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(LocalBackend::new("name", temp_dir.path()).is_ok());
        assert!(LocalBackend::new("name", "relative/path").is_err());
        assert!(LocalBackend::new("name", "./relative").is_err());
    }

    #[test]
    fn test_absolute_path() {
        let (temp_dir, backend) = backend();
        let expected = temp_dir.path().join("1/docs/report.txt");
        assert_eq!(backend.absolute_path(Path::new("1/docs/report.txt")).unwrap(), expected);
        // Path traversal is rejected, not resolved
        assert!(backend.absolute_path(Path::new("1/../2/report.txt")).is_err());
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let (_temp_dir, backend) = backend();
        backend.write(Path::new("1/test.txt"), b"Hello, world!").await.unwrap();
        let data = backend.read(Path::new("1/test.txt")).await.unwrap();
        assert_eq!(data, b"Hello, world!");
    }

    #[tokio::test]
    async fn test_writer_streams_into_file() {
        let (_temp_dir, backend) = backend();
        let mut writer = backend.writer(Path::new("1/docs/upload.bin")).await.unwrap();
        writer.write_all(b"chunk one, ").unwrap();
        writer.write_all(b"chunk two").unwrap();
        writer.flush().unwrap();
        drop(writer);
        let info = backend.stat(Path::new("1/docs/upload.bin")).await.unwrap();
        assert_eq!(info.size, 20);
    }

    #[tokio::test]
    async fn test_create_dir_reports_creation() {
        let (_temp_dir, backend) = backend();
        assert!(backend.create_dir(Path::new("1/.tmp")).await.unwrap());
        assert!(!backend.create_dir(Path::new("1/.tmp")).await.unwrap());
        backend.write(Path::new("1/file.txt"), b"data").await.unwrap();
        let err = backend.create_dir(Path::new("1/file.txt")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotADirectory(_)));
    }

    #[tokio::test]
    async fn test_list_dir_direct_children_only() {
        let (_temp_dir, backend) = backend();
        backend.write(Path::new("1/a.txt"), b"aaa").await.unwrap();
        backend.write(Path::new("1/docs/b.txt"), b"bb").await.unwrap();
        let mut entries = backend.list_dir(Some(Path::new("1"))).await.unwrap();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].path, Path::new("1/a.txt"));
        assert_eq!(entries[0].size, 3);
        assert!(!entries[0].is_dir);
        assert_eq!(entries[1].path, Path::new("1/docs"));
        assert!(entries[1].is_dir);
    }

    #[tokio::test]
    async fn test_list_root() {
        let (_temp_dir, backend) = backend();
        backend.create_dir(Path::new("1")).await.unwrap();
        backend.create_dir(Path::new("2")).await.unwrap();
        let entries = backend.list_dir(None).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|entry| entry.is_dir));
    }

    #[tokio::test]
    async fn test_list_missing_directory() {
        let (_temp_dir, backend) = backend();
        let err = backend.list_dir(Some(Path::new("nope"))).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_exists() {
        let (_temp_dir, backend) = backend();
        assert!(!backend.exists(Path::new("nonexistent.txt")).await.unwrap());
        backend.write(Path::new("exists.txt"), b"data").await.unwrap();
        assert!(backend.exists(Path::new("exists.txt")).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_file_and_tree() {
        let (_temp_dir, backend) = backend();
        backend.write(Path::new("1/docs/a.txt"), b"a").await.unwrap();
        backend.write(Path::new("1/docs/sub/b.txt"), b"b").await.unwrap();
        backend.delete(Path::new("1/docs/a.txt")).await.unwrap();
        assert!(!backend.exists(Path::new("1/docs/a.txt")).await.unwrap());
        backend.delete(Path::new("1/docs")).await.unwrap();
        assert!(!backend.exists(Path::new("1/docs")).await.unwrap());
        let err = backend.delete(Path::new("1/docs")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_rename_directory() {
        let (_temp_dir, backend) = backend();
        backend.write(Path::new("1/docs/a.txt"), b"data").await.unwrap();
        backend.rename(Path::new("1/docs"), Path::new("1/archive/docs")).await.unwrap();
        assert!(!backend.exists(Path::new("1/docs")).await.unwrap());
        assert_eq!(backend.read(Path::new("1/archive/docs/a.txt")).await.unwrap(), b"data");
    }

    #[tokio::test]
    async fn test_copy() {
        let (_temp_dir, backend) = backend();
        backend.write(Path::new("1/a.txt"), b"data").await.unwrap();
        backend.copy(Path::new("1/a.txt"), Path::new("2/b.txt")).await.unwrap();
        assert_eq!(backend.read(Path::new("1/a.txt")).await.unwrap(), b"data");
        assert_eq!(backend.read(Path::new("2/b.txt")).await.unwrap(), b"data");
    }

    #[tokio::test]
    async fn test_rename_and_copy_never_replace() {
        let (_temp_dir, backend) = backend();
        backend.write(Path::new("1/a.txt"), b"alpha").await.unwrap();
        backend.write(Path::new("1/b.txt"), b"bravo").await.unwrap();
        let err = backend.rename(Path::new("1/a.txt"), Path::new("1/b.txt")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::AlreadyExists(_)));
        let err = backend.copy(Path::new("1/a.txt"), Path::new("1/b.txt")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::AlreadyExists(_)));
        assert_eq!(backend.read(Path::new("1/a.txt")).await.unwrap(), b"alpha");
        assert_eq!(backend.read(Path::new("1/b.txt")).await.unwrap(), b"bravo");
        let err = backend.rename(Path::new("1/missing.txt"), Path::new("1/c.txt")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_reader_streams_file() {
        use std::io::Read;
        let (_temp_dir, backend) = backend();
        backend.write(Path::new("1/a.txt"), b"alpha").await.unwrap();
        let mut contents = String::new();
        backend.reader(Path::new("1/a.txt")).await.unwrap().read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "alpha");
        assert!(backend.reader(Path::new("1/missing.txt")).await.is_err());
    }

    #[tokio::test]
    async fn test_stat() {
        let (_temp_dir, backend) = backend();
        backend.write(Path::new("file.txt"), b"Hello, world!").await.unwrap();
        let info = backend.stat(Path::new("file.txt")).await.unwrap();
        assert_eq!(info.path, PathBuf::from("file.txt"));
        assert_eq!(info.size, 13);
        assert_eq!(info.modified.nanosecond(), 0);
        let err = backend.stat(Path::new("missing.txt")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_zip_spans_users() {
        let (_temp_dir, backend) = backend();
        backend.write(Path::new("1/a.txt"), b"alpha").await.unwrap();
        backend.write(Path::new("2/shared/b.txt"), b"bravo").await.unwrap();
        let sources = [PathBuf::from("1/a.txt"), PathBuf::from("2/shared")];
        let size = backend.zip(&sources, Path::new("1/.tmp/export.zip")).await.unwrap();
        let info = backend.stat(Path::new("1/.tmp/export.zip")).await.unwrap();
        assert_eq!(info.size, size);
        let bytes = backend.read(Path::new("1/.tmp/export.zip")).await.unwrap();
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
        assert!(archive.by_name("a.txt").is_ok());
        assert!(archive.by_name("shared/b.txt").is_ok());
    }

    #[tokio::test]
    async fn test_zip_skips_its_own_output() {
        let (_temp_dir, backend) = backend();
        backend.write(Path::new("1/a.txt"), b"alpha").await.unwrap();
        backend.write(Path::new("1/.tmp/export.zip"), b"stale").await.unwrap();
        backend.zip(&[PathBuf::from("1")], Path::new("1/.tmp/export.zip")).await.unwrap();
        let bytes = backend.read(Path::new("1/.tmp/export.zip")).await.unwrap();
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
        assert!(archive.by_name("1/a.txt").is_ok());
        assert!(archive.by_name("1/.tmp/").is_ok());
        assert!(archive.by_name("1/.tmp/export.zip").is_err());
    }

    #[tokio::test]
    async fn test_path_security() {
        let (_temp_dir, backend) = backend();
        // Attempts to escape the root should fail
        assert!(backend.read(Path::new("../etc/passwd")).await.is_err());
        assert!(backend.write(Path::new("~/evil"), b"data").await.is_err());
        let err = backend.delete(Path::new("../../file")).await.unwrap_err();
        assert!(err.is_path_error());
    }
}
