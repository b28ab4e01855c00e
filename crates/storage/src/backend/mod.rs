//! Storage backend trait and implementations.
//!
//! This module defines the `StorageBackend` trait, which provides a unified
//! interface for the raw file operations the engine needs: directory
//! listing, stat, create, copy, move, delete and zip.

mod local;
#[cfg(feature = "mock")]
mod mock;

pub use self::local::LocalBackend;
#[cfg(feature = "mock")]
pub use self::mock::MockBackend;
use crate::Entry;
use crate::archive::{self, ArchiveEntry, ArchiveWriter};
use crate::error::{ErrorKind, Result};
use crate::path::validate as validate_path;
use async_trait::async_trait;
use exn::ResultExt;
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};

/// Blocking writer that can also seek, which zip archives need.
pub trait SyncWrite: Write + Seek + Send {}
impl<T: Write + Seek + Send> SyncWrite for T {}

pub type BoxSyncWrite = Box<dyn SyncWrite + 'static>;
pub type BoxSyncRead = Box<dyn Read + Send + 'static>;

/// Unified interface for storage backends.
///
/// # Path Handling
/// All paths are relative to the storage root and must be validated using
/// [`validate_path`](crate::validate_path) before use. Implementations
/// enforce this validation and report failures as
/// [`InvalidPath`](crate::error::ErrorKind::InvalidPath), which is distinct
/// from any I/O failure.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use strata_storage::{backend::StorageBackend, error::Result};
///
/// async fn total_size(backend: &dyn StorageBackend, dir: &Path) -> Result<u64> {
///     let mut total = 0;
///     for entry in backend.list_dir(Some(dir)).await? {
///         if !entry.is_dir {
///             total += entry.size;
///         }
///     }
///     Ok(total)
/// }
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Name of the configured backend (used for logging only).
    fn name(&self) -> &str;

    /// List the direct children of a directory, or of the storage root when
    /// `path` is `None`.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the
    /// directory does not exist and
    /// [`NotADirectory`](crate::error::ErrorKind::NotADirectory) if it is a
    /// file. Order is unspecified.
    async fn list_dir(&self, path: Option<&Path>) -> Result<Vec<Entry>>;

    /// Get metadata without reading contents.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if nothing
    /// exists at `path`.
    async fn stat(&self, path: &Path) -> Result<Entry>;

    /// Check if a file or directory exists.
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Create a directory (and any missing parents) if it is absent.
    ///
    /// Returns `true` if the directory was created and `false` if it already
    /// existed.
    async fn create_dir(&self, path: &Path) -> Result<bool>;

    /// Read file contents.
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Write file contents, creating parent directories as needed and
    /// overwriting whatever was there.
    async fn write(&self, path: &Path, data: &[u8]) -> Result<()>;

    /// Open a file for streaming reads.
    ///
    /// Returns a `'static` boxed [`Read`](std::io::Read) suitable for use
    /// inside [`spawn_blocking`](tokio::task::spawn_blocking).
    async fn reader(&self, path: &Path) -> Result<BoxSyncRead>;

    /// Open a file for streaming writes.
    ///
    /// Returns a `'static` boxed [`Write`](std::io::Write) suitable for use
    /// inside [`spawn_blocking`](tokio::task::spawn_blocking). The file is
    /// created (truncated if present) before this returns.
    ///
    /// # Notes
    /// - Implementations should create parent directories as needed.
    /// - Callers should call `flush()` before dropping to ensure data is
    ///   written and errors are propagated.
    async fn writer(&self, path: &Path) -> Result<BoxSyncWrite>;

    /// Move a file or directory within the same backend.
    ///
    /// Destination parents are created as needed. Nothing is ever replaced:
    /// an existing `to` fails with
    /// [`AlreadyExists`](crate::error::ErrorKind::AlreadyExists).
    async fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Copy a single file.
    ///
    /// Directories are not copied; the caller walks them. Like
    /// [`rename`](Self::rename), an existing `to` fails with
    /// [`AlreadyExists`](crate::error::ErrorKind::AlreadyExists).
    async fn copy(&self, from: &Path, to: &Path) -> Result<()>;

    /// Delete a file, or a directory and everything below it.
    async fn delete(&self, path: &Path) -> Result<()>;

    /// Pack `sources` into a zip archive written to `output`.
    ///
    /// Each source keeps its own name at the top level of the archive;
    /// directories are walked and their contents stored relative to the
    /// source's parent. File contents are streamed one at a time, so memory
    /// use does not grow with the size of the sources. Returns the archive
    /// size in bytes.
    async fn zip(&self, sources: &[PathBuf], output: &Path) -> Result<u64> {
        let output = validate_path(output)?;
        let mut entries = Vec::new();
        for source in sources {
            let source = validate_path(source)?;
            let base = source.parent().map(Path::to_path_buf).unwrap_or_default();
            let mut stack = vec![self.stat(&source).await?];
            while let Some(entry) = stack.pop() {
                if entry.path == output {
                    continue;
                }
                let name = archive_name(&base, &entry.path)?;
                if entry.is_dir {
                    stack.extend(self.list_dir(Some(&entry.path)).await?);
                    entries.push(ArchiveEntry::Dir(format!("{name}/")));
                } else {
                    entries.push(ArchiveEntry::File(name, entry.path));
                }
            }
        }

        let count = entries.len();
        let mut writer = ArchiveWriter::new(self.writer(&output).await?);
        for entry in entries {
            writer = match entry {
                ArchiveEntry::Dir(name) => {
                    archive::blocking(move || {
                        writer.add_dir(&name)?;
                        Ok(writer)
                    })
                    .await?
                },
                ArchiveEntry::File(name, path) => {
                    let mut data = self.reader(&path).await?;
                    archive::blocking(move || {
                        writer.add_file(&name, &mut data)?;
                        Ok(writer)
                    })
                    .await?
                },
            };
        }
        archive::blocking(move || writer.finish().map(drop)).await?;
        let size = self.stat(&output).await?.size;
        tracing::debug!(backend = self.name(), output = %output.display(), entries = count, size, "Wrote zip archive");
        Ok(size)
    }
}

/// Name of an archive member: the path below `base`, always `/`-separated.
fn archive_name(base: &Path, path: &Path) -> Result<String> {
    let relative = path
        .strip_prefix(base)
        .or_raise(|| ErrorKind::BackendError(format!("`{}` is not below `{}`", path.display(), base.display())))?;
    let parts: Vec<&str> = relative.iter().filter_map(|part| part.to_str()).collect();
    Ok(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_name_is_relative() {
        let name = archive_name(Path::new("1/docs"), Path::new("1/docs/sub/report.txt")).unwrap();
        assert_eq!(name, "sub/report.txt");
        let name = archive_name(Path::new(""), Path::new("a.txt")).unwrap();
        assert_eq!(name, "a.txt");
        assert!(archive_name(Path::new("1/docs"), Path::new("2/other.txt")).is_err());
    }
}
