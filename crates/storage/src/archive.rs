//! Zip archive assembly.
//!
//! Backends walk the sources and open the files (async), this module streams
//! them into the archive (blocking), one member at a time.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::io::{Read, Seek, Write};
use std::path::PathBuf;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// A member of the archive and where its bytes come from.
pub(crate) enum ArchiveEntry {
    Dir(String),
    File(String, PathBuf),
}

pub(crate) struct ArchiveWriter<W: Write + Seek> {
    zip: ZipWriter<W>,
    options: SimpleFileOptions,
}

impl<W: Write + Seek> ArchiveWriter<W> {
    pub(crate) fn new(output: W) -> Self {
        Self {
            zip: ZipWriter::new(output),
            options: SimpleFileOptions::default().compression_method(CompressionMethod::Deflated),
        }
    }

    pub(crate) fn add_dir(&mut self, name: &str) -> Result<()> {
        self.zip.add_directory(name, self.options).or_raise(|| ErrorKind::Archive(name.to_string()))
    }

    /// Copy everything `data` yields into a new member. Returns the number of
    /// uncompressed bytes stored.
    pub(crate) fn add_file(&mut self, name: &str, data: &mut dyn Read) -> Result<u64> {
        self.zip.start_file(name, self.options).or_raise(|| ErrorKind::Archive(name.to_string()))?;
        Ok(std::io::copy(data, &mut self.zip).map_err(ErrorKind::Io)?)
    }

    /// Write the central directory and hand back the flushed output.
    pub(crate) fn finish(self) -> Result<W> {
        let mut output = self.zip.finish().or_raise(|| ErrorKind::Archive("finalizing archive".to_string()))?;
        output.flush().map_err(ErrorKind::Io)?;
        Ok(output)
    }
}

/// Run archive work on the blocking pool.
pub(crate) async fn blocking<T: Send + 'static>(task: impl FnOnce() -> Result<T> + Send + 'static) -> Result<T> {
    tokio::task::spawn_blocking(task)
        .await
        .or_raise(|| ErrorKind::Archive("archive task failed".to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use zip::ZipArchive;

    #[test]
    fn test_streams_members() {
        let mut writer = ArchiveWriter::new(Cursor::new(Vec::new()));
        assert_eq!(writer.add_file("a.txt", &mut Cursor::new(b"alpha".to_vec())).unwrap(), 5);
        writer.add_dir("docs/").unwrap();
        writer.add_file("docs/b.txt", &mut Cursor::new(b"bravo".to_vec())).unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 3);
        let mut contents = String::new();
        archive.by_name("docs/b.txt").unwrap().read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "bravo");
    }

    #[test]
    fn test_empty_archive_is_valid() {
        let bytes = ArchiveWriter::new(Cursor::new(Vec::new())).finish().unwrap().into_inner();
        let archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 0);
    }

    #[tokio::test]
    async fn test_blocking_returns_task_result() {
        assert_eq!(blocking(|| Ok(7)).await.unwrap(), 7);
        let err = blocking(|| -> Result<()> { exn::bail!(ErrorKind::Archive("x".to_string())) }).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Archive(name) if name == "x"));
    }
}
