use super::LOCK_ATTEMPTS;
use crate::error::{ErrorKind, Result};
use crate::path::{LogicalPath, physical_of};
use crate::Vfs;
use exn::ResultExt;
use std::path::PathBuf;
use strata_meta::{FileInfo, UserId};
use time::UtcDateTime;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;

/// Archive name for multi-path exports. No `:` so it is a valid path.
const ARCHIVE_TIMESTAMP: &[BorrowedFormatItem<'static>] =
    format_description!("[year].[month].[day]_[hour]-[minute]-[second]");

impl Vfs {
    /// Pack `paths` into a zip archive in the user's temp area.
    ///
    /// Shared content is read from wherever it physically lives. A single
    /// path produces `<name>.zip`; several produce a timestamped archive.
    pub async fn zip(&self, user: UserId, paths: &[&str]) -> Result<FileInfo> {
        let paths = paths.iter().map(|path| LogicalPath::parse(path)).collect::<Result<Vec<_>>>()?;
        if paths.is_empty() {
            exn::bail!(ErrorKind::PathNotValid(String::new()));
        }
        let (_, mut owners) = self.export_sources(user, &paths).await?;
        let mut locked = None;
        for _ in 0..LOCK_ATTEMPTS {
            let guard = self.locks.lock(owners).await;
            let (sources, needed) = self.export_sources(user, &paths).await?;
            if guard.covers(needed.iter().copied()) {
                locked = Some((sources, guard));
                break;
            }
            owners = needed;
        }
        let Some((sources, _guard)) = locked else {
            exn::bail!(ErrorKind::Contended);
        };
        let name = match paths.as_slice() {
            [single] if !single.is_root() => format!("{}.zip", single.name()),
            _ => {
                let stamp = UtcDateTime::now().format(ARCHIVE_TIMESTAMP).or_raise(|| ErrorKind::Filesystem)?;
                format!("{stamp}.zip")
            },
        };

        self.ensure_user_folders_inner(user).await?;
        let output = LogicalPath::root().join(&self.tmp_folder).join(&name);
        let size = self.backend.zip(&sources, &output.physical(user)).await.or_raise(|| ErrorKind::Filesystem)?;
        tracing::info!(owner = user, sources = sources.len(), size, archive = %output, "Exported archive");
        self.finish_locked(user, &output).await
    }

    /// Physical locations of `paths` and every owner they live with.
    async fn export_sources(&self, user: UserId, paths: &[LogicalPath]) -> Result<(Vec<PathBuf>, Vec<UserId>)> {
        let mut sources = Vec::with_capacity(paths.len());
        let mut owners = vec![user];
        for path in paths {
            let source = self.resolve(user, path).await?;
            owners.push(source.owner_id);
            sources.push(physical_of(&source));
        }
        Ok((sources, owners))
    }
}

#[cfg(test)]
mod tests {
    use crate::test_utils::Fixture;
    use std::io::{Cursor, Read};
    use std::path::Path;
    use strata_storage::StorageBackend;

    fn contents(bytes: Vec<u8>) -> Vec<(String, Vec<u8>)> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut files = Vec::new();
        for index in 0..archive.len() {
            let mut file = archive.by_index(index).unwrap();
            if file.is_dir() {
                continue;
            }
            let mut data = Vec::new();
            file.read_to_end(&mut data).unwrap();
            files.push((file.name().to_string(), data));
        }
        files.sort();
        files
    }

    #[tokio::test]
    async fn test_zip_spans_shares() {
        let fx = Fixture::new().await;
        fx.write(2, "/a.txt", b"mine").await;
        fx.write(1, "/shared/b.txt", b"theirs").await;
        fx.vfs.share(1, 2, "/shared").await.unwrap();

        let archive = fx.vfs.zip(2, &["/a.txt", "/shared/b.txt"]).await.unwrap();
        assert_eq!(archive.owner_id, 2);
        assert_eq!(archive.path, "/.tmp/");
        assert!(archive.name.ends_with(".zip"));
        assert_eq!(archive.mime_type.as_deref(), Some("application/zip"));

        let bytes = fx.backend.read(&Path::new("2/.tmp").join(&archive.name)).await.unwrap();
        assert_eq!(archive.size, bytes.len() as u64);
        assert_eq!(
            contents(bytes),
            vec![("a.txt".to_string(), b"mine".to_vec()), ("b.txt".to_string(), b"theirs".to_vec())]
        );
        assert_eq!(fx.resolve(2, "/.tmp").await.size, archive.size);
    }

    #[tokio::test]
    async fn test_single_directory_export() {
        let fx = Fixture::new().await;
        fx.write(1, "/docs/report.txt", b"hello").await;
        fx.write(1, "/docs/sub/deep.txt", b"deep").await;
        let archive = fx.vfs.zip(1, &["/docs"]).await.unwrap();
        assert_eq!(archive.name, "docs.zip");
        let bytes = fx.backend.read(Path::new("1/.tmp/docs.zip")).await.unwrap();
        assert_eq!(
            contents(bytes),
            vec![("docs/report.txt".to_string(), b"hello".to_vec()), ("docs/sub/deep.txt".to_string(), b"deep".to_vec())]
        );
        // Exporting again replaces the archive record instead of failing
        let again = fx.vfs.zip(1, &["/docs"]).await.unwrap();
        assert_eq!(again.id, archive.id);
    }

    #[tokio::test]
    async fn test_missing_source_fails_before_writing() {
        let fx = Fixture::new().await;
        fx.write(1, "/a.txt", b"a").await;
        let err = fx.vfs.zip(1, &["/a.txt", "/missing.txt"]).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(fx.backend.list_dir(Some(Path::new("1/.tmp"))).await.unwrap().is_empty());
    }
}
