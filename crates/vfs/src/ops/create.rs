use super::LOCK_ATTEMPTS;
use crate::error::{ErrorKind, Result};
use crate::lock::OwnerGuard;
use crate::path::{LogicalPath, physical_path};
use crate::{Vfs, mime};
use exn::ResultExt;
use std::path::PathBuf;
use strata_meta::{FileInfo, UserId};
use strata_storage::backend::BoxSyncWrite;

/// Where a new entry goes: the directory that will hold it (possibly in
/// another owner's tree, reached through a share) and its physical path.
struct Placement {
    parent: FileInfo,
    name: String,
    physical: PathBuf,
}

impl Vfs {
    async fn place(&self, user: UserId, path: &LogicalPath) -> Result<Placement> {
        if path.is_root() {
            exn::bail!(ErrorKind::AlreadyExists(path.to_string()));
        }
        let parent = match self.resolve(user, &path.parent_path()).await {
            Ok(parent) => parent,
            Err(e) if e.is_not_found() => exn::bail!(ErrorKind::FileNotExists(path.parent_path().to_string())),
            Err(e) => return Err(e),
        };
        if !parent.is_dir {
            exn::bail!(ErrorKind::NotADirectory(path.parent_path().to_string()));
        }
        let physical = physical_path(parent.owner_id, &parent.dir_key(), path.name());
        Ok(Placement { parent, name: path.name().to_string(), physical })
    }

    /// Fail if anything, own or shared, already answers to `path`.
    async fn ensure_vacant(&self, user: UserId, path: &LogicalPath) -> Result<()> {
        match self.resolve(user, path).await {
            Ok(_) => exn::bail!(ErrorKind::AlreadyExists(path.to_string())),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Place `path` while holding the locks of `user` and of the owner of
    /// the parent directory. With `vacant`, nothing may answer to `path` yet.
    async fn place_locked(&self, user: UserId, path: &LogicalPath, vacant: bool) -> Result<(Placement, OwnerGuard)> {
        let mut owner = self.place(user, path).await?.parent.owner_id;
        for _ in 0..LOCK_ATTEMPTS {
            let guard = self.locks.lock([user, owner]).await;
            if vacant {
                self.ensure_vacant(user, path).await?;
            }
            let place = self.place(user, path).await?;
            if guard.covers([place.parent.owner_id]) {
                return Ok((place, guard));
            }
            owner = place.parent.owner_id;
        }
        exn::bail!(ErrorKind::Contended)
    }

    /// Create a directory. Its parent must already exist.
    pub async fn create_dir(&self, user: UserId, path: &str) -> Result<FileInfo> {
        let path = LogicalPath::parse(path)?;
        let (place, _guard) = self.place_locked(user, &path, true).await?;
        self.backend.create_dir(&place.physical).await.or_raise(|| ErrorKind::Filesystem)?;
        let entry = self.backend.stat(&place.physical).await.or_raise(|| ErrorKind::Filesystem)?;
        let record = FileInfo {
            parent_id: Some(place.parent.id),
            last_changed: entry.modified,
            ..FileInfo::new(place.parent.owner_id, place.parent.dir_key(), place.name, true)
        };
        let record = self.repo.insert(&record).await.or_raise(|| ErrorKind::Metadata)?;
        tracing::info!(owner = record.owner_id, path = %record.full_path(), "Created directory");
        Ok(record)
    }

    /// Open a new file for streaming. The bytes are not visible to anybody
    /// until [`finish_file`](Self::finish_file) records them.
    pub async fn open_file(&self, user: UserId, path: &str) -> Result<BoxSyncWrite> {
        let path = LogicalPath::parse(path)?;
        let (place, _guard) = self.place_locked(user, &path, true).await?;
        self.backend.writer(&place.physical).await.or_raise(|| ErrorKind::Filesystem)
    }

    /// Record a file whose bytes are on disk, taking its size and time from
    /// the disk. An existing record at the same place is updated instead.
    pub async fn finish_file(&self, user: UserId, path: &str) -> Result<FileInfo> {
        let path = LogicalPath::parse(path)?;
        let (place, _guard) = self.place_locked(user, &path, false).await?;
        self.finish_file_inner(place).await
    }

    async fn finish_file_inner(&self, place: Placement) -> Result<FileInfo> {
        let entry = self.backend.stat(&place.physical).await.or_raise(|| ErrorKind::Filesystem)?;
        if entry.is_dir {
            exn::bail!(ErrorKind::AlreadyExists(format!("{}{}", place.parent.dir_key(), place.name)));
        }
        let parent = &place.parent;
        let existing = self
            .repo
            .get_by_path(parent.owner_id, &parent.dir_key(), &place.name)
            .await
            .or_raise(|| ErrorKind::Metadata)?;
        let record = match existing {
            Some(existing) => {
                let record = FileInfo {
                    size: entry.size,
                    last_changed: entry.modified,
                    is_dir: false,
                    ..existing
                };
                self.repo.update(&record).await.or_raise(|| ErrorKind::Metadata)?;
                record
            },
            None => {
                let record = FileInfo {
                    parent_id: Some(parent.id),
                    size: entry.size,
                    last_changed: entry.modified,
                    mime_type: mime::from_name(&place.name),
                    ..FileInfo::new(parent.owner_id, parent.dir_key(), place.name, false)
                };
                self.repo.insert(&record).await.or_raise(|| ErrorKind::Metadata)?
            },
        };
        self.refresh_sizes(parent.id).await?;
        tracing::info!(owner = record.owner_id, path = %record.full_path(), size = record.size, "Stored file");
        Ok(record)
    }

    /// Register a file that has been written to `path` for `user` while the
    /// caller already holds the relevant locks.
    pub(crate) async fn finish_locked(&self, user: UserId, path: &LogicalPath) -> Result<FileInfo> {
        let place = self.place(user, path).await?;
        self.finish_file_inner(place).await
    }

    /// Create a file with the given contents.
    pub async fn write_file(&self, user: UserId, path: &str, data: &[u8]) -> Result<FileInfo> {
        let logical = LogicalPath::parse(path)?;
        let (place, _guard) = self.place_locked(user, &logical, true).await?;
        self.backend.write(&place.physical, data).await.or_raise(|| ErrorKind::Filesystem)?;
        self.finish_file_inner(place).await
    }
}
