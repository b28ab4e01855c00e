use crate::error::{ErrorKind, Result};
use crate::path::owner_prefix;
use crate::Vfs;
use exn::ResultExt;
use std::collections::HashMap;
use std::time::Duration;
use strata_meta::{PurgeReport, UserId};
use strata_storage::error::ErrorKind as StorageErrorKind;
use time::UtcDateTime;

impl Vfs {
    /// Delete everything in every temp area that was last modified more than
    /// `max_age` ago, on disk and in metadata. Records whose bytes have
    /// already disappeared go too. Returns the number of entries removed.
    pub async fn expire_temp_files(&self, max_age: Duration) -> Result<usize> {
        let max_age = time::Duration::try_from(max_age).unwrap_or(time::Duration::MAX);
        let Some(cutoff) = UtcDateTime::now().checked_sub(max_age) else {
            return Ok(0);
        };
        let owners = self.repo.list_owner_ids().await.or_raise(|| ErrorKind::Metadata)?;
        let mut removed = 0;
        for owner in owners {
            removed += self.expire_for(owner, cutoff).await?;
        }
        if removed > 0 {
            tracing::info!(removed, "Expired temp files");
        }
        Ok(removed)
    }

    async fn expire_for(&self, owner: UserId, cutoff: UtcDateTime) -> Result<usize> {
        let _guard = self.locks.lock([owner]).await;
        let tmp = self.repo.get_by_path(owner, "/", &self.tmp_folder).await.or_raise(|| ErrorKind::Metadata)?;
        let Some(tmp) = tmp else {
            return Ok(0);
        };
        let tmp_path = owner_prefix(owner).join(&self.tmp_folder);
        let on_disk = match self.backend.list_dir(Some(&tmp_path)).await {
            Ok(entries) => entries,
            Err(e) if matches!(&*e, StorageErrorKind::NotFound(_)) => Vec::new(),
            Err(e) => return Err(e).or_raise(|| ErrorKind::Filesystem),
        };
        let mut records: HashMap<String, _> = self
            .repo
            .list_children(tmp.id)
            .await
            .or_raise(|| ErrorKind::Metadata)?
            .into_iter()
            .map(|record| (record.name.clone(), record))
            .collect();

        let mut expired = Vec::new();
        let mut removed = 0;
        for entry in on_disk {
            let record = records.remove(entry.name());
            if entry.modified >= cutoff {
                continue;
            }
            self.backend.delete(&entry.path).await.or_raise(|| ErrorKind::Filesystem)?;
            tracing::debug!(owner, path = %entry.path.display(), "Expired temp entry");
            removed += 1;
            if let Some(record) = record {
                expired.extend(self.subtree(&record).await?.into_iter().map(|f| f.id));
            }
        }
        // Whatever is left has no bytes behind it any more
        for record in records.into_values() {
            tracing::debug!(owner, name = %record.name, "Dropping temp record without data");
            removed += 1;
            expired.extend(self.subtree(&record).await?.into_iter().map(|f| f.id));
        }
        if !expired.is_empty() {
            self.repo.delete_many(&expired).await.or_raise(|| ErrorKind::Metadata)?;
            self.refresh_sizes(tmp.id).await?;
        }
        Ok(removed)
    }

    /// Remove a user entirely: their physical tree, every record they own,
    /// and every share given by or to them.
    pub async fn delete_user_files(&self, user: UserId) -> Result<PurgeReport> {
        let _guard = self.locks.lock([user]).await;
        match self.backend.delete(&owner_prefix(user)).await {
            Ok(()) => {},
            Err(e) if matches!(&*e, StorageErrorKind::NotFound(_)) => {
                tracing::debug!(owner = user, "No user folder to delete");
            },
            Err(e) => return Err(e).or_raise(|| ErrorKind::Filesystem),
        }
        let report = self.repo.delete_owner(user).await.or_raise(|| ErrorKind::Metadata)?;
        tracing::info!(
            owner = user,
            files = report.files,
            shares = report.shares,
            shadows = report.shadows,
            "Deleted user files"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use crate::test_utils::Fixture;
    use std::path::Path;
    use std::time::Duration;
    use strata_storage::StorageBackend;
    use time::UtcDateTime;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    #[tokio::test]
    async fn test_expire_temp_files() {
        let fx = Fixture::new().await;
        fx.write(1, "/keep.txt", b"kept").await;
        fx.write(1, "/.tmp/old.zip", b"old").await;
        fx.write(1, "/.tmp/new.zip", b"fresh").await;
        fx.write(1, "/.tmp/gone.zip", b"gone").await;
        fx.backend.write(Path::new("1/.tmp/stray.bin"), b"stray").await.unwrap();
        fx.backend.delete(Path::new("1/.tmp/gone.zip")).await.unwrap();
        let old = UtcDateTime::now() - time::Duration::days(2);
        fx.backend.set_modified("1/.tmp/old.zip", old).unwrap();
        fx.backend.set_modified("1/.tmp/stray.bin", old).unwrap();
        // Only the temp area is ever touched
        fx.backend.set_modified("1/keep.txt", old).unwrap();

        assert_eq!(fx.vfs.expire_temp_files(DAY).await.unwrap(), 3);
        assert!(!fx.exists(1, "/.tmp/old.zip").await);
        assert!(!fx.exists(1, "/.tmp/gone.zip").await);
        assert!(!fx.backend.exists(Path::new("1/.tmp/stray.bin")).await.unwrap());
        assert!(fx.exists(1, "/.tmp/new.zip").await);
        assert!(fx.exists(1, "/keep.txt").await);
        assert_eq!(fx.resolve(1, "/.tmp").await.size, 5);
        assert_eq!(fx.resolve(1, "/").await.size, 9);

        assert_eq!(fx.vfs.expire_temp_files(DAY).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_user_files() {
        let fx = Fixture::new().await;
        fx.write(1, "/docs/report.txt", b"hello").await;
        fx.write(2, "/mine.txt", b"bob").await;
        fx.vfs.share(1, 2, "/docs").await.unwrap();
        fx.vfs.share(2, 1, "/mine.txt").await.unwrap();

        let report = fx.vfs.delete_user_files(1).await.unwrap();
        assert_eq!(report.shares, 2);
        assert_eq!(report.shadows, 2);
        assert!(!fx.backend.exists(Path::new("1")).await.unwrap());
        assert!(!fx.exists(2, "/docs").await);
        assert!(fx.exists(2, "/mine.txt").await);
        assert!(fx.vfs.list_shared_with(2).await.unwrap().is_empty());

        // A user without anything is fine too
        assert_eq!(fx.vfs.delete_user_files(9).await.unwrap().files, 0);
    }
}
