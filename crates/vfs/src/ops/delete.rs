use crate::error::{ErrorKind, Result};
use crate::path::{LogicalPath, physical_of};
use crate::Vfs;
use exn::ResultExt;
use strata_meta::UserId;
use strata_storage::error::ErrorKind as StorageErrorKind;

impl Vfs {
    /// Delete a file or a directory with everything in it.
    ///
    /// Deleting a shadow only withdraws the share from the caller's view.
    /// Deleting an original also withdraws every share of it and of anything
    /// below it, so no grantee is left holding a dangling shadow.
    pub async fn delete(&self, user: UserId, path: &str) -> Result<()> {
        let path = LogicalPath::parse(path)?;
        if path.is_root() {
            exn::bail!(ErrorKind::PathNotValid(path.to_string()));
        }
        let (target, _guard) = self.lookup_locked(user, &path).await?;

        if let Some(share_id) = target.share_id {
            self.repo.delete_share(share_id).await.or_raise(|| ErrorKind::Metadata)?;
            tracing::info!(owner = user, path = %path, share = share_id, "Removed shared entry");
            return Ok(());
        }

        match self.backend.delete(&physical_of(&target)).await {
            Ok(()) => {},
            Err(e) if matches!(&*e, StorageErrorKind::NotFound(_)) => {
                tracing::warn!(owner = target.owner_id, path = %target.full_path(), "Already gone from disk");
            },
            Err(e) => return Err(e).or_raise(|| ErrorKind::Filesystem),
        }
        let ids: Vec<_> = self.subtree(&target).await?.into_iter().map(|f| f.id).collect();
        let purged = self.repo.delete_many(&ids).await.or_raise(|| ErrorKind::Metadata)?;
        if let Some(parent) = target.parent_id {
            self.refresh_sizes(parent).await?;
        }
        tracing::info!(
            owner = target.owner_id,
            path = %target.full_path(),
            records = purged.files,
            shares = purged.shares,
            "Deleted"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::error::ErrorKind;
    use crate::test_utils::Fixture;
    use std::path::Path;
    use strata_storage::StorageBackend;

    #[tokio::test]
    async fn test_delete_directory() {
        let fx = Fixture::new().await;
        fx.write(1, "/a/b/c.txt", b"12345").await;
        fx.write(1, "/keep.txt", b"12").await;
        fx.vfs.delete(1, "/a").await.unwrap();
        assert!(!fx.exists(1, "/a").await);
        assert!(!fx.exists(1, "/a/b/c.txt").await);
        assert!(!fx.backend.exists(Path::new("1/a")).await.unwrap());
        assert_eq!(fx.resolve(1, "/").await.size, 2);
        let err = fx.vfs.delete(1, "/").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::PathNotValid(_)));
        let err = fx.vfs.delete(1, "/a").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_deleting_original_removes_shadows() {
        let fx = Fixture::new().await;
        fx.write(1, "/docs/report.txt", b"hello").await;
        fx.write(1, "/docs/sub/inner.txt", b"x").await;
        fx.vfs.share(1, 2, "/docs").await.unwrap();
        fx.vfs.share(1, 3, "/docs/sub/inner.txt").await.unwrap();
        fx.vfs.delete(1, "/docs").await.unwrap();
        assert!(!fx.exists(2, "/docs").await);
        assert!(!fx.exists(2, "/docs/report.txt").await);
        assert!(!fx.exists(3, "/inner.txt").await);
        assert!(fx.vfs.list_shared_with(2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_grantee_deletes_shadow_only() {
        let fx = Fixture::new().await;
        fx.write(1, "/docs/report.txt", b"hello").await;
        fx.vfs.share(1, 2, "/docs").await.unwrap();
        fx.vfs.delete(2, "/docs").await.unwrap();
        assert!(!fx.exists(2, "/docs").await);
        assert!(fx.exists(1, "/docs/report.txt").await);
        assert!(fx.backend.exists(Path::new("1/docs/report.txt")).await.unwrap());
        // Sharing again works now that the old share is gone
        fx.vfs.share(1, 2, "/docs").await.unwrap();
    }

    #[tokio::test]
    async fn test_grantee_deletes_inside_share() {
        let fx = Fixture::new().await;
        fx.write(1, "/docs/report.txt", b"hello").await;
        fx.write(1, "/docs/other.txt", b"abc").await;
        fx.vfs.share(1, 2, "/docs").await.unwrap();
        fx.vfs.delete(2, "/docs/report.txt").await.unwrap();
        assert!(!fx.exists(1, "/docs/report.txt").await);
        assert_eq!(fx.resolve(1, "/docs").await.size, 3);
    }

    #[tokio::test]
    async fn test_record_without_bytes_is_still_deleted() {
        let fx = Fixture::new().await;
        fx.write(1, "/ghost.txt", b"boo").await;
        fx.backend.delete(Path::new("1/ghost.txt")).await.unwrap();
        fx.vfs.delete(1, "/ghost.txt").await.unwrap();
        assert!(!fx.exists(1, "/ghost.txt").await);
    }
}
