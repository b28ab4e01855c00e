//! Granting and withdrawing access.

use crate::Vfs;
use crate::error::{Error, ErrorKind, Result};
use crate::path::LogicalPath;
use crate::resolve::ShareTarget;
use exn::{OptionExt, ResultExt};
use strata_meta::{FileInfo, ShareEntry, ShareId, UserId};

/// One `(user, path)` pair that [`Vfs::share_with_users`] could not share.
#[derive(Debug)]
pub struct ShareFailure {
    pub user: UserId,
    pub path: String,
    pub error: Error,
}

/// Result of a bulk share: what went through and what did not.
#[derive(Debug, Default)]
pub struct ShareOutcome {
    pub shared: Vec<ShareEntry>,
    pub failed: Vec<ShareFailure>,
}
impl ShareOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

impl Vfs {
    /// Share `path` from `from`'s own tree with `to`.
    ///
    /// Only content `from` really owns can be shared; anything reached
    /// through a share is refused, and so is a directory holding something
    /// shared with `from`. The grantee gets a shadow with the same name in
    /// their root, so the name must be free there.
    pub async fn share(&self, from: UserId, to: UserId, path: &str) -> Result<ShareEntry> {
        let path = LogicalPath::parse(path)?;
        if path.is_root() {
            exn::bail!(ErrorKind::PathNotValid(path.to_string()));
        }
        let _guard = self.locks.lock([from, to]).await;
        let direct = self.repo.get_by_path(from, path.parent(), path.name()).await.or_raise(|| ErrorKind::Metadata)?;
        let original = match direct {
            Some(record) => record,
            None => match self.resolve(from, &path).await {
                Ok(_) => exn::bail!(ErrorKind::ReShareForbidden),
                Err(e) => return Err(e),
            },
        };
        if original.is_shadow() {
            exn::bail!(ErrorKind::ReShareForbidden);
        }
        if original.is_dir && self.subtree(&original).await?.iter().any(FileInfo::is_shadow) {
            tracing::debug!(owner = from, path = %path, "Refusing to share a directory holding shared content");
            exn::bail!(ErrorKind::ReShareForbidden);
        }
        if from == to || self.is_transitively_shared(original.id, ShareTarget::User(to)).await? {
            exn::bail!(ErrorKind::AlreadyExists(path.to_string()));
        }

        let root = self.ensure_user_folders_inner(to).await?;
        let taken = self.repo.get_by_path(to, "/", &original.name).await.or_raise(|| ErrorKind::Metadata)?;
        if taken.is_some() {
            exn::bail!(ErrorKind::AlreadyExists(format!("/{}", original.name)));
        }
        let shadow = FileInfo {
            parent_id: Some(root.id),
            size: original.size,
            last_changed: original.last_changed,
            mime_type: original.mime_type.clone(),
            ..FileInfo::new(to, "/", original.name.clone(), original.is_dir)
        };
        let (share, _) =
            self.repo.insert_share_with_shadow(from, original.id, &shadow).await.or_raise(|| ErrorKind::Metadata)?;
        tracing::info!(owner = from, grantee = to, path = %path, share = share.id, "Shared");
        Ok(share)
    }

    /// Share every path with every user, collecting failures instead of
    /// stopping at the first one.
    pub async fn share_with_users(&self, from: UserId, users: &[UserId], paths: &[&str]) -> ShareOutcome {
        let mut outcome = ShareOutcome::default();
        for &user in users {
            for &path in paths {
                match self.share(from, user, path).await {
                    Ok(share) => outcome.shared.push(share),
                    Err(error) => {
                        tracing::debug!(owner = from, grantee = user, path, error = ?error, "Share failed");
                        outcome.failed.push(ShareFailure { user, path: path.to_string(), error });
                    },
                }
            }
        }
        outcome
    }

    /// Withdraw a share. Either side of it may do so; to anybody else the
    /// share does not exist.
    pub async fn unshare(&self, user: UserId, share_id: ShareId) -> Result<()> {
        let share = self
            .repo
            .get_share(share_id)
            .await
            .or_raise(|| ErrorKind::Metadata)?
            .filter(|share| share.owner_id == user || share.shared_with_id == user)
            .ok_or_raise(|| ErrorKind::FileNotExists(format!("share #{share_id}")))?;
        let _guard = self.locks.lock([share.owner_id, share.shared_with_id]).await;
        self.repo.delete_share(share.id).await.or_raise(|| ErrorKind::Metadata)?;
        tracing::info!(owner = share.owner_id, grantee = share.shared_with_id, share = share.id, "Unshared");
        Ok(())
    }

    /// Everything shared with `user`, as the shadows in their root. Size,
    /// time and type are taken from the originals as they are now.
    pub async fn list_shared_with(&self, user: UserId) -> Result<Vec<FileInfo>> {
        let shadows = self.repo.list_shadows(user).await.or_raise(|| ErrorKind::Metadata)?;
        let mut listed = Vec::with_capacity(shadows.len());
        for mut shadow in shadows {
            if shadow.is_shadow() && self.refresh_shadow(user, &mut shadow).await? {
                listed.push(shadow);
            }
        }
        Ok(listed)
    }

    /// Copy size, time, type and kind from the original onto one of `user`'s
    /// shadows. Returns `false` if the original is gone. Anything that is
    /// not a shadow is left as it is.
    pub(crate) async fn refresh_shadow(&self, user: UserId, shadow: &mut FileInfo) -> Result<bool> {
        let Some(share_id) = shadow.share_id else {
            return Ok(true);
        };
        match self.original_of(user, share_id, &LogicalPath::of(shadow)).await {
            Ok(original) => {
                shadow.size = original.size;
                shadow.last_changed = original.last_changed;
                shadow.mime_type = original.mime_type;
                shadow.is_dir = original.is_dir;
                Ok(true)
            },
            Err(e) if e.is_not_found() => {
                tracing::warn!(owner = user, share = share_id, "Shadow without an original");
                Ok(false)
            },
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::error::ErrorKind;
    use crate::test_utils::Fixture;

    #[tokio::test]
    async fn test_grantee_sees_the_same_record() {
        let fx = Fixture::new().await;
        let alice = 1;
        let bob = 2;
        fx.write(alice, "/f.txt", b"alice's").await;
        let share = fx.vfs.share(alice, bob, "/f.txt").await.unwrap();
        assert_eq!(share.owner_id, alice);
        assert_eq!(share.shared_with_id, bob);

        let original = fx.resolve(alice, "/f.txt").await;
        assert_eq!(share.file_id, original.id);
        assert_eq!(fx.resolve(bob, "/f.txt").await.id, original.id);
        // Bob's root was created on demand and does not count the shadow
        assert_eq!(fx.resolve(bob, "/").await.size, 0);
    }

    #[tokio::test]
    async fn test_reshare_is_forbidden() {
        let fx = Fixture::new().await;
        fx.write(1, "/docs/report.txt", b"hello").await;
        fx.vfs.share(1, 2, "/docs").await.unwrap();
        let err = fx.vfs.share(2, 3, "/docs").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::ReShareForbidden));
        let err = fx.vfs.share(2, 3, "/docs/report.txt").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::ReShareForbidden));
        let err = fx.vfs.share(2, 3, "/missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_received_content_stays_unshareable_inside_a_directory() {
        let fx = Fixture::new().await;
        let (alice, bob, carol) = (1, 2, 3);
        fx.write(carol, "/carol.txt", b"carol-secret").await;
        fx.vfs.share(carol, alice, "/carol.txt").await.unwrap();
        fx.mkdir(alice, "/docs").await;
        fx.write(alice, "/work/notes.txt", b"mine").await;
        // A private directory may hold it
        fx.vfs.move_path(alice, "/carol.txt", "/work/carol.txt").await.unwrap();

        let err = fx.vfs.share(alice, bob, "/work").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::ReShareForbidden));
        assert!(!fx.exists(bob, "/work").await);
        // Alice's own files next to it are still hers to share
        fx.vfs.share(alice, bob, "/work/notes.txt").await.unwrap();

        // Neither can the directory move into one that is shared
        fx.vfs.share(alice, bob, "/docs").await.unwrap();
        let err = fx.vfs.move_path(alice, "/work", "/docs/work").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::SharedIntoShared));
        let err = fx.vfs.copy_path(alice, "/work", "/docs/work").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::SharedIntoShared));
        assert!(!fx.exists(bob, "/docs/work/carol.txt").await);
    }

    #[tokio::test]
    async fn test_duplicate_and_colliding_shares() {
        let fx = Fixture::new().await;
        fx.write(1, "/docs/report.txt", b"hello").await;
        fx.write(3, "/docs/mine.txt", b"bob").await;
        fx.vfs.share(1, 2, "/docs").await.unwrap();

        let err = fx.vfs.share(1, 2, "/docs").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::AlreadyExists(_)));
        // Already reachable through the shared directory
        let err = fx.vfs.share(1, 2, "/docs/report.txt").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::AlreadyExists(_)));
        let err = fx.vfs.share(1, 1, "/docs").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::AlreadyExists(_)));
        // The grantee has their own /docs
        let err = fx.vfs.share(1, 3, "/docs").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::AlreadyExists(p) if p == "/docs"));
        // A file below the share can still go to somebody else
        fx.vfs.share(1, 3, "/docs/report.txt").await.unwrap();
        let err = fx.vfs.share(1, 2, "/").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::PathNotValid(_)));
    }

    #[tokio::test]
    async fn test_share_with_users_collects_failures() {
        let fx = Fixture::new().await;
        fx.write(1, "/a.txt", b"a").await;
        let outcome = fx.vfs.share_with_users(1, &[2, 3], &["/a.txt", "/missing.txt"]).await;
        assert!(!outcome.is_complete());
        assert_eq!(outcome.shared.len(), 2);
        assert_eq!(outcome.failed.len(), 2);
        assert!(outcome.failed.iter().all(|f| f.path == "/missing.txt" && f.error.is_not_found()));
        assert!(fx.exists(3, "/a.txt").await);
    }

    #[tokio::test]
    async fn test_unshare_by_either_side() {
        let fx = Fixture::new().await;
        fx.write(1, "/a.txt", b"a").await;
        fx.write(1, "/b.txt", b"b").await;
        let a = fx.vfs.share(1, 2, "/a.txt").await.unwrap();
        let b = fx.vfs.share(1, 2, "/b.txt").await.unwrap();

        let err = fx.vfs.unshare(3, a.id).await.unwrap_err();
        assert!(err.is_not_found());
        fx.vfs.unshare(1, a.id).await.unwrap();
        fx.vfs.unshare(2, b.id).await.unwrap();
        assert!(!fx.exists(2, "/a.txt").await);
        assert!(!fx.exists(2, "/b.txt").await);
        assert!(fx.exists(1, "/a.txt").await);
        assert!(fx.vfs.unshare(1, a.id).await.is_err());
    }

    #[tokio::test]
    async fn test_listing_reflects_current_originals() {
        let fx = Fixture::new().await;
        fx.write(1, "/docs/report.txt", b"hello").await;
        fx.vfs.share(1, 2, "/docs").await.unwrap();
        fx.write(1, "/docs/more.txt", b"123").await;
        let shared = fx.vfs.list_shared_with(2).await.unwrap();
        assert_eq!(shared.len(), 1);
        assert_eq!(shared[0].owner_id, 2);
        assert_eq!(shared[0].full_path(), "/docs");
        assert_eq!(shared[0].size, 8);
        assert!(fx.vfs.list_shared_with(1).await.unwrap().is_empty());
    }
}
