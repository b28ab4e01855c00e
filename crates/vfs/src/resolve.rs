//! Share indirection.
//!
//! A grantee only ever holds one record per share: the shadow in their root.
//! Anything below it is looked up in the granter's tree by appending the rest
//! of the requested path to the original's location.

use crate::Vfs;
use crate::error::{ErrorKind, Result};
use crate::path::LogicalPath;
use crate::MAX_DEPTH;
use exn::{OptionExt, ResultExt};
use strata_meta::{FileId, FileInfo, ShareEntry, ShareId, UserId};

/// Whose access [`Vfs::is_transitively_shared`] asks about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareTarget {
    /// Shared with anybody at all.
    Anyone,
    User(UserId),
}
impl ShareTarget {
    fn matches(self, shares: &[ShareEntry]) -> bool {
        match self {
            Self::Anyone => !shares.is_empty(),
            Self::User(user) => shares.iter().any(|share| share.shared_with_id == user),
        }
    }
}

impl Vfs {
    /// Resolve `path` as `user` sees it to the authoritative record.
    ///
    /// Shadows are followed to the original, which is returned as stored: in
    /// the granter's tree, with the granter's path. Callers that present the
    /// record back to the user rewrite its location themselves.
    pub async fn resolve(&self, user: UserId, path: &LogicalPath) -> Result<FileInfo> {
        let direct = self.repo.get_by_path(user, path.parent(), path.name()).await.or_raise(|| ErrorKind::Metadata)?;
        if let Some(record) = direct {
            return match record.share_id {
                None => Ok(record),
                Some(share_id) => self.original_of(user, share_id, path).await,
            };
        }
        for (ancestor, rest) in path.ancestors() {
            let found =
                self.repo.get_by_path(user, ancestor.parent(), ancestor.name()).await.or_raise(|| ErrorKind::Metadata)?;
            let Some(record) = found else {
                continue;
            };
            // A directory the user really owns would have held the record itself.
            let Some(share_id) = record.share_id else {
                break;
            };
            let original = self.original_of(user, share_id, path).await?;
            let target = LogicalPath::parse(&format!("{}{rest}", original.dir_key()))?;
            tracing::trace!(owner = user, path = %path, original = original.owner_id, target = %target, "Following share");
            let found = self
                .repo
                .get_by_path(original.owner_id, target.parent(), target.name())
                .await
                .or_raise(|| ErrorKind::Metadata)?
                .ok_or_raise(|| ErrorKind::FileNotExists(path.to_string()))?;
            // What the granter received from others is not passed on.
            if found.is_shadow() {
                tracing::warn!(owner = user, path = %path, original = original.owner_id, "Shadow below a shared directory");
                exn::bail!(ErrorKind::FileNotExists(path.to_string()));
            }
            return Ok(found);
        }
        exn::bail!(ErrorKind::FileNotExists(path.to_string()))
    }

    /// Like [`resolve`](Self::resolve), but a shadow addressed directly is
    /// returned as the shadow. Operations that change the user's own view
    /// (delete, move, star) act on the shadow and never on the original.
    pub(crate) async fn lookup_for_mutation(&self, user: UserId, path: &LogicalPath) -> Result<FileInfo> {
        let direct = self.repo.get_by_path(user, path.parent(), path.name()).await.or_raise(|| ErrorKind::Metadata)?;
        match direct {
            Some(record) => Ok(record),
            None => self.resolve(user, path).await,
        }
    }

    /// Load a share on behalf of `user`, refusing one granted to somebody else.
    pub(crate) async fn checked_share(&self, user: UserId, share_id: ShareId, path: &LogicalPath) -> Result<ShareEntry> {
        let share = self
            .repo
            .get_share(share_id)
            .await
            .or_raise(|| ErrorKind::Metadata)?
            .ok_or_raise(|| ErrorKind::FileNotExists(path.to_string()))?;
        if share.shared_with_id != user {
            tracing::error!(
                share = share_id,
                owner = user,
                grantee = share.shared_with_id,
                "Shadow record refers to a share granted to another user"
            );
            exn::bail!(ErrorKind::Inconsistent { share_id, user_id: user });
        }
        Ok(share)
    }

    /// The original a shadow of `user` stands for.
    pub(crate) async fn original_of(&self, user: UserId, share_id: ShareId, path: &LogicalPath) -> Result<FileInfo> {
        let share = self.checked_share(user, share_id, path).await?;
        self.repo
            .get(share.file_id)
            .await
            .or_raise(|| ErrorKind::Metadata)?
            .ok_or_raise(|| ErrorKind::FileNotExists(path.to_string()))
    }

    /// Is `file`, or any directory above it, shared with `target`?
    pub async fn is_transitively_shared(&self, file: FileId, target: ShareTarget) -> Result<bool> {
        let Some(record) = self.repo.get(file).await.or_raise(|| ErrorKind::Metadata)? else {
            exn::bail!(ErrorKind::FileNotExists(format!("#{file}")));
        };
        Ok(self.shared_ancestor(&record, target).await?.is_some())
    }

    /// Closest record at or above `file` that has a matching share.
    pub(crate) async fn shared_ancestor(&self, file: &FileInfo, target: ShareTarget) -> Result<Option<FileId>> {
        let mut current = file.clone();
        for _ in 0..MAX_DEPTH {
            let shares = self.repo.list_shares_for_file(current.id).await.or_raise(|| ErrorKind::Metadata)?;
            if target.matches(&shares) {
                return Ok(Some(current.id));
            }
            let Some(parent) = current.parent_id else {
                return Ok(None);
            };
            current = self.repo.get(parent).await.or_raise(|| ErrorKind::Metadata)?.ok_or_raise(|| ErrorKind::Metadata)?;
        }
        exn::bail!(ErrorKind::TooDeep)
    }

    /// Is `dir` equal to or below `ancestor`?
    pub(crate) async fn is_within(&self, dir: &FileInfo, ancestor: FileId) -> Result<bool> {
        let mut current = Some(dir.clone());
        for _ in 0..MAX_DEPTH {
            let Some(record) = current else {
                return Ok(false);
            };
            if record.id == ancestor {
                return Ok(true);
            }
            current = match record.parent_id {
                Some(parent) => self.repo.get(parent).await.or_raise(|| ErrorKind::Metadata)?,
                None => None,
            };
        }
        exn::bail!(ErrorKind::TooDeep)
    }

    /// Refuse to place shared content into shared territory.
    ///
    /// The source counts as shared when it is a shadow, was reached through
    /// one, sits in a shared subtree of its owner, or is a directory holding
    /// a shadow. The destination counts
    /// as shared when it is a shadow, belongs to somebody other than `user`,
    /// or sits in a shared subtree. Reorganizing inside one shared subtree is
    /// fine: the content stays visible to exactly the same people.
    pub(crate) async fn guard_shared_into_shared(&self, user: UserId, source: &FileInfo, dest: &FileInfo) -> Result<()> {
        let source_scope = self.shared_ancestor(source, ShareTarget::Anyone).await?;
        let mut source_shared = source.is_shadow() || source.owner_id != user || source_scope.is_some();
        if !source_shared && source.is_dir {
            source_shared = self.subtree(source).await?.iter().any(FileInfo::is_shadow);
        }
        if !source_shared {
            return Ok(());
        }
        let dest_scope = self.shared_ancestor(dest, ShareTarget::Anyone).await?;
        let dest_shared = dest.is_shadow() || dest.owner_id != user || dest_scope.is_some();
        if !dest_shared {
            return Ok(());
        }
        let same_scope = !source.is_shadow()
            && source.owner_id == dest.owner_id
            && source_scope.is_some()
            && source_scope != Some(source.id)
            && source_scope == dest_scope;
        if same_scope {
            return Ok(());
        }
        tracing::debug!(owner = user, source = source.id, dest = dest.id, "Refusing to place shared content into a shared directory");
        exn::bail!(ErrorKind::SharedIntoShared)
    }
}
