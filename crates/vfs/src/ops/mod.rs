//! Mutations of the file tree and the queries a file browser needs.
//!
//! Every mutation does its physical work first and its metadata work second,
//! holding the locks of every owner whose tree it touches. Which owners those
//! are is only known after resolving the paths, so every check is run once
//! to find them and again while holding their locks. Cascading metadata
//! rewrites go through one transaction; if the physical step fails the
//! metadata is left alone, and if the metadata step fails the next scan puts
//! it right.

mod create;
mod delete;
mod export;
mod query;
mod relocate;

pub use self::query::{FileUpdate, PathInfo};
use crate::error::{ErrorKind, Result};
use crate::lock::OwnerGuard;
use crate::path::LogicalPath;
use crate::{MAX_DEPTH, Vfs};
use exn::ResultExt;
use strata_meta::{FileId, FileInfo, UserId};

/// How often an operation re-plans when the owners it touches change while
/// it waits for their locks, before giving up with
/// [`Contended`](ErrorKind::Contended).
const LOCK_ATTEMPTS: usize = 3;

impl Vfs {
    /// [`lookup_for_mutation`](Self::lookup_for_mutation) while holding the
    /// locks of `user` and of the record's owner.
    pub(crate) async fn lookup_locked(&self, user: UserId, path: &LogicalPath) -> Result<(FileInfo, OwnerGuard)> {
        let mut owner = self.lookup_for_mutation(user, path).await?.owner_id;
        for _ in 0..LOCK_ATTEMPTS {
            let guard = self.locks.lock([user, owner]).await;
            let target = self.lookup_for_mutation(user, path).await?;
            if guard.covers([target.owner_id]) {
                return Ok((target, guard));
            }
            owner = target.owner_id;
        }
        exn::bail!(ErrorKind::Contended)
    }

    /// `root` followed by every record below it, parents before children.
    pub(crate) async fn subtree(&self, root: &FileInfo) -> Result<Vec<FileInfo>> {
        let mut found = vec![root.clone()];
        let mut stack = vec![(root.id, root.is_dir, 0)];
        while let Some((id, is_dir, depth)) = stack.pop() {
            if !is_dir {
                continue;
            }
            if depth > MAX_DEPTH {
                exn::bail!(ErrorKind::TooDeep);
            }
            for child in self.repo.list_children(id).await.or_raise(|| ErrorKind::Metadata)? {
                stack.push((child.id, child.is_dir, depth + 1));
                found.push(child);
            }
        }
        Ok(found)
    }

    /// Re-aggregate directory sizes from `dir` upwards, stopping at the first
    /// directory whose size did not change.
    pub(crate) async fn refresh_sizes(&self, dir: FileId) -> Result<()> {
        let mut next = Some(dir);
        while let Some(id) = next {
            let Some(mut record) = self.repo.get(id).await.or_raise(|| ErrorKind::Metadata)? else {
                return Ok(());
            };
            let total = self.repo.sum_child_sizes(id).await.or_raise(|| ErrorKind::Metadata)?;
            if record.size == total {
                return Ok(());
            }
            record.size = total;
            self.repo.update(&record).await.or_raise(|| ErrorKind::Metadata)?;
            next = record.parent_id;
        }
        Ok(())
    }
}
