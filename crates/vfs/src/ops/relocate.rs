use super::LOCK_ATTEMPTS;
use crate::error::{ErrorKind, Result};
use crate::lock::OwnerGuard;
use crate::path::{LogicalPath, physical_of, physical_path};
use crate::{MAX_DEPTH, Vfs, mime};
use exn::{OptionExt, ResultExt};
use strata_meta::{FileInfo, UserId};
use strata_storage::error::ErrorKind as StorageErrorKind;
use time::UtcDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Relocate {
    Move,
    Copy,
}

/// The checked source and destination directory of a move or copy.
struct Plan {
    source: FileInfo,
    dest: FileInfo,
}
impl Plan {
    fn owners(&self, user: UserId) -> [UserId; 3] {
        [user, self.source.owner_id, self.dest.owner_id]
    }
}

fn now() -> UtcDateTime {
    let now = UtcDateTime::now();
    now.replace_nanosecond(0).unwrap_or(now)
}

impl Vfs {
    /// Resolve the directory `to` will live in and make sure `to` is free.
    async fn destination(&self, user: UserId, to: &LogicalPath) -> Result<FileInfo> {
        if to.is_root() {
            exn::bail!(ErrorKind::AlreadyExists(to.to_string()));
        }
        let dest = match self.resolve(user, &to.parent_path()).await {
            Ok(dest) => dest,
            Err(e) if e.is_not_found() => exn::bail!(ErrorKind::FileNotExists(to.parent_path().to_string())),
            Err(e) => return Err(e),
        };
        if !dest.is_dir {
            exn::bail!(ErrorKind::NotADirectory(to.parent_path().to_string()));
        }
        match self.resolve(user, to).await {
            Ok(_) => exn::bail!(ErrorKind::AlreadyExists(to.to_string())),
            Err(e) if e.is_not_found() => Ok(dest),
            Err(e) => Err(e),
        }
    }

    async fn plan(&self, user: UserId, from: &LogicalPath, to: &LogicalPath, kind: Relocate) -> Result<Plan> {
        let source = match kind {
            Relocate::Move => self.lookup_for_mutation(user, from).await?,
            Relocate::Copy => self.resolve(user, from).await?,
        };
        let dest = self.destination(user, to).await?;
        if source.is_dir && self.is_within(&dest, source.id).await? {
            exn::bail!(ErrorKind::PathNotValid(to.to_string()));
        }
        self.guard_shared_into_shared(user, &source, &dest).await?;
        Ok(Plan { source, dest })
    }

    /// Plan a move or copy while holding the locks of every owner involved,
    /// so that nothing changes between the checks and the work.
    async fn plan_locked(
        &self,
        user: UserId,
        from: &LogicalPath,
        to: &LogicalPath,
        kind: Relocate,
    ) -> Result<(Plan, OwnerGuard)> {
        let mut owners = self.plan(user, from, to, kind).await?.owners(user);
        for _ in 0..LOCK_ATTEMPTS {
            let guard = self.locks.lock(owners).await;
            let plan = self.plan(user, from, to, kind).await?;
            if guard.covers(plan.owners(user)) {
                return Ok((plan, guard));
            }
            owners = plan.owners(user);
        }
        exn::bail!(ErrorKind::Contended)
    }

    /// Move or rename `from` to `to`.
    ///
    /// Directories take every record below them along. A shadow only moves
    /// inside its holder's own tree and never has bytes to move.
    pub async fn move_path(&self, user: UserId, from: &str, to: &str) -> Result<FileInfo> {
        let from = LogicalPath::parse(from)?;
        let to = LogicalPath::parse(to)?;
        if from.is_root() {
            exn::bail!(ErrorKind::PathNotValid(from.to_string()));
        }
        let (Plan { source, dest }, _guard) = self.plan_locked(user, &from, &to, Relocate::Move).await?;
        let records = self.subtree(&source).await?;
        if source.owner_id != dest.owner_id && records.iter().any(FileInfo::is_shadow) {
            // Shadows belong to their grantee and cannot change hands.
            exn::bail!(ErrorKind::SharedIntoShared);
        }
        let new_key = dest.dir_key();
        if !source.is_shadow() {
            let target = physical_path(dest.owner_id, &new_key, to.name());
            match self.backend.rename(&physical_of(&source), &target).await {
                Ok(()) => {},
                // Bytes nobody has recorded yet; the next scan picks them up.
                Err(e) if matches!(&*e, StorageErrorKind::AlreadyExists(_)) => {
                    return Err(e).or_raise(|| ErrorKind::AlreadyExists(to.to_string()));
                },
                Err(e) => return Err(e).or_raise(|| ErrorKind::Filesystem),
            }
        }

        let old_prefix = source.dir_key();
        let new_prefix = format!("{new_key}{}/", to.name());
        let mut moved = Vec::with_capacity(records.len());
        for (index, mut record) in records.into_iter().enumerate() {
            if index == 0 {
                record.path = new_key.clone();
                record.name = to.name().to_string();
                record.parent_id = Some(dest.id);
                record.last_changed = now();
                if !record.is_dir {
                    record.mime_type = mime::from_name(&record.name);
                }
            } else if let Some(rest) = record.path.strip_prefix(&old_prefix) {
                record.path = format!("{new_prefix}{rest}");
            }
            if !record.is_shadow() {
                record.owner_id = dest.owner_id;
            }
            moved.push(record);
        }
        self.repo.update_many(&moved).await.or_raise(|| ErrorKind::Metadata)?;

        if let Some(old_parent) = source.parent_id {
            self.refresh_sizes(old_parent).await?;
        }
        self.refresh_sizes(dest.id).await?;
        let record = moved.swap_remove(0);
        tracing::info!(owner = user, from = %from, to = %to, records = moved.len() + 1, "Moved");
        Ok(record)
    }

    /// Copy `from` to `to`, directories recursively.
    ///
    /// Content reached through a share is copied from the original's bytes,
    /// so the copy is an ordinary record owned by the destination's owner.
    pub async fn copy_path(&self, user: UserId, from: &str, to: &str) -> Result<FileInfo> {
        let from = LogicalPath::parse(from)?;
        let to = LogicalPath::parse(to)?;
        let (Plan { source, dest }, _guard) = self.plan_locked(user, &from, &to, Relocate::Copy).await?;
        let copy = self.copy_tree(user, &source, &dest, to.name()).await?;
        self.refresh_sizes(dest.id).await?;
        tracing::info!(owner = user, from = %from, to = %to, size = copy.size, "Copied");
        Ok(copy)
    }

    /// Copy `source` into `dest` as `name`; returns the new top record.
    ///
    /// Shadows below `source` are copied from their originals when they are
    /// `user`'s own. Anybody else's are left out.
    async fn copy_tree(&self, user: UserId, source: &FileInfo, dest: &FileInfo, name: &str) -> Result<FileInfo> {
        let top = self.copy_one(source, dest, name).await?;
        let mut created_dirs = Vec::new();
        let mut stack = vec![(source.clone(), top.clone(), 0)];
        while let Some((from_dir, to_dir, depth)) = stack.pop() {
            if !from_dir.is_dir {
                continue;
            }
            if depth > MAX_DEPTH {
                exn::bail!(ErrorKind::TooDeep);
            }
            for child in self.repo.list_children(from_dir.id).await.or_raise(|| ErrorKind::Metadata)? {
                let original = match child.share_id {
                    Some(share_id) if child.owner_id == user => {
                        self.original_of(user, share_id, &LogicalPath::of(&child)).await?
                    },
                    Some(share_id) => {
                        tracing::warn!(owner = user, share = share_id, path = %child.full_path(), "Not copying a shadow held by another user");
                        continue;
                    },
                    None => child.clone(),
                };
                let copied = self.copy_one(&original, &to_dir, &child.name).await?;
                stack.push((original, copied, depth + 1));
            }
            created_dirs.push(to_dir.id);
        }
        // Innermost directories were pushed last.
        for dir in created_dirs.into_iter().rev() {
            let total = self.repo.sum_child_sizes(dir).await.or_raise(|| ErrorKind::Metadata)?;
            if let Some(mut record) = self.repo.get(dir).await.or_raise(|| ErrorKind::Metadata)?
                && record.size != total
            {
                record.size = total;
                self.repo.update(&record).await.or_raise(|| ErrorKind::Metadata)?;
            }
        }
        self.repo.get(top.id).await.or_raise(|| ErrorKind::Metadata)?.ok_or_raise(|| ErrorKind::Metadata)
    }

    /// Copy a single file, or create the directory, and record it.
    async fn copy_one(&self, source: &FileInfo, dest: &FileInfo, name: &str) -> Result<FileInfo> {
        let target = physical_path(dest.owner_id, &dest.dir_key(), name);
        if source.is_dir {
            self.backend.create_dir(&target).await.or_raise(|| ErrorKind::Filesystem)?;
        } else {
            self.backend.copy(&physical_of(source), &target).await.or_raise(|| ErrorKind::Filesystem)?;
        }
        let entry = self.backend.stat(&target).await.or_raise(|| ErrorKind::Filesystem)?;
        let record = FileInfo {
            parent_id: Some(dest.id),
            size: if source.is_dir { 0 } else { entry.size },
            last_changed: entry.modified,
            mime_type: if source.is_dir { None } else { mime::from_name(name) },
            ..FileInfo::new(dest.owner_id, dest.dir_key(), name, source.is_dir)
        };
        self.repo.insert(&record).await.or_raise(|| ErrorKind::Metadata)
    }
}
