use crate::error::{ErrorKind, Result};
use crate::path::{owner_prefix, physical_of};
use crate::{MAX_DEPTH, Vfs, mime};
use exn::ResultExt;
use std::collections::HashMap;
use strata_meta::{FileInfo, UserId};

/// Metadata writes performed by one reconciliation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanReport {
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
}
impl ScanReport {
    /// `true` if metadata already matched the disk.
    pub fn is_clean(&self) -> bool {
        self.inserted == 0 && self.updated == 0 && self.deleted == 0
    }
}

impl Vfs {
    /// Make sure `user` has a physical directory with a temp area in it, and
    /// records for both. Returns the user's root record.
    pub async fn ensure_user_folders(&self, user: UserId) -> Result<FileInfo> {
        let _guard = self.locks.lock([user]).await;
        self.ensure_user_folders_inner(user).await
    }

    pub(crate) async fn ensure_user_folders_inner(&self, user: UserId) -> Result<FileInfo> {
        let root_path = owner_prefix(user);
        let tmp_path = root_path.join(&self.tmp_folder);
        if self.backend.create_dir(&root_path).await.or_raise(|| ErrorKind::Filesystem)? {
            tracing::info!(owner = user, "Created user folder");
        }
        self.backend.create_dir(&tmp_path).await.or_raise(|| ErrorKind::Filesystem)?;

        let root = match self.repo.get_by_path(user, "/", "").await.or_raise(|| ErrorKind::Metadata)? {
            Some(root) => root,
            None => {
                let entry = self.backend.stat(&root_path).await.or_raise(|| ErrorKind::Filesystem)?;
                let root = FileInfo {
                    last_changed: entry.modified,
                    ..FileInfo::new(user, "/", "", true)
                };
                self.repo.insert(&root).await.or_raise(|| ErrorKind::Metadata)?
            },
        };
        if self.repo.get_by_path(user, "/", &self.tmp_folder).await.or_raise(|| ErrorKind::Metadata)?.is_none() {
            let entry = self.backend.stat(&tmp_path).await.or_raise(|| ErrorKind::Filesystem)?;
            let tmp = FileInfo {
                parent_id: Some(root.id),
                last_changed: entry.modified,
                ..FileInfo::new(user, "/", self.tmp_folder.clone(), true)
            };
            self.repo.insert(&tmp).await.or_raise(|| ErrorKind::Metadata)?;
        }
        Ok(root)
    }

    /// Reconcile one user's whole tree with the disk.
    pub async fn scan_user(&self, user: UserId) -> Result<ScanReport> {
        let _guard = self.locks.lock([user]).await;
        let root = self.ensure_user_folders_inner(user).await?;
        let mut report = ScanReport::default();
        let size = self.scan_dir(&root, 0, &mut report).await?;
        tracing::info!(
            owner = user,
            size,
            inserted = report.inserted,
            updated = report.updated,
            deleted = report.deleted,
            "Scanned user folder"
        );
        Ok(report)
    }

    /// Reconcile the children of `dir` and everything below them. Returns the
    /// aggregate size of `dir`.
    ///
    /// Work already done for earlier siblings is kept when a later one fails.
    async fn scan_dir(&self, dir: &FileInfo, depth: usize, report: &mut ScanReport) -> Result<u64> {
        if depth > MAX_DEPTH {
            exn::bail!(ErrorKind::TooDeep);
        }
        let physical = physical_of(dir);
        let stat = self.backend.stat(&physical).await.or_raise(|| ErrorKind::Filesystem)?;
        if !stat.is_dir {
            return Ok(stat.size);
        }
        let entries = self.backend.list_dir(Some(&physical)).await.or_raise(|| ErrorKind::Filesystem)?;
        let mut remaining: HashMap<String, FileInfo> = self
            .repo
            .list_children(dir.id)
            .await
            .or_raise(|| ErrorKind::Metadata)?
            .into_iter()
            .map(|child| (child.name.clone(), child))
            .collect();

        let mut total = 0;
        for entry in entries {
            let name = entry.name().to_string();
            let child = match remaining.remove(&name) {
                Some(shadow) if shadow.is_shadow() => {
                    tracing::warn!(owner = dir.owner_id, path = %shadow.full_path(), "Physical entry hidden by a share; skipping");
                    remaining.insert(name, shadow);
                    continue;
                },
                Some(mut known) => {
                    let changed = (!entry.is_dir && known.size != entry.size)
                        || known.last_changed != entry.modified
                        || known.is_dir != entry.is_dir;
                    if changed {
                        if known.is_dir && !entry.is_dir {
                            // A directory was replaced by a file; its old contents are gone.
                            let below: Vec<_> = self.subtree(&known).await?.into_iter().skip(1).map(|f| f.id).collect();
                            report.deleted += self.repo.delete_many(&below).await.or_raise(|| ErrorKind::Metadata)?.files;
                        }
                        if !entry.is_dir {
                            known.size = entry.size;
                            known.mime_type = mime::from_name(&known.name);
                        } else if !known.is_dir {
                            known.size = 0;
                            known.mime_type = None;
                        }
                        known.last_changed = entry.modified;
                        known.is_dir = entry.is_dir;
                        self.repo.update(&known).await.or_raise(|| ErrorKind::Metadata)?;
                        report.updated += 1;
                        tracing::debug!(owner = dir.owner_id, path = %known.full_path(), "Updated record from disk");
                    }
                    known
                },
                None => {
                    let record = FileInfo {
                        parent_id: Some(dir.id),
                        size: if entry.is_dir { 0 } else { entry.size },
                        last_changed: entry.modified,
                        mime_type: if entry.is_dir { None } else { mime::from_name(&name) },
                        ..FileInfo::new(dir.owner_id, dir.dir_key(), name, entry.is_dir)
                    };
                    let record = self.repo.insert(&record).await.or_raise(|| ErrorKind::Metadata)?;
                    report.inserted += 1;
                    tracing::debug!(owner = dir.owner_id, path = %record.full_path(), "Inserted record from disk");
                    record
                },
            };
            total += match child.is_dir {
                true => Box::pin(self.scan_dir(&child, depth + 1, report)).await?,
                false => child.size,
            };
        }

        for stale in remaining.into_values().filter(|record| !record.is_shadow()) {
            let ids: Vec<_> = self.subtree(&stale).await?.into_iter().map(|f| f.id).collect();
            let purged = self.repo.delete_many(&ids).await.or_raise(|| ErrorKind::Metadata)?;
            report.deleted += purged.files;
            tracing::debug!(owner = dir.owner_id, path = %stale.full_path(), records = purged.files, "Removed records missing from disk");
        }

        if dir.size != total {
            let resized = FileInfo { size: total, ..dir.clone() };
            self.repo.update(&resized).await.or_raise(|| ErrorKind::Metadata)?;
            report.updated += 1;
        }
        Ok(total)
    }
}
