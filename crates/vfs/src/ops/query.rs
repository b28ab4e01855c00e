use crate::error::{ErrorKind, Result};
use crate::path::{LogicalPath, physical_of};
use crate::Vfs;
use exn::ResultExt;
use std::path::PathBuf;
use strata_meta::{FileInfo, UserId};
use time::UtcDateTime;

/// A record and, for directories, its direct children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathInfo {
    pub info: FileInfo,
    pub children: Vec<FileInfo>,
}

/// Changes requested through [`Vfs::update`]. Unset fields stay as they are.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileUpdate {
    /// Directory to move (or copy) into.
    pub new_path: Option<String>,
    pub new_name: Option<String>,
    pub starred: Option<bool>,
    /// Copy instead of moving.
    pub copy: bool,
}

impl Vfs {
    /// Metadata for `path` plus its listing.
    ///
    /// Records reached through a share are reported at the location the
    /// user asked for, not where they live in the granter's tree. Shadows in
    /// the listing carry their originals' current size, time and type.
    pub async fn get_path_info(&self, user: UserId, path: &str) -> Result<PathInfo> {
        let path = LogicalPath::parse(path)?;
        let mut info = self.resolve(user, &path).await?;
        let mut children = Vec::new();
        if info.is_dir {
            for mut child in self.repo.list_children(info.id).await.or_raise(|| ErrorKind::Metadata)? {
                // Only the holder's own shadows are shown in full.
                if child.is_shadow() && (child.owner_id != user || !self.refresh_shadow(user, &mut child).await?) {
                    continue;
                }
                children.push(child);
            }
        }
        if info.owner_id != user {
            info.path = path.parent().to_string();
            info.name = path.name().to_string();
            let key = path.dir_key();
            for child in &mut children {
                child.path = key.clone();
            }
        }
        Ok(PathInfo { info, children })
    }

    /// Files and directories below the query's parent whose name contains
    /// the query's last segment; `/docs/rep` finds `/docs/sub/report.txt`.
    /// Only searches the user's own tree.
    pub async fn search(&self, user: UserId, query: &str) -> Result<Vec<FileInfo>> {
        let query = LogicalPath::parse(query)?;
        self.repo.search(user, query.parent(), query.name()).await.or_raise(|| ErrorKind::Metadata)
    }

    pub async fn list_starred(&self, user: UserId) -> Result<Vec<FileInfo>> {
        self.repo.list_starred(user).await.or_raise(|| ErrorKind::Metadata)
    }

    /// Star or unstar `path`. Starring is metadata only and bumps the
    /// record's change time.
    pub async fn set_starred(&self, user: UserId, path: &str, starred: bool) -> Result<FileInfo> {
        let path = LogicalPath::parse(path)?;
        let (mut target, _guard) = self.lookup_locked(user, &path).await?;
        if target.starred != starred {
            let now = UtcDateTime::now();
            target.starred = starred;
            target.last_changed = now.replace_nanosecond(0).unwrap_or(now);
            self.repo.update(&target).await.or_raise(|| ErrorKind::Metadata)?;
        }
        Ok(target)
    }

    /// Apply a [`FileUpdate`] to `path` and return the record in its final
    /// state. Stars are applied once the move or copy has gone through, to
    /// the record at its new place.
    pub async fn update(&self, user: UserId, path: &str, update: FileUpdate) -> Result<FileInfo> {
        let from = LogicalPath::parse(path)?;
        let relocating = update.new_path.is_some() || update.new_name.is_some();
        if !relocating {
            return match update.starred {
                Some(starred) => self.set_starred(user, path, starred).await,
                None => self.lookup_for_mutation(user, &from).await,
            };
        }

        let dir = match &update.new_path {
            Some(dir) => LogicalPath::parse(dir)?,
            None => from.parent_path(),
        };
        let name = match &update.new_name {
            Some(name) => {
                let leaf = LogicalPath::parse(name)?;
                if leaf.is_root() || leaf.parent() != "/" {
                    exn::bail!(ErrorKind::PathNotValid(name.clone()));
                }
                leaf.name().to_string()
            },
            None => from.name().to_string(),
        };
        let to = dir.join(&name).to_string();

        let relocated = match update.copy {
            true => self.copy_path(user, path, &to).await?,
            false => self.move_path(user, path, &to).await?,
        };
        match update.starred {
            Some(starred) => self.set_starred(user, &to, starred).await,
            None => Ok(relocated),
        }
    }

    /// Backend-relative location of the bytes behind `path`, for streaming
    /// a download.
    pub async fn download_path(&self, user: UserId, path: &str) -> Result<PathBuf> {
        let path = LogicalPath::parse(path)?;
        let file = self.resolve(user, &path).await?;
        if file.is_dir {
            exn::bail!(ErrorKind::PathNotValid(path.to_string()));
        }
        Ok(physical_of(&file))
    }
}
