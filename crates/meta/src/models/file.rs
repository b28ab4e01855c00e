use super::{FileId, ShareId, UserId};
use crate::error::{Error, ErrorKind};
use exn::ResultExt;
use time::UtcDateTime;

/// One file or directory in an owner's logical tree.
///
/// `path` is the parent directory, always starting and ending with `/`, and
/// `name` is the leaf. The owner's root is `path = "/"`, `name = ""`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub id: FileId,
    pub owner_id: UserId,
    pub path: String,
    pub name: String,
    pub parent_id: Option<FileId>,
    pub is_dir: bool,
    /// Bytes for files; for directories the sum of every non-shadow descendant file.
    pub size: u64,
    pub last_changed: UtcDateTime,
    pub mime_type: Option<String>,
    /// Set on share shadows only.
    pub share_id: Option<ShareId>,
    pub starred: bool,
}
impl FileInfo {
    /// An unsaved record; the id is assigned by [`Repository::insert`](crate::Repository::insert).
    pub fn new(owner_id: UserId, path: impl Into<String>, name: impl Into<String>, is_dir: bool) -> Self {
        let now = UtcDateTime::now();
        Self {
            id: 0,
            owner_id,
            path: path.into(),
            name: name.into(),
            parent_id: None,
            is_dir,
            size: 0,
            last_changed: now.replace_nanosecond(0).unwrap_or(now),
            mime_type: None,
            share_id: None,
            starred: false,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none() && self.path == "/" && self.name.is_empty()
    }

    pub fn is_shadow(&self) -> bool {
        self.share_id.is_some()
    }

    /// Logical path of the record itself: `/docs/report.txt`, or `/` for the root.
    pub fn full_path(&self) -> String {
        format!("{}{}", self.path, self.name)
    }

    /// Logical path that children of this record carry in their `path`.
    pub fn dir_key(&self) -> String {
        match self.name.is_empty() {
            true => self.path.clone(),
            false => format!("{}{}/", self.path, self.name),
        }
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct FileRow {
    pub(crate) id: i64,
    pub(crate) owner_id: i64,
    pub(crate) path: String,
    pub(crate) name: String,
    pub(crate) parent_id: Option<i64>,
    pub(crate) is_dir: bool,
    pub(crate) size: i64,
    pub(crate) last_changed: i64,
    pub(crate) mime_type: Option<String>,
    pub(crate) share_id: Option<i64>,
    pub(crate) starred: bool,
}
impl TryFrom<&FileInfo> for FileRow {
    type Error = Error;
    fn try_from(file: &FileInfo) -> Result<Self, Self::Error> {
        Ok(Self {
            id: file.id,
            owner_id: file.owner_id,
            path: file.path.clone(),
            name: file.name.clone(),
            parent_id: file.parent_id,
            is_dir: file.is_dir,
            size: i64::try_from(file.size).or_raise(|| ErrorKind::InvalidData("file size"))?,
            last_changed: file.last_changed.unix_timestamp(),
            mime_type: file.mime_type.clone(),
            share_id: file.share_id,
            starred: file.starred,
        })
    }
}
impl TryFrom<FileRow> for FileInfo {
    type Error = Error;
    fn try_from(row: FileRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            owner_id: row.owner_id,
            path: row.path,
            name: row.name,
            parent_id: row.parent_id,
            is_dir: row.is_dir,
            size: u64::try_from(row.size).or_raise(|| ErrorKind::InvalidData("file size"))?,
            last_changed: UtcDateTime::from_unix_timestamp(row.last_changed)
                .or_raise(|| ErrorKind::InvalidData("last changed"))?,
            mime_type: row.mime_type,
            share_id: row.share_id,
            starred: row.starred,
        })
    }
}
