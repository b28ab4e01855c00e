use super::{FileId, ShareId, UserId};
use crate::error::{Error, ErrorKind};
use exn::ResultExt;
use time::UtcDateTime;

/// User `owner_id` grants `shared_with_id` access to file `file_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareEntry {
    pub id: ShareId,
    pub owner_id: UserId,
    pub file_id: FileId,
    pub shared_with_id: UserId,
    pub created_at: UtcDateTime,
}

#[derive(sqlx::FromRow)]
pub(crate) struct ShareRow {
    id: i64,
    owner_id: i64,
    file_id: i64,
    shared_with_id: i64,
    created_at: i64,
}
impl TryFrom<ShareRow> for ShareEntry {
    type Error = Error;
    fn try_from(row: ShareRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            owner_id: row.owner_id,
            file_id: row.file_id,
            shared_with_id: row.shared_with_id,
            created_at: UtcDateTime::from_unix_timestamp(row.created_at)
                .or_raise(|| ErrorKind::InvalidData("share creation date"))?,
        })
    }
}
