mod file;
mod share;

pub use self::file::FileInfo;
pub(crate) use self::file::FileRow;
pub use self::share::ShareEntry;
pub(crate) use self::share::ShareRow;

/// Identifies a user; owners, granters and grantees are all users.
pub type UserId = i64;
/// Identifies a [`FileInfo`] record.
pub type FileId = i64;
/// Identifies a [`ShareEntry`] record.
pub type ShareId = i64;
