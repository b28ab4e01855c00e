//! Engine Error Types
//!
//! Uses [`exn`] for automatic location tracking and error tree construction.
//! Failures from the storage and metadata crates are kept as children of a
//! [`Filesystem`](ErrorKind::Filesystem) or [`Metadata`](ErrorKind::Metadata)
//! frame, so the top-level message never carries a physical path.

use derive_more::{Display, Error};
use strata_meta::{ShareId, UserId};

/// An engine error with automatic location tracking via [`exn::Exn`].
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// What went wrong, in terms a caller can act on.
///
/// ### Caller Errors
/// - [`ErrorKind::PathNotValid`]
/// - [`ErrorKind::FileNotExists`]
/// - [`ErrorKind::AlreadyExists`]
/// - [`ErrorKind::NotADirectory`]
/// - [`ErrorKind::SharedIntoShared`]
/// - [`ErrorKind::ReShareForbidden`]
/// - [`ErrorKind::TooDeep`]
/// - [`ErrorKind::Contended`]
///
/// ### Internal Errors
/// - [`ErrorKind::Filesystem`]
/// - [`ErrorKind::Metadata`]
/// - [`ErrorKind::Inconsistent`]
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Rejected by path validation before any I/O happened.
    #[display("path is not valid: {_0}")]
    PathNotValid(#[error(not(source))] String),
    /// Nothing at this path, directly or through a share.
    #[display("no such file or directory: {_0}")]
    FileNotExists(#[error(not(source))] String),
    #[display("already exists: {_0}")]
    AlreadyExists(#[error(not(source))] String),
    #[display("not a directory: {_0}")]
    NotADirectory(#[error(not(source))] String),
    #[display("shared content cannot be placed in a shared directory")]
    SharedIntoShared,
    #[display("content shared with you cannot be shared again")]
    ReShareForbidden,
    /// The physical store failed.
    #[display("storage failure")]
    Filesystem,
    /// The metadata store failed.
    #[display("metadata failure")]
    Metadata,
    /// A share shadow points at a share granted to somebody else.
    #[display("share {share_id} was not granted to user {user_id}")]
    Inconsistent { share_id: ShareId, user_id: UserId },
    /// A tree walk went deeper than the engine allows.
    #[display("directory tree is too deep")]
    TooDeep,
    /// The paths involved kept moving between owners while waiting for
    /// their locks. Trying again later is fine.
    #[display("files changed while the operation was waiting; try again")]
    Contended,
}

impl ErrorKind {
    /// Safe to report as "does not exist" (a 404, not a 500).
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::FileNotExists(_))
    }

    /// The message can be shown to the user as-is. Everything else should be
    /// reported generically and logged.
    pub fn is_user_facing(&self) -> bool {
        !matches!(self, Self::Filesystem | Self::Metadata | Self::Inconsistent { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_messages_hide_paths() {
        assert_eq!(ErrorKind::Filesystem.to_string(), "storage failure");
        assert!(!ErrorKind::Filesystem.is_user_facing());
        assert!(!ErrorKind::Inconsistent { share_id: 1, user_id: 2 }.is_user_facing());
        assert!(ErrorKind::FileNotExists("/a".to_string()).is_not_found());
        assert!(ErrorKind::SharedIntoShared.is_user_facing());
    }
}
