//! Path validation.
//!
//! Every path that reaches a backend goes through [`validate`]. The rules are
//! deliberately strict: traversal is rejected outright rather than resolved,
//! so a path either names something under the storage root as written or it
//! is refused with [`InvalidPath`](crate::error::ErrorKind::InvalidPath).

use std::path::{Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Characters that are not allowed anywhere in a path.
pub const FORBIDDEN_CHARACTERS: [char; 7] = ['<', '>', ':', '"', '|', '?', '*'];

/// Syntax check without normalization.
///
/// Rejects `..` segments (with either separator), the `~` home sigil, null
/// bytes and any of [`FORBIDDEN_CHARACTERS`]. Empty and root-only inputs pass;
/// whether those are meaningful is up to the caller.
///
/// # Examples
///
/// ```
/// use strata_storage::path::check;
/// assert!(check("docs/report.txt").is_ok());
/// assert!(check("docs\\mixed/separators.txt").is_ok());
/// assert!(check("/").is_ok());
/// assert!(check("docs/../etc").is_err());
/// assert!(check("~/secret").is_err());
/// assert!(check("what?.txt").is_err());
/// ```
pub fn check(path: &str) -> Result<()> {
    let rejected = path.contains('\0')
        || path.contains('~')
        || path.contains(FORBIDDEN_CHARACTERS)
        || path.split(['/', '\\']).any(|segment| segment == "..");
    if rejected {
        exn::bail!(ErrorKind::InvalidPath(PathBuf::from(path)));
    }
    Ok(())
}

/// Validates a storage path and returns it normalized.
///
/// Backslashes are accepted as separators, empty and `.` segments are dropped
/// and leading or trailing slashes are stripped. A path that normalizes to
/// nothing (the storage root) is invalid here; backends that can address the
/// root take an `Option<&Path>` instead.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use strata_storage::validate_path;
/// assert_eq!(validate_path("1//docs/./report.txt").unwrap(), Path::new("1/docs/report.txt"));
/// assert_eq!(validate_path("1\\docs\\report.txt").unwrap(), Path::new("1/docs/report.txt"));
/// assert!(validate_path("1/docs/../../2").is_err());
/// assert!(validate_path("./").is_err());
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let raw = path.as_ref();
    let Some(text) = raw.to_str() else {
        exn::bail!(ErrorKind::InvalidPath(raw.to_path_buf()));
    };
    check(text)?;
    let normalized: PathBuf = text.split(['/', '\\']).filter(|segment| !segment.is_empty() && *segment != ".").collect();
    if normalized.as_os_str().is_empty() {
        exn::bail!(ErrorKind::InvalidPath(raw.to_path_buf()));
    }
    Ok(normalized)
}
