//! Storage models.

use std::path::{Path, PathBuf};
use time::UtcDateTime;

/// What a backend knows about one file or directory.
///
/// Timestamps are whole seconds so that they compare equal to what the
/// metadata store keeps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Relative path from storage root
    pub path: PathBuf,
    pub is_dir: bool,
    /// File size in bytes; zero for directories
    pub size: u64,
    /// Last modified timestamp
    pub modified: UtcDateTime,
}
impl Entry {
    pub fn file(path: impl Into<PathBuf>, size: u64, modified: UtcDateTime) -> Self {
        Self {
            path: path.into(),
            is_dir: false,
            size,
            modified,
        }
    }

    pub fn dir(path: impl Into<PathBuf>, modified: UtcDateTime) -> Self {
        Self {
            path: path.into(),
            is_dir: true,
            size: 0,
            modified,
        }
    }

    /// Final path component, or an empty string for a path without one.
    pub fn name(&self) -> &str {
        self.path.file_name().and_then(|name| name.to_str()).unwrap_or_default()
    }

    pub fn is_under(&self, parent: &Path) -> bool {
        self.path.parent() == Some(parent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_is_last_component() {
        let entry = Entry::file("1/docs/report.txt", 5, UtcDateTime::now());
        assert_eq!(entry.name(), "report.txt");
        assert!(entry.is_under(Path::new("1/docs")));
        assert!(!entry.is_under(Path::new("1")));
    }

    #[test]
    fn test_dir_has_no_size() {
        let entry = Entry::dir("1/docs", UtcDateTime::now());
        assert!(entry.is_dir);
        assert_eq!(entry.size, 0);
    }
}
