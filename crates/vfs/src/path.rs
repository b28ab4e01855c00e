//! Logical paths and where they live on disk.
//!
//! A logical path is what a user sees: `/docs/report.txt`, relative to their
//! own root. Metadata stores it split in two, the slash-terminated parent
//! directory (`/docs/`) and the leaf (`report.txt`); the root is `("/", "")`.
//! Physically every owner gets their own directory named after their id, so
//! `/docs/report.txt` for user 1 is `1/docs/report.txt` under the backend root.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::fmt;
use std::path::PathBuf;
use strata_meta::{FileInfo, UserId};

/// A validated, normalized logical path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogicalPath {
    parent: String,
    name: String,
}

impl LogicalPath {
    /// Validate and split a raw path.
    ///
    /// Backslashes count as separators; empty and `.` segments are dropped, so
    /// `""`, `"."` and `"/"` are all the root. Traversal, `~` and characters the
    /// physical store cannot hold are rejected rather than cleaned up.
    pub fn parse(raw: &str) -> Result<Self> {
        strata_storage::path::check(raw).or_raise(|| ErrorKind::PathNotValid(raw.to_string()))?;
        let segments: Vec<&str> = raw.split(['/', '\\']).filter(|s| !s.is_empty() && *s != ".").collect();
        Ok(Self::from_segments(&segments))
    }

    fn from_segments(segments: &[&str]) -> Self {
        match segments.split_last() {
            None => Self::root(),
            Some((name, [])) => Self { parent: "/".to_string(), name: name.to_string() },
            Some((name, parents)) => Self {
                parent: format!("/{}/", parents.join("/")),
                name: name.to_string(),
            },
        }
    }

    pub fn root() -> Self {
        Self { parent: "/".to_string(), name: String::new() }
    }

    /// The location of an existing record.
    pub fn of(file: &FileInfo) -> Self {
        Self { parent: file.path.clone(), name: file.name.clone() }
    }

    /// Parent directory key, always starting and ending with `/`.
    pub fn parent(&self) -> &str {
        &self.parent
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_root(&self) -> bool {
        self.name.is_empty()
    }

    /// Key that children of this path carry as their parent.
    pub fn dir_key(&self) -> String {
        dir_key(&self.parent, &self.name)
    }

    /// Path of the parent directory; the root is its own parent.
    pub fn parent_path(&self) -> Self {
        let segments = self.segments();
        match segments.split_last() {
            Some((_, parents)) => Self::from_segments(parents),
            None => Self::root(),
        }
    }

    /// A child of this path.
    pub fn join(&self, name: &str) -> Self {
        Self { parent: self.dir_key(), name: name.to_string() }
    }

    /// Non-empty segments from the root down.
    pub fn segments(&self) -> Vec<&str> {
        self.parent.split('/').chain(std::iter::once(self.name.as_str())).filter(|s| !s.is_empty()).collect()
    }

    /// Every proper ancestor below the root, closest first, together with the
    /// part of this path that lies beneath it.
    pub fn ancestors(&self) -> Vec<(Self, String)> {
        let segments = self.segments();
        (1..segments.len())
            .rev()
            .map(|split| (Self::from_segments(&segments[..split]), segments[split..].join("/")))
            .collect()
    }

    /// Where this path lives on disk for `owner`.
    pub fn physical(&self, owner: UserId) -> PathBuf {
        physical_path(owner, &self.parent, &self.name)
    }
}

impl fmt::Display for LogicalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.parent, self.name)
    }
}

/// Key that children of `(parent, name)` carry in their `path` column.
pub fn dir_key(parent: &str, name: &str) -> String {
    match name.is_empty() {
        true => parent.to_string(),
        false => format!("{parent}{name}/"),
    }
}

/// The isolated physical directory of one owner.
pub fn owner_prefix(owner: UserId) -> PathBuf {
    PathBuf::from(owner.to_string())
}

/// Physical location of `(parent, name)` in `owner`'s directory.
pub fn physical_path(owner: UserId, parent: &str, name: &str) -> PathBuf {
    let mut path = owner_prefix(owner);
    path.extend(parent.split('/').chain(std::iter::once(name)).filter(|s| !s.is_empty()));
    path
}

/// Physical location of a record.
pub fn physical_of(file: &FileInfo) -> PathBuf {
    physical_path(file.owner_id, &file.path, &file.name)
}
