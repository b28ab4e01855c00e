//! The strata engine.
//!
//! Keeps the metadata tree of every owner in step with their physical tree
//! and layers sharing on top of it without copying bytes. A share is a
//! [`ShareEntry`](strata_meta::ShareEntry) plus a *shadow*: a metadata-only
//! record in the grantee's root that stands for the granter's original.
//! Every path a caller passes in is resolved through shadows, so a grantee
//! can read, list, export and write inside what was shared with them.
//!
//! The entry point is [`Vfs`], built explicitly from a storage backend and a
//! metadata repository and shared by reference between request handlers and
//! background tasks.

pub mod error;
mod lock;
mod maintenance;
mod mime;
mod ops;
pub mod path;
mod resolve;
pub mod scan;
mod share;
#[cfg(test)]
mod test_utils;

pub use crate::ops::{FileUpdate, PathInfo};
pub use crate::path::LogicalPath;
pub use crate::resolve::ShareTarget;
pub use crate::scan::{ScanEvent, ScanReport};
pub use crate::share::{ShareFailure, ShareOutcome};
use crate::lock::OwnerLocks;
use strata_meta::Repository;
use strata_storage::BackendHandle;

/// Deepest directory nesting any tree walk will follow.
pub const MAX_DEPTH: usize = 128;
/// Default name of the per-user temp area.
pub const DEFAULT_TMP_FOLDER: &str = ".tmp";

/// The engine: one physical store, one metadata store and the per-owner
/// locks that serialize changes to each tree.
pub struct Vfs {
    backend: BackendHandle,
    repo: Repository,
    tmp_folder: String,
    locks: OwnerLocks,
}

impl Vfs {
    pub fn new(backend: BackendHandle, repo: Repository) -> Self {
        Self {
            backend,
            repo,
            tmp_folder: DEFAULT_TMP_FOLDER.to_string(),
            locks: OwnerLocks::default(),
        }
    }

    /// Use a different name for each user's temp area. The name must already
    /// be a valid single path segment.
    pub fn with_tmp_folder(mut self, name: impl Into<String>) -> Self {
        self.tmp_folder = name.into();
        self
    }

    pub fn tmp_folder(&self) -> &str {
        &self.tmp_folder
    }

    pub fn backend(&self) -> &BackendHandle {
        &self.backend
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }
}
