//! Physical storage for strata.
//!
//! Everything in here is scoped under a single base directory and addressed
//! by paths relative to it. The crate knows nothing about users, metadata or
//! shares; it moves bytes around and reports what is on disk.

mod archive;
pub mod backend;
pub mod error;
mod models;
pub mod path;

pub use crate::backend::StorageBackend;
pub use crate::models::Entry;
pub use crate::path::validate as validate_path;
use std::sync::Arc;

pub type BackendHandle = Arc<dyn StorageBackend + Send + Sync>;
