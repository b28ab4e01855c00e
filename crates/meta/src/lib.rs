//! SQLite metadata store for strata.
//!
//! Holds the queryable record tree for every owner (one [`FileInfo`] per file
//! or directory) plus the [`ShareEntry`] grants between users. There is no
//! business logic in here: the engine decides *what* to write, this crate
//! only knows *how*. The physical tree stays the source of truth for
//! everything except shares and stars; a reconciliation scan can rebuild the
//! rest.

mod db;
pub mod error;
mod models;
mod repo;

pub use crate::db::Database;
pub use crate::models::{FileId, FileInfo, ShareEntry, ShareId, UserId};
pub use crate::repo::{PurgeReport, Repository};
