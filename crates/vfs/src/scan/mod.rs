//! Reconciliation of metadata with the physical tree.
//!
//! The physical tree is the source of truth for what exists, how big it is
//! and when it changed. Shares and stars only exist in metadata, so shadows
//! are never removed by a scan and stars survive on records that still exist.

mod dir;
mod stream;

pub use self::dir::ScanReport;
pub use self::stream::ScanEvent;
