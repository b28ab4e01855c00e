use crate::Vfs;
use crate::error::{ErrorKind, Result};
use crate::scan::ScanReport;
use async_stream::stream;
use exn::ResultExt;
use futures::Stream;
use std::collections::BTreeSet;
use strata_meta::UserId;

/// Progress events emitted by [`Vfs::scan_all`].
///
/// Events follow a strict ordering:
/// 1. [`Started`](Self::Started) exactly once.
/// 2. [`DiscoveryComplete`](Self::DiscoveryComplete) exactly once, with the
///    number of users found.
/// 3. [`Scanned`](Self::Scanned) once per user that was reconciled.
/// 4. [`Complete`](Self::Complete) exactly once.
///
/// A user that fails is reported as an `Err` item in place of its
/// [`Scanned`](Self::Scanned) event and the stream carries on. Only a failure
/// to discover users ends the stream early.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    Started,
    DiscoveryComplete(u64),
    Scanned { user: UserId, report: ScanReport },
    Complete,
}

impl Vfs {
    /// Reconcile every known user, one after another.
    ///
    /// Known users are everybody with metadata plus every numeric top-level
    /// directory in the backend.
    pub fn scan_all(&self) -> impl Stream<Item = Result<ScanEvent>> + '_ {
        // `rustfmt` does not format macros that use braces. Wrap in parentheses!
        stream!({
            yield Ok(ScanEvent::Started);
            let users = match self.known_users().await {
                Ok(users) => users,
                Err(e) => {
                    yield Err(e);
                    return;
                },
            };
            // Infallible: a usize (either 32- or 64-bit) will always fit in a u64.
            yield Ok(ScanEvent::DiscoveryComplete(u64::try_from(users.len()).unwrap_or(0)));
            for user in users {
                yield match self.scan_user(user).await {
                    Ok(report) => Ok(ScanEvent::Scanned { user, report }),
                    Err(e) => {
                        tracing::warn!(owner = user, error = ?e, "Scan failed");
                        Err(e)
                    },
                };
            }
            yield Ok(ScanEvent::Complete);
        })
    }

    async fn known_users(&self) -> Result<BTreeSet<UserId>> {
        let mut users: BTreeSet<UserId> =
            self.repo.list_owner_ids().await.or_raise(|| ErrorKind::Metadata)?.into_iter().collect();
        for entry in self.backend.list_dir(None).await.or_raise(|| ErrorKind::Filesystem)? {
            if !entry.is_dir {
                continue;
            }
            match entry.name().parse::<UserId>() {
                Ok(user) => {
                    users.insert(user);
                },
                Err(_) => tracing::debug!(name = entry.name(), "Ignoring non-user directory in storage root"),
            }
        }
        Ok(users)
    }
}
