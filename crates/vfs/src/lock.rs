use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use strata_meta::UserId;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async mutex per owner; mutations and scans of the same tree queue up.
#[derive(Debug, Default, Clone)]
pub(crate) struct OwnerLocks {
    locks: Arc<Mutex<HashMap<UserId, Arc<AsyncMutex<()>>>>>,
}

/// Held locks, released on drop.
pub(crate) struct OwnerGuard {
    owners: BTreeSet<UserId>,
    _guards: Vec<OwnedMutexGuard<()>>,
}
impl OwnerGuard {
    /// Are all of `owners` locked by this guard?
    pub(crate) fn covers(&self, owners: impl IntoIterator<Item = UserId>) -> bool {
        owners.into_iter().all(|owner| self.owners.contains(&owner))
    }
}

impl OwnerLocks {
    fn handle(&self, owner: UserId) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(owner).or_default())
    }

    /// Lock every owner in `owners`, in ascending id order so that two
    /// operations over the same owners never wait on each other crosswise.
    pub(crate) async fn lock(&self, owners: impl IntoIterator<Item = UserId>) -> OwnerGuard {
        let owners: BTreeSet<UserId> = owners.into_iter().collect();
        let mut guards = Vec::with_capacity(owners.len());
        for &owner in &owners {
            guards.push(self.handle(owner).lock_owned().await);
        }
        OwnerGuard { owners, _guards: guards }
    }
}
