use crate::{LogicalPath, Vfs};
use std::sync::Arc;
use strata_meta::{Database, FileInfo, Repository, UserId};
use strata_storage::BackendHandle;
use strata_storage::backend::MockBackend;

/// An engine over an empty in-memory backend and database.
pub(crate) struct Fixture {
    pub vfs: Vfs,
    pub backend: Arc<MockBackend>,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_backend(MockBackend::default()).await
    }

    pub async fn with_backend(backend: MockBackend) -> Self {
        let db = Database::connect_in_memory().await.unwrap();
        let backend = Arc::new(backend);
        let handle: BackendHandle = backend.clone();
        let vfs = Vfs::new(handle, Repository::from(&db));
        Self { vfs, backend }
    }

    pub async fn mkdir(&self, user: UserId, path: &str) -> FileInfo {
        self.vfs.ensure_user_folders(user).await.unwrap();
        let path = LogicalPath::parse(path).unwrap();
        for (ancestor, _) in path.ancestors().into_iter().rev() {
            if self.vfs.resolve(user, &ancestor).await.is_err() {
                self.vfs.create_dir(user, &ancestor.to_string()).await.unwrap();
            }
        }
        self.vfs.create_dir(user, &path.to_string()).await.unwrap()
    }

    /// Write a file, creating missing directories on the way.
    pub async fn write(&self, user: UserId, path: &str, data: &[u8]) -> FileInfo {
        let logical = LogicalPath::parse(path).unwrap();
        let parent = logical.parent_path();
        match parent.is_root() {
            true => {
                self.vfs.ensure_user_folders(user).await.unwrap();
            },
            false => {
                if self.vfs.resolve(user, &parent).await.is_err() {
                    self.mkdir(user, &parent.to_string()).await;
                }
            },
        }
        self.vfs.write_file(user, path, data).await.unwrap()
    }

    pub async fn resolve(&self, user: UserId, path: &str) -> FileInfo {
        self.vfs.resolve(user, &LogicalPath::parse(path).unwrap()).await.unwrap()
    }

    pub async fn exists(&self, user: UserId, path: &str) -> bool {
        match self.vfs.resolve(user, &LogicalPath::parse(path).unwrap()).await {
            Ok(_) => true,
            Err(err) if err.is_not_found() => false,
            Err(err) => panic!("{err:?}"),
        }
    }
}
