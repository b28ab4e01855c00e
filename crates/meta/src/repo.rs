//! Repository for FileInfo records and the shares between users.
//!
//! They're tightly coupled: a share points at a file, a shadow points at a
//! share. Anything that deletes one of them in bulk has to take the others
//! along in the same transaction, so those operations live together here.

use crate::Database;
use crate::error::{ErrorKind, Result};
use crate::models::{FileId, FileInfo, FileRow, ShareEntry, ShareId, ShareRow, UserId};
use exn::ResultExt;
use sqlx::{Sqlite, SqlitePool, Transaction};
use time::UtcDateTime;

/// Maximum number of rows a single search returns.
const SEARCH_LIMIT: i64 = 500;

/// What a [`Repository::delete_many`] or [`Repository::delete_owner`] removed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PurgeReport {
    pub files: u64,
    pub shares: u64,
    pub shadows: u64,
}

/// Repository for managing FileInfo and ShareEntry records.
///
/// # Relationships
///
/// - Every non-root file has a parent directory in the same owner's tree
/// - A share references one original file and one grantee
/// - A shadow is a file in the grantee's tree that references one share
/// - Deleting an original deletes its shares, which deletes their shadows
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}
impl From<&Database> for Repository {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }
}
impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn escape_like(term: &str) -> String {
        term.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
    }

    async fn begin(&self) -> Result<Transaction<'_, Sqlite>> {
        self.pool.begin().await.or_raise(|| ErrorKind::Database)
    }

    // =========================================================================
    // Insert/Update
    // =========================================================================

    /// Insert a record and return it with its assigned id. The id of `file`
    /// is ignored.
    pub async fn insert(&self, file: &FileInfo) -> Result<FileInfo> {
        let row = FileRow::try_from(file)?;
        let row: FileRow = sqlx::query_as(include_str!("../queries/insert_file.sql"))
            .bind(row.owner_id)
            .bind(row.path)
            .bind(row.name)
            .bind(row.parent_id)
            .bind(row.is_dir)
            .bind(row.size)
            .bind(row.last_changed)
            .bind(row.mime_type)
            .bind(row.share_id)
            .bind(row.starred)
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.try_into()
    }

    /// Overwrite every column of an existing record.
    pub async fn update(&self, file: &FileInfo) -> Result<()> {
        let mut tx = self.begin().await?;
        Self::update_in(&mut tx, file).await?;
        tx.commit().await.or_raise(|| ErrorKind::Database)
    }

    /// Overwrite several records atomically; used by cascading moves.
    pub async fn update_many(&self, files: &[FileInfo]) -> Result<()> {
        let mut tx = self.begin().await?;
        for file in files {
            Self::update_in(&mut tx, file).await?;
        }
        tx.commit().await.or_raise(|| ErrorKind::Database)
    }

    async fn update_in(tx: &mut Transaction<'_, Sqlite>, file: &FileInfo) -> Result<()> {
        let row = FileRow::try_from(file)?;
        let result = sqlx::query(include_str!("../queries/update_file.sql"))
            .bind(row.owner_id)
            .bind(row.path)
            .bind(row.name)
            .bind(row.parent_id)
            .bind(row.is_dir)
            .bind(row.size)
            .bind(row.last_changed)
            .bind(row.mime_type)
            .bind(row.share_id)
            .bind(row.starred)
            .bind(row.id)
            .execute(&mut **tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        if result.rows_affected() == 0 {
            exn::bail!(ErrorKind::NotFound(file.id));
        }
        Ok(())
    }

    // =========================================================================
    // Get/Fetch
    // =========================================================================

    pub async fn get(&self, id: FileId) -> Result<Option<FileInfo>> {
        let row: Option<FileRow> = sqlx::query_as(include_str!("../queries/get_file.sql"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(FileInfo::try_from).transpose()
    }

    /// Look up the record at `(owner, path, name)`; `path` is the
    /// slash-terminated parent directory.
    pub async fn get_by_path(&self, owner: UserId, path: &str, name: &str) -> Result<Option<FileInfo>> {
        let row: Option<FileRow> = sqlx::query_as(include_str!("../queries/get_file_by_path.sql"))
            .bind(owner)
            .bind(path)
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(FileInfo::try_from).transpose()
    }

    /// Direct children of a directory, directories first, then by name.
    pub async fn list_children(&self, parent: FileId) -> Result<Vec<FileInfo>> {
        let rows: Vec<FileRow> = sqlx::query_as(include_str!("../queries/list_children.sql"))
            .bind(parent)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(FileInfo::try_from).collect()
    }

    /// Sum of the sizes of a directory's direct children, shadows excluded.
    pub async fn sum_child_sizes(&self, parent: FileId) -> Result<u64> {
        let total: i64 = sqlx::query_scalar(include_str!("../queries/sum_child_sizes.sql"))
            .bind(parent)
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        u64::try_from(total).or_raise(|| ErrorKind::InvalidData("directory size"))
    }

    // =========================================================================
    // Listing
    // =========================================================================

    /// Records in `owner`'s tree below `path_prefix` whose name contains
    /// `term`, case-insensitively.
    pub async fn search(&self, owner: UserId, path_prefix: &str, term: &str) -> Result<Vec<FileInfo>> {
        let rows: Vec<FileRow> = sqlx::query_as(include_str!("../queries/search_files.sql"))
            .bind(owner)
            .bind(format!("{}%", Self::escape_like(path_prefix)))
            .bind(format!("%{}%", Self::escape_like(term)))
            .bind(SEARCH_LIMIT)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(FileInfo::try_from).collect()
    }

    pub async fn list_starred(&self, owner: UserId) -> Result<Vec<FileInfo>> {
        let rows: Vec<FileRow> = sqlx::query_as(include_str!("../queries/list_starred.sql"))
            .bind(owner)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(FileInfo::try_from).collect()
    }

    /// Share shadows living in `owner`'s tree, i.e. everything shared with them.
    pub async fn list_shadows(&self, owner: UserId) -> Result<Vec<FileInfo>> {
        let rows: Vec<FileRow> = sqlx::query_as(include_str!("../queries/list_shadows.sql"))
            .bind(owner)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(FileInfo::try_from).collect()
    }

    /// Every user that owns at least one record.
    pub async fn list_owner_ids(&self) -> Result<Vec<UserId>> {
        sqlx::query_scalar(include_str!("../queries/list_owner_ids.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Delete a single record, its shares and their shadows.
    pub async fn delete(&self, id: FileId) -> Result<PurgeReport> {
        self.delete_many(&[id]).await
    }

    /// Delete records together with every share that points at them and
    /// every shadow of those shares, in one transaction. Shadows among `ids`
    /// take their own share with them.
    ///
    /// Callers pass whole subtrees; leaving a child behind violates the
    /// parent constraint and the transaction is rolled back.
    pub async fn delete_many(&self, ids: &[FileId]) -> Result<PurgeReport> {
        let mut report = PurgeReport::default();
        if ids.is_empty() {
            return Ok(report);
        }
        let mut tx = self.begin().await?;
        for id in ids {
            report.shares += sqlx::query(include_str!("../queries/delete_share_of_shadow.sql"))
                .bind(id)
                .execute(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?
                .rows_affected();
            report.shadows += sqlx::query(include_str!("../queries/delete_shadows_for_file.sql"))
                .bind(id)
                .execute(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?
                .rows_affected();
            report.shares += sqlx::query(include_str!("../queries/delete_shares_for_file.sql"))
                .bind(id)
                .execute(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?
                .rows_affected();
            report.files += sqlx::query(include_str!("../queries/delete_file.sql"))
                .bind(id)
                .execute(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?
                .rows_affected();
        }
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(report)
    }

    /// Remove everything a user owns, everything shared by or with them and
    /// the shadows that referenced it.
    pub async fn delete_owner(&self, owner: UserId) -> Result<PurgeReport> {
        let mut tx = self.begin().await?;
        let shadows = sqlx::query(include_str!("../queries/delete_owner_shadows.sql"))
            .bind(owner)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?
            .rows_affected();
        let shares = sqlx::query(include_str!("../queries/delete_owner_shares.sql"))
            .bind(owner)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?
            .rows_affected();
        let files = sqlx::query(include_str!("../queries/delete_owner_files.sql"))
            .bind(owner)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?
            .rows_affected();
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(PurgeReport { files, shares, shadows })
    }

    // =========================================================================
    // Shares
    // =========================================================================

    /// Grant `shared_with` access to `file`, which `owner` owns.
    pub async fn insert_share(&self, owner: UserId, file: FileId, shared_with: UserId) -> Result<ShareEntry> {
        let row: ShareRow = sqlx::query_as(include_str!("../queries/insert_share.sql"))
            .bind(owner)
            .bind(file)
            .bind(shared_with)
            .bind(UtcDateTime::now().unix_timestamp())
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.try_into()
    }

    /// Create a share and the shadow that represents it in the grantee's
    /// tree in one transaction. The shadow's `share_id` is filled in here.
    pub async fn insert_share_with_shadow(&self, owner: UserId, file: FileId, shadow: &FileInfo) -> Result<(ShareEntry, FileInfo)> {
        let mut tx = self.begin().await?;
        let share: ShareEntry = sqlx::query_as::<_, ShareRow>(include_str!("../queries/insert_share.sql"))
            .bind(owner)
            .bind(file)
            .bind(shadow.owner_id)
            .bind(UtcDateTime::now().unix_timestamp())
            .fetch_one(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?
            .try_into()?;
        let row = FileRow::try_from(&FileInfo { share_id: Some(share.id), ..shadow.clone() })?;
        let row: FileRow = sqlx::query_as(include_str!("../queries/insert_file.sql"))
            .bind(row.owner_id)
            .bind(row.path)
            .bind(row.name)
            .bind(row.parent_id)
            .bind(row.is_dir)
            .bind(row.size)
            .bind(row.last_changed)
            .bind(row.mime_type)
            .bind(row.share_id)
            .bind(row.starred)
            .fetch_one(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok((share, row.try_into()?))
    }

    pub async fn get_share(&self, id: ShareId) -> Result<Option<ShareEntry>> {
        let row: Option<ShareRow> = sqlx::query_as(include_str!("../queries/get_share.sql"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(ShareEntry::try_from).transpose()
    }

    pub async fn list_shares_for_file(&self, file: FileId) -> Result<Vec<ShareEntry>> {
        let rows: Vec<ShareRow> = sqlx::query_as(include_str!("../queries/list_shares_for_file.sql"))
            .bind(file)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(ShareEntry::try_from).collect()
    }

    /// Everything `owner` has shared with anyone.
    pub async fn list_shares_by_owner(&self, owner: UserId) -> Result<Vec<ShareEntry>> {
        let rows: Vec<ShareRow> = sqlx::query_as(include_str!("../queries/list_shares_by_owner.sql"))
            .bind(owner)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(ShareEntry::try_from).collect()
    }

    /// Delete a share and its shadow. Returns `false` if the share did not exist.
    pub async fn delete_share(&self, id: ShareId) -> Result<bool> {
        let mut tx = self.begin().await?;
        sqlx::query(include_str!("../queries/delete_shadows_for_share.sql"))
            .bind(id)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let deleted = sqlx::query(include_str!("../queries/delete_share.sql"))
            .bind(id)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?
            .rows_affected();
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    async fn repo() -> Repository {
        let db = Database::connect_in_memory().await.unwrap();
        Repository::from(&db)
    }

    async fn root(repo: &Repository, owner: UserId) -> FileInfo {
        repo.insert(&FileInfo::new(owner, "/", "", true)).await.unwrap()
    }

    async fn child(repo: &Repository, parent: &FileInfo, name: &str, is_dir: bool, size: u64) -> FileInfo {
        let file = FileInfo {
            parent_id: Some(parent.id),
            size,
            ..FileInfo::new(parent.owner_id, parent.dir_key(), name, is_dir)
        };
        repo.insert(&file).await.unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let repo = repo().await;
        let root = root(&repo, 1).await;
        let docs = child(&repo, &root, "docs", true, 0).await;
        let report = child(&repo, &docs, "report.txt", false, 5).await;
        assert!(report.id > docs.id);
        let found = repo.get_by_path(1, "/docs/", "report.txt").await.unwrap().unwrap();
        assert_eq!(found, report);
        assert_eq!(repo.get(report.id).await.unwrap(), Some(report));
        assert!(repo.get_by_path(2, "/docs/", "report.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unique_location() {
        let repo = repo().await;
        let root = root(&repo, 1).await;
        child(&repo, &root, "docs", true, 0).await;
        let duplicate = FileInfo {
            parent_id: Some(root.id),
            ..FileInfo::new(1, "/", "docs", true)
        };
        let err = repo.insert(&duplicate).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Database));
    }

    #[tokio::test]
    async fn test_update_missing_record() {
        let repo = repo().await;
        let mut ghost = FileInfo::new(1, "/", "", true);
        ghost.id = 42;
        let err = repo.update(&ghost).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(42)));
    }

    #[tokio::test]
    async fn test_children_and_sizes_skip_shadows() {
        let repo = repo().await;
        let alice = root(&repo, 1).await;
        let bob = root(&repo, 2).await;
        let original = child(&repo, &alice, "big.bin", false, 100).await;
        child(&repo, &bob, "own.txt", false, 7).await;
        let share = repo.insert_share(1, original.id, 2).await.unwrap();
        let shadow = FileInfo {
            parent_id: Some(bob.id),
            size: 100,
            share_id: Some(share.id),
            ..FileInfo::new(2, "/", "big.bin", false)
        };
        repo.insert(&shadow).await.unwrap();
        assert_eq!(repo.list_children(bob.id).await.unwrap().len(), 2);
        assert_eq!(repo.sum_child_sizes(bob.id).await.unwrap(), 7);
        assert_eq!(repo.list_shadows(2).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_many_takes_shares_and_shadows() {
        let repo = repo().await;
        let alice = root(&repo, 1).await;
        let bob = root(&repo, 2).await;
        let docs = child(&repo, &alice, "docs", true, 0).await;
        let report = child(&repo, &docs, "report.txt", false, 5).await;
        let share = repo.insert_share(1, docs.id, 2).await.unwrap();
        let shadow = FileInfo {
            parent_id: Some(bob.id),
            share_id: Some(share.id),
            ..FileInfo::new(2, "/", "docs", true)
        };
        let shadow = repo.insert(&shadow).await.unwrap();

        let purged = repo.delete_many(&[report.id, docs.id]).await.unwrap();
        assert_eq!(purged, PurgeReport { files: 2, shares: 1, shadows: 1 });
        assert!(repo.get(shadow.id).await.unwrap().is_none());
        assert!(repo.get_share(share.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_many_rejects_orphans() {
        let repo = repo().await;
        let alice = root(&repo, 1).await;
        let docs = child(&repo, &alice, "docs", true, 0).await;
        let report = child(&repo, &docs, "report.txt", false, 5).await;
        // Leaving the child behind fails the deferred parent constraint.
        assert!(repo.delete_many(&[docs.id]).await.is_err());
        assert!(repo.get(report.id).await.unwrap().is_some());
    }

    #[rstest]
    #[case("report", "report")]
    #[case("100%", "100\\%")]
    #[case("a_b", "a\\_b")]
    #[case("c:\\temp", "c:\\\\temp")]
    #[case("%_\\", "\\%\\_\\\\")]
    fn test_escape_like(#[case] term: &str, #[case] expected: &str) {
        assert_eq!(Repository::escape_like(term), expected);
    }

    #[tokio::test]
    #[rstest]
    #[case(1, "/", "report", 2)]
    #[case(1, "/docs/", "REPORT", 1)]
    #[case(1, "/", "txt", 3)]
    // LIKE wildcards in the term are literal
    #[case(1, "/", "%", 1)]
    #[case(1, "/", "_", 1)]
    #[case(1, "/", "d_ne", 0)]
    #[case(2, "/", "report", 0)]
    async fn test_search_is_scoped_and_case_insensitive(
        #[case] owner: UserId,
        #[case] prefix: &str,
        #[case] term: &str,
        #[case] expected: usize,
    ) {
        let repo = repo().await;
        let root = root(&repo, 1).await;
        let docs = child(&repo, &root, "docs", true, 0).await;
        child(&repo, &docs, "Report.txt", false, 1).await;
        child(&repo, &root, "report-draft.txt", false, 1).await;
        child(&repo, &root, "100%_done.txt", false, 1).await;
        assert_eq!(repo.search(owner, prefix, term).await.unwrap().len(), expected);
    }

    #[tokio::test]
    async fn test_starred_and_owners() {
        let repo = repo().await;
        let root_a = root(&repo, 1).await;
        root(&repo, 3).await;
        let mut file = child(&repo, &root_a, "fav.txt", false, 1).await;
        file.starred = true;
        repo.update(&file).await.unwrap();
        assert_eq!(repo.list_starred(1).await.unwrap(), vec![file]);
        assert_eq!(repo.list_owner_ids().await.unwrap(), vec![1, 3]);
    }

    #[tokio::test]
    async fn test_delete_share_removes_shadow() {
        let repo = repo().await;
        let alice = root(&repo, 1).await;
        let bob = root(&repo, 2).await;
        let file = child(&repo, &alice, "f.txt", false, 3).await;
        let share = repo.insert_share(1, file.id, 2).await.unwrap();
        let shadow = FileInfo {
            parent_id: Some(bob.id),
            share_id: Some(share.id),
            ..FileInfo::new(2, "/", "f.txt", false)
        };
        repo.insert(&shadow).await.unwrap();
        assert_eq!(repo.list_shares_for_file(file.id).await.unwrap(), vec![share.clone()]);
        assert_eq!(repo.list_shares_by_owner(1).await.unwrap().len(), 1);
        assert!(repo.delete_share(share.id).await.unwrap());
        assert!(repo.list_shadows(2).await.unwrap().is_empty());
        assert!(!repo.delete_share(share.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_share_with_shadow() {
        let repo = repo().await;
        let alice = root(&repo, 1).await;
        let bob = root(&repo, 2).await;
        let file = child(&repo, &alice, "f.txt", false, 3).await;
        let template = FileInfo {
            parent_id: Some(bob.id),
            size: 3,
            ..FileInfo::new(2, "/", "f.txt", false)
        };
        let (share, shadow) = repo.insert_share_with_shadow(1, file.id, &template).await.unwrap();
        assert_eq!((share.owner_id, share.file_id, share.shared_with_id), (1, file.id, 2));
        assert_eq!(shadow.share_id, Some(share.id));
        // Deleting the shadow directly takes the share along
        let report = repo.delete(shadow.id).await.unwrap();
        assert_eq!(report, PurgeReport { files: 1, shares: 1, shadows: 0 });
        assert!(repo.get_share(share.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_owner() {
        let repo = repo().await;
        let alice = root(&repo, 1).await;
        let bob = root(&repo, 2).await;
        let file = child(&repo, &alice, "f.txt", false, 3).await;
        let share = repo.insert_share(1, file.id, 2).await.unwrap();
        let shadow = FileInfo {
            parent_id: Some(bob.id),
            share_id: Some(share.id),
            ..FileInfo::new(2, "/", "f.txt", false)
        };
        repo.insert(&shadow).await.unwrap();
        let report = repo.delete_owner(1).await.unwrap();
        assert_eq!(report, PurgeReport { files: 2, shares: 1, shadows: 1 });
        assert_eq!(repo.list_owner_ids().await.unwrap(), vec![2]);
        assert_eq!(repo.list_children(bob.id).await.unwrap().len(), 0);
    }
}
