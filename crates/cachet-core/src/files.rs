//! File lifecycle: create, read, soft-delete, restore, permanent delete,
//! versioning. Every change to a file's encrypted footprint runs the
//! accounting ledger inside the same transaction as the row change.

use std::sync::Arc;

use anyhow::anyhow;
use bytes::Bytes;
use tracing::{info, warn};
use uuid::Uuid;

use cachet_db::models::{FileRow, FileVersionRow};
use cachet_db::queries::files::{FileSort, SortDir};
use cachet_db::{Database, now_sql, queries};
use cachet_types::api::ClientInfo;

use crate::audit::{Audit, AuditEvent};
use crate::error::{ServiceError, ServiceResult};
use crate::ledger;
use crate::storage::{BlobStore, file_current_path, file_version_path};

pub struct NewFile {
    pub parent_folder_id: Option<Uuid>,
    pub filename_enc: Vec<u8>,
    pub filename_iv: Vec<u8>,
    pub content_key_envelope: String,
    /// Plaintext size as reported by the client; informational only.
    pub file_size: i64,
    pub mime_type: Option<String>,
    pub file_hash: Option<String>,
    /// Encrypted content — its length is the quota-relevant size.
    pub content: Bytes,
}

#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: 100,
            offset: 0,
        }
    }
}

pub struct StorageStats {
    pub storage_used: i64,
    pub storage_quota: i64,
    pub file_count: i64,
}

pub struct FileManager {
    db: Arc<Database>,
    blobs: Arc<BlobStore>,
    audit: Arc<Audit>,
}

impl FileManager {
    pub fn new(db: Arc<Database>, blobs: Arc<BlobStore>, audit: Arc<Audit>) -> Self {
        Self { db, blobs, audit }
    }

    fn record(
        &self,
        owner: Uuid,
        action: &str,
        resource_id: Option<&str>,
        result: Result<(), &ServiceError>,
        client: &ClientInfo,
    ) {
        self.audit.record(
            AuditEvent {
                user_id: Some(&owner.to_string()),
                action,
                resource_type: "file",
                resource_id,
                success: result.is_ok(),
                error: result.err().map(|e| e.to_string()).as_deref(),
            },
            client,
        );
    }

    fn validate_parent(&self, owner: &str, parent: Option<&str>) -> ServiceResult<()> {
        let Some(parent_id) = parent else {
            return Ok(());
        };
        let folder = self
            .db
            .with_conn(|conn| queries::folders::find_by_id_owner(conn, parent_id, owner))
            .map_err(ServiceError::Internal)?;
        match folder {
            Some(f) if !f.is_deleted => Ok(()),
            _ => Err(ServiceError::Validation(
                "parent folder does not exist".into(),
            )),
        }
    }

    // -- Create --

    pub async fn create(
        &self,
        owner: Uuid,
        new: NewFile,
        client: &ClientInfo,
    ) -> ServiceResult<FileRow> {
        let res = self.create_inner(owner, new).await;
        self.record(
            owner,
            "file.create",
            res.as_ref().ok().map(|f| f.id.as_str()),
            res.as_ref().map(|_| ()).map_err(|e| e),
            client,
        );
        res
    }

    async fn create_inner(&self, owner: Uuid, new: NewFile) -> ServiceResult<FileRow> {
        let encrypted_size = new.content.len() as i64;
        if encrypted_size == 0 {
            return Err(ServiceError::Validation("empty file content".into()));
        }

        let uid = owner.to_string();
        let parent = new.parent_folder_id.map(|p| p.to_string());
        self.validate_parent(&uid, parent.as_deref())?;

        // Advisory check before paying for the upload; the authoritative
        // check happens again inside the transaction.
        self.db
            .with_conn(|conn| ledger::precheck(conn, &uid, encrypted_size))?;

        let file_id = Uuid::new_v4().to_string();
        let storage_path = file_current_path(&uid, &file_id);
        self.blobs
            .put(&storage_path, &new.content)
            .await
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        let row = FileRow {
            id: file_id.clone(),
            user_id: uid.clone(),
            parent_folder_id: parent,
            filename_enc: new.filename_enc,
            filename_iv: new.filename_iv,
            content_key_envelope: new.content_key_envelope,
            file_size: new.file_size,
            encrypted_size,
            mime_type: new.mime_type,
            storage_path: storage_path.clone(),
            file_hash: new.file_hash,
            version: 1,
            is_deleted: false,
            deleted_at: None,
            created_at: String::new(),
            updated_at: String::new(),
        };

        let tx_result = self.db.with_tx(|tx| -> ServiceResult<()> {
            ledger::charge(tx, &uid, encrypted_size)?;
            queries::files::insert(tx, &row)?;
            Ok(())
        });

        if let Err(e) = tx_result {
            // The upload already happened; roll it back best-effort. The
            // caller gets the transaction error either way.
            if let Err(cleanup) = self.blobs.delete(&storage_path).await {
                warn!("Orphan blob cleanup failed for {}: {}", storage_path, cleanup);
            }
            return Err(e);
        }

        info!("File {} created ({} bytes encrypted)", file_id, encrypted_size);
        self.fetch_any(&file_id, &uid)
    }

    // -- Reads --

    /// Fetch regardless of deletion state, scoped to the owner.
    fn fetch_any(&self, file_id: &str, owner: &str) -> ServiceResult<FileRow> {
        self.db
            .with_conn(|conn| queries::files::find_by_id_owner(conn, file_id, owner))
            .map_err(ServiceError::Internal)?
            .ok_or_else(ServiceError::not_found)
    }

    /// Fetch a live file. Deleted and foreign files are both `NotFound`.
    pub fn get(&self, file_id: Uuid, owner: Uuid) -> ServiceResult<FileRow> {
        let row = self.fetch_any(&file_id.to_string(), &owner.to_string())?;
        if row.is_deleted {
            return Err(ServiceError::not_found());
        }
        Ok(row)
    }

    pub fn list(
        &self,
        owner: Uuid,
        parent_folder_id: Option<Uuid>,
        sort: FileSort,
        dir: SortDir,
        page: Page,
    ) -> ServiceResult<(Vec<FileRow>, i64)> {
        let uid = owner.to_string();
        let parent = parent_folder_id.map(|p| p.to_string());
        let limit = page.limit.min(500);
        self.db
            .with_conn(|conn| {
                let rows = queries::files::list(
                    conn,
                    &uid,
                    parent.as_deref(),
                    sort,
                    dir,
                    limit,
                    page.offset,
                )?;
                let total = queries::files::count(conn, &uid, parent.as_deref())?;
                Ok((rows, total))
            })
            .map_err(ServiceError::Internal)
    }

    pub fn list_trash(&self, owner: Uuid) -> ServiceResult<Vec<FileRow>> {
        self.db
            .with_conn(|conn| queries::files::list_deleted(conn, &owner.to_string()))
            .map_err(ServiceError::Internal)
    }

    pub async fn download(
        &self,
        file_id: Uuid,
        owner: Uuid,
    ) -> ServiceResult<(FileRow, tokio::fs::File)> {
        let row = self.get(file_id, owner)?;
        let blob = self
            .blobs
            .open(&row.storage_path)
            .await
            .map_err(|e| ServiceError::Storage(e.to_string()))?;
        Ok((row, blob))
    }

    pub fn find_by_hash(&self, owner: Uuid, hash: &str) -> ServiceResult<Option<FileRow>> {
        self.db
            .with_conn(|conn| queries::files::find_by_hash(conn, &owner.to_string(), hash))
            .map_err(ServiceError::Internal)
    }

    pub fn storage_stats(&self, owner: Uuid) -> ServiceResult<StorageStats> {
        let uid = owner.to_string();
        self.db
            .with_conn(|conn| -> anyhow::Result<StorageStats> {
                let (used, quota) = queries::users::storage_state(conn, &uid)?
                    .ok_or_else(|| anyhow!("user {} missing", uid))?;
                let file_count = queries::files::stats(conn, &uid)?;
                Ok(StorageStats {
                    storage_used: used,
                    storage_quota: quota,
                    file_count,
                })
            })
            .map_err(ServiceError::Internal)
    }

    // -- Metadata updates --

    pub fn rename(
        &self,
        file_id: Uuid,
        owner: Uuid,
        filename_enc: Vec<u8>,
        filename_iv: Vec<u8>,
        client: &ClientInfo,
    ) -> ServiceResult<FileRow> {
        let row = self.get(file_id, owner)?;
        self.db
            .with_conn(|conn| {
                queries::files::update_name(conn, &row.id, &filename_enc, &filename_iv, &now_sql())
            })
            .map_err(ServiceError::Internal)?;
        self.record(owner, "file.rename", Some(&row.id), Ok(()), client);
        self.fetch_any(&row.id, &row.user_id)
    }

    pub fn move_file(
        &self,
        file_id: Uuid,
        owner: Uuid,
        new_parent: Option<Uuid>,
        client: &ClientInfo,
    ) -> ServiceResult<FileRow> {
        let row = self.get(file_id, owner)?;
        let parent = new_parent.map(|p| p.to_string());
        self.validate_parent(&row.user_id, parent.as_deref())?;
        self.db
            .with_conn(|conn| {
                queries::files::update_parent(conn, &row.id, parent.as_deref(), &now_sql())
            })
            .map_err(ServiceError::Internal)?;
        self.record(owner, "file.move", Some(&row.id), Ok(()), client);
        self.fetch_any(&row.id, &row.user_id)
    }

    // -- Deletion lifecycle --

    pub fn soft_delete(&self, file_id: Uuid, owner: Uuid, client: &ClientInfo) -> ServiceResult<()> {
        let res = self.soft_delete_inner(&file_id.to_string(), &owner.to_string());
        self.record(
            owner,
            "file.soft_delete",
            Some(&file_id.to_string()),
            res.as_ref().map(|_| ()).map_err(|e| e),
            client,
        );
        res
    }

    fn soft_delete_inner(&self, file_id: &str, owner: &str) -> ServiceResult<()> {
        self.db.with_tx(|tx| -> ServiceResult<()> {
            let row = queries::files::find_by_id_owner(tx, file_id, owner)?
                .ok_or_else(ServiceError::not_found)?;
            if row.is_deleted {
                return Err(ServiceError::not_found());
            }
            ledger::release(tx, owner, row.encrypted_size)?;
            queries::files::mark_deleted(tx, file_id, &now_sql())?;
            Ok(())
        })
    }

    /// Restore re-runs the quota check: the freed space may have been spent
    /// since the soft-delete. On rejection the file stays in the trash.
    pub fn restore(&self, file_id: Uuid, owner: Uuid, client: &ClientInfo) -> ServiceResult<FileRow> {
        let fid = file_id.to_string();
        let uid = owner.to_string();
        let res = self.db.with_tx(|tx| -> ServiceResult<()> {
            let row = queries::files::find_by_id_owner(tx, &fid, &uid)?
                .ok_or_else(ServiceError::not_found)?;
            if !row.is_deleted {
                return Err(ServiceError::not_found());
            }
            ledger::charge(tx, &uid, row.encrypted_size)?;
            queries::files::mark_restored(tx, &fid, &now_sql())?;
            Ok(())
        });
        self.record(
            owner,
            "file.restore",
            Some(&fid),
            res.as_ref().map(|_| ()).map_err(|e| e),
            client,
        );
        res?;
        self.fetch_any(&fid, &uid)
    }

    pub async fn permanent_delete(
        &self,
        file_id: Uuid,
        owner: Uuid,
        client: &ClientInfo,
    ) -> ServiceResult<()> {
        let res = self
            .permanent_delete_inner(&file_id.to_string(), &owner.to_string())
            .await;
        self.record(
            owner,
            "file.delete",
            Some(&file_id.to_string()),
            res.as_ref().map(|_| ()).map_err(|e| e),
            client,
        );
        res
    }

    async fn permanent_delete_inner(&self, file_id: &str, owner: &str) -> ServiceResult<()> {
        let row = self.fetch_any(file_id, owner)?;

        // Blobs first, tolerating storage errors: the database row is the
        // source of truth for whether the file still exists.
        let mut paths: Vec<String> = self
            .db
            .with_conn(|conn| queries::files::version_paths(conn, file_id))
            .map_err(ServiceError::Internal)?;
        paths.push(row.storage_path.clone());
        self.blobs.delete_many(&paths).await;

        self.db.with_tx(|tx| -> ServiceResult<()> {
            let current = queries::files::find_by_id_owner(tx, file_id, owner)?
                .ok_or_else(ServiceError::not_found)?;
            // A soft-deleted file was already released at soft-delete time;
            // decrement exactly once.
            if !current.is_deleted {
                ledger::release(tx, owner, current.encrypted_size)?;
            }
            queries::files::delete_row(tx, file_id)?;
            Ok(())
        })?;

        info!("File {} permanently deleted", file_id);
        Ok(())
    }

    // -- Versioning --

    /// Snapshot new content as an immutable version. Version history is not
    /// charged against quota; only the live file counts.
    pub async fn create_version(
        &self,
        file_id: Uuid,
        owner: Uuid,
        content: Bytes,
        file_size: i64,
        content_key_envelope: String,
        client: &ClientInfo,
    ) -> ServiceResult<FileVersionRow> {
        if content.is_empty() {
            return Err(ServiceError::Validation("empty version content".into()));
        }
        let row = self.get(file_id, owner)?;
        let next = row.version + 1;
        let path = file_version_path(&row.user_id, &row.id, next);

        self.blobs
            .put(&path, &content)
            .await
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        let version = FileVersionRow {
            file_id: row.id.clone(),
            version_number: next,
            storage_path: path.clone(),
            file_size,
            content_key_envelope,
            created_at: String::new(),
        };

        // Re-read after insert so the caller sees the stored timestamp.
        let tx_result = self.db.with_tx(|tx| -> ServiceResult<FileVersionRow> {
            queries::files::insert_version(tx, &version)?;
            queries::files::set_version(tx, &row.id, next, &now_sql())?;
            queries::files::find_version(tx, &row.id, next)?.ok_or_else(|| {
                ServiceError::Internal(anyhow::anyhow!("version row missing after insert"))
            })
        });
        let stored = match tx_result {
            Ok(v) => v,
            Err(e) => {
                if let Err(cleanup) = self.blobs.delete(&path).await {
                    warn!("Orphan version blob cleanup failed for {}: {}", path, cleanup);
                }
                return Err(e);
            }
        };

        self.record(owner, "file.version", Some(&row.id), Ok(()), client);
        Ok(stored)
    }

    pub fn list_versions(&self, file_id: Uuid, owner: Uuid) -> ServiceResult<Vec<FileVersionRow>> {
        let row = self.get(file_id, owner)?;
        self.db
            .with_conn(|conn| queries::files::list_versions(conn, &row.id))
            .map_err(ServiceError::Internal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{TestEnv, test_env};

    fn new_file(content: &[u8]) -> NewFile {
        NewFile {
            parent_folder_id: None,
            filename_enc: vec![1, 2, 3],
            filename_iv: vec![4, 5],
            content_key_envelope: "wrapped-key".into(),
            file_size: content.len() as i64,
            mime_type: Some("application/octet-stream".into()),
            file_hash: None,
            content: Bytes::copy_from_slice(content),
        }
    }

    fn used(env: &TestEnv) -> i64 {
        env.files.storage_stats(env.user_id).unwrap().storage_used
    }

    #[tokio::test]
    async fn quota_scenario() {
        // quota=1000: 600 fits, then 500 is rejected, soft-delete frees 600,
        // then 500 fits.
        let env = test_env(1000).await;
        let client = ClientInfo::default();

        let f1 = env
            .files
            .create(env.user_id, new_file(&[1u8; 600]), &client)
            .await
            .unwrap();
        assert_eq!(used(&env), 600);

        let err = env
            .files
            .create(env.user_id, new_file(&[2u8; 500]), &client)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::QuotaExceeded));
        assert_eq!(used(&env), 600);

        env.files
            .soft_delete(f1.id.parse().unwrap(), env.user_id, &client)
            .unwrap();
        assert_eq!(used(&env), 0);

        env.files
            .create(env.user_id, new_file(&[3u8; 500]), &client)
            .await
            .unwrap();
        assert_eq!(used(&env), 500);
    }

    #[tokio::test]
    async fn soft_then_permanent_delete_decrements_once() {
        let env = test_env(1000).await;
        let client = ClientInfo::default();

        let f = env
            .files
            .create(env.user_id, new_file(&[1u8; 400]), &client)
            .await
            .unwrap();
        let fid: Uuid = f.id.parse().unwrap();

        env.files.soft_delete(fid, env.user_id, &client).unwrap();
        assert_eq!(used(&env), 0);

        env.files
            .permanent_delete(fid, env.user_id, &client)
            .await
            .unwrap();
        assert_eq!(used(&env), 0);
        assert!(!env.blobs.exists(&f.storage_path).await);
    }

    #[tokio::test]
    async fn direct_permanent_delete_decrements_once() {
        let env = test_env(1000).await;
        let client = ClientInfo::default();

        let f = env
            .files
            .create(env.user_id, new_file(&[1u8; 400]), &client)
            .await
            .unwrap();
        env.files
            .permanent_delete(f.id.parse().unwrap(), env.user_id, &client)
            .await
            .unwrap();
        assert_eq!(used(&env), 0);
    }

    #[tokio::test]
    async fn restore_recheck_can_fail() {
        let env = test_env(1000).await;
        let client = ClientInfo::default();

        let f1 = env
            .files
            .create(env.user_id, new_file(&[1u8; 700]), &client)
            .await
            .unwrap();
        env.files
            .soft_delete(f1.id.parse().unwrap(), env.user_id, &client)
            .unwrap();

        // Freed space consumed by another upload.
        env.files
            .create(env.user_id, new_file(&[2u8; 600]), &client)
            .await
            .unwrap();

        let err = env
            .files
            .restore(f1.id.parse().unwrap(), env.user_id, &client)
            .unwrap_err();
        assert!(matches!(err, ServiceError::QuotaExceeded));
        assert_eq!(used(&env), 600);

        // Still in the trash, restorable once space exists again.
        assert_eq!(env.files.list_trash(env.user_id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn restore_succeeds_within_quota() {
        let env = test_env(1000).await;
        let client = ClientInfo::default();

        let f = env
            .files
            .create(env.user_id, new_file(&[1u8; 300]), &client)
            .await
            .unwrap();
        let fid: Uuid = f.id.parse().unwrap();
        env.files.soft_delete(fid, env.user_id, &client).unwrap();

        let restored = env.files.restore(fid, env.user_id, &client).unwrap();
        assert!(!restored.is_deleted);
        assert_eq!(used(&env), 300);
    }

    #[tokio::test]
    async fn foreign_file_is_not_found() {
        let env = test_env(1000).await;
        let client = ClientInfo::default();
        let f = env
            .files
            .create(env.user_id, new_file(&[1u8; 10]), &client)
            .await
            .unwrap();

        let stranger = env.add_user("mallory", 1000);
        let err = env
            .files
            .get(f.id.parse().unwrap(), stranger)
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));

        let err = env
            .files
            .download(f.id.parse().unwrap(), stranger)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn download_roundtrip() {
        let env = test_env(1000).await;
        let client = ClientInfo::default();
        let f = env
            .files
            .create(env.user_id, new_file(b"secret bytes"), &client)
            .await
            .unwrap();

        let (row, _blob) = env
            .files
            .download(f.id.parse().unwrap(), env.user_id)
            .await
            .unwrap();
        assert_eq!(
            env.blobs.read(&row.storage_path).await.unwrap(),
            b"secret bytes"
        );
    }

    #[tokio::test]
    async fn versions_do_not_touch_quota() {
        let env = test_env(1000).await;
        let client = ClientInfo::default();
        let f = env
            .files
            .create(env.user_id, new_file(&[1u8; 200]), &client)
            .await
            .unwrap();
        let fid: Uuid = f.id.parse().unwrap();

        let v = env
            .files
            .create_version(
                fid,
                env.user_id,
                Bytes::from_static(&[9u8; 900]),
                900,
                "rewrapped".into(),
                &client,
            )
            .await
            .unwrap();
        assert_eq!(v.version_number, 2);
        assert_eq!(used(&env), 200);

        let versions = env.files.list_versions(fid, env.user_id).unwrap();
        assert_eq!(versions.len(), 1);
        assert!(env.blobs.exists(&v.storage_path).await);

        // The returned row is the persisted one, stored timestamp included.
        assert!(!v.created_at.is_empty());
        assert_eq!(versions[0].created_at, v.created_at);
    }

    #[tokio::test]
    async fn dedup_lookup_is_owner_scoped() {
        let env = test_env(1000).await;
        let client = ClientInfo::default();
        let mut nf = new_file(&[1u8; 10]);
        nf.file_hash = Some("abc123".into());
        env.files.create(env.user_id, nf, &client).await.unwrap();

        assert!(
            env.files
                .find_by_hash(env.user_id, "abc123")
                .unwrap()
                .is_some()
        );

        let stranger = env.add_user("mallory", 1000);
        assert!(env.files.find_by_hash(stranger, "abc123").unwrap().is_none());
    }

    #[tokio::test]
    async fn move_to_deleted_folder_rejected() {
        let env = test_env(1000).await;
        let client = ClientInfo::default();
        let f = env
            .files
            .create(env.user_id, new_file(&[1u8; 10]), &client)
            .await
            .unwrap();

        let err = env
            .files
            .move_file(
                f.id.parse().unwrap(),
                env.user_id,
                Some(Uuid::new_v4()),
                &client,
            )
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }
}
