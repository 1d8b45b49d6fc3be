//! Folder hierarchy: tree CRUD with cycle prevention and cascading
//! delete/restore. All traversals are iterative with a step bound, so
//! corrupted parent pointers can never hang a request.

use std::collections::HashMap;
use std::sync::Arc;

use rusqlite::Connection;
use tracing::{info, warn};
use uuid::Uuid;

use cachet_db::models::FolderRow;
use cachet_db::{Database, now_sql, queries};
use cachet_types::api::{ClientInfo, RestoreSummary};

use crate::audit::{Audit, AuditEvent};
use crate::error::{ServiceError, ServiceResult};
use crate::ledger;
use crate::storage::BlobStore;

/// Upper bound on tree depth, and on every parent-pointer walk.
pub const MAX_FOLDER_DEPTH: usize = 64;

pub struct FolderNode {
    pub folder: FolderRow,
    pub children: Vec<FolderNode>,
}

pub struct FolderManager {
    db: Arc<Database>,
    blobs: Arc<BlobStore>,
    audit: Arc<Audit>,
}

impl FolderManager {
    pub fn new(db: Arc<Database>, blobs: Arc<BlobStore>, audit: Arc<Audit>) -> Self {
        Self { db, blobs, audit }
    }

    fn record(
        &self,
        owner: Uuid,
        action: &str,
        resource_id: &str,
        result: Result<(), &ServiceError>,
        client: &ClientInfo,
    ) {
        self.audit.record(
            AuditEvent {
                user_id: Some(&owner.to_string()),
                action,
                resource_type: "folder",
                resource_id: Some(resource_id),
                success: result.is_ok(),
                error: result.err().map(|e| e.to_string()).as_deref(),
            },
            client,
        );
    }

    /// Fetch a live folder, owner-scoped.
    pub fn get(&self, folder_id: Uuid, owner: Uuid) -> ServiceResult<FolderRow> {
        let row = self
            .db
            .with_conn(|conn| {
                queries::folders::find_by_id_owner(conn, &folder_id.to_string(), &owner.to_string())
            })
            .map_err(ServiceError::Internal)?
            .ok_or_else(ServiceError::not_found)?;
        if row.is_deleted {
            return Err(ServiceError::not_found());
        }
        Ok(row)
    }

    pub fn create(
        &self,
        owner: Uuid,
        parent_folder_id: Option<Uuid>,
        name_enc: Vec<u8>,
        name_iv: Vec<u8>,
        client: &ClientInfo,
    ) -> ServiceResult<FolderRow> {
        let uid = owner.to_string();
        let parent = parent_folder_id.map(|p| p.to_string());
        let id = Uuid::new_v4().to_string();

        let res = self.db.with_conn(|conn| -> ServiceResult<()> {
            if let Some(parent_id) = parent.as_deref() {
                let chain = ancestor_chain(conn, &uid, parent_id)?;
                if chain.len() >= MAX_FOLDER_DEPTH {
                    return Err(ServiceError::Validation("folder tree too deep".into()));
                }
            }
            let row = FolderRow {
                id: id.clone(),
                user_id: uid.clone(),
                parent_folder_id: parent.clone(),
                name_enc,
                name_iv,
                is_deleted: false,
                created_at: String::new(),
                updated_at: String::new(),
            };
            queries::folders::insert(conn, &row)?;
            Ok(())
        });
        self.record(owner, "folder.create", &id, res.as_ref().map(|_| ()).map_err(|e| e), client);
        res?;
        self.get(id.parse().map_err(|_| ServiceError::not_found())?, owner)
    }

    pub fn rename(
        &self,
        folder_id: Uuid,
        owner: Uuid,
        name_enc: Vec<u8>,
        name_iv: Vec<u8>,
        client: &ClientInfo,
    ) -> ServiceResult<FolderRow> {
        let row = self.get(folder_id, owner)?;
        self.db
            .with_conn(|conn| {
                queries::folders::update_name(conn, &row.id, &name_enc, &name_iv, &now_sql())
            })
            .map_err(ServiceError::Internal)?;
        self.record(owner, "folder.rename", &row.id, Ok(()), client);
        self.get(folder_id, owner)
    }

    /// Reparent a folder. Moving under the folder itself or any of its
    /// descendants would orphan the subtree, so the ancestor chain of the
    /// target is checked before the update.
    pub fn move_folder(
        &self,
        folder_id: Uuid,
        owner: Uuid,
        new_parent: Option<Uuid>,
        client: &ClientInfo,
    ) -> ServiceResult<FolderRow> {
        let row = self.get(folder_id, owner)?;
        let uid = owner.to_string();
        let parent = new_parent.map(|p| p.to_string());

        let res = self.db.with_conn(|conn| -> ServiceResult<()> {
            if let Some(parent_id) = parent.as_deref() {
                if parent_id == row.id {
                    return Err(ServiceError::Validation(
                        "would create a circular reference".into(),
                    ));
                }
                let chain = ancestor_chain(conn, &uid, parent_id)?;
                if chain.iter().any(|id| *id == row.id) {
                    return Err(ServiceError::Validation(
                        "would create a circular reference".into(),
                    ));
                }
                if chain.len() >= MAX_FOLDER_DEPTH {
                    return Err(ServiceError::Validation("folder tree too deep".into()));
                }
            }
            queries::folders::update_parent(conn, &row.id, parent.as_deref(), &now_sql())?;
            Ok(())
        });
        self.record(owner, "folder.move", &row.id, res.as_ref().map(|_| ()).map_err(|e| e), client);
        res?;
        self.get(folder_id, owner)
    }

    // -- Deletion --

    pub async fn delete(
        &self,
        folder_id: Uuid,
        owner: Uuid,
        cascade: bool,
        permanent: bool,
        client: &ClientInfo,
    ) -> ServiceResult<()> {
        let fid = folder_id.to_string();
        let res = self
            .delete_inner(&fid, &owner.to_string(), cascade, permanent)
            .await;
        self.record(
            owner,
            "folder.delete",
            &fid,
            res.as_ref().map(|_| ()).map_err(|e| e),
            client,
        );
        res
    }

    async fn delete_inner(
        &self,
        folder_id: &str,
        owner: &str,
        cascade: bool,
        permanent: bool,
    ) -> ServiceResult<()> {
        // Rows and ledger commit first; orphaned blobs from a crash between
        // commit and blob deletion are only wasted disk, never wrong
        // accounting.
        let doomed_blobs = self.db.with_tx(|tx| -> ServiceResult<Vec<String>> {
            let root = queries::folders::find_by_id_owner(tx, folder_id, owner)?
                .ok_or_else(ServiceError::not_found)?;
            if !permanent && root.is_deleted {
                return Err(ServiceError::not_found());
            }

            if !cascade && queries::folders::has_active_children(tx, owner, folder_id)? {
                return Err(ServiceError::Validation("folder is not empty".into()));
            }

            // Deepest-last ordering; reversed below so children go first.
            let subtree = collect_subtree(tx, owner, folder_id, !permanent)?;
            let now = now_sql();
            let mut blobs = Vec::new();

            for fid in &subtree {
                let files = queries::files::list_in_folder(tx, owner, fid, !permanent)?;
                for file in files {
                    if permanent {
                        if !file.is_deleted {
                            ledger::release(tx, owner, file.encrypted_size)?;
                        }
                        blobs.extend(queries::files::version_paths(tx, &file.id)?);
                        blobs.push(file.storage_path);
                        queries::files::delete_row(tx, &file.id)?;
                    } else {
                        ledger::release(tx, owner, file.encrypted_size)?;
                        queries::files::mark_deleted(tx, &file.id, &now)?;
                    }
                }
            }
            for fid in subtree.iter().rev() {
                if permanent {
                    queries::folders::delete_row(tx, fid)?;
                } else {
                    queries::folders::set_deleted(tx, fid, true, &now)?;
                }
            }
            Ok(blobs)
        })?;

        if !doomed_blobs.is_empty() {
            self.blobs.delete_many(&doomed_blobs).await;
        }
        info!(
            "Folder {} deleted (cascade={}, permanent={})",
            folder_id, cascade, permanent
        );
        Ok(())
    }

    /// Restore a soft-deleted folder and its subtree. Files are re-charged
    /// one at a time; a file that no longer fits stays in the trash and is
    /// counted, everything else still comes back.
    pub fn restore(
        &self,
        folder_id: Uuid,
        owner: Uuid,
        client: &ClientInfo,
    ) -> ServiceResult<RestoreSummary> {
        let fid = folder_id.to_string();
        let uid = owner.to_string();

        let res = self.db.with_tx(|tx| -> ServiceResult<RestoreSummary> {
            let root = queries::folders::find_by_id_owner(tx, &fid, &uid)?
                .ok_or_else(ServiceError::not_found)?;
            if !root.is_deleted {
                return Err(ServiceError::not_found());
            }

            let subtree = collect_subtree(tx, &uid, &fid, false)?;
            let now = now_sql();
            let mut summary = RestoreSummary {
                restored_files: 0,
                failed_files: 0,
            };

            for folder in &subtree {
                queries::folders::set_deleted(tx, folder, false, &now)?;
                for file in queries::files::list_in_folder(tx, &uid, folder, false)? {
                    if !file.is_deleted {
                        continue;
                    }
                    match ledger::charge(tx, &uid, file.encrypted_size) {
                        Ok(()) => {
                            queries::files::mark_restored(tx, &file.id, &now)?;
                            summary.restored_files += 1;
                        }
                        Err(ServiceError::QuotaExceeded) => {
                            warn!("File {} no longer fits quota, left in trash", file.id);
                            summary.failed_files += 1;
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
            Ok(summary)
        });
        self.record(
            owner,
            "folder.restore",
            &fid,
            res.as_ref().map(|_| ()).map_err(|e| e),
            client,
        );
        res
    }

    // -- Reads --

    pub fn list(&self, owner: Uuid, parent: Option<Uuid>) -> ServiceResult<Vec<FolderRow>> {
        let uid = owner.to_string();
        let parent = parent.map(|p| p.to_string());
        self.db
            .with_conn(|conn| queries::folders::children(conn, &uid, parent.as_deref(), true))
            .map_err(ServiceError::Internal)
    }

    /// Build the whole tree from one flat query, grouping children by parent
    /// in memory.
    pub fn tree(&self, owner: Uuid, max_depth: usize) -> ServiceResult<Vec<FolderNode>> {
        let rows = self
            .db
            .with_conn(|conn| queries::folders::list_all_active(conn, &owner.to_string()))
            .map_err(ServiceError::Internal)?;

        let mut by_parent: HashMap<Option<String>, Vec<FolderRow>> = HashMap::new();
        for row in rows {
            by_parent
                .entry(row.parent_folder_id.clone())
                .or_default()
                .push(row);
        }
        Ok(build_tree(&mut by_parent, None, max_depth.min(MAX_FOLDER_DEPTH)))
    }

    /// Path from the root down to the folder, inclusive.
    pub fn breadcrumbs(&self, folder_id: Uuid, owner: Uuid) -> ServiceResult<Vec<FolderRow>> {
        let row = self.get(folder_id, owner)?;
        let uid = owner.to_string();
        let mut trail = self.db.with_conn(|conn| -> ServiceResult<Vec<FolderRow>> {
            let mut trail = vec![];
            let mut cursor = row.parent_folder_id.clone();
            let mut steps = 0;
            while let Some(id) = cursor {
                steps += 1;
                if steps > MAX_FOLDER_DEPTH {
                    return Err(ServiceError::Internal(anyhow::anyhow!(
                        "parent chain exceeds depth bound at folder {id}"
                    )));
                }
                let Some(parent) = queries::folders::find_by_id_owner(conn, &id, &uid)? else {
                    break;
                };
                if parent.is_deleted {
                    break;
                }
                cursor = parent.parent_folder_id.clone();
                trail.push(parent);
            }
            Ok(trail)
        })?;
        trail.reverse();
        trail.push(row);
        Ok(trail)
    }
}

/// Walk parent pointers upward from `start`, returning the visited ids
/// (`start` first). Bounded and cycle-safe: a repeated id or an over-long
/// chain is data corruption and reported as such.
fn ancestor_chain(conn: &Connection, owner: &str, start: &str) -> ServiceResult<Vec<String>> {
    let mut chain = Vec::new();
    let mut cursor = Some(start.to_string());
    while let Some(id) = cursor {
        if chain.contains(&id) || chain.len() > MAX_FOLDER_DEPTH {
            return Err(ServiceError::Internal(anyhow::anyhow!(
                "parent chain corrupt at folder {id}"
            )));
        }
        let row = queries::folders::find_by_id_owner(conn, &id, owner)?;
        let Some(row) = row else {
            return Err(ServiceError::Validation(
                "parent folder does not exist".into(),
            ));
        };
        if row.is_deleted {
            return Err(ServiceError::Validation(
                "parent folder does not exist".into(),
            ));
        }
        chain.push(id);
        cursor = row.parent_folder_id;
    }
    Ok(chain)
}

/// Breadth-first subtree ids, root first. `only_active` restricts the walk
/// to non-deleted folders (the soft-delete cascade); a permanent delete
/// takes everything.
fn collect_subtree(
    conn: &Connection,
    owner: &str,
    root: &str,
    only_active: bool,
) -> ServiceResult<Vec<String>> {
    let mut order = vec![root.to_string()];
    let mut i = 0;
    while i < order.len() {
        if order.len() > 100_000 {
            return Err(ServiceError::Internal(anyhow::anyhow!(
                "folder subtree too large at {root}"
            )));
        }
        let children = queries::folders::children(conn, owner, Some(&order[i]), only_active)?;
        order.extend(children.into_iter().map(|c| c.id));
        i += 1;
    }
    Ok(order)
}

fn build_tree(
    by_parent: &mut HashMap<Option<String>, Vec<FolderRow>>,
    parent: Option<String>,
    depth_left: usize,
) -> Vec<FolderNode> {
    if depth_left == 0 {
        return vec![];
    }
    let Some(rows) = by_parent.remove(&parent) else {
        return vec![];
    };
    rows.into_iter()
        .map(|row| {
            let children = build_tree(by_parent, Some(row.id.clone()), depth_left - 1);
            FolderNode {
                folder: row,
                children,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::NewFile;
    use crate::testutil::{TestEnv, test_env};
    use bytes::Bytes;

    fn client() -> ClientInfo {
        ClientInfo::default()
    }

    fn mkdir(env: &TestEnv, parent: Option<Uuid>) -> Uuid {
        env.folders
            .create(env.user_id, parent, vec![1], vec![2], &client())
            .unwrap()
            .id
            .parse()
            .unwrap()
    }

    async fn put_file(env: &TestEnv, folder: Uuid, size: usize) -> Uuid {
        env.files
            .create(
                env.user_id,
                NewFile {
                    parent_folder_id: Some(folder),
                    filename_enc: vec![1],
                    filename_iv: vec![2],
                    content_key_envelope: "k".into(),
                    file_size: size as i64,
                    mime_type: None,
                    file_hash: None,
                    content: Bytes::from(vec![0u8; size]),
                },
                &client(),
            )
            .await
            .unwrap()
            .id
            .parse()
            .unwrap()
    }

    fn used(env: &TestEnv) -> i64 {
        env.files.storage_stats(env.user_id).unwrap().storage_used
    }

    #[tokio::test]
    async fn move_under_descendant_rejected() {
        let env = test_env(1000).await;
        let a = mkdir(&env, None);
        let b = mkdir(&env, Some(a));
        let c = mkdir(&env, Some(b));
        let other = mkdir(&env, None);

        // A under its grandchild, and under itself.
        let err = env
            .folders
            .move_folder(a, env.user_id, Some(c), &client())
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
        let err = env
            .folders
            .move_folder(a, env.user_id, Some(a), &client())
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));

        // An unrelated target is fine.
        let moved = env
            .folders
            .move_folder(a, env.user_id, Some(other), &client())
            .unwrap();
        assert_eq!(moved.parent_folder_id, Some(other.to_string()));
    }

    #[tokio::test]
    async fn non_cascade_delete_requires_empty() {
        let env = test_env(1000).await;
        let a = mkdir(&env, None);
        let _b = mkdir(&env, Some(a));

        let err = env
            .folders
            .delete(a, env.user_id, false, false, &client())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));

        // Empty folder deletes fine without cascade.
        let c = mkdir(&env, None);
        env.folders
            .delete(c, env.user_id, false, false, &client())
            .await
            .unwrap();
        assert!(env.folders.get(c, env.user_id).is_err());
    }

    #[tokio::test]
    async fn cascade_soft_delete_releases_all_files() {
        let env = test_env(1000).await;
        let a = mkdir(&env, None);
        let b = mkdir(&env, Some(a));
        put_file(&env, a, 300).await;
        put_file(&env, b, 200).await;
        assert_eq!(used(&env), 500);

        env.folders
            .delete(a, env.user_id, true, false, &client())
            .await
            .unwrap();

        assert_eq!(used(&env), 0);
        assert_eq!(env.files.list_trash(env.user_id).unwrap().len(), 2);
        assert!(env.folders.get(a, env.user_id).is_err());
        assert!(env.folders.get(b, env.user_id).is_err());
    }

    #[tokio::test]
    async fn cascade_permanent_delete_removes_rows_and_blobs() {
        let env = test_env(1000).await;
        let a = mkdir(&env, None);
        let f = put_file(&env, a, 300).await;
        let row = env.files.get(f, env.user_id).unwrap();

        env.folders
            .delete(a, env.user_id, true, true, &client())
            .await
            .unwrap();

        assert_eq!(used(&env), 0);
        assert!(env.files.list_trash(env.user_id).unwrap().is_empty());
        assert!(!env.blobs.exists(&row.storage_path).await);
    }

    #[tokio::test]
    async fn restore_is_per_item() {
        let env = test_env(1000).await;
        let a = mkdir(&env, None);
        put_file(&env, a, 600).await;
        put_file(&env, a, 300).await;

        env.folders
            .delete(a, env.user_id, true, false, &client())
            .await
            .unwrap();
        assert_eq!(used(&env), 0);

        // Consume part of the freed space; only one of the two files can
        // come back regardless of restore order.
        let c = mkdir(&env, None);
        put_file(&env, c, 500).await;

        let summary = env.folders.restore(a, env.user_id, &client()).unwrap();
        assert_eq!(summary.restored_files, 1);
        assert_eq!(summary.failed_files, 1);
        assert!(used(&env) <= 1000);

        // The folder itself is back, the oversized file stays in the trash.
        assert!(env.folders.get(a, env.user_id).is_ok());
        assert_eq!(env.files.list_trash(env.user_id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn restore_full_subtree() {
        let env = test_env(1000).await;
        let a = mkdir(&env, None);
        let b = mkdir(&env, Some(a));
        put_file(&env, b, 400).await;

        env.folders
            .delete(a, env.user_id, true, false, &client())
            .await
            .unwrap();

        let summary = env.folders.restore(a, env.user_id, &client()).unwrap();
        assert_eq!(summary.restored_files, 1);
        assert_eq!(summary.failed_files, 0);
        assert_eq!(used(&env), 400);
        assert!(env.folders.get(b, env.user_id).is_ok());
    }

    #[tokio::test]
    async fn tree_and_breadcrumbs() {
        let env = test_env(1000).await;
        let a = mkdir(&env, None);
        let b = mkdir(&env, Some(a));
        let c = mkdir(&env, Some(b));

        let tree = env.folders.tree(env.user_id, 10).unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].children.len(), 1);
        assert_eq!(tree[0].children[0].children.len(), 1);

        // Depth cap prunes the deepest level.
        let shallow = env.folders.tree(env.user_id, 2).unwrap();
        assert!(shallow[0].children[0].children.is_empty());

        let crumbs = env.folders.breadcrumbs(c, env.user_id).unwrap();
        let ids: Vec<_> = crumbs.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![a.to_string(), b.to_string(), c.to_string()]
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn depth_bound_enforced() {
        let env = test_env(1000).await;
        let mut parent = None;
        for _ in 0..MAX_FOLDER_DEPTH {
            parent = Some(mkdir(&env, parent));
        }
        let err = env
            .folders
            .create(env.user_id, parent, vec![1], vec![2], &client())
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }
}
