//! Anonymous share access. A share grants token-based access to exactly one
//! file, optionally gated by a password, an expiry, and a download limit.
//!
//! Expired, exhausted, and revoked shares all present identically as "not
//! available" so an anonymous caller cannot tell why a share died.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use rand::RngCore;
use tracing::info;
use uuid::Uuid;

use cachet_db::models::{FileRow, ShareRow};
use cachet_db::{Database, now_sql, parse_sql_datetime, queries, to_sql_datetime};
use cachet_types::api::{ClientInfo, PublicShareInfo};

use crate::audit::{Audit, AuditEvent};
use crate::cache::TtlCache;
use crate::error::{ServiceError, ServiceResult};
use crate::storage::BlobStore;

const TOKEN_BYTES: usize = 32;
const SHARE_CACHE_CAPACITY: usize = 4096;
const SHARE_CACHE_TTL: StdDuration = StdDuration::from_secs(30);

pub struct NewShare {
    pub file_id: Uuid,
    /// Content key re-wrapped for the recipient; never the owner's envelope.
    pub content_key_envelope: String,
    pub password: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub max_downloads: Option<i64>,
}

pub struct ShareUpdate {
    pub password: Option<String>,
    pub clear_password: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub max_downloads: Option<i64>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// Missing, revoked, expired, exhausted, or source file gone — all
    /// deliberately indistinguishable.
    NotAvailable,
    PasswordRequired,
    InvalidPassword,
}

pub enum ShareAccess {
    Granted(Box<(ShareRow, FileRow)>),
    Denied(DenyReason),
}

pub struct ShareManager {
    db: Arc<Database>,
    blobs: Arc<BlobStore>,
    audit: Arc<Audit>,
    cache: TtlCache<String, ShareRow>,
}

fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

impl ShareManager {
    pub fn new(db: Arc<Database>, blobs: Arc<BlobStore>, audit: Arc<Audit>) -> Self {
        Self {
            db,
            blobs,
            audit,
            cache: TtlCache::new(SHARE_CACHE_CAPACITY, SHARE_CACHE_TTL),
        }
    }

    // -- Owner operations --

    pub fn create(&self, owner: Uuid, new: NewShare, client: &ClientInfo) -> ServiceResult<ShareRow> {
        if let Some(expires) = new.expires_at {
            if expires <= Utc::now() {
                return Err(ServiceError::Validation(
                    "expiry must be in the future".into(),
                ));
            }
        }
        if let Some(max) = new.max_downloads {
            if max < 1 {
                return Err(ServiceError::Validation(
                    "download limit must be at least 1".into(),
                ));
            }
        }

        let uid = owner.to_string();
        let fid = new.file_id.to_string();
        let file = self
            .db
            .with_conn(|conn| queries::files::find_by_id_owner(conn, &fid, &uid))
            .map_err(ServiceError::Internal)?
            .filter(|f| !f.is_deleted)
            .ok_or_else(ServiceError::not_found)?;

        let password_hash = match new.password.as_deref() {
            Some(p) => Some(crate::password::hash(p)?),
            None => None,
        };

        let row = ShareRow {
            id: Uuid::new_v4().to_string(),
            file_id: file.id.clone(),
            owner_id: uid.clone(),
            share_token: generate_token(),
            content_key_envelope: new.content_key_envelope,
            password_hash,
            expires_at: new.expires_at.map(to_sql_datetime),
            max_downloads: new.max_downloads,
            download_count: 0,
            is_active: true,
            last_accessed: None,
            created_at: String::new(),
        };
        self.db
            .with_conn(|conn| queries::shares::insert(conn, &row))
            .map_err(ServiceError::Internal)?;

        info!("Share {} created for file {}", row.id, file.id);
        self.audit.record(
            AuditEvent {
                user_id: Some(&uid),
                action: "share.create",
                resource_type: "share",
                resource_id: Some(&row.id),
                success: true,
                error: None,
            },
            client,
        );
        self.require_owned(&row.id, &uid)
    }

    pub fn update(
        &self,
        share_id: Uuid,
        owner: Uuid,
        update: ShareUpdate,
        client: &ClientInfo,
    ) -> ServiceResult<ShareRow> {
        if update.password.is_some() && update.clear_password {
            return Err(ServiceError::Validation(
                "cannot set and clear the password at once".into(),
            ));
        }
        if let Some(expires) = update.expires_at {
            if expires <= Utc::now() {
                return Err(ServiceError::Validation(
                    "expiry must be in the future".into(),
                ));
            }
        }
        if let Some(max) = update.max_downloads {
            if max < 1 {
                return Err(ServiceError::Validation(
                    "download limit must be at least 1".into(),
                ));
            }
        }

        let uid = owner.to_string();
        let sid = share_id.to_string();
        let row = self.require_owned(&sid, &uid)?;

        self.db.with_tx(|tx| -> ServiceResult<()> {
            if update.clear_password {
                queries::shares::set_password_hash(tx, &sid, None)?;
            } else if let Some(p) = update.password.as_deref() {
                let hash = crate::password::hash(p)?;
                queries::shares::set_password_hash(tx, &sid, Some(&hash))?;
            }
            if let Some(expires) = update.expires_at {
                queries::shares::set_expires_at(tx, &sid, Some(&to_sql_datetime(expires)))?;
            }
            if let Some(max) = update.max_downloads {
                queries::shares::set_max_downloads(tx, &sid, Some(max))?;
            }
            if let Some(active) = update.is_active {
                queries::shares::set_active(tx, &sid, active)?;
            }
            Ok(())
        })?;
        self.cache.remove(&row.share_token);

        self.audit.record(
            AuditEvent {
                user_id: Some(&uid),
                action: "share.update",
                resource_type: "share",
                resource_id: Some(&sid),
                success: true,
                error: None,
            },
            client,
        );
        self.require_owned(&sid, &uid)
    }

    pub fn revoke(&self, share_id: Uuid, owner: Uuid, client: &ClientInfo) -> ServiceResult<()> {
        let uid = owner.to_string();
        let sid = share_id.to_string();
        let row = self.require_owned(&sid, &uid)?;
        self.db
            .with_conn(|conn| queries::shares::deactivate(conn, &sid))
            .map_err(ServiceError::Internal)?;
        self.cache.remove(&row.share_token);

        self.audit.record(
            AuditEvent {
                user_id: Some(&uid),
                action: "share.revoke",
                resource_type: "share",
                resource_id: Some(&sid),
                success: true,
                error: None,
            },
            client,
        );
        Ok(())
    }

    pub fn delete(&self, share_id: Uuid, owner: Uuid, client: &ClientInfo) -> ServiceResult<()> {
        let uid = owner.to_string();
        let sid = share_id.to_string();
        let row = self.require_owned(&sid, &uid)?;
        self.db
            .with_conn(|conn| queries::shares::delete_row(conn, &sid))
            .map_err(ServiceError::Internal)?;
        self.cache.remove(&row.share_token);

        self.audit.record(
            AuditEvent {
                user_id: Some(&uid),
                action: "share.delete",
                resource_type: "share",
                resource_id: Some(&sid),
                success: true,
                error: None,
            },
            client,
        );
        Ok(())
    }

    pub fn list_for_owner(&self, owner: Uuid) -> ServiceResult<Vec<ShareRow>> {
        self.db
            .with_conn(|conn| queries::shares::list_for_owner(conn, &owner.to_string()))
            .map_err(ServiceError::Internal)
    }

    fn require_owned(&self, share_id: &str, owner: &str) -> ServiceResult<ShareRow> {
        self.db
            .with_conn(|conn| queries::shares::find_by_id_owner(conn, share_id, owner))
            .map_err(ServiceError::Internal)?
            .ok_or_else(ServiceError::not_found)
    }

    // -- Anonymous access --

    /// The single gate for anonymous access. Checks run cheapest-first:
    /// share exists (including its source file) → active → not expired →
    /// slots left → password. Observing an expired share flips it inactive.
    pub fn resolve(&self, token: &str, password_attempt: Option<&str>) -> ServiceResult<ShareAccess> {
        let share = match self.lookup(token)? {
            Some(s) => s,
            None => return Ok(ShareAccess::Denied(DenyReason::NotAvailable)),
        };

        let file = self
            .db
            .with_conn(|conn| queries::files::find_by_id(conn, &share.file_id))
            .map_err(ServiceError::Internal)?;
        let Some(file) = file.filter(|f| !f.is_deleted) else {
            // A deleted source file invalidates every share pointing at it.
            return Ok(ShareAccess::Denied(DenyReason::NotAvailable));
        };

        if !share.is_active {
            return Ok(ShareAccess::Denied(DenyReason::NotAvailable));
        }
        if let Some(expires_at) = share.expires_at.as_deref() {
            if parse_sql_datetime(expires_at)? <= Utc::now() {
                self.db
                    .with_conn(|conn| queries::shares::deactivate(conn, &share.id))
                    .map_err(ServiceError::Internal)?;
                self.cache.remove(&share.share_token);
                return Ok(ShareAccess::Denied(DenyReason::NotAvailable));
            }
        }
        if let Some(max) = share.max_downloads {
            if share.download_count >= max {
                return Ok(ShareAccess::Denied(DenyReason::NotAvailable));
            }
        }
        if let Some(hash) = share.password_hash.as_deref() {
            let Some(attempt) = password_attempt else {
                return Ok(ShareAccess::Denied(DenyReason::PasswordRequired));
            };
            if !crate::password::verify(attempt, hash) {
                return Ok(ShareAccess::Denied(DenyReason::InvalidPassword));
            }
        }

        Ok(ShareAccess::Granted(Box::new((share, file))))
    }

    /// Landing-page metadata. The content key envelope is withheld until the
    /// password gate (if any) has been passed.
    pub fn info(&self, token: &str, password_attempt: Option<&str>) -> ServiceResult<PublicShareInfo> {
        match self.resolve(token, password_attempt)? {
            ShareAccess::Granted(grant) => {
                let (share, file) = *grant;
                Ok(PublicShareInfo {
                    filename: STANDARD.encode(&file.filename_enc),
                    filename_iv: STANDARD.encode(&file.filename_iv),
                    file_size: file.file_size,
                    mime_type: file.mime_type,
                    has_password: share.password_hash.is_some(),
                    content_key_envelope: Some(share.content_key_envelope),
                    expires_at: share
                        .expires_at
                        .as_deref()
                        .map(parse_sql_datetime)
                        .transpose()?,
                })
            }
            ShareAccess::Denied(DenyReason::NotAvailable) => Err(ServiceError::not_found()),
            ShareAccess::Denied(_) => {
                // Password not (yet) supplied: metadata minus the envelope,
                // so the landing page can prompt.
                let share = self
                    .lookup(token)?
                    .ok_or_else(ServiceError::not_found)?;
                let file = self
                    .db
                    .with_conn(|conn| queries::files::find_by_id(conn, &share.file_id))
                    .map_err(ServiceError::Internal)?
                    .ok_or_else(ServiceError::not_found)?;
                Ok(PublicShareInfo {
                    filename: STANDARD.encode(&file.filename_enc),
                    filename_iv: STANDARD.encode(&file.filename_iv),
                    file_size: file.file_size,
                    mime_type: file.mime_type,
                    has_password: true,
                    content_key_envelope: None,
                    expires_at: share
                        .expires_at
                        .as_deref()
                        .map(parse_sql_datetime)
                        .transpose()?,
                })
            }
        }
    }

    /// Stream the shared blob. The download slot is consumed only after the
    /// stream is confirmed obtainable, so a storage failure never burns one.
    pub async fn download(
        &self,
        token: &str,
        password_attempt: Option<&str>,
        client: &ClientInfo,
    ) -> ServiceResult<(ShareRow, FileRow, tokio::fs::File)> {
        let res = self.download_inner(token, password_attempt).await;
        self.audit.record(
            AuditEvent {
                user_id: None,
                action: "share.download",
                resource_type: "share",
                resource_id: res.as_ref().ok().map(|(s, _, _)| s.id.as_str()),
                success: res.is_ok(),
                error: res.as_ref().err().map(|e| e.to_string()).as_deref(),
            },
            client,
        );
        res
    }

    async fn download_inner(
        &self,
        token: &str,
        password_attempt: Option<&str>,
    ) -> ServiceResult<(ShareRow, FileRow, tokio::fs::File)> {
        let (share, file) = match self.resolve(token, password_attempt)? {
            ShareAccess::Granted(grant) => *grant,
            ShareAccess::Denied(DenyReason::NotAvailable) => {
                return Err(ServiceError::not_found());
            }
            ShareAccess::Denied(DenyReason::PasswordRequired) => {
                return Err(ServiceError::Auth("share password required".into()));
            }
            ShareAccess::Denied(DenyReason::InvalidPassword) => {
                return Err(ServiceError::Auth("invalid share password".into()));
            }
        };

        let blob = self
            .blobs
            .open(&file.storage_path)
            .await
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        // Conditional increment: under a limit, two racing downloads cannot
        // both take the last slot.
        let took_slot = self
            .db
            .with_conn(|conn| queries::shares::try_increment_download(conn, &share.id, &now_sql()))
            .map_err(ServiceError::Internal)?;
        if !took_slot {
            return Err(ServiceError::not_found());
        }
        self.cache.remove(&share.share_token);

        Ok((share, file, blob))
    }

    fn lookup(&self, token: &str) -> ServiceResult<Option<ShareRow>> {
        if let Some(hit) = self.cache.get(&token.to_string()) {
            return Ok(Some(hit));
        }
        let row = self
            .db
            .with_conn(|conn| queries::shares::find_by_token(conn, token))
            .map_err(ServiceError::Internal)?;
        if let Some(ref row) = row {
            self.cache.put(token.to_string(), row.clone());
        }
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::NewFile;
    use crate::testutil::{TestEnv, test_env};
    use bytes::Bytes;
    use chrono::Duration;

    fn client() -> ClientInfo {
        ClientInfo::default()
    }

    async fn seeded_file(env: &TestEnv) -> Uuid {
        env.files
            .create(
                env.user_id,
                NewFile {
                    parent_folder_id: None,
                    filename_enc: vec![1, 2],
                    filename_iv: vec![3],
                    content_key_envelope: "owner-key".into(),
                    file_size: 9,
                    mime_type: Some("text/plain".into()),
                    file_hash: None,
                    content: Bytes::from_static(b"shared!!!"),
                },
                &client(),
            )
            .await
            .unwrap()
            .id
            .parse()
            .unwrap()
    }

    fn new_share(file_id: Uuid) -> NewShare {
        NewShare {
            file_id,
            content_key_envelope: "recipient-key".into(),
            password: None,
            expires_at: None,
            max_downloads: None,
        }
    }

    fn download_count(env: &TestEnv, share_id: &str) -> i64 {
        env.db
            .with_conn(|conn| -> anyhow::Result<i64> {
                Ok(conn.query_row(
                    "SELECT download_count FROM shares WHERE id = ?1",
                    [share_id],
                    |r| r.get(0),
                )?)
            })
            .unwrap()
    }

    #[tokio::test]
    async fn download_limit_is_exact() {
        let env = test_env(1000).await;
        let file_id = seeded_file(&env).await;
        let share = env
            .shares
            .create(
                env.user_id,
                NewShare {
                    max_downloads: Some(2),
                    ..new_share(file_id)
                },
                &client(),
            )
            .unwrap();

        env.shares
            .download(&share.share_token, None, &client())
            .await
            .unwrap();
        env.shares
            .download(&share.share_token, None, &client())
            .await
            .unwrap();

        let err = env
            .shares
            .download(&share.share_token, None, &client())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
        assert_eq!(download_count(&env, &share.id), 2);
    }

    #[tokio::test]
    async fn expiry_flips_active_on_observation() {
        let env = test_env(1000).await;
        let file_id = seeded_file(&env).await;
        let share = env
            .shares
            .create(env.user_id, new_share(file_id), &client())
            .unwrap();

        let past = to_sql_datetime(Utc::now() - Duration::minutes(5));
        env.db
            .with_conn(|conn| -> anyhow::Result<()> {
                conn.execute(
                    "UPDATE shares SET expires_at = ?1 WHERE id = ?2",
                    rusqlite::params![past, share.id],
                )?;
                Ok(())
            })
            .unwrap();

        assert!(env.shares.info(&share.share_token, None).is_err());
        assert!(
            env.shares
                .download(&share.share_token, None, &client())
                .await
                .is_err()
        );

        let row = env
            .shares
            .list_for_owner(env.user_id)
            .unwrap()
            .into_iter()
            .find(|s| s.id == share.id)
            .unwrap();
        assert!(!row.is_active);
    }

    #[tokio::test]
    async fn password_gate() {
        let env = test_env(1000).await;
        let file_id = seeded_file(&env).await;
        let share = env
            .shares
            .create(
                env.user_id,
                NewShare {
                    password: Some("open sesame".into()),
                    ..new_share(file_id)
                },
                &client(),
            )
            .unwrap();

        let missing = env
            .shares
            .download(&share.share_token, None, &client())
            .await
            .unwrap_err();
        assert!(matches!(missing, ServiceError::Auth(_)));
        let wrong = env
            .shares
            .download(&share.share_token, Some("guess"), &client())
            .await
            .unwrap_err();
        assert!(matches!(wrong, ServiceError::Auth(_)));
        assert_eq!(download_count(&env, &share.id), 0);

        env.shares
            .download(&share.share_token, Some("open sesame"), &client())
            .await
            .unwrap();
        assert_eq!(download_count(&env, &share.id), 1);

        // Metadata withholds the envelope until the password is supplied.
        let teaser = env.shares.info(&share.share_token, None).unwrap();
        assert!(teaser.has_password);
        assert!(teaser.content_key_envelope.is_none());
        let full = env
            .shares
            .info(&share.share_token, Some("open sesame"))
            .unwrap();
        assert_eq!(full.content_key_envelope.as_deref(), Some("recipient-key"));
    }

    #[tokio::test]
    async fn revoked_and_deleted_shares_vanish() {
        let env = test_env(1000).await;
        let file_id = seeded_file(&env).await;
        let share = env
            .shares
            .create(env.user_id, new_share(file_id), &client())
            .unwrap();

        env.shares
            .revoke(share.id.parse().unwrap(), env.user_id, &client())
            .unwrap();
        assert!(env.shares.info(&share.share_token, None).is_err());

        env.shares
            .delete(share.id.parse().unwrap(), env.user_id, &client())
            .unwrap();
        assert!(env.shares.list_for_owner(env.user_id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn deleted_source_file_invalidates_share() {
        let env = test_env(1000).await;
        let file_id = seeded_file(&env).await;
        let share = env
            .shares
            .create(env.user_id, new_share(file_id), &client())
            .unwrap();

        env.files
            .soft_delete(file_id, env.user_id, &client())
            .unwrap();
        let err = env
            .shares
            .download(&share.share_token, None, &client())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn create_validations() {
        let env = test_env(1000).await;
        let file_id = seeded_file(&env).await;

        let err = env
            .shares
            .create(
                env.user_id,
                NewShare {
                    expires_at: Some(Utc::now() - Duration::minutes(1)),
                    ..new_share(file_id)
                },
                &client(),
            )
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));

        let err = env
            .shares
            .create(
                env.user_id,
                NewShare {
                    max_downloads: Some(0),
                    ..new_share(file_id)
                },
                &client(),
            )
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));

        // Someone else's file cannot be shared.
        let stranger = env.add_user("mallory", 1000);
        let err = env
            .shares
            .create(stranger, new_share(file_id), &client())
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn update_clears_password_and_reactivates() {
        let env = test_env(1000).await;
        let file_id = seeded_file(&env).await;
        let share = env
            .shares
            .create(
                env.user_id,
                NewShare {
                    password: Some("pw".into()),
                    ..new_share(file_id)
                },
                &client(),
            )
            .unwrap();
        let sid: Uuid = share.id.parse().unwrap();

        let updated = env
            .shares
            .update(
                sid,
                env.user_id,
                ShareUpdate {
                    password: None,
                    clear_password: true,
                    expires_at: None,
                    max_downloads: None,
                    is_active: Some(false),
                },
                &client(),
            )
            .unwrap();
        assert!(updated.password_hash.is_none());
        assert!(!updated.is_active);
        assert!(env.shares.info(&share.share_token, None).is_err());

        env.shares
            .update(
                sid,
                env.user_id,
                ShareUpdate {
                    password: None,
                    clear_password: false,
                    expires_at: None,
                    max_downloads: None,
                    is_active: Some(true),
                },
                &client(),
            )
            .unwrap();
        let open = env.shares.info(&share.share_token, None).unwrap();
        assert!(!open.has_password);
        assert!(open.content_key_envelope.is_some());
    }

    #[test]
    fn tokens_are_long_and_unique() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        // 32 bytes, URL-safe base64 without padding.
        assert_eq!(a.len(), 43);
        assert!(!a.contains(['+', '/', '=']));
    }
}
