//! Shared test fixtures: an in-memory database, a temp-dir blob store, and
//! the managers wired together the way the server wires them.

use std::sync::Arc;

use chrono::Duration;
use uuid::Uuid;

use cachet_db::Database;
use cachet_db::models::UserRow;
use cachet_db::queries;

use crate::audit::Audit;
use crate::auth::{AuthConfig, AuthManager};
use crate::files::FileManager;
use crate::folders::FolderManager;
use crate::sealed::SecretSealer;
use crate::shares::ShareManager;
use crate::storage::BlobStore;

pub fn test_auth() -> (AuthManager, Arc<Database>) {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let audit = Arc::new(Audit::new(db.clone()));
    let auth = AuthManager::new(
        db.clone(),
        audit,
        SecretSealer::new([42u8; 32]),
        AuthConfig {
            jwt_secret: "test-secret".into(),
            session_ttl: Duration::hours(1),
            default_quota_bytes: 10_000,
            totp_issuer: "cachet-test".into(),
        },
    );
    (auth, db)
}

pub struct TestEnv {
    pub db: Arc<Database>,
    pub blobs: Arc<BlobStore>,
    pub files: FileManager,
    pub folders: FolderManager,
    pub shares: ShareManager,
    pub user_id: Uuid,
    _tmp: tempfile::TempDir,
}

impl TestEnv {
    /// Insert an extra user directly, bypassing registration.
    pub fn add_user(&self, username: &str, quota: i64) -> Uuid {
        let id = Uuid::new_v4();
        let user = UserRow {
            id: id.to_string(),
            email: format!("{username}@test.invalid"),
            username: username.to_string(),
            password_hash: "x".into(),
            totp_secret_enc: None,
            totp_secret_nonce: None,
            master_key_envelope: "mk".into(),
            public_key: "pk".into(),
            private_key_envelope: "sk".into(),
            storage_quota: quota,
            storage_used: 0,
            is_active: true,
            last_login: None,
            created_at: String::new(),
        };
        self.db
            .with_conn(|conn| queries::users::insert(conn, &user))
            .unwrap();
        id
    }
}

/// A full environment with one seeded user holding `quota` bytes.
pub async fn test_env(quota: i64) -> TestEnv {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let tmp = tempfile::tempdir().unwrap();
    let blobs = Arc::new(BlobStore::new(tmp.path().to_path_buf()).await.unwrap());
    let audit = Arc::new(Audit::new(db.clone()));

    let files = FileManager::new(db.clone(), blobs.clone(), audit.clone());
    let folders = FolderManager::new(db.clone(), blobs.clone(), audit.clone());
    let shares = ShareManager::new(db.clone(), blobs.clone(), audit.clone());

    let env = TestEnv {
        db,
        blobs,
        files,
        folders,
        shares,
        user_id: Uuid::nil(),
        _tmp: tmp,
    };
    let user_id = env.add_user("alice", quota);
    TestEnv { user_id, ..env }
}
