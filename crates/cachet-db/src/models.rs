//! Database row types — these map directly to SQLite rows.
//! Distinct from the cachet-types API models to keep the DB layer independent.

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub email: String,
    pub username: String,
    pub password_hash: String,
    pub totp_secret_enc: Option<Vec<u8>>,
    pub totp_secret_nonce: Option<Vec<u8>>,
    pub master_key_envelope: String,
    pub public_key: String,
    pub private_key_envelope: String,
    pub storage_quota: i64,
    pub storage_used: i64,
    pub is_active: bool,
    pub last_login: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct FolderRow {
    pub id: String,
    pub user_id: String,
    pub parent_folder_id: Option<String>,
    pub name_enc: Vec<u8>,
    pub name_iv: Vec<u8>,
    pub is_deleted: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct FileRow {
    pub id: String,
    pub user_id: String,
    pub parent_folder_id: Option<String>,
    pub filename_enc: Vec<u8>,
    pub filename_iv: Vec<u8>,
    pub content_key_envelope: String,
    pub file_size: i64,
    pub encrypted_size: i64,
    pub mime_type: Option<String>,
    pub storage_path: String,
    pub file_hash: Option<String>,
    pub version: i64,
    pub is_deleted: bool,
    pub deleted_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct FileVersionRow {
    pub file_id: String,
    pub version_number: i64,
    pub storage_path: String,
    pub file_size: i64,
    pub content_key_envelope: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct ShareRow {
    pub id: String,
    pub file_id: String,
    pub owner_id: String,
    pub share_token: String,
    pub content_key_envelope: String,
    pub password_hash: Option<String>,
    pub expires_at: Option<String>,
    pub max_downloads: Option<i64>,
    pub download_count: i64,
    pub is_active: bool,
    pub last_accessed: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct SessionRow {
    pub id: String,
    pub user_id: String,
    pub token_hash: String,
    pub expires_at: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub last_activity: String,
    pub created_at: String,
}
