use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// -- JWT Claims --

/// Bearer-token claims. `sid` binds the token to a server-side session row;
/// a cryptographically valid token whose session was revoked is rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub sid: Uuid,
    pub exp: usize,
}

/// Caller metadata recorded on session rows and audit events.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub email: String,
    pub username: String,
    pub password: String,
    /// Master key wrapped with the user's password-derived key (client-side).
    pub master_key_envelope: String,
    pub public_key: String,
    pub private_key_envelope: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    /// Email or username.
    pub identifier: String,
    pub password: String,
    pub totp_code: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub user_id: Uuid,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Login either yields a session or signals that a TOTP code is needed.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub totp_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Serialize)]
pub struct TotpSetupResponse {
    pub secret: String,
    pub otpauth_uri: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TotpEnableRequest {
    pub secret: String,
    pub code: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TotpDisableRequest {
    pub password: String,
}

// -- Files --

/// Upload payload. Content and metadata travel base64-encoded inside JSON;
/// the server never sees plaintext.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UploadFileRequest {
    pub filename: String,
    pub filename_iv: String,
    pub content_key_envelope: String,
    pub parent_folder_id: Option<Uuid>,
    /// Plaintext size as measured by the client before encryption.
    pub file_size: i64,
    pub mime_type: Option<String>,
    pub file_hash: Option<String>,
    /// Base64 of the encrypted content.
    pub content: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UploadVersionRequest {
    pub content_key_envelope: String,
    pub file_size: i64,
    pub content: String,
}

/// Encrypted metadata fields travel as base64; the server never decrypts them.
#[derive(Debug, Serialize)]
pub struct FileResponse {
    pub id: Uuid,
    pub parent_folder_id: Option<Uuid>,
    pub filename: String,
    pub filename_iv: String,
    pub content_key_envelope: String,
    pub file_size: i64,
    pub encrypted_size: i64,
    pub mime_type: Option<String>,
    pub file_hash: Option<String>,
    pub version: i64,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct FileListResponse {
    pub files: Vec<FileResponse>,
    pub total: i64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RenameFileRequest {
    pub filename: String,
    pub filename_iv: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MoveFileRequest {
    pub parent_folder_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct FileVersionResponse {
    pub version_number: i64,
    pub file_size: i64,
    pub content_key_envelope: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct StorageStatsResponse {
    pub storage_used: i64,
    pub storage_quota: i64,
    pub file_count: i64,
}

// -- Folders --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateFolderRequest {
    pub name: String,
    pub name_iv: String,
    pub parent_folder_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RenameFolderRequest {
    pub name: String,
    pub name_iv: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MoveFolderRequest {
    pub parent_folder_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct FolderResponse {
    pub id: Uuid,
    pub parent_folder_id: Option<Uuid>,
    pub name: String,
    pub name_iv: String,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct FolderTreeNode {
    pub folder: FolderResponse,
    pub children: Vec<FolderTreeNode>,
}

/// Summary of a cascading restore: restores are per-item, so some files may
/// no longer fit within quota while the rest succeed.
#[derive(Debug, Serialize)]
pub struct RestoreSummary {
    pub restored_files: u64,
    pub failed_files: u64,
}

// -- Shares --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateShareRequest {
    pub file_id: Uuid,
    /// Content key re-wrapped for the share recipient, not the owner's key.
    pub content_key_envelope: String,
    pub password: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub max_downloads: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateShareRequest {
    pub password: Option<String>,
    /// Remove password protection entirely.
    #[serde(default)]
    pub clear_password: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub max_downloads: Option<i64>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct ShareResponse {
    pub id: Uuid,
    pub file_id: Uuid,
    pub share_token: String,
    pub has_password: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub max_downloads: Option<i64>,
    pub download_count: i64,
    pub is_active: bool,
    pub last_accessed: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Default)]
pub struct SharePasswordQuery {
    pub password: Option<String>,
}

/// Landing-page metadata for an anonymous share visitor. The content key
/// envelope is only present once the password gate (if any) has been passed.
#[derive(Debug, Serialize)]
pub struct PublicShareInfo {
    pub filename: String,
    pub filename_iv: String,
    pub file_size: i64,
    pub mime_type: Option<String>,
    pub has_password: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_key_envelope: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}
