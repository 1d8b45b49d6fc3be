//! HTTP surface: thin translation between requests and the core managers.

pub mod auth;
pub mod files;
pub mod folders;
pub mod shares;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::error;
use uuid::Uuid;

use cachet_core::auth::{AuthManager, IssuedSession};
use cachet_core::error::ServiceError;
use cachet_core::files::FileManager;
use cachet_core::folders::{FolderManager, FolderNode};
use cachet_core::shares::ShareManager;
use cachet_db::models::{FileRow, FolderRow, ShareRow};
use cachet_db::parse_sql_datetime;
use cachet_types::api::{
    ClientInfo, FileResponse, FolderResponse, FolderTreeNode, SessionResponse, ShareResponse,
};

#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthManager>,
    pub files: Arc<FileManager>,
    pub folders: Arc<FolderManager>,
    pub shares: Arc<ShareManager>,
}

// -- Error translation --

pub struct ApiError(pub ServiceError);

pub type ApiResult<T> = Result<T, ApiError>;

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        ApiError(e)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            ServiceError::Validation(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ServiceError::Auth(m) => (StatusCode::UNAUTHORIZED, m.clone()),
            ServiceError::Forbidden(m) => (StatusCode::FORBIDDEN, m.clone()),
            ServiceError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            ServiceError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
            ServiceError::QuotaExceeded => {
                (StatusCode::PAYMENT_REQUIRED, self.0.to_string())
            }
            ServiceError::Storage(m) => {
                error!("Storage backend error: {}", m);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "storage backend unavailable".into(),
                )
            }
            ServiceError::Internal(e) => {
                error!("Internal error: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".into(),
                )
            }
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

// -- Shared helpers --

pub fn client_info(addr: &SocketAddr, headers: &HeaderMap) -> ClientInfo {
    ClientInfo {
        ip: Some(addr.ip().to_string()),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string()),
    }
}

pub fn decode_b64(value: &str, field: &str) -> ApiResult<Vec<u8>> {
    STANDARD
        .decode(value)
        .map_err(|_| ApiError(ServiceError::Validation(format!("{field} is not valid base64"))))
}

fn parse_dt(s: &str) -> ApiResult<DateTime<Utc>> {
    parse_sql_datetime(s).map_err(|e| ApiError(ServiceError::Internal(e)))
}

fn parse_opt_dt(s: Option<&str>) -> ApiResult<Option<DateTime<Utc>>> {
    s.map(parse_dt).transpose()
}

fn parse_id(s: &str) -> ApiResult<Uuid> {
    s.parse()
        .map_err(|_| ApiError(ServiceError::Internal(anyhow::anyhow!("malformed id {s}"))))
}

fn parse_opt_id(s: Option<&str>) -> ApiResult<Option<Uuid>> {
    s.map(parse_id).transpose()
}

pub fn session_response(s: IssuedSession) -> SessionResponse {
    SessionResponse {
        user_id: s.user_id,
        token: s.token,
        expires_at: s.expires_at,
    }
}

pub fn file_response(row: FileRow) -> ApiResult<FileResponse> {
    Ok(FileResponse {
        id: parse_id(&row.id)?,
        parent_folder_id: parse_opt_id(row.parent_folder_id.as_deref())?,
        filename: STANDARD.encode(&row.filename_enc),
        filename_iv: STANDARD.encode(&row.filename_iv),
        content_key_envelope: row.content_key_envelope,
        file_size: row.file_size,
        encrypted_size: row.encrypted_size,
        mime_type: row.mime_type,
        file_hash: row.file_hash,
        version: row.version,
        is_deleted: row.is_deleted,
        deleted_at: parse_opt_dt(row.deleted_at.as_deref())?,
        created_at: parse_dt(&row.created_at)?,
        updated_at: parse_dt(&row.updated_at)?,
    })
}

pub fn folder_response(row: FolderRow) -> ApiResult<FolderResponse> {
    Ok(FolderResponse {
        id: parse_id(&row.id)?,
        parent_folder_id: parse_opt_id(row.parent_folder_id.as_deref())?,
        name: STANDARD.encode(&row.name_enc),
        name_iv: STANDARD.encode(&row.name_iv),
        is_deleted: row.is_deleted,
        created_at: parse_dt(&row.created_at)?,
        updated_at: parse_dt(&row.updated_at)?,
    })
}

pub fn tree_response(node: FolderNode) -> ApiResult<FolderTreeNode> {
    Ok(FolderTreeNode {
        folder: folder_response(node.folder)?,
        children: node
            .children
            .into_iter()
            .map(tree_response)
            .collect::<ApiResult<Vec<_>>>()?,
    })
}

pub fn share_response(row: ShareRow) -> ApiResult<ShareResponse> {
    Ok(ShareResponse {
        id: parse_id(&row.id)?,
        file_id: parse_id(&row.file_id)?,
        share_token: row.share_token,
        has_password: row.password_hash.is_some(),
        expires_at: parse_opt_dt(row.expires_at.as_deref())?,
        max_downloads: row.max_downloads,
        download_count: row.download_count,
        is_active: row.is_active,
        last_accessed: parse_opt_dt(row.last_accessed.as_deref())?,
        created_at: parse_dt(&row.created_at)?,
    })
}
