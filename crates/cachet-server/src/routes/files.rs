use std::net::SocketAddr;

use axum::{
    Extension, Json,
    body::Body,
    extract::{ConnectInfo, Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use bytes::Bytes;
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use cachet_core::auth::AuthContext;
use cachet_core::error::ServiceError;
use cachet_core::files::{NewFile, Page};
use cachet_db::queries::files::{FileSort, SortDir};
use cachet_types::api::{
    FileListResponse, FileResponse, FileVersionResponse, MoveFileRequest, RenameFileRequest,
    StorageStatsResponse, UploadFileRequest, UploadVersionRequest,
};

use super::{ApiError, ApiResult, AppState, client_info, decode_b64, file_response, parse_dt};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub parent_folder_id: Option<Uuid>,
    pub sort: Option<String>,
    pub dir: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

fn parse_sort(q: &ListQuery) -> ApiResult<(FileSort, SortDir)> {
    let sort = match q.sort.as_deref() {
        None | Some("created_at") => FileSort::CreatedAt,
        Some("updated_at") => FileSort::UpdatedAt,
        Some("size") => FileSort::Size,
        Some(other) => {
            return Err(ApiError(ServiceError::Validation(format!(
                "unknown sort key {other:?}"
            ))));
        }
    };
    let dir = match q.dir.as_deref() {
        None | Some("desc") => SortDir::Desc,
        Some("asc") => SortDir::Asc,
        Some(other) => {
            return Err(ApiError(ServiceError::Validation(format!(
                "unknown sort direction {other:?}"
            ))));
        }
    };
    Ok((sort, dir))
}

pub async fn upload(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<UploadFileRequest>,
) -> ApiResult<impl IntoResponse> {
    let client = client_info(&addr, &headers);
    let new = NewFile {
        parent_folder_id: req.parent_folder_id,
        filename_enc: decode_b64(&req.filename, "filename")?,
        filename_iv: decode_b64(&req.filename_iv, "filename_iv")?,
        content_key_envelope: req.content_key_envelope,
        file_size: req.file_size,
        mime_type: req.mime_type,
        file_hash: req.file_hash,
        content: Bytes::from(decode_b64(&req.content, "content")?),
    };
    let row = state.files.create(ctx.user_id, new, &client).await?;
    Ok((StatusCode::CREATED, Json(file_response(row)?)))
}

pub async fn list(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Query(q): Query<ListQuery>,
) -> ApiResult<Json<FileListResponse>> {
    let (sort, dir) = parse_sort(&q)?;
    let page = Page {
        limit: q.limit.unwrap_or(100),
        offset: q.offset.unwrap_or(0),
    };
    let (rows, total) = state
        .files
        .list(ctx.user_id, q.parent_folder_id, sort, dir, page)?;
    let files = rows
        .into_iter()
        .map(file_response)
        .collect::<ApiResult<Vec<_>>>()?;
    Ok(Json(FileListResponse { files, total }))
}

pub async fn trash(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> ApiResult<Json<Vec<FileResponse>>> {
    let rows = state.files.list_trash(ctx.user_id)?;
    Ok(Json(
        rows.into_iter()
            .map(file_response)
            .collect::<ApiResult<Vec<_>>>()?,
    ))
}

pub async fn stats(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> ApiResult<Json<StorageStatsResponse>> {
    let stats = state.files.storage_stats(ctx.user_id)?;
    Ok(Json(StorageStatsResponse {
        storage_used: stats.storage_used,
        storage_quota: stats.storage_quota,
        file_count: stats.file_count,
    }))
}

pub async fn get(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(file_id): Path<Uuid>,
) -> ApiResult<Json<FileResponse>> {
    let row = state.files.get(file_id, ctx.user_id)?;
    Ok(Json(file_response(row)?))
}

pub async fn download(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(file_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let (row, blob) = state.files.download(file_id, ctx.user_id).await?;
    let body = Body::from_stream(ReaderStream::new(blob));
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_LENGTH, row.encrypted_size.to_string()),
        ],
        body,
    ))
}

pub async fn rename(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(file_id): Path<Uuid>,
    Json(req): Json<RenameFileRequest>,
) -> ApiResult<Json<FileResponse>> {
    let row = state.files.rename(
        file_id,
        ctx.user_id,
        decode_b64(&req.filename, "filename")?,
        decode_b64(&req.filename_iv, "filename_iv")?,
        &client_info(&addr, &headers),
    )?;
    Ok(Json(file_response(row)?))
}

pub async fn move_file(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(file_id): Path<Uuid>,
    Json(req): Json<MoveFileRequest>,
) -> ApiResult<Json<FileResponse>> {
    let row = state.files.move_file(
        file_id,
        ctx.user_id,
        req.parent_folder_id,
        &client_info(&addr, &headers),
    )?;
    Ok(Json(file_response(row)?))
}

pub async fn soft_delete(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(file_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state
        .files
        .soft_delete(file_id, ctx.user_id, &client_info(&addr, &headers))?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn restore(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(file_id): Path<Uuid>,
) -> ApiResult<Json<FileResponse>> {
    let row = state
        .files
        .restore(file_id, ctx.user_id, &client_info(&addr, &headers))?;
    Ok(Json(file_response(row)?))
}

pub async fn permanent_delete(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(file_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state
        .files
        .permanent_delete(file_id, ctx.user_id, &client_info(&addr, &headers))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn create_version(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(file_id): Path<Uuid>,
    Json(req): Json<UploadVersionRequest>,
) -> ApiResult<impl IntoResponse> {
    let version = state
        .files
        .create_version(
            file_id,
            ctx.user_id,
            Bytes::from(decode_b64(&req.content, "content")?),
            req.file_size,
            req.content_key_envelope,
            &client_info(&addr, &headers),
        )
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(FileVersionResponse {
            version_number: version.version_number,
            file_size: version.file_size,
            content_key_envelope: version.content_key_envelope,
            created_at: parse_dt(&version.created_at)?,
        }),
    ))
}

pub async fn list_versions(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(file_id): Path<Uuid>,
) -> ApiResult<Json<Vec<FileVersionResponse>>> {
    let versions = state.files.list_versions(file_id, ctx.user_id)?;
    let out = versions
        .into_iter()
        .map(|v| {
            Ok(FileVersionResponse {
                version_number: v.version_number,
                file_size: v.file_size,
                content_key_envelope: v.content_key_envelope,
                created_at: parse_dt(&v.created_at)?,
            })
        })
        .collect::<ApiResult<Vec<_>>>()?;
    Ok(Json(out))
}
