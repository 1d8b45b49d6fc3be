use std::net::SocketAddr;

use axum::{
    Extension, Json,
    extract::{ConnectInfo, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

use cachet_core::auth::AuthContext;
use cachet_types::api::{
    CreateFolderRequest, FolderResponse, FolderTreeNode, MoveFolderRequest, RenameFolderRequest,
    RestoreSummary,
};

use super::{ApiResult, AppState, client_info, decode_b64, folder_response, tree_response};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub parent_folder_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct TreeQuery {
    pub depth: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    #[serde(default)]
    pub cascade: bool,
    #[serde(default)]
    pub permanent: bool,
}

pub async fn create(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<CreateFolderRequest>,
) -> ApiResult<impl IntoResponse> {
    let row = state.folders.create(
        ctx.user_id,
        req.parent_folder_id,
        decode_b64(&req.name, "name")?,
        decode_b64(&req.name_iv, "name_iv")?,
        &client_info(&addr, &headers),
    )?;
    Ok((StatusCode::CREATED, Json(folder_response(row)?)))
}

pub async fn list(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Query(q): Query<ListQuery>,
) -> ApiResult<Json<Vec<FolderResponse>>> {
    let rows = state.folders.list(ctx.user_id, q.parent_folder_id)?;
    Ok(Json(
        rows.into_iter()
            .map(folder_response)
            .collect::<ApiResult<Vec<_>>>()?,
    ))
}

pub async fn tree(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Query(q): Query<TreeQuery>,
) -> ApiResult<Json<Vec<FolderTreeNode>>> {
    let nodes = state
        .folders
        .tree(ctx.user_id, q.depth.unwrap_or(usize::MAX))?;
    Ok(Json(
        nodes
            .into_iter()
            .map(tree_response)
            .collect::<ApiResult<Vec<_>>>()?,
    ))
}

pub async fn breadcrumbs(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(folder_id): Path<Uuid>,
) -> ApiResult<Json<Vec<FolderResponse>>> {
    let rows = state.folders.breadcrumbs(folder_id, ctx.user_id)?;
    Ok(Json(
        rows.into_iter()
            .map(folder_response)
            .collect::<ApiResult<Vec<_>>>()?,
    ))
}

pub async fn rename(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(folder_id): Path<Uuid>,
    Json(req): Json<RenameFolderRequest>,
) -> ApiResult<Json<FolderResponse>> {
    let row = state.folders.rename(
        folder_id,
        ctx.user_id,
        decode_b64(&req.name, "name")?,
        decode_b64(&req.name_iv, "name_iv")?,
        &client_info(&addr, &headers),
    )?;
    Ok(Json(folder_response(row)?))
}

pub async fn move_folder(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(folder_id): Path<Uuid>,
    Json(req): Json<MoveFolderRequest>,
) -> ApiResult<Json<FolderResponse>> {
    let row = state.folders.move_folder(
        folder_id,
        ctx.user_id,
        req.parent_folder_id,
        &client_info(&addr, &headers),
    )?;
    Ok(Json(folder_response(row)?))
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(folder_id): Path<Uuid>,
    Query(q): Query<DeleteQuery>,
) -> ApiResult<StatusCode> {
    state
        .folders
        .delete(
            folder_id,
            ctx.user_id,
            q.cascade,
            q.permanent,
            &client_info(&addr, &headers),
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn restore(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(folder_id): Path<Uuid>,
) -> ApiResult<Json<RestoreSummary>> {
    let summary = state
        .folders
        .restore(folder_id, ctx.user_id, &client_info(&addr, &headers))?;
    Ok(Json(summary))
}
