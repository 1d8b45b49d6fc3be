use std::net::SocketAddr;

use axum::{
    Extension, Json,
    body::Body,
    extract::{ConnectInfo, Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use cachet_core::auth::AuthContext;
use cachet_core::shares::{NewShare, ShareUpdate};
use cachet_types::api::{
    CreateShareRequest, PublicShareInfo, SharePasswordQuery, ShareResponse, UpdateShareRequest,
};

use super::{ApiResult, AppState, client_info, share_response};

pub async fn create(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<CreateShareRequest>,
) -> ApiResult<impl IntoResponse> {
    let row = state.shares.create(
        ctx.user_id,
        NewShare {
            file_id: req.file_id,
            content_key_envelope: req.content_key_envelope,
            password: req.password,
            expires_at: req.expires_at,
            max_downloads: req.max_downloads,
        },
        &client_info(&addr, &headers),
    )?;
    Ok((StatusCode::CREATED, Json(share_response(row)?)))
}

pub async fn list(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> ApiResult<Json<Vec<ShareResponse>>> {
    let rows = state.shares.list_for_owner(ctx.user_id)?;
    Ok(Json(
        rows.into_iter()
            .map(share_response)
            .collect::<ApiResult<Vec<_>>>()?,
    ))
}

pub async fn update(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(share_id): Path<Uuid>,
    Json(req): Json<UpdateShareRequest>,
) -> ApiResult<Json<ShareResponse>> {
    let row = state.shares.update(
        share_id,
        ctx.user_id,
        ShareUpdate {
            password: req.password,
            clear_password: req.clear_password,
            expires_at: req.expires_at,
            max_downloads: req.max_downloads,
            is_active: req.is_active,
        },
        &client_info(&addr, &headers),
    )?;
    Ok(Json(share_response(row)?))
}

pub async fn revoke(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(share_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state
        .shares
        .revoke(share_id, ctx.user_id, &client_info(&addr, &headers))?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(share_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state
        .shares
        .delete(share_id, ctx.user_id, &client_info(&addr, &headers))?;
    Ok(StatusCode::NO_CONTENT)
}

// -- Anonymous endpoints --

pub async fn public_info(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Query(q): Query<SharePasswordQuery>,
) -> ApiResult<Json<PublicShareInfo>> {
    let info = state.shares.info(&token, q.password.as_deref())?;
    Ok(Json(info))
}

pub async fn public_download(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(token): Path<String>,
    Query(q): Query<SharePasswordQuery>,
) -> ApiResult<impl IntoResponse> {
    let client = client_info(&addr, &headers);
    let (_share, file, blob) = state
        .shares
        .download(&token, q.password.as_deref(), &client)
        .await?;
    let body = Body::from_stream(ReaderStream::new(blob));
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_LENGTH, file.encrypted_size.to_string()),
        ],
        body,
    ))
}
