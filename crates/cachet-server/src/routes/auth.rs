use std::net::SocketAddr;

use axum::{
    Extension, Json,
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde_json::json;

use cachet_core::auth::{AuthContext, KeyEnvelopes, LoginOutcome};
use cachet_types::api::{
    ChangePasswordRequest, LoginRequest, LoginResponse, RegisterRequest, TotpDisableRequest,
    TotpEnableRequest, TotpSetupResponse,
};

use super::{ApiResult, AppState, client_info, session_response};

pub async fn register(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    let client = client_info(&addr, &headers);
    let session = state.auth.register(
        &req.email,
        &req.username,
        &req.password,
        KeyEnvelopes {
            master_key_envelope: req.master_key_envelope,
            public_key: req.public_key,
            private_key_envelope: req.private_key_envelope,
        },
        &client,
    )?;
    Ok((StatusCode::CREATED, Json(session_response(session))))
}

pub async fn login(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let client = client_info(&addr, &headers);
    let outcome = state
        .auth
        .login(&req.identifier, &req.password, req.totp_code.as_deref(), &client)?;
    let resp = match outcome {
        LoginOutcome::Session(s) => LoginResponse {
            totp_required: false,
            session: Some(session_response(s)),
        },
        LoginOutcome::TotpRequired => LoginResponse {
            totp_required: true,
            session: None,
        },
    };
    Ok(Json(resp))
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    state.auth.logout(ctx, &client_info(&addr, &headers))?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn logout_all(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    let revoked = state
        .auth
        .logout_all(ctx.user_id, &client_info(&addr, &headers))?;
    Ok(Json(json!({ "revoked_sessions": revoked })))
}

pub async fn change_password(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<ChangePasswordRequest>,
) -> ApiResult<StatusCode> {
    state.auth.change_password(
        ctx.user_id,
        &req.current_password,
        &req.new_password,
        &client_info(&addr, &headers),
    )?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn totp_setup(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> ApiResult<Json<TotpSetupResponse>> {
    let (secret, otpauth_uri) = state.auth.setup_totp(ctx.user_id)?;
    Ok(Json(TotpSetupResponse { secret, otpauth_uri }))
}

pub async fn totp_enable(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<TotpEnableRequest>,
) -> ApiResult<StatusCode> {
    state.auth.enable_totp(
        ctx.user_id,
        &req.secret,
        &req.code,
        &client_info(&addr, &headers),
    )?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn totp_disable(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<TotpDisableRequest>,
) -> ApiResult<StatusCode> {
    state
        .auth
        .disable_totp(ctx.user_id, &req.password, &client_info(&addr, &headers))?;
    Ok(StatusCode::NO_CONTENT)
}
