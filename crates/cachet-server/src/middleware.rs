use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use cachet_core::error::ServiceError;

use crate::routes::{ApiError, AppState};

/// Validate the bearer token against the session store and attach the
/// resulting identity to the request.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError(ServiceError::Auth("missing bearer token".into())))?;

    let ctx = state.auth.validate_session(token)?;
    req.extensions_mut().insert(ctx);
    Ok(next.run(req).await)
}
