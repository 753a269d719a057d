use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::auth::jwt::verify_token;
use crate::config::Config;
use crate::error::AppError;
use crate::AppState;

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: String,
}

pub fn authenticate(token: &str, config: &Config) -> Result<AuthUser, AppError> {
    let token_data = verify_token(token, config)?;
    Ok(AuthUser {
        id: token_data.claims.sub,
        email: token_data.claims.email,
    })
}

pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let auth_header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::Unauthorized)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(AppError::Unauthorized)?;

    let auth_user = authenticate(token, &state.config)?;

    req.extensions_mut().insert(auth_user);
    Ok(next.run(req).await)
}

/// Must run inside `require_auth`. Lets the request through only when the
/// subscription gate says `Entitled`.
pub async fn require_entitled(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let auth_user = req
        .extensions()
        .get::<AuthUser>()
        .cloned()
        .ok_or(AppError::Unauthorized)?;

    let check = state.gate.current(&auth_user.email).await?;
    if !check.view.is_entitled() {
        tracing::debug!(email = %auth_user.email, "Admin route blocked by subscription gate");
        return Err(AppError::PaymentRequired);
    }

    Ok(next.run(req).await)
}
