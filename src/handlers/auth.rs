use axum::{extract::State, Extension, Json};
use chrono::{Duration, Utc};
use uuid::Uuid;
use validator::Validate;

use crate::auth::{
    jwt::{create_access_token, generate_magic_token, hash_token, AccessToken},
    middleware::AuthUser,
};
use crate::dto::{
    validation_error, MagicLinkRequest, MeResponse, MessageResponse, VerifyMagicLinkRequest,
};
use crate::error::{AppError, AppResult};
use crate::models::subscriber::AuthorizedEmail;
use crate::services::mailer::OutgoingEmail;
use crate::services::templates;
use crate::AppState;

/// Store a magic-link token hash with its expiry.
async fn store_magic_token(
    db: &sqlx::PgPool,
    email: &str,
    raw_token: &str,
    ttl_secs: i64,
) -> AppResult<()> {
    let token_hash = hash_token(raw_token);
    let expires_at = Utc::now() + Duration::seconds(ttl_secs);

    sqlx::query(
        r#"
        INSERT INTO magic_link_tokens (id, email, token_hash, expires_at)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(email)
    .bind(&token_hash)
    .bind(expires_at)
    .execute(db)
    .await?;

    Ok(())
}

async fn authorized_admin_id(db: &sqlx::PgPool, email: &str) -> AppResult<Option<Uuid>> {
    let admin = sqlx::query_as::<_, AuthorizedEmail>(
        "SELECT * FROM authorized_emails WHERE email = $1",
    )
    .bind(email)
    .fetch_optional(db)
    .await?;
    Ok(admin.map(|a| a.id))
}

/// POST /api/auth/magic-link
pub async fn request_magic_link(
    State(state): State<AppState>,
    Json(body): Json<MagicLinkRequest>,
) -> AppResult<Json<MessageResponse>> {
    body.validate().map_err(validation_error)?;
    let email = body.email.trim().to_lowercase();

    if authorized_admin_id(&state.db, &email).await?.is_none() {
        tracing::warn!(email = %email, "Magic link requested for unauthorized email");
        return Err(AppError::Forbidden);
    }

    let raw_token = generate_magic_token();
    store_magic_token(&state.db, &email, &raw_token, state.config.magic_link_ttl_secs).await?;

    let url = format!(
        "{}/admin?token={}",
        state.config.frontend_url.trim_end_matches('/'),
        raw_token
    );
    let rendered = templates::magic_link(&url, state.config.magic_link_ttl_secs / 60, Utc::now());

    state
        .mailer
        .send(OutgoingEmail {
            to: email.clone(),
            subject: rendered.subject,
            html: rendered.html,
            reply_to: None,
        })
        .await
        .map_err(|e| AppError::Upstream(format!("magic link email: {}", e)))?;

    tracing::info!(email = %email, "Magic link sent");
    Ok(Json(MessageResponse {
        message: "Enviamos um link de acesso para o seu email".into(),
    }))
}

/// POST /api/auth/verify
///
/// Consumes the token: a second verify with the same token fails.
pub async fn verify_magic_link(
    State(state): State<AppState>,
    Json(body): Json<VerifyMagicLinkRequest>,
) -> AppResult<Json<AccessToken>> {
    body.validate().map_err(validation_error)?;
    let token_hash = hash_token(body.token.trim());

    let email = sqlx::query_scalar::<_, String>(
        r#"
        UPDATE magic_link_tokens SET used_at = NOW()
        WHERE token_hash = $1 AND used_at IS NULL AND expires_at > NOW()
        RETURNING email
        "#,
    )
    .bind(&token_hash)
    .fetch_optional(&state.db)
    .await?
    .ok_or(AppError::Unauthorized)?;

    // Access may have been revoked after the link went out.
    let admin_id = authorized_admin_id(&state.db, &email)
        .await?
        .ok_or(AppError::Forbidden)?;

    let token = create_access_token(admin_id, &email, &state.config)?;
    tracing::info!(email = %email, "Admin signed in");
    Ok(Json(token))
}

/// GET /api/me
pub async fn me(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> AppResult<Json<MeResponse>> {
    let gate = state.gate.current(&auth_user.email).await?;

    Ok(Json(MeResponse {
        id: auth_user.id,
        email: auth_user.email,
        gate,
    }))
}
