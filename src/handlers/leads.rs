use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::auth::middleware::AuthUser;
use crate::dto::{
    validation_error, CreateLeadRequest, DeleteResponse, SaveDraftRequest, UpdateLeadRequest,
};
use crate::error::{AppError, AppResult};
use crate::models::lead::{Lead, LeadKind};
use crate::services::drafts::Draft;
use crate::services::leads::pipeline::LeadUsage;
use crate::services::leads::store::{LeadFilter, PurgeReport};
use crate::AppState;

pub async fn list_leads(
    State(state): State<AppState>,
    Query(filter): Query<LeadFilter>,
) -> AppResult<Json<Vec<Lead>>> {
    let leads = state.leads.list(&filter).await?;
    Ok(Json(leads))
}

pub async fn create_lead(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(body): Json<CreateLeadRequest>,
) -> AppResult<(StatusCode, Json<Lead>)> {
    body.validate_request()?;

    let lead = state.leads.create_manual(body.into_manual_lead()).await?;
    state.drafts.discard(&auth_user.email).await;

    tracing::info!(admin = %auth_user.email, kind = ?lead.kind(), "Lead created manually");
    Ok((StatusCode::CREATED, Json(lead)))
}

pub async fn update_lead(
    State(state): State<AppState>,
    Path((kind, id)): Path<(LeadKind, Uuid)>,
    Json(body): Json<UpdateLeadRequest>,
) -> AppResult<Json<Lead>> {
    body.validate().map_err(validation_error)?;
    body.validate_at_least_one()?;

    let lead = state.leads.update(kind, id, body.into()).await?;
    Ok(Json(lead))
}

pub async fn delete_lead(
    State(state): State<AppState>,
    Path((kind, id)): Path<(LeadKind, Uuid)>,
) -> AppResult<Json<DeleteResponse>> {
    state.leads.delete(kind, id).await?;
    Ok(Json(DeleteResponse { deleted: true, id }))
}

pub async fn cleanup_leads(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> AppResult<Json<PurgeReport>> {
    tracing::info!(admin = %auth_user.email, "Lead retention cleanup requested");
    let report = state.leads.cleanup().await?;
    Ok(Json(report))
}

pub async fn lead_usage(State(state): State<AppState>) -> AppResult<Json<LeadUsage>> {
    Ok(Json(state.leads.usage().await?))
}

// ============================================================================
// Draft autosave
// ============================================================================

pub async fn get_draft(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> AppResult<Json<Draft>> {
    state
        .drafts
        .load(&auth_user.email)
        .await
        .map(Json)
        .ok_or_else(|| AppError::NotFound("Nenhum rascunho salvo".into()))
}

pub async fn save_draft(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(body): Json<SaveDraftRequest>,
) -> AppResult<Json<Draft>> {
    if !body.data.is_object() {
        return Err(AppError::validation("data", "Rascunho inválido"));
    }
    Ok(Json(state.drafts.save(&auth_user.email, body.data).await))
}

pub async fn discard_draft(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> StatusCode {
    state.drafts.discard(&auth_user.email).await;
    StatusCode::NO_CONTENT
}
