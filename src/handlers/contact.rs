use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, State},
    Json,
};
use validator::Validate;

use crate::auth::rate_limit::Purpose;
use crate::dto::{validation_error, ContactRequest};
use crate::error::AppResult;
use crate::services::leads::pipeline::ContactReceipt;
use crate::AppState;

/// POST /api/contact
pub async fn submit_contact(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(body): Json<ContactRequest>,
) -> AppResult<Json<ContactReceipt>> {
    let client = addr.ip().to_string();

    state
        .leads
        .ensure_cooldown_elapsed(Purpose::ContactForm, &client)
        .await?;

    body.validate().map_err(validation_error)?;
    if let Err(e) = body.validate_contact_rules() {
        tracing::debug!(client = %client, error = %e, "Contact form rejected");
        return Err(e);
    }

    let receipt = state
        .leads
        .submit_contact(&client, body.into_submission())
        .await?;

    Ok(Json(receipt))
}
