use axum::{extract::State, Json};

use crate::error::AppResult;
use crate::models::plan::PublicPlan;
use crate::AppState;

/// Active plans for the landing page, in display order.
pub async fn list_plans(State(state): State<AppState>) -> AppResult<Json<Vec<PublicPlan>>> {
    let plans = state
        .leads
        .store()
        .active_plans(state.leads.company_id())
        .await?;

    Ok(Json(plans.into_iter().map(PublicPlan::from).collect()))
}
