use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

use crate::AppState;

pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "trainer-leads-api",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

fn configured(value: &str) -> &'static str {
    if value.is_empty() {
        "not_configured"
    } else {
        "ok"
    }
}

/// Ready when the database answers. Billing and email are reported but do not
/// block readiness: leads are still stored without them.
pub async fn readyz(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let db_ok = sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(&state.db)
        .await
        .is_ok();

    let checks = json!({
        "database": if db_ok { "ok" } else { "failed" },
        "billing": configured(&state.config.stripe_secret_key),
        "email": configured(&state.config.resend_api_key),
    });

    if db_ok {
        (
            StatusCode::OK,
            Json(json!({ "status": "ready", "checks": checks })),
        )
    } else {
        tracing::error!("Readiness check failed: database unreachable");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "not_ready", "checks": checks })),
        )
    }
}
