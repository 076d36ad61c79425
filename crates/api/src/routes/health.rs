//! Health check endpoints.

use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

use crate::app::AppState;

/// Full health check including database connectivity.
///
/// GET /api/health
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let database_up = sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(&state.pool)
        .await
        .is_ok();

    let status = if database_up { "ok" } else { "degraded" };
    let code = if database_up {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(json!({
            "status": status,
            "version": env!("CARGO_PKG_VERSION"),
            "database": if database_up { "up" } else { "down" },
        })),
    )
}

/// Readiness probe: the process can serve traffic.
///
/// GET /api/health/ready
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let database_up = sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(&state.pool)
        .await
        .is_ok();

    if database_up {
        (StatusCode::OK, Json(json!({ "ready": true })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "ready": false })),
        )
    }
}

/// Liveness probe: the process is running.
///
/// GET /api/health/live
pub async fn live() -> Json<Value> {
    Json(json!({ "alive": true }))
}
