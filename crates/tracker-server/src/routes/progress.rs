use axum::extract::State;
use axum::Json;

use crate::error::AppError;
use crate::state::AppState;

/// GET /api/auto-progress — worker status and configured rules.
pub async fn get_status(State(app): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let status = app.worker.status();
    let rules: Vec<String> = app
        .engine
        .rules()
        .rules()
        .iter()
        .map(|r| r.to_string())
        .collect();
    Ok(Json(serde_json::json!({
        "enabled": status.enabled,
        "check_interval_secs": status.check_interval_secs,
        "last_check": status.last_check,
        "due": status.due,
        "rules": rules,
    })))
}

/// POST /api/auto-progress/run — run a cycle now, regardless of debounce.
pub async fn run_now(State(app): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let report = app.worker.run_now().await?;
    Ok(Json(serde_json::to_value(report)?))
}
