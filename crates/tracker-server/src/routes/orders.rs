use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use tracker_core::engine::{ManualTransition, NewOrder};
use tracker_core::store::OrderFilter;
use tracker_core::types::OrderStatus;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

fn join_error(e: tokio::task::JoinError) -> AppError {
    AppError(anyhow::anyhow!("task join error: {e}"))
}

fn parse_status(raw: &str) -> Result<OrderStatus, AppError> {
    raw.parse::<OrderStatus>().map_err(AppError::from)
}

fn require_actor(actor: &str) -> Result<(), AppError> {
    if actor.trim().is_empty() {
        return Err(AppError::bad_request("actor must not be empty"));
    }
    Ok(())
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub q: Option<String>,
}

/// GET /api/orders — list orders, newest first.
pub async fn list_orders(
    State(app): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let filter = OrderFilter {
        status: query.status.as_deref().map(parse_status).transpose()?,
        text: query.q,
    };
    let engine = app.engine.clone();
    let result = tokio::task::spawn_blocking(move || {
        let orders = engine.list(&filter)?;
        let list: Vec<serde_json::Value> = orders
            .iter()
            .map(|o| {
                serde_json::json!({
                    "id": o.id,
                    "reference": o.reference,
                    "student": o.student,
                    "opportunity": o.opportunity,
                    "status": o.status,
                    "state_entered_at": o.state_entered_at,
                    "version": o.version,
                    "updated_at": o.updated_at,
                })
            })
            .collect();
        Ok::<_, tracker_core::TrackerError>(serde_json::json!(list))
    })
    .await
    .map_err(join_error)??;

    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderBody {
    pub reference: String,
    #[serde(default)]
    pub student: Option<String>,
    #[serde(default)]
    pub opportunity: Option<String>,
}

/// POST /api/orders — create a pending order.
pub async fn create_order(
    State(app): State<AppState>,
    Json(body): Json<CreateOrderBody>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let engine = app.engine.clone();
    let order = tokio::task::spawn_blocking(move || {
        engine.create_order(NewOrder {
            reference: body.reference.trim().to_string(),
            student: body.student,
            opportunity: body.opportunity,
        })
    })
    .await
    .map_err(join_error)??;

    Ok((StatusCode::CREATED, Json(serde_json::to_value(order)?)))
}

/// GET /api/orders/{id} — full order detail, by id or reference.
pub async fn get_order(
    State(app): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let engine = app.engine.clone();
    let order = tokio::task::spawn_blocking(move || engine.find(&key))
        .await
        .map_err(join_error)??;
    Ok(Json(serde_json::to_value(order)?))
}

/// GET /api/orders/{id}/history — status changes, oldest first.
pub async fn get_history(
    State(app): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let engine = app.engine.clone();
    let history = tokio::task::spawn_blocking(move || engine.history(&key))
        .await
        .map_err(join_error)??;
    Ok(Json(serde_json::to_value(history)?))
}

#[derive(Debug, Deserialize)]
pub struct TransitionBody {
    pub to: String,
    pub actor: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub expected_version: Option<u64>,
}

/// POST /api/orders/{id}/transition — manual status change.
pub async fn transition_order(
    State(app): State<AppState>,
    Path(key): Path<String>,
    Json(body): Json<TransitionBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let to = parse_status(&body.to)?;
    require_actor(&body.actor)?;
    let request = ManualTransition {
        actor: body.actor,
        notes: body.notes,
        expected_version: body.expected_version,
    };
    let engine = app.engine.clone();
    let order = tokio::task::spawn_blocking(move || {
        let order = engine.find(&key)?;
        engine.transition(order.id, to, request)
    })
    .await
    .map_err(join_error)??;

    Ok(Json(serde_json::to_value(order)?))
}

#[derive(Debug, Deserialize)]
pub struct BulkTransitionBody {
    pub ids: Vec<Uuid>,
    pub to: String,
    pub actor: String,
    #[serde(default)]
    pub notes: Option<String>,
}

/// POST /api/orders/bulk-transition — apply one change to many orders.
///
/// Ineligible orders are reported under `skipped`; they never fail the batch.
pub async fn bulk_transition(
    State(app): State<AppState>,
    Json(body): Json<BulkTransitionBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let to = parse_status(&body.to)?;
    require_actor(&body.actor)?;
    let request = ManualTransition {
        actor: body.actor,
        notes: body.notes,
        expected_version: None,
    };
    let engine = app.engine.clone();
    let ids = body.ids;
    let report = tokio::task::spawn_blocking(move || engine.bulk_transition(&ids, to, &request))
        .await
        .map_err(join_error)?;

    Ok(Json(serde_json::to_value(report)?))
}
