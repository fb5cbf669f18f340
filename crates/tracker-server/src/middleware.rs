use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::state::AppState;

/// Request-path auto-progress trigger.
///
/// Wakes the background worker when a cycle is due, then serves the request
/// without waiting for it.
pub async fn auto_progress(State(app): State<AppState>, req: Request, next: Next) -> Response {
    if app.worker.nudge() {
        tracing::debug!(path = %req.uri().path(), "request woke auto-progress worker");
    }
    next.run(req).await
}
