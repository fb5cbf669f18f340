use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracker_core::{ApplyError, CycleError, TrackerError};

/// Unified error type for HTTP responses.
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    /// Construct a 400 Bad Request error with the given message.
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self(TrackerError::InvalidInput(msg.into()).into())
    }

    fn status(&self) -> StatusCode {
        if let Some(e) = self.0.downcast_ref::<TrackerError>() {
            return match e {
                TrackerError::OrderNotFound(_) => StatusCode::NOT_FOUND,
                TrackerError::OrderExists(_) => StatusCode::CONFLICT,
                TrackerError::NotInitialized
                | TrackerError::InvalidReference(_)
                | TrackerError::InvalidStatus(_)
                | TrackerError::InvalidInput(_)
                | TrackerError::InvalidRule(_) => StatusCode::BAD_REQUEST,
                TrackerError::InvalidTransition { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                TrackerError::Apply(apply) => apply_status(apply),
                TrackerError::Store(_)
                | TrackerError::Io(_)
                | TrackerError::Yaml(_)
                | TrackerError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
        }
        if let Some(e) = self.0.downcast_ref::<ApplyError>() {
            return apply_status(e);
        }
        if self.0.downcast_ref::<CycleError>().is_some() {
            return StatusCode::SERVICE_UNAVAILABLE;
        }
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

fn apply_status(e: &ApplyError) -> StatusCode {
    match e {
        ApplyError::Conflict { .. } => StatusCode::CONFLICT,
        ApplyError::NotFound(_) => StatusCode::NOT_FOUND,
        ApplyError::PersistenceFailure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("request failed: {:#}", self.0);
        }
        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
