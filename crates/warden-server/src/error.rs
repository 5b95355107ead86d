use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use warden_core::WardenError;

/// Unified error type for HTTP responses.
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    /// Construct a 400 Bad Request error with the given message.
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self(WardenError::InvalidStatus(msg.into()).into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = if let Some(e) = self.0.downcast_ref::<WardenError>() {
            match e {
                WardenError::RbacDenied { .. } => StatusCode::FORBIDDEN,
                WardenError::DecisionNotFound(_)
                | WardenError::RunNotFound(_)
                | WardenError::TemplateNotFound(_)
                | WardenError::JobNotFound(_) => StatusCode::NOT_FOUND,
                WardenError::AlreadyDecided(_) | WardenError::AlreadyExecuted(_) => {
                    StatusCode::CONFLICT
                }
                WardenError::InvalidTransition { .. }
                | WardenError::InvalidTemplate { .. }
                | WardenError::PolicyDenied { .. }
                | WardenError::ExecutionFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
                WardenError::InvalidStatus(_) | WardenError::Config(_) => StatusCode::BAD_REQUEST,
                WardenError::LedgerWriteFailed(_)
                | WardenError::ChainVerificationFailed { .. }
                | WardenError::Store(_)
                | WardenError::Io(_)
                | WardenError::Yaml(_)
                | WardenError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
            }
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };

        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
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
