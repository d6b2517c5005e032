use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// AppError
///
/// The single error taxonomy for the whole request pipeline. Handlers never
/// catch-and-continue: every failure is converted into an AppError and forwarded
/// to the centralized responder (`IntoResponse` below), which maps the kind to a
/// status code and the uniform JSON error body.
///
/// Operational kinds (Validation, Unauthenticated, Forbidden, NotFound, Conflict)
/// are safe to describe to the client. Internal and ExternalService errors return
/// a generic message; the full detail is logged server-side only.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Bad input shape or range (400).
    #[error("{0}")]
    Validation(String),

    /// Missing, invalid or expired credential (401).
    #[error("{0}")]
    Unauthenticated(String),

    /// Valid identity, insufficient role or ownership (403).
    #[error("{0}")]
    Forbidden(String),

    /// Id does not resolve (404).
    #[error("{0}")]
    NotFound(String),

    /// Duplicate resource, e.g. a second review for the same property (409).
    #[error("{0}")]
    Conflict(String),

    /// An external collaborator (mail transport) failed (500).
    #[error("{0}")]
    ExternalService(String),

    /// Unexpected internal failure (500). Detail is logged, never serialized.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ExternalService(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn client_message(&self) -> String {
        match self {
            // Internal detail must not leak to clients.
            AppError::Internal(_) => "Something went wrong".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if matches!(self, AppError::Internal(_) | AppError::ExternalService(_)) {
            tracing::error!(error = %self, "request failed");
        }

        let body = json!({
            "status": "error",
            "message": self.client_message(),
        });

        (self.status_code(), Json(body)).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => {
                AppError::NotFound("No resource found with that ID".to_string())
            }
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                AppError::Conflict("Duplicate resource".to_string())
            }
            _ => AppError::Internal(err.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errs: validator::ValidationErrors) -> Self {
        AppError::Validation(errs.to_string())
    }
}
