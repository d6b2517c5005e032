//! Request handlers, grouped by resource. All handlers return
//! `Result<impl IntoResponse, AppError>`; success bodies share the
//! `{"status": "success", "data": {...}}` envelope, with a `results` count on
//! list responses.

use axum::Json;
use serde::Serialize;
use serde_json::{Value, json};

use crate::error::AppError;

pub mod auth;
pub mod properties;
pub mod reviews;
pub mod users;

pub use auth::*;
pub use properties::*;
pub use reviews::*;
pub use users::*;

/// Wraps a single resource: `{"status": "success", "data": {key: value}}`.
pub(crate) fn envelope<T: Serialize>(key: &str, value: &T) -> Json<Value> {
    Json(json!({
        "status": "success",
        "data": { key: value },
    }))
}

/// Wraps a list, reporting both the page size and the total match count.
pub(crate) fn list_envelope(key: &str, items: Value, total: i64) -> Json<Value> {
    let results = items.as_array().map(|a| a.len()).unwrap_or(0);
    Json(json!({
        "status": "success",
        "results": results,
        "total": total,
        "data": { key: items },
    }))
}

/// Rewrites a unique-violation Conflict with a resource-specific message,
/// passing every other error through unchanged.
pub(crate) fn conflict_message(err: sqlx::Error, message: &str) -> AppError {
    match AppError::from(err) {
        AppError::Conflict(_) => AppError::Conflict(message.to_string()),
        other => other,
    }
}

/// File parts must declare an image content type; anything else is rejected
/// before the body is buffered.
pub(crate) fn require_image_field(
    field: &axum::extract::multipart::Field<'_>,
) -> Result<(), AppError> {
    let is_image = field
        .content_type()
        .map(|ct| ct.starts_with("image/"))
        .unwrap_or(false);
    if is_image {
        Ok(())
    } else {
        Err(AppError::Validation(
            "Not an image! Please upload only images.".to_string(),
        ))
    }
}

/// Multipart text fields arrive as strings; values that parse as JSON
/// (numbers, booleans, arrays) are promoted so they deserialize into typed
/// payloads. Anything else stays a plain string.
pub(crate) fn coerce_form_value(raw: String) -> Value {
    match serde_json::from_str::<Value>(&raw) {
        Ok(v) if !v.is_string() => v,
        _ => Value::String(raw),
    }
}
