use std::collections::HashMap;

use axum::{
    Json,
    extract::{FromRequest, Multipart, Path, Query, Request, State},
    http::{StatusCode, header::CONTENT_TYPE},
};
use serde_json::{Map, Value};
use uuid::Uuid;
use validator::Validate;

use super::{coerce_form_value, envelope, list_envelope};
use crate::{
    AppState,
    auth::{AdminOnly, AuthUser},
    error::AppError,
    models::{AdminUpdateUserFields, UpdateMeFields},
    query,
};

fn is_multipart(req: &Request) -> bool {
    req.headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("multipart/form-data"))
        .unwrap_or(false)
}

/// get_me
///
/// Returns the authenticated user's own record.
#[utoipa::path(
    get,
    path = "/api/v1/users/me",
    responses((status = 200, description = "Current user"))
)]
pub async fn get_me(
    auth_user: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Value>, AppError> {
    let user = state
        .repo
        .find_user_by_id(auth_user.id)
        .await?
        .ok_or_else(|| AppError::NotFound("No user found with that ID".to_string()))?;
    Ok(envelope("user", &user))
}

/// update_me
///
/// Self-service profile update. Accepts JSON, or multipart form data carrying
/// a `photo` file alongside text fields; a file part without an image content
/// type is rejected before it is buffered. Fields outside the profile allow-list
/// are silently dropped; password keys are rejected outright and pointed at
/// the password route. A replaced photo's old file is removed best-effort.
#[utoipa::path(
    patch,
    path = "/api/v1/users/update-me",
    request_body = UpdateMeFields,
    responses(
        (status = 200, description = "Profile updated"),
        (status = 400, description = "Password keys present or invalid fields")
    )
)]
pub async fn update_me(
    auth_user: AuthUser,
    State(state): State<AppState>,
    req: Request,
) -> Result<Json<Value>, AppError> {
    let previous = state
        .repo
        .find_user_by_id(auth_user.id)
        .await?
        .ok_or_else(|| AppError::NotFound("No user found with that ID".to_string()))?;

    let mut fields: UpdateMeFields;

    if is_multipart(&req) {
        let mut multipart = Multipart::from_request(req, &state)
            .await
            .map_err(|e| AppError::Validation(format!("Invalid multipart body: {e}")))?;

        let mut map = Map::new();
        let mut photo_bytes: Option<Vec<u8>> = None;
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| AppError::Validation(format!("Invalid multipart body: {e}")))?
        {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "photo" => {
                    super::require_image_field(&field)?;
                    let data = field
                        .bytes()
                        .await
                        .map_err(|e| AppError::Validation(format!("Invalid upload: {e}")))?;
                    photo_bytes = Some(data.to_vec());
                }
                "password" | "password_confirm" => {
                    return Err(password_route_error());
                }
                _ => {
                    let text = field
                        .text()
                        .await
                        .map_err(|e| AppError::Validation(format!("Invalid form field: {e}")))?;
                    map.insert(name, coerce_form_value(text));
                }
            }
        }

        fields = serde_json::from_value(Value::Object(map))
            .map_err(|e| AppError::Validation(e.to_string()))?;

        if let Some(data) = photo_bytes {
            fields.photo = Some(state.media.store_user_photo(auth_user.id, data).await?);
        }
    } else {
        let Json(body): Json<Value> = Json::from_request(req, &state)
            .await
            .map_err(|e| AppError::Validation(format!("Invalid JSON body: {e}")))?;
        if body.get("password").is_some() || body.get("password_confirm").is_some() {
            return Err(password_route_error());
        }
        fields = serde_json::from_value(body).map_err(|e| AppError::Validation(e.to_string()))?;
    }

    fields.validate()?;
    let user = state.repo.update_user_profile(auth_user.id, &fields).await?;

    if fields.photo.is_some() {
        if let Some(old) = &previous.photo {
            if user.photo.as_ref() != Some(old) {
                state.media.delete(old).await;
            }
        }
    }

    Ok(envelope("user", &user))
}

fn password_route_error() -> AppError {
    AppError::Validation(
        "This route is not for password updates. Please use /update-password.".to_string(),
    )
}

/// delete_me
///
/// Soft delete: flips the active flag. The row and its reviews survive; the
/// account just disappears from authentication.
#[utoipa::path(
    delete,
    path = "/api/v1/users/delete-me",
    responses((status = 204, description = "Account deactivated"))
)]
pub async fn delete_me(
    auth_user: AuthUser,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    state.repo.set_user_active(auth_user.id, false).await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Admin Surface ---

/// list_users
///
/// [Admin] Lists users with the shared filter/sort/pagination grammar.
#[utoipa::path(
    get,
    path = "/api/v1/users",
    responses((status = 200, description = "Users"))
)]
pub async fn list_users(
    _admin: AdminOnly,
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, AppError> {
    let desc = query::compose(&params, &query::USER_FIELDS)?;
    let (users, total) = state.repo.list_users(&desc).await?;
    desc.validate_page(total)?;

    let mut items = serde_json::to_value(&users).map_err(|e| AppError::Internal(e.to_string()))?;
    if let Some(fields) = &desc.fields {
        items = query::select_fields(items, fields);
    }
    Ok(list_envelope("users", items, total))
}

/// get_user
///
/// [Admin] Fetches one user by id.
#[utoipa::path(
    get,
    path = "/api/v1/users/{id}",
    responses(
        (status = 200, description = "User"),
        (status = 404, description = "Not found")
    )
)]
pub async fn get_user(
    _admin: AdminOnly,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let user = state
        .repo
        .find_user_by_id(id)
        .await?
        .ok_or_else(|| AppError::NotFound("No user found with that ID".to_string()))?;
    Ok(envelope("user", &user))
}

/// update_user
///
/// [Admin] Edits a user through the admin allow-list, the only path that can
/// change role or active. Not for passwords.
#[utoipa::path(
    patch,
    path = "/api/v1/users/{id}",
    request_body = AdminUpdateUserFields,
    responses(
        (status = 200, description = "User updated"),
        (status = 404, description = "Not found")
    )
)]
pub async fn update_user(
    _admin: AdminOnly,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, AppError> {
    let fields: AdminUpdateUserFields =
        serde_json::from_value(body).map_err(|e| AppError::Validation(e.to_string()))?;
    fields.validate()?;
    let user = state.repo.admin_update_user(id, &fields).await?;
    Ok(envelope("user", &user))
}

/// delete_user
///
/// [Admin] Hard delete. The stored profile photo is removed best-effort.
#[utoipa::path(
    delete,
    path = "/api/v1/users/{id}",
    responses(
        (status = 204, description = "User deleted"),
        (status = 404, description = "Not found")
    )
)]
pub async fn delete_user(
    _admin: AdminOnly,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let deleted = state
        .repo
        .delete_user(id)
        .await?
        .ok_or_else(|| AppError::NotFound("No user found with that ID".to_string()))?;

    if let Some(photo) = &deleted.photo {
        state.media.delete(photo).await;
    }
    Ok(StatusCode::NO_CONTENT)
}
