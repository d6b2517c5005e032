use std::collections::HashMap;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;
use validator::Validate;

use super::{conflict_message, envelope, list_envelope};
use crate::{
    AppState,
    auth::{AuthUser, ReviewerOnly},
    error::AppError,
    models::{CreateReviewRequest, Review, UpdateReviewFields},
    query,
};

/// Shared list path for the flat and the property-scoped route.
async fn list_scoped(
    state: AppState,
    property: Option<Uuid>,
    params: HashMap<String, String>,
) -> Result<Json<Value>, AppError> {
    let desc = query::compose(&params, &query::REVIEW_FIELDS)?;
    let (reviews, total) = state.repo.list_reviews(property, &desc).await?;
    desc.validate_page(total)?;

    let mut items =
        serde_json::to_value(&reviews).map_err(|e| AppError::Internal(e.to_string()))?;
    if let Some(fields) = &desc.fields {
        items = query::select_fields(items, fields);
    }
    Ok(list_envelope("reviews", items, total))
}

/// list_reviews
///
/// [Public] Lists all reviews, unscoped.
#[utoipa::path(
    get,
    path = "/api/v1/reviews",
    responses((status = 200, description = "Reviews"))
)]
pub async fn list_reviews(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, AppError> {
    list_scoped(state, None, params).await
}

/// list_property_reviews
///
/// [Public] Lists the reviews of one property; the id from the path scopes
/// the result.
#[utoipa::path(
    get,
    path = "/api/v1/properties/{id}/reviews",
    responses((status = 200, description = "Reviews for one property"))
)]
pub async fn list_property_reviews(
    State(state): State<AppState>,
    Path(property): Path<Uuid>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, AppError> {
    list_scoped(state, Some(property), params).await
}

/// get_review
#[utoipa::path(
    get,
    path = "/api/v1/reviews/{id}",
    responses(
        (status = 200, description = "Review"),
        (status = 404, description = "Not found")
    )
)]
pub async fn get_review(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let review = state
        .repo
        .find_review(id)
        .await?
        .ok_or_else(|| AppError::NotFound("No review found with that ID".to_string()))?;
    Ok(envelope("review", &review))
}

/// Shared create path. A second review for the same (property, user) pair is
/// a 409; a successful write recomputes the property's rating aggregate.
async fn create_scoped(
    auth_user: AuthUser,
    state: AppState,
    property_id: Uuid,
    payload: CreateReviewRequest,
) -> Result<(StatusCode, Json<Value>), AppError> {
    payload.validate()?;

    state
        .repo
        .find_property(property_id)
        .await?
        .ok_or_else(|| AppError::NotFound("No property found with that ID".to_string()))?;

    let review = Review {
        id: Uuid::new_v4(),
        review: payload.review,
        rating: payload.rating,
        property: property_id,
        user_id: auth_user.id,
        created_at: Utc::now(),
    };

    let review = state
        .repo
        .create_review(&review)
        .await
        .map_err(|e| conflict_message(e, "You have already reviewed this property"))?;

    state.repo.recompute_property_rating(property_id).await?;

    Ok((StatusCode::CREATED, envelope("review", &review)))
}

/// create_review
///
/// [User] Posts a review through the flat route; the property id must be in
/// the body.
#[utoipa::path(
    post,
    path = "/api/v1/reviews",
    request_body = CreateReviewRequest,
    responses(
        (status = 201, description = "Review created"),
        (status = 404, description = "Property not found"),
        (status = 409, description = "Already reviewed")
    )
)]
pub async fn create_review(
    reviewer: ReviewerOnly,
    State(state): State<AppState>,
    Json(payload): Json<CreateReviewRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let ReviewerOnly(auth_user) = reviewer;
    let property_id = payload
        .property
        .ok_or_else(|| AppError::Validation("Please provide a property".to_string()))?;
    create_scoped(auth_user, state, property_id, payload).await
}

/// create_property_review
///
/// [User] Posts a review through the nested route; the property comes from
/// the path.
#[utoipa::path(
    post,
    path = "/api/v1/properties/{id}/reviews",
    request_body = CreateReviewRequest,
    responses(
        (status = 201, description = "Review created"),
        (status = 404, description = "Property not found"),
        (status = 409, description = "Already reviewed")
    )
)]
pub async fn create_property_review(
    reviewer: ReviewerOnly,
    State(state): State<AppState>,
    Path(property): Path<Uuid>,
    Json(payload): Json<CreateReviewRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let ReviewerOnly(auth_user) = reviewer;
    create_scoped(auth_user, state, property, payload).await
}

/// update_review
///
/// [Owner/Admin] Edits a review's text or rating and recomputes the property
/// aggregate. Unknown keys are silently dropped.
#[utoipa::path(
    patch,
    path = "/api/v1/reviews/{id}",
    request_body = UpdateReviewFields,
    responses(
        (status = 200, description = "Review updated"),
        (status = 403, description = "Not the author"),
        (status = 404, description = "Not found")
    )
)]
pub async fn update_review(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, AppError> {
    let existing = state
        .repo
        .find_review(id)
        .await?
        .ok_or_else(|| AppError::NotFound("No review found with that ID".to_string()))?;
    auth_user.require_owner_or_admin(existing.user_id)?;

    let fields: UpdateReviewFields =
        serde_json::from_value(body).map_err(|e| AppError::Validation(e.to_string()))?;
    fields.validate()?;

    let review = state.repo.update_review(id, &fields).await?;
    state
        .repo
        .recompute_property_rating(existing.property)
        .await?;

    Ok(envelope("review", &review))
}

/// delete_review
///
/// [Owner/Admin] Removes a review and recomputes the property aggregate; with
/// no reviews left the aggregate falls back to its 4.5 / 0 defaults.
#[utoipa::path(
    delete,
    path = "/api/v1/reviews/{id}",
    responses(
        (status = 204, description = "Review deleted"),
        (status = 403, description = "Not the author"),
        (status = 404, description = "Not found")
    )
)]
pub async fn delete_review(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let existing = state
        .repo
        .find_review(id)
        .await?
        .ok_or_else(|| AppError::NotFound("No review found with that ID".to_string()))?;
    auth_user.require_owner_or_admin(existing.user_id)?;

    state.repo.delete_review(id).await?;
    state
        .repo
        .recompute_property_rating(existing.property)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}
