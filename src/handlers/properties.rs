use std::collections::HashMap;

use axum::{
    Json,
    extract::{FromRequest, Multipart, Path, Query, Request, State},
    http::{StatusCode, header::CONTENT_TYPE},
};
use chrono::Utc;
use futures::future::join_all;
use serde_json::{Map, Value};
use uuid::Uuid;
use validator::Validate;

use super::{coerce_form_value, envelope, list_envelope};
use crate::{
    AppState,
    auth::{AgentOrAdmin, AuthUser},
    error::AppError,
    media::PropertyImages,
    models::{CreatePropertyRequest, Property, UpdatePropertyFields, slugify},
    query::{self, DistanceUnit, angular_radius, parse_latlng},
};

/// Upper bound on gallery images per upload batch.
const MAX_GALLERY_IMAGES: usize = 10;

/// list_properties
///
/// [Public] Lists listings with the filter/sort/field-selection/pagination
/// grammar. An explicit page beyond the match count is a 400.
#[utoipa::path(
    get,
    path = "/api/v1/properties",
    responses((status = 200, description = "Properties"))
)]
pub async fn list_properties(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, AppError> {
    let desc = query::compose(&params, &query::PROPERTY_FIELDS)?;
    let (properties, total) = state.repo.list_properties(&desc).await?;
    desc.validate_page(total)?;

    let mut items =
        serde_json::to_value(&properties).map_err(|e| AppError::Internal(e.to_string()))?;
    if let Some(fields) = &desc.fields {
        items = query::select_fields(items, fields);
    }
    Ok(list_envelope("properties", items, total))
}

/// get_property
///
/// [Public] Fetches one listing and counts the view.
#[utoipa::path(
    get,
    path = "/api/v1/properties/{id}",
    responses(
        (status = 200, description = "Property"),
        (status = 404, description = "Not found")
    )
)]
pub async fn get_property(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let property = state
        .repo
        .find_property_and_bump_views(id)
        .await?
        .ok_or_else(|| AppError::NotFound("No property found with that ID".to_string()))?;
    Ok(envelope("property", &property))
}

/// property_stats
///
/// [Public] Per-type aggregates over listings rated at least 4.5.
#[utoipa::path(
    get,
    path = "/api/v1/properties/stats",
    responses((status = 200, description = "Stats by property type"))
)]
pub async fn property_stats(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let stats = state.repo.property_type_stats().await?;
    Ok(envelope("stats", &stats))
}

/// properties_within
///
/// [Public] Radius search around a center point. The distance is divided by
/// Earth's radius in the requested unit (mi or km) to get the angular radius;
/// listings on the boundary are included.
#[utoipa::path(
    get,
    path = "/api/v1/properties/properties-within/{distance}/center/{latlng}/unit/{unit}",
    responses(
        (status = 200, description = "Properties within radius"),
        (status = 400, description = "Bad distance, center or unit")
    )
)]
pub async fn properties_within(
    State(state): State<AppState>,
    Path((distance, latlng, unit)): Path<(f64, String, String)>,
) -> Result<Json<Value>, AppError> {
    if !distance.is_finite() || distance < 0.0 {
        return Err(AppError::Validation(
            "Please provide a non-negative distance".to_string(),
        ));
    }
    let unit = DistanceUnit::parse(&unit)?;
    let (lat, lng) = parse_latlng(&latlng)?;

    let properties = state
        .repo
        .properties_within_radius(lat, lng, angular_radius(distance, unit))
        .await?;
    let total = properties.len() as i64;
    let items =
        serde_json::to_value(&properties).map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(list_envelope("properties", items, total))
}

/// create_property
///
/// [Agent/Admin] Creates a listing owned by the caller. The slug is derived
/// from the title; rating fields start at the 4.5 / 0 defaults.
#[utoipa::path(
    post,
    path = "/api/v1/properties",
    request_body = CreatePropertyRequest,
    responses(
        (status = 201, description = "Property created"),
        (status = 403, description = "Caller is not an agent or admin")
    )
)]
pub async fn create_property(
    agent: AgentOrAdmin,
    State(state): State<AppState>,
    Json(payload): Json<CreatePropertyRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let AgentOrAdmin(auth_user) = agent;
    payload.validate()?;
    let now = Utc::now();

    let property = Property {
        id: Uuid::new_v4(),
        slug: slugify(&payload.title),
        title: payload.title,
        description: payload.description,
        price: payload.price,
        price_per: payload.price_per.unwrap_or_default(),
        property_type: payload.property_type,
        bedrooms: payload.bedrooms,
        bathrooms: payload.bathrooms,
        area: payload.area,
        area_unit: payload.area_unit.unwrap_or_default(),
        longitude: payload.longitude,
        latitude: payload.latitude,
        address: payload.address,
        amenities: payload.amenities.unwrap_or_default(),
        images: Vec::new(),
        featured_image: None,
        status: payload.status.unwrap_or_default(),
        listed_by: auth_user.id,
        year_built: payload.year_built,
        parking_spaces: payload.parking_spaces.unwrap_or(0),
        furnishing_status: payload.furnishing_status,
        is_featured: payload.is_featured.unwrap_or(false),
        views: 0,
        ratings_average: 4.5,
        ratings_quantity: 0,
        created_at: now,
        updated_at: now,
    };

    let property = state.repo.create_property(&property).await?;
    Ok((StatusCode::CREATED, envelope("property", &property)))
}

/// update_property
///
/// [Owner/Admin] Partial update through the typed allow-list; unknown keys are
/// silently dropped. Accepts JSON, or multipart form data carrying up to ten
/// `images` files and one `featuredImage` alongside text fields; file parts
/// without an image content type are rejected before buffering. A title
/// change recomputes the slug; replaced image files are removed best-effort
/// after the row is written.
#[utoipa::path(
    patch,
    path = "/api/v1/properties/{id}",
    request_body = UpdatePropertyFields,
    responses(
        (status = 200, description = "Property updated"),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Not found")
    )
)]
pub async fn update_property(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    req: Request,
) -> Result<Json<Value>, AppError> {
    let existing = state
        .repo
        .find_property(id)
        .await?
        .ok_or_else(|| AppError::NotFound("No property found with that ID".to_string()))?;
    auth_user.require_owner_or_admin(existing.listed_by)?;

    let multipart_body = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("multipart/form-data"))
        .unwrap_or(false);

    let mut fields: UpdatePropertyFields;

    if multipart_body {
        let mut multipart = Multipart::from_request(req, &state)
            .await
            .map_err(|e| AppError::Validation(format!("Invalid multipart body: {e}")))?;

        let mut map = Map::new();
        let mut gallery: Vec<Vec<u8>> = Vec::new();
        let mut featured: Option<Vec<u8>> = None;

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| AppError::Validation(format!("Invalid multipart body: {e}")))?
        {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "images" => {
                    if gallery.len() >= MAX_GALLERY_IMAGES {
                        return Err(AppError::Validation(format!(
                            "A property can have at most {MAX_GALLERY_IMAGES} gallery images"
                        )));
                    }
                    super::require_image_field(&field)?;
                    let data = field
                        .bytes()
                        .await
                        .map_err(|e| AppError::Validation(format!("Invalid upload: {e}")))?;
                    gallery.push(data.to_vec());
                }
                "featuredImage" | "featured_image" => {
                    super::require_image_field(&field)?;
                    let data = field
                        .bytes()
                        .await
                        .map_err(|e| AppError::Validation(format!("Invalid upload: {e}")))?;
                    featured = Some(data.to_vec());
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

        if featured.is_some() || !gallery.is_empty() {
            let PropertyImages {
                featured_image,
                images,
            } = state.media.store_property_images(featured, gallery).await?;
            if !images.is_empty() {
                fields.images = Some(images);
            }
            if featured_image.is_some() {
                fields.featured_image = featured_image;
            }
        }
    } else {
        let Json(body): Json<Value> = Json::from_request(req, &state)
            .await
            .map_err(|e| AppError::Validation(format!("Invalid JSON body: {e}")))?;
        fields = serde_json::from_value(body).map_err(|e| AppError::Validation(e.to_string()))?;
    }

    fields.validate()?;
    let slug = fields.title.as_deref().map(slugify);
    let updated = state
        .repo
        .update_property(id, &fields, slug.as_deref())
        .await?;

    // Replaced files are orphans now; removal is best-effort.
    if fields.images.is_some() {
        for old in &existing.images {
            state.media.delete(old).await;
        }
    }
    if fields.featured_image.is_some() {
        if let Some(old) = &existing.featured_image {
            if updated.featured_image.as_ref() != Some(old) {
                state.media.delete(old).await;
            }
        }
    }

    Ok(envelope("property", &updated))
}

/// delete_property
///
/// [Owner/Admin] Hard delete. Reviews cascade; image files are removed
/// best-effort.
#[utoipa::path(
    delete,
    path = "/api/v1/properties/{id}",
    responses(
        (status = 204, description = "Property deleted"),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Not found")
    )
)]
pub async fn delete_property(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let existing = state
        .repo
        .find_property(id)
        .await?
        .ok_or_else(|| AppError::NotFound("No property found with that ID".to_string()))?;
    auth_user.require_owner_or_admin(existing.listed_by)?;

    let deleted = state
        .repo
        .delete_property(id)
        .await?
        .ok_or_else(|| AppError::NotFound("No property found with that ID".to_string()))?;

    join_all(
        deleted
            .images
            .iter()
            .chain(deleted.featured_image.as_ref())
            .map(|file| state.media.delete(file)),
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}
