use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Properties Router Module
///
/// Public listing reads (search, single view, stats, radius search) plus the
/// agent/admin write surface. The literal routes precede `/properties/{id}`
/// so "stats" and "properties-within" never parse as ids. The nested review
/// routes live here because they hang off a property path.
pub fn property_routes() -> Router<AppState> {
    Router::new()
        // GET /properties
        // Filter/sort/field-selection/pagination over all listings.
        // POST /properties  [Agent/Admin]
        // Creates a listing owned by the caller.
        .route(
            "/properties",
            get(handlers::list_properties).post(handlers::create_property),
        )
        // GET /properties/stats
        // Per-type aggregates over listings rated at least 4.5.
        .route("/properties/stats", get(handlers::property_stats))
        // GET /properties/properties-within/{distance}/center/{latlng}/unit/{unit}
        // Radius search around a lat,lng center, unit mi or km, boundary inclusive.
        .route(
            "/properties/properties-within/{distance}/center/{latlng}/unit/{unit}",
            get(handlers::properties_within),
        )
        // GET /properties/{id}
        // Single listing; every hit counts a view.
        // PATCH /properties/{id}  [Owner/Admin]
        // Allow-list update; multipart variant carries image files.
        // DELETE /properties/{id}  [Owner/Admin]
        // Hard delete; reviews cascade, image files removed best-effort.
        .route(
            "/properties/{id}",
            get(handlers::get_property)
                .patch(handlers::update_property)
                .delete(handlers::delete_property),
        )
        // GET|POST /properties/{id}/reviews
        // Nested review routes: the property scope comes from the path.
        .route(
            "/properties/{id}/reviews",
            get(handlers::list_property_reviews).post(handlers::create_property_review),
        )
}
