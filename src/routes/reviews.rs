use crate::{AppState, handlers};
use axum::{
    Router,
    routing::get,
};

/// Reviews Router Module
///
/// The flat review surface; the nested property-scoped variants are wired in
/// the properties router. Reads are public, creation requires the plain user
/// role, edits and deletes are owner-or-admin.
pub fn review_routes() -> Router<AppState> {
    Router::new()
        // GET /reviews
        // All reviews, unscoped.
        // POST /reviews  [User]
        // Creates a review; the property id must be in the body here.
        .route(
            "/reviews",
            get(handlers::list_reviews).post(handlers::create_review),
        )
        // GET|PATCH|DELETE /reviews/{id}
        // Single review; writes are restricted to the author or an admin.
        .route(
            "/reviews/{id}",
            get(handlers::get_review)
                .patch(handlers::update_review)
                .delete(handlers::delete_review),
        )
}
