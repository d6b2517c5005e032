use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{delete, get, patch},
};

/// Users Router Module
///
/// Self-service profile routes plus the admin user CRUD. The literal
/// `/users/me`-style routes are registered before `/users/{id}` so they are
/// never captured as ids.
pub fn user_routes() -> Router<AppState> {
    Router::new()
        // GET /users/me
        // The authenticated caller's own record.
        .route("/users/me", get(handlers::get_me))
        // PATCH /users/update-me
        // Profile update (JSON or multipart with a `photo` file). Rejects
        // password keys; everything outside the allow-list is dropped.
        .route("/users/update-me", patch(handlers::update_me))
        // DELETE /users/delete-me
        // Soft delete: deactivates the account, keeping the row and reviews.
        .route("/users/delete-me", delete(handlers::delete_me))
        // PATCH /users/update-my-password
        // Alias for the authenticated password change under /auth.
        .route(
            "/users/update-my-password",
            patch(handlers::update_password),
        )
        // GET /users  [Admin]
        // Lists users with the shared filter/sort/pagination grammar.
        .route("/users", get(handlers::list_users))
        // GET|PATCH|DELETE /users/{id}  [Admin]
        // Admin user management; DELETE here is a hard delete.
        .route(
            "/users/{id}",
            get(handlers::get_user)
                .patch(handlers::update_user)
                .delete(handlers::delete_user),
        )
}
