use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, patch, post},
};

/// Auth Router Module
///
/// The identity surface: signup, login/logout, the email verification state
/// machine and both password flows. Everything here is public except
/// update-password and /auth/me, which authenticate via the AuthUser
/// extractor on their handlers.
pub fn auth_routes() -> Router<AppState> {
    Router::new()
        // POST /auth/signup
        // Creates an unverified account and emails a one-time verification link.
        .route("/auth/signup", post(handlers::signup))
        // POST /auth/login
        // Password login; 403 until the email address is verified.
        .route("/auth/login", post(handlers::login))
        // GET /auth/logout
        // Overwrites the jwt cookie with a short-lived placeholder.
        .route("/auth/logout", get(handlers::logout))
        // GET|POST /auth/verify-email/{token}
        // Redeems a verification token. GET supports the emailed link; POST
        // supports programmatic clients.
        .route(
            "/auth/verify-email/{token}",
            get(handlers::verify_email).post(handlers::verify_email),
        )
        // POST /auth/resend-verification-email
        // Fresh token for an unverified address; 400 if already verified.
        .route(
            "/auth/resend-verification-email",
            post(handlers::resend_verification),
        )
        // POST /auth/forgot-password
        // Emails a ten-minute reset token.
        .route("/auth/forgot-password", post(handlers::forgot_password))
        // PATCH /auth/reset-password/{token}
        // Redeems the reset token and stores the new password.
        .route(
            "/auth/reset-password/{token}",
            patch(handlers::reset_password),
        )
        // PATCH /auth/update-password
        // Authenticated password change; requires the current password.
        .route("/auth/update-password", patch(handlers::update_password))
        // GET /auth/me
        // The authenticated caller's own record.
        .route("/auth/me", get(handlers::get_me))
}
