use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{Duration, Utc};
use serde_json::{Value, json};
use uuid::Uuid;
use validator::Validate;

use super::conflict_message;
use crate::{
    AppState,
    auth::{self, AuthUser},
    config::{AppConfig, Env},
    error::AppError,
    mailer,
    models::{
        ForgotPasswordRequest, LoginRequest, ResendVerificationRequest, ResetPasswordRequest,
        Role, SignupRequest, UpdatePasswordRequest, User,
    },
};

/// Verification links stay valid for a day; reset links for ten minutes.
const VERIFICATION_TOKEN_HOURS: i64 = 24;
const RESET_TOKEN_MINUTES: i64 = 10;

/// send_token
///
/// Terminal step of every flow that (re)establishes a session: signs a JWT,
/// mirrors it into the http-only `jwt` cookie and wraps the user into the
/// success envelope alongside the raw token.
fn send_token(
    user: &User,
    status: StatusCode,
    config: &AppConfig,
) -> Result<(StatusCode, CookieJar, Json<Value>), AppError> {
    let token = auth::sign_token(user.id, config)?;

    let mut cookie = Cookie::new("jwt", token.clone());
    cookie.set_http_only(true);
    cookie.set_path("/");
    cookie.set_same_site(SameSite::Lax);
    cookie.set_max_age(time::Duration::days(config.jwt_cookie_expires_days));
    cookie.set_secure(config.env == Env::Production);

    let body = json!({
        "status": "success",
        "token": token,
        "data": { "user": user },
    });
    Ok((status, CookieJar::new().add(cookie), Json(body)))
}

/// signup
///
/// Creates an unverified account, emails a one-time verification link and
/// opens a session. Only the raw token travels in the email; the database
/// keeps its sha256 hash. If the email cannot be sent the stored token is
/// cleared so a half-delivered link can never be redeemed later.
#[utoipa::path(
    post,
    path = "/api/v1/auth/signup",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "Account created, verification email sent"),
        (status = 400, description = "Invalid payload"),
        (status = 409, description = "Email already in use")
    )
)]
pub async fn signup(
    State(state): State<AppState>,
    Json(payload): Json<SignupRequest>,
) -> Result<(StatusCode, CookieJar, Json<Value>), AppError> {
    payload.validate()?;
    if payload.password != payload.password_confirm {
        return Err(AppError::Validation("Passwords do not match".to_string()));
    }
    // Admin accounts are provisioned by an existing admin, never self-served.
    let role = payload.role.unwrap_or_default();
    if role == Role::Admin {
        return Err(AppError::Validation("Invalid role".to_string()));
    }

    let password_hash = auth::hash_password(&payload.password)?;
    let (raw_token, token_hash) = auth::generate_one_time_token();
    let now = Utc::now();

    let user = User {
        id: Uuid::new_v4(),
        name: payload.name,
        email: payload.email.to_lowercase(),
        password_hash,
        role,
        phone: payload.phone,
        photo: None,
        active: true,
        email_verified: false,
        email_verification_token: Some(token_hash),
        email_verification_expires: Some(now + Duration::hours(VERIFICATION_TOKEN_HOURS)),
        password_reset_token: None,
        password_reset_expires: None,
        created_at: now,
        updated_at: now,
    };

    let user = state
        .repo
        .create_user(&user)
        .await
        .map_err(|e| conflict_message(e, "Email already in use"))?;

    let verify_url = format!(
        "{}/api/v1/auth/verify-email/{raw_token}",
        state.config.public_url
    );
    if let Err(err) = state
        .mailer
        .send(
            &user.email,
            "Verify your email (valid for 24 hours)",
            &mailer::verification_email(&user.name, &verify_url),
        )
        .await
    {
        if let Err(db_err) = state.repo.set_verification_token(user.id, None, None).await {
            tracing::error!(error = %db_err, "failed to clear verification token after mail failure");
        }
        return Err(err);
    }

    send_token(&user, StatusCode::CREATED, &state.config)
}

/// login
///
/// Password login. Wrong email and wrong password read identically; an
/// unverified address is a distinct 403 so clients can offer a resend.
#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in"),
        (status = 401, description = "Incorrect credentials"),
        (status = 403, description = "Email not verified")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<(StatusCode, CookieJar, Json<Value>), AppError> {
    let (email, password) = match (payload.email, payload.password) {
        (Some(e), Some(p)) if !e.is_empty() && !p.is_empty() => (e, p),
        _ => {
            return Err(AppError::Validation(
                "Please provide email and password!".to_string(),
            ));
        }
    };

    let user = state
        .repo
        .find_user_by_email(&email.to_lowercase())
        .await?
        .filter(|u| u.active);

    let user = match user {
        Some(u) if auth::verify_password(&password, &u.password_hash) => u,
        _ => {
            return Err(AppError::Unauthenticated(
                "Incorrect email or password".to_string(),
            ));
        }
    };

    if !user.email_verified {
        return Err(AppError::Forbidden(
            "Please verify your email address to log in.".to_string(),
        ));
    }

    send_token(&user, StatusCode::OK, &state.config)
}

/// logout
///
/// Overwrites the jwt cookie with a short-lived placeholder.
#[utoipa::path(
    get,
    path = "/api/v1/auth/logout",
    responses((status = 200, description = "Logged out"))
)]
pub async fn logout() -> (CookieJar, Json<Value>) {
    let mut cookie = Cookie::new("jwt", "loggedout");
    cookie.set_http_only(true);
    cookie.set_path("/");
    cookie.set_max_age(time::Duration::seconds(10));
    (
        CookieJar::new().add(cookie),
        Json(json!({ "status": "success" })),
    )
}

/// verify_email
///
/// Redeems a verification token. The presented raw token is hashed and matched
/// against stored hashes; an unmatched token and an expired one fail with
/// different messages. Success flips the verified flag, clears the token and
/// logs the user in.
#[utoipa::path(
    get,
    path = "/api/v1/auth/verify-email/{token}",
    responses(
        (status = 200, description = "Email verified"),
        (status = 400, description = "Token invalid or expired")
    )
)]
pub async fn verify_email(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<(StatusCode, CookieJar, Json<Value>), AppError> {
    let token_hash = auth::hash_token(&token);
    let mut user = state
        .repo
        .find_user_by_verification_token(&token_hash)
        .await?
        .ok_or_else(|| AppError::Validation("Invalid verification token".to_string()))?;

    if !user
        .email_verification_expires
        .map(|expires| expires > Utc::now())
        .unwrap_or(false)
    {
        return Err(AppError::Validation(
            "Verification token has expired. Please request a new one.".to_string(),
        ));
    }

    state.repo.mark_email_verified(user.id).await?;
    user.email_verified = true;

    send_token(&user, StatusCode::OK, &state.config)
}

/// resend_verification
///
/// Issues a fresh verification token, invalidating any previous one. Asking to
/// re-verify an already verified address is a client error.
#[utoipa::path(
    post,
    path = "/api/v1/auth/resend-verification-email",
    request_body = ResendVerificationRequest,
    responses(
        (status = 200, description = "Verification email sent"),
        (status = 400, description = "Already verified"),
        (status = 404, description = "No user with that email")
    )
)]
pub async fn resend_verification(
    State(state): State<AppState>,
    Json(payload): Json<ResendVerificationRequest>,
) -> Result<Json<Value>, AppError> {
    let email = payload
        .email
        .filter(|e| !e.is_empty())
        .ok_or_else(|| AppError::Validation("Please provide your email address".to_string()))?;

    let user = state
        .repo
        .find_user_by_email(&email.to_lowercase())
        .await?
        .filter(|u| u.active)
        .ok_or_else(|| {
            AppError::NotFound("There is no user with that email address".to_string())
        })?;

    if user.email_verified {
        return Err(AppError::Validation("Email is already verified".to_string()));
    }

    let (raw_token, token_hash) = auth::generate_one_time_token();
    state
        .repo
        .set_verification_token(
            user.id,
            Some(token_hash),
            Some(Utc::now() + Duration::hours(VERIFICATION_TOKEN_HOURS)),
        )
        .await?;

    let verify_url = format!(
        "{}/api/v1/auth/verify-email/{raw_token}",
        state.config.public_url
    );
    if let Err(err) = state
        .mailer
        .send(
            &user.email,
            "Verify your email (valid for 24 hours)",
            &mailer::verification_email(&user.name, &verify_url),
        )
        .await
    {
        if let Err(db_err) = state.repo.set_verification_token(user.id, None, None).await {
            tracing::error!(error = %db_err, "failed to clear verification token after mail failure");
        }
        return Err(err);
    }

    Ok(Json(json!({
        "status": "success",
        "message": "Verification email sent!",
    })))
}

/// forgot_password
///
/// Starts a password reset: stores a hashed ten-minute token and emails the
/// raw one. A mail transport failure rolls the token back.
#[utoipa::path(
    post,
    path = "/api/v1/auth/forgot-password",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 200, description = "Reset token sent"),
        (status = 404, description = "No user with that email")
    )
)]
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> Result<Json<Value>, AppError> {
    let email = payload
        .email
        .filter(|e| !e.is_empty())
        .ok_or_else(|| AppError::Validation("Please provide your email address".to_string()))?;

    let user = state
        .repo
        .find_user_by_email(&email.to_lowercase())
        .await?
        .filter(|u| u.active)
        .ok_or_else(|| {
            AppError::NotFound("There is no user with that email address".to_string())
        })?;

    let (raw_token, token_hash) = auth::generate_one_time_token();
    state
        .repo
        .set_password_reset_token(
            user.id,
            Some(token_hash),
            Some(Utc::now() + Duration::minutes(RESET_TOKEN_MINUTES)),
        )
        .await?;

    let reset_url = format!(
        "{}/api/v1/auth/reset-password/{raw_token}",
        state.config.public_url
    );
    if let Err(err) = state
        .mailer
        .send(
            &user.email,
            "Your password reset token (valid for 10 min)",
            &mailer::password_reset_email(&user.name, &reset_url),
        )
        .await
    {
        if let Err(db_err) = state
            .repo
            .set_password_reset_token(user.id, None, None)
            .await
        {
            tracing::error!(error = %db_err, "failed to clear reset token after mail failure");
        }
        return Err(err);
    }

    Ok(Json(json!({
        "status": "success",
        "message": "Token sent to email!",
    })))
}

/// reset_password
///
/// Redeems a reset token and stores the new password, clearing the token and
/// opening a fresh session.
#[utoipa::path(
    patch,
    path = "/api/v1/auth/reset-password/{token}",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password reset"),
        (status = 400, description = "Token invalid or expired")
    )
)]
pub async fn reset_password(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<(StatusCode, CookieJar, Json<Value>), AppError> {
    payload.validate()?;
    if payload.password != payload.password_confirm {
        return Err(AppError::Validation("Passwords do not match".to_string()));
    }

    let token_hash = auth::hash_token(&token);
    let user = state
        .repo
        .find_user_by_reset_token(&token_hash)
        .await?
        .ok_or_else(|| AppError::Validation("Invalid password reset token".to_string()))?;

    if !user
        .password_reset_expires
        .map(|expires| expires > Utc::now())
        .unwrap_or(false)
    {
        return Err(AppError::Validation(
            "Password reset token has expired. Please request a new one.".to_string(),
        ));
    }

    let password_hash = auth::hash_password(&payload.password)?;
    state.repo.set_user_password(user.id, &password_hash).await?;

    send_token(&user, StatusCode::OK, &state.config)
}

/// update_password
///
/// Authenticated password change; requires the current password.
#[utoipa::path(
    patch,
    path = "/api/v1/auth/update-password",
    request_body = UpdatePasswordRequest,
    responses(
        (status = 200, description = "Password updated"),
        (status = 401, description = "Current password wrong")
    )
)]
pub async fn update_password(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<UpdatePasswordRequest>,
) -> Result<(StatusCode, CookieJar, Json<Value>), AppError> {
    payload.validate()?;
    if payload.password != payload.password_confirm {
        return Err(AppError::Validation("Passwords do not match".to_string()));
    }

    let user = state
        .repo
        .find_user_by_id(auth_user.id)
        .await?
        .ok_or_else(|| AppError::Unauthenticated("User no longer exists".to_string()))?;

    if !auth::verify_password(&payload.current_password, &user.password_hash) {
        return Err(AppError::Unauthenticated(
            "Your current password is wrong.".to_string(),
        ));
    }

    let password_hash = auth::hash_password(&payload.password)?;
    state.repo.set_user_password(user.id, &password_hash).await?;

    send_token(&user, StatusCode::OK, &state.config)
}
