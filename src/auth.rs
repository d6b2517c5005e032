use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use axum_extra::extract::cookie::CookieJar;
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    error::AppError,
    models::Role,
    repository::RepositoryState,
};

/// Claims
///
/// The payload structure signed into every JWT. Claims are signed with the
/// server secret and validated on every authenticated request.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the UUID of the user.
    pub sub: Uuid,
    /// Expiration time, after which the JWT must not be accepted.
    pub exp: usize,
    /// Issued-at timestamp.
    pub iat: usize,
}

/// Signs a JWT for the given user id using the configured secret and lifetime.
pub fn sign_token(user_id: Uuid, config: &AppConfig) -> Result<String, AppError> {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id,
        iat: now.timestamp() as usize,
        exp: (now + Duration::hours(config.jwt_expires_hours)).timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("failed to sign token: {e}")))
}

// --- Password Hashing ---

/// Hashes a password with argon2id and a freshly generated salt. The result is
/// the PHC string form, the only representation ever persisted.
pub fn hash_password(password: &str) -> Result<String, AppError> {
    use argon2::password_hash::{PasswordHasher, SaltString, rand_core::OsRng};

    let salt = SaltString::generate(&mut OsRng);
    argon2::Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("failed to hash password: {e}")))
}

/// Verifies a candidate password against a stored PHC hash. Any parse or
/// verification failure simply reads as "does not match".
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    use argon2::password_hash::{PasswordHash, PasswordVerifier};

    PasswordHash::new(stored_hash)
        .map(|parsed| {
            argon2::Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

// --- One-Time Tokens (Email Verification, Password Reset) ---

/// Generates a one-time token, returning `(raw, hash)`. The raw hex token is
/// emailed to the user; only its sha256 hex digest is ever stored, so a
/// presented token is matched against the hash alone.
pub fn generate_one_time_token() -> (String, String) {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let raw = hex::encode(bytes);
    let hash = hash_token(&raw);
    (raw, hash)
}

/// sha256 hex digest of a raw one-time token.
pub fn hash_token(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

// --- AuthUser Extractor ---

/// AuthUser
///
/// The resolved identity of an authenticated request: the output of the access
/// control middleware. Handlers take this (or one of the role-guard wrappers
/// below) as an argument to require authentication.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub role: Role,
}

impl AuthUser {
    /// Role restriction against a fixed allow-list. Rejects with Forbidden when
    /// the resolved role is not in the list.
    pub fn require_role(&self, allowed: &[Role]) -> Result<(), AppError> {
        if allowed.contains(&self.role) {
            Ok(())
        } else {
            Err(AppError::Forbidden(
                "You do not have permission to perform this action".to_string(),
            ))
        }
    }

    /// Ownership refinement for update/delete on owned resources: permitted when
    /// the caller owns the resource or is an admin.
    pub fn require_owner_or_admin(&self, owner: Uuid) -> Result<(), AppError> {
        if self.id == owner || self.role == Role::Admin {
            Ok(())
        } else {
            Err(AppError::Forbidden(
                "You do not have permission to perform this action".to_string(),
            ))
        }
    }
}

/// AuthUser Extractor Implementation
///
/// Implements Axum's FromRequestParts trait, making AuthUser usable as a
/// function argument in any authenticated handler and keeping authentication
/// separate from handler business logic.
///
/// The flow: bearer token extraction (Authorization header, falling back to the
/// http-only `jwt` cookie), JWT decoding with expiry validation, then a database
/// lookup to confirm the subject still resolves to a live, active user.
///
/// Rejection: Unauthenticated (401) on any failure, before the handler runs.
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let repo = RepositoryState::from_ref(state);
        let config = AppConfig::from_ref(state);

        // 1. Credential transport: Authorization header or the cookie mirror.
        let bearer = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::to_owned);

        let token = match bearer {
            Some(t) => t,
            None => CookieJar::from_headers(&parts.headers)
                .get("jwt")
                .map(|c| c.value().to_string())
                .ok_or_else(|| {
                    AppError::Unauthenticated(
                        "You are not logged in. Please log in to get access.".to_string(),
                    )
                })?,
        };

        // 2. Signature and expiry validation.
        let decoding_key = DecodingKey::from_secret(config.jwt_secret.as_bytes());
        let mut validation = Validation::default();
        validation.validate_exp = true;

        let token_data = decode::<Claims>(&token, &decoding_key, &validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AppError::Unauthenticated(
                    "Your session has expired. Please log in again.".to_string(),
                ),
                _ => AppError::Unauthenticated("Invalid authentication token".to_string()),
            }
        })?;

        // 3. The subject must still resolve to a live, active user. This rejects
        //    tokens for users deleted or deactivated after issuance.
        let user = repo
            .find_user_by_id(token_data.claims.sub)
            .await?
            .filter(|u| u.active)
            .ok_or_else(|| {
                AppError::Unauthenticated(
                    "The user belonging to this token no longer exists".to_string(),
                )
            })?;

        Ok(AuthUser {
            id: user.id,
            role: user.role,
        })
    }
}

// --- Declarative Role Guards ---
//
// One wrapper per route policy. The guard resolves AuthUser and evaluates its
// role allow-list before the handler body runs, so a handler's signature states
// its authorization requirement.

/// Route policy: listing management (property create/update/delete surface).
pub struct AgentOrAdmin(pub AuthUser);

/// Route policy: administrative endpoints.
pub struct AdminOnly(pub AuthUser);

/// Route policy: review creation is reserved for plain users.
pub struct ReviewerOnly(pub AuthUser);

macro_rules! role_guard {
    ($name:ident, $roles:expr) => {
        impl<S> FromRequestParts<S> for $name
        where
            S: Send + Sync,
            RepositoryState: FromRef<S>,
            AppConfig: FromRef<S>,
        {
            type Rejection = AppError;

            async fn from_request_parts(
                parts: &mut Parts,
                state: &S,
            ) -> Result<Self, Self::Rejection> {
                let auth = AuthUser::from_request_parts(parts, state).await?;
                auth.require_role($roles)?;
                Ok(Self(auth))
            }
        }
    };
}

role_guard!(AgentOrAdmin, &[Role::Agent, Role::Admin]);
role_guard!(AdminOnly, &[Role::Admin]);
role_guard!(ReviewerOnly, &[Role::User]);
