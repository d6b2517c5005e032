use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

// --- Enumerated Types (Mapped to Postgres Enums) ---

/// Role
///
/// The RBAC field carried on every user record. Agents may create and manage
/// property listings; admins bypass ownership checks everywhere.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema, sqlx::Type, Default,
)]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum Role {
    #[default]
    User,
    Agent,
    Admin,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema, sqlx::Type, Default,
)]
#[sqlx(type_name = "price_per", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum PricePer {
    #[default]
    Month,
    Year,
    Sqft,
    Total,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema, sqlx::Type, Default,
)]
#[sqlx(type_name = "property_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum PropertyType {
    #[default]
    Apartment,
    Villa,
    Townhouse,
    Penthouse,
    Land,
    Commercial,
    Other,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema, sqlx::Type, Default,
)]
#[sqlx(type_name = "area_unit", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum AreaUnit {
    #[default]
    Sqft,
    Sqm,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema, sqlx::Type, Default,
)]
#[sqlx(type_name = "property_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum PropertyStatus {
    #[default]
    Available,
    Pending,
    Sold,
    Rented,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema, sqlx::Type)]
#[sqlx(type_name = "furnishing_status", rename_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
#[ts(export)]
pub enum FurnishingStatus {
    Furnished,
    Unfurnished,
    SemiFurnished,
    PartlyFurnished,
}

// --- Core Application Schemas (Mapped to Database) ---

/// User
///
/// The canonical identity record stored in the `users` table. The password hash
/// and one-time token fields are never serialized into responses.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow)]
#[ts(export)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    /// Salted argon2 hash. Write-only: skipped on serialization.
    #[serde(skip_serializing, default)]
    #[ts(skip)]
    #[schema(ignore)]
    pub password_hash: String,
    pub role: Role,
    pub phone: Option<String>,
    pub photo: Option<String>,
    /// Soft-delete marker. Inactive users are invisible to authentication.
    pub active: bool,
    pub email_verified: bool,
    /// sha256 hex of the raw verification token; matched only against the hash.
    #[serde(skip_serializing, default)]
    #[ts(skip)]
    #[schema(ignore)]
    pub email_verification_token: Option<String>,
    #[serde(skip_serializing, default)]
    #[ts(skip)]
    #[schema(ignore)]
    pub email_verification_expires: Option<DateTime<Utc>>,
    #[serde(skip_serializing, default)]
    #[ts(skip)]
    #[schema(ignore)]
    pub password_reset_token: Option<String>,
    #[serde(skip_serializing, default)]
    #[ts(skip)]
    #[schema(ignore)]
    pub password_reset_expires: Option<DateTime<Utc>>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

impl Default for User {
    fn default() -> Self {
        Self {
            id: Uuid::default(),
            name: String::new(),
            email: String::new(),
            password_hash: String::new(),
            role: Role::default(),
            phone: None,
            photo: None,
            active: true,
            email_verified: false,
            email_verification_token: None,
            email_verification_expires: None,
            password_reset_token: None,
            password_reset_expires: None,
            created_at: DateTime::UNIX_EPOCH,
            updated_at: DateTime::UNIX_EPOCH,
        }
    }
}

/// Property
///
/// A listing record from the `properties` table. The geographic point is stored
/// flat as a longitude/latitude pair plus address text. `slug`, `ratings_average`
/// and `ratings_quantity` are derived fields recomputed by explicit post-commit
/// callbacks (title write -> slug; review write -> rating aggregate).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow)]
#[ts(export)]
pub struct Property {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub price: f64,
    pub price_per: PricePer,
    pub property_type: PropertyType,
    pub bedrooms: i32,
    pub bathrooms: i32,
    pub area: f64,
    pub area_unit: AreaUnit,
    pub longitude: f64,
    pub latitude: f64,
    pub address: Option<String>,
    pub amenities: Vec<String>,
    // Image filenames only; files live under the public static path.
    pub images: Vec<String>,
    pub featured_image: Option<String>,
    pub status: PropertyStatus,
    // Owning user (the lister).
    pub listed_by: Uuid,
    pub year_built: Option<i32>,
    pub parking_spaces: i32,
    pub furnishing_status: Option<FurnishingStatus>,
    pub is_featured: bool,
    pub views: i64,
    pub ratings_average: f64,
    pub ratings_quantity: i64,
    pub slug: String,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

impl Default for Property {
    fn default() -> Self {
        Self {
            id: Uuid::default(),
            title: String::new(),
            description: String::new(),
            price: 0.0,
            price_per: PricePer::default(),
            property_type: PropertyType::default(),
            bedrooms: 0,
            bathrooms: 0,
            area: 0.0,
            area_unit: AreaUnit::default(),
            longitude: 0.0,
            latitude: 0.0,
            address: None,
            amenities: Vec::new(),
            images: Vec::new(),
            featured_image: None,
            status: PropertyStatus::default(),
            listed_by: Uuid::default(),
            year_built: None,
            parking_spaces: 0,
            furnishing_status: None,
            is_featured: false,
            views: 0,
            ratings_average: 4.5,
            ratings_quantity: 0,
            slug: String::new(),
            created_at: DateTime::UNIX_EPOCH,
            updated_at: DateTime::UNIX_EPOCH,
        }
    }
}

/// Review
///
/// A rating+comment tied to exactly one property and one user. A given
/// (property, user) pair may have at most one review.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow)]
#[ts(export)]
pub struct Review {
    pub id: Uuid,
    pub review: String,
    pub rating: f64,
    pub property: Uuid,
    pub user_id: Uuid,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

impl Default for Review {
    fn default() -> Self {
        Self {
            id: Uuid::default(),
            review: String::new(),
            rating: 0.0,
            property: Uuid::default(),
            user_id: Uuid::default(),
            created_at: DateTime::UNIX_EPOCH,
        }
    }
}

// --- Request Payloads (Input Schemas) ---

/// SignupRequest
///
/// Input payload for POST /auth/signup. The role defaults to "user"; admin
/// accounts can never be self-provisioned.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate)]
#[ts(export)]
pub struct SignupRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 8, max = 128))]
    pub password: String,
    pub password_confirm: String,
    pub role: Option<Role>,
    pub phone: Option<String>,
}

/// LoginRequest
///
/// Both fields are optional so that a missing one yields a clean 400 rather
/// than a body-deserialization rejection.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct ForgotPasswordRequest {
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate)]
#[ts(export)]
pub struct ResetPasswordRequest {
    #[validate(length(min = 8, max = 128))]
    pub password: String,
    pub password_confirm: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate)]
#[ts(export)]
pub struct UpdatePasswordRequest {
    pub current_password: String,
    #[validate(length(min = 8, max = 128))]
    pub password: String,
    pub password_confirm: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct ResendVerificationRequest {
    pub email: Option<String>,
}

/// UpdateMeFields
///
/// Typed allow-list for self-service profile updates. Unknown JSON keys are
/// silently dropped during deserialization; password changes are rejected
/// upstream before this struct is ever built.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate, Default)]
#[ts(export)]
pub struct UpdateMeFields {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    pub phone: Option<String>,
    pub photo: Option<String>,
}

/// AdminUpdateUserFields
///
/// Typed allow-list for admin edits; the only path that can change role/active.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate, Default)]
#[ts(export)]
pub struct AdminUpdateUserFields {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    pub role: Option<Role>,
    pub active: Option<bool>,
    pub photo: Option<String>,
}

/// CreatePropertyRequest
///
/// Input payload for POST /properties. Coordinates are validated at the schema
/// level; the owning user is bound to the authenticated caller by the handler.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate)]
#[ts(export)]
pub struct CreatePropertyRequest {
    #[validate(length(min = 10, max = 100))]
    pub title: String,
    #[validate(length(min = 1))]
    pub description: String,
    #[validate(range(min = 0.0))]
    pub price: f64,
    pub price_per: Option<PricePer>,
    pub property_type: PropertyType,
    #[validate(range(min = 0))]
    pub bedrooms: i32,
    #[validate(range(min = 0))]
    pub bathrooms: i32,
    #[validate(range(min = 0.0))]
    pub area: f64,
    pub area_unit: Option<AreaUnit>,
    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: f64,
    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: f64,
    pub address: Option<String>,
    pub amenities: Option<Vec<String>>,
    pub status: Option<PropertyStatus>,
    pub year_built: Option<i32>,
    pub parking_spaces: Option<i32>,
    pub furnishing_status: Option<FurnishingStatus>,
    pub is_featured: Option<bool>,
}

/// UpdatePropertyFields
///
/// Typed allow-list for PATCH /properties/{id}. Any field outside this set is
/// silently dropped before the update is applied (never rejected). Derived
/// fields (slug, ratings, views) and ownership are not reachable from here.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate, Default)]
#[ts(export)]
pub struct UpdatePropertyFields {
    #[validate(length(min = 10, max = 100))]
    pub title: Option<String>,
    pub description: Option<String>,
    #[validate(range(min = 0.0))]
    pub price: Option<f64>,
    pub price_per: Option<PricePer>,
    pub property_type: Option<PropertyType>,
    #[validate(range(min = 0))]
    pub bedrooms: Option<i32>,
    #[validate(range(min = 0))]
    pub bathrooms: Option<i32>,
    #[validate(range(min = 0.0))]
    pub area: Option<f64>,
    pub area_unit: Option<AreaUnit>,
    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: Option<f64>,
    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: Option<f64>,
    pub address: Option<String>,
    pub amenities: Option<Vec<String>>,
    pub status: Option<PropertyStatus>,
    pub year_built: Option<i32>,
    pub parking_spaces: Option<i32>,
    pub furnishing_status: Option<FurnishingStatus>,
    pub is_featured: Option<bool>,
    pub images: Option<Vec<String>>,
    pub featured_image: Option<String>,
}

/// CreateReviewRequest
///
/// `property` may be omitted on the nested route, where it is filled in from
/// the path parameter.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate)]
#[ts(export)]
pub struct CreateReviewRequest {
    #[validate(length(min = 1))]
    pub review: String,
    #[validate(range(min = 1.0, max = 5.0))]
    pub rating: f64,
    pub property: Option<Uuid>,
}

/// UpdateReviewFields
///
/// Typed allow-list for review updates: text and rating only.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate, Default)]
#[ts(export)]
pub struct UpdateReviewFields {
    #[validate(length(min = 1))]
    pub review: Option<String>,
    #[validate(range(min = 1.0, max = 5.0))]
    pub rating: Option<f64>,
}

// --- Aggregation Output Schemas ---

/// PropertyTypeStats
///
/// One row of the GET /properties/stats aggregation: per property type over
/// listings rated at least 4.5.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct PropertyTypeStats {
    pub property_type: PropertyType,
    pub num_properties: i64,
    pub avg_rating: f64,
    pub avg_price: f64,
    pub min_price: f64,
    pub max_price: f64,
}

// --- Derived Fields ---

/// Derives the URL-safe slug from a property title: lowercase, non-word
/// characters removed, whitespace runs collapsed to single hyphens, hyphen runs
/// collapsed, no leading or trailing hyphen.
pub fn slugify(title: &str) -> String {
    let lowered = title.to_lowercase();
    let mut out = String::with_capacity(lowered.len());
    let mut prev_hyphen = false;
    for ch in lowered.chars() {
        let mapped = if ch.is_whitespace() { '-' } else { ch };
        if !(mapped.is_alphanumeric() || mapped == '_' || mapped == '-') {
            continue;
        }
        if mapped == '-' {
            if prev_hyphen {
                continue;
            }
            prev_hyphen = true;
        } else {
            prev_hyphen = false;
        }
        out.push(mapped);
    }
    out.trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_is_lowercased_and_hyphenated() {
        assert_eq!(slugify("Luxury Villa in Palm Jumeirah"), "luxury-villa-in-palm-jumeirah");
    }

    #[test]
    fn slug_strips_non_word_characters() {
        assert_eq!(slugify("Stunning 2BR! (Sea View) @Marina"), "stunning-2br-sea-view-marina");
    }

    #[test]
    fn slug_collapses_whitespace_and_hyphen_runs() {
        assert_eq!(slugify("Penthouse  --  Downtown   Dubai"), "penthouse-downtown-dubai");
    }

    #[test]
    fn slug_has_no_leading_or_trailing_hyphen() {
        assert_eq!(slugify("  !!Spacious Loft!!  "), "spacious-loft");
        assert_eq!(slugify("---"), "");
    }

    #[test]
    fn password_hash_is_never_serialized() {
        let user = User {
            password_hash: "$argon2id$secret".to_string(),
            email_verification_token: Some("deadbeef".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password_hash").is_none());
        assert!(json.get("email_verification_token").is_none());
        assert!(json.get("email").is_some());
    }

    #[test]
    fn update_payload_drops_unknown_fields() {
        let body = serde_json::json!({
            "title": "A Perfectly Valid Title",
            "views": 999999,
            "ratings_average": 5.0,
            "listed_by": "2c0f7a44-52f5-4df1-8f52-0000deadbeef"
        });
        let fields: UpdatePropertyFields = serde_json::from_value(body).unwrap();
        assert_eq!(fields.title.as_deref(), Some("A Perfectly Valid Title"));
        // Fields outside the allow-list simply do not exist on the typed set.
    }
}
