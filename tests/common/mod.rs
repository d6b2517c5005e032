//! Shared test harness: an in-memory Repository plus mock mailer and media
//! store, wired into the real router so tests exercise the full HTTP stack
//! without Postgres, SMTP or the filesystem.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tower::util::ServiceExt;
use uuid::Uuid;

use estate_portal::{
    AppConfig, AppState, MockMailer, MockMediaStore, Repository, create_router,
    auth,
    models::{
        AdminUpdateUserFields, Property, PropertyType, PropertyTypeStats, Review, Role,
        UpdateMeFields, UpdatePropertyFields, UpdateReviewFields, User, slugify,
    },
    query::{CmpOp, FilterClause, FilterValue, QueryDescriptor, central_angle},
};

pub const TEST_PASSWORD: &str = "password123";

// --- In-Memory Repository ---

#[derive(Default)]
pub struct InMemoryRepository {
    pub users: Mutex<Vec<User>>,
    pub properties: Mutex<Vec<Property>>,
    pub reviews: Mutex<Vec<Review>>,
}

/// A database error that reads as a unique violation, so the handler-level
/// conflict mapping can be exercised without Postgres.
#[derive(Debug)]
struct UniqueViolation(String);

impl std::fmt::Display for UniqueViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for UniqueViolation {}

impl sqlx::error::DatabaseError for UniqueViolation {
    fn message(&self) -> &str {
        &self.0
    }

    fn code(&self) -> Option<std::borrow::Cow<'_, str>> {
        Some("23505".into())
    }

    fn kind(&self) -> sqlx::error::ErrorKind {
        sqlx::error::ErrorKind::UniqueViolation
    }

    fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self
    }

    fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
        self
    }

    fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
        self
    }
}

fn unique_violation(message: &str) -> sqlx::Error {
    sqlx::Error::Database(Box::new(UniqueViolation(message.to_string())))
}

fn clause_matches(clause: &FilterClause, item: &Value) -> bool {
    let field = match item.get(clause.column) {
        Some(f) => f,
        None => return false,
    };
    match &clause.value {
        FilterValue::Number(n) => field
            .as_f64()
            .map(|x| cmp_ok(x.partial_cmp(n), clause.op))
            .unwrap_or(false),
        FilterValue::Text(s) => field
            .as_str()
            .map(|x| cmp_ok(Some(x.cmp(s.as_str())), clause.op))
            .unwrap_or(false),
        FilterValue::Boolean(b) => {
            matches!(clause.op, CmpOp::Eq) && field.as_bool() == Some(*b)
        }
    }
}

fn cmp_ok(ordering: Option<std::cmp::Ordering>, op: CmpOp) -> bool {
    use std::cmp::Ordering::*;
    match (op, ordering) {
        (CmpOp::Eq, Some(Equal)) => true,
        (CmpOp::Gt, Some(Greater)) => true,
        (CmpOp::Gte, Some(Greater | Equal)) => true,
        (CmpOp::Lt, Some(Less)) => true,
        (CmpOp::Lte, Some(Less | Equal)) => true,
        _ => false,
    }
}

/// Filters, sorts and paginates a snapshot the way the SQL path would.
fn apply_descriptor<T: Serialize + Clone>(items: &[T], desc: &QueryDescriptor) -> (Vec<T>, i64) {
    let mut keyed: Vec<(Value, T)> = items
        .iter()
        .map(|t| (serde_json::to_value(t).unwrap(), t.clone()))
        .collect();

    keyed.retain(|(v, _)| desc.filters.iter().all(|c| clause_matches(c, v)));
    let total = keyed.len() as i64;

    for clause in desc.sort.iter().rev() {
        keyed.sort_by(|(a, _), (b, _)| {
            let (a, b) = (a.get(clause.column), b.get(clause.column));
            let ord = match (a.and_then(Value::as_f64), b.and_then(Value::as_f64)) {
                (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
                _ => a
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .cmp(b.and_then(Value::as_str).unwrap_or_default()),
            };
            if clause.descending { ord.reverse() } else { ord }
        });
    }

    let page = keyed
        .into_iter()
        .skip(desc.offset() as usize)
        .take(desc.limit as usize)
        .map(|(_, t)| t)
        .collect();
    (page, total)
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, sqlx::Error> {
        Ok(self.users.lock().unwrap().iter().find(|u| u.id == id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, sqlx::Error> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn create_user(&self, user: &User) -> Result<User, sqlx::Error> {
        let mut users = self.users.lock().unwrap();
        if users.iter().any(|u| u.email == user.email) {
            return Err(unique_violation("users_email_key"));
        }
        users.push(user.clone());
        Ok(user.clone())
    }

    async fn list_users(&self, desc: &QueryDescriptor) -> Result<(Vec<User>, i64), sqlx::Error> {
        Ok(apply_descriptor(&self.users.lock().unwrap(), desc))
    }

    async fn update_user_profile(
        &self,
        id: Uuid,
        fields: &UpdateMeFields,
    ) -> Result<User, sqlx::Error> {
        let mut users = self.users.lock().unwrap();
        let user = users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or(sqlx::Error::RowNotFound)?;
        if let Some(name) = &fields.name {
            user.name = name.clone();
        }
        if let Some(email) = &fields.email {
            user.email = email.clone();
        }
        if let Some(phone) = &fields.phone {
            user.phone = Some(phone.clone());
        }
        if let Some(photo) = &fields.photo {
            user.photo = Some(photo.clone());
        }
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn admin_update_user(
        &self,
        id: Uuid,
        fields: &AdminUpdateUserFields,
    ) -> Result<User, sqlx::Error> {
        let mut users = self.users.lock().unwrap();
        let user = users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or(sqlx::Error::RowNotFound)?;
        if let Some(name) = &fields.name {
            user.name = name.clone();
        }
        if let Some(email) = &fields.email {
            user.email = email.clone();
        }
        if let Some(role) = fields.role {
            user.role = role;
        }
        if let Some(active) = fields.active {
            user.active = active;
        }
        if let Some(photo) = &fields.photo {
            user.photo = Some(photo.clone());
        }
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn set_user_active(&self, id: Uuid, active: bool) -> Result<(), sqlx::Error> {
        let mut users = self.users.lock().unwrap();
        let user = users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or(sqlx::Error::RowNotFound)?;
        user.active = active;
        Ok(())
    }

    async fn delete_user(&self, id: Uuid) -> Result<Option<User>, sqlx::Error> {
        let mut users = self.users.lock().unwrap();
        let pos = users.iter().position(|u| u.id == id);
        Ok(pos.map(|p| users.remove(p)))
    }

    async fn set_verification_token(
        &self,
        id: Uuid,
        token_hash: Option<String>,
        expires: Option<DateTime<Utc>>,
    ) -> Result<(), sqlx::Error> {
        let mut users = self.users.lock().unwrap();
        if let Some(user) = users.iter_mut().find(|u| u.id == id) {
            user.email_verification_token = token_hash;
            user.email_verification_expires = expires;
        }
        Ok(())
    }

    async fn find_user_by_verification_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<User>, sqlx::Error> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.email_verification_token.as_deref() == Some(token_hash))
            .cloned())
    }

    async fn mark_email_verified(&self, id: Uuid) -> Result<(), sqlx::Error> {
        let mut users = self.users.lock().unwrap();
        if let Some(user) = users.iter_mut().find(|u| u.id == id) {
            user.email_verified = true;
            user.email_verification_token = None;
            user.email_verification_expires = None;
        }
        Ok(())
    }

    async fn set_password_reset_token(
        &self,
        id: Uuid,
        token_hash: Option<String>,
        expires: Option<DateTime<Utc>>,
    ) -> Result<(), sqlx::Error> {
        let mut users = self.users.lock().unwrap();
        if let Some(user) = users.iter_mut().find(|u| u.id == id) {
            user.password_reset_token = token_hash;
            user.password_reset_expires = expires;
        }
        Ok(())
    }

    async fn find_user_by_reset_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<User>, sqlx::Error> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.password_reset_token.as_deref() == Some(token_hash))
            .cloned())
    }

    async fn set_user_password(&self, id: Uuid, password_hash: &str) -> Result<(), sqlx::Error> {
        let mut users = self.users.lock().unwrap();
        let user = users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or(sqlx::Error::RowNotFound)?;
        user.password_hash = password_hash.to_string();
        user.password_reset_token = None;
        user.password_reset_expires = None;
        Ok(())
    }

    async fn list_properties(
        &self,
        desc: &QueryDescriptor,
    ) -> Result<(Vec<Property>, i64), sqlx::Error> {
        Ok(apply_descriptor(&self.properties.lock().unwrap(), desc))
    }

    async fn find_property(&self, id: Uuid) -> Result<Option<Property>, sqlx::Error> {
        Ok(self
            .properties
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.id == id)
            .cloned())
    }

    async fn find_property_and_bump_views(
        &self,
        id: Uuid,
    ) -> Result<Option<Property>, sqlx::Error> {
        let mut properties = self.properties.lock().unwrap();
        Ok(properties.iter_mut().find(|p| p.id == id).map(|p| {
            p.views += 1;
            p.clone()
        }))
    }

    async fn create_property(&self, property: &Property) -> Result<Property, sqlx::Error> {
        self.properties.lock().unwrap().push(property.clone());
        Ok(property.clone())
    }

    async fn update_property(
        &self,
        id: Uuid,
        fields: &UpdatePropertyFields,
        slug: Option<&str>,
    ) -> Result<Property, sqlx::Error> {
        let mut properties = self.properties.lock().unwrap();
        let p = properties
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or(sqlx::Error::RowNotFound)?;
        if let Some(title) = &fields.title {
            p.title = title.clone();
        }
        if let Some(slug) = slug {
            p.slug = slug.to_string();
        }
        if let Some(description) = &fields.description {
            p.description = description.clone();
        }
        if let Some(price) = fields.price {
            p.price = price;
        }
        if let Some(price_per) = fields.price_per {
            p.price_per = price_per;
        }
        if let Some(property_type) = fields.property_type {
            p.property_type = property_type;
        }
        if let Some(bedrooms) = fields.bedrooms {
            p.bedrooms = bedrooms;
        }
        if let Some(bathrooms) = fields.bathrooms {
            p.bathrooms = bathrooms;
        }
        if let Some(area) = fields.area {
            p.area = area;
        }
        if let Some(area_unit) = fields.area_unit {
            p.area_unit = area_unit;
        }
        if let Some(longitude) = fields.longitude {
            p.longitude = longitude;
        }
        if let Some(latitude) = fields.latitude {
            p.latitude = latitude;
        }
        if let Some(address) = &fields.address {
            p.address = Some(address.clone());
        }
        if let Some(amenities) = &fields.amenities {
            p.amenities = amenities.clone();
        }
        if let Some(status) = fields.status {
            p.status = status;
        }
        if let Some(year_built) = fields.year_built {
            p.year_built = Some(year_built);
        }
        if let Some(parking_spaces) = fields.parking_spaces {
            p.parking_spaces = parking_spaces;
        }
        if let Some(furnishing_status) = fields.furnishing_status {
            p.furnishing_status = Some(furnishing_status);
        }
        if let Some(is_featured) = fields.is_featured {
            p.is_featured = is_featured;
        }
        if let Some(images) = &fields.images {
            p.images = images.clone();
        }
        if let Some(featured_image) = &fields.featured_image {
            p.featured_image = Some(featured_image.clone());
        }
        p.updated_at = Utc::now();
        Ok(p.clone())
    }

    async fn delete_property(&self, id: Uuid) -> Result<Option<Property>, sqlx::Error> {
        let mut properties = self.properties.lock().unwrap();
        let pos = properties.iter().position(|p| p.id == id);
        let removed = pos.map(|i| properties.remove(i));
        if removed.is_some() {
            self.reviews.lock().unwrap().retain(|r| r.property != id);
        }
        Ok(removed)
    }

    async fn properties_within_radius(
        &self,
        lat: f64,
        lng: f64,
        angular_radius: f64,
    ) -> Result<Vec<Property>, sqlx::Error> {
        Ok(self
            .properties
            .lock()
            .unwrap()
            .iter()
            .filter(|p| central_angle(lat, lng, p.latitude, p.longitude) <= angular_radius)
            .cloned()
            .collect())
    }

    async fn property_type_stats(&self) -> Result<Vec<PropertyTypeStats>, sqlx::Error> {
        let properties = self.properties.lock().unwrap();
        let mut by_type: std::collections::BTreeMap<String, Vec<&Property>> = Default::default();
        for p in properties.iter().filter(|p| p.ratings_average >= 4.5) {
            let key = serde_json::to_string(&p.property_type).unwrap();
            by_type.entry(key).or_default().push(p);
        }
        let mut stats: Vec<PropertyTypeStats> = by_type
            .into_values()
            .map(|group| {
                let n = group.len() as f64;
                PropertyTypeStats {
                    property_type: group[0].property_type,
                    num_properties: group.len() as i64,
                    avg_rating: group.iter().map(|p| p.ratings_average).sum::<f64>() / n,
                    avg_price: group.iter().map(|p| p.price).sum::<f64>() / n,
                    min_price: group.iter().map(|p| p.price).fold(f64::INFINITY, f64::min),
                    max_price: group
                        .iter()
                        .map(|p| p.price)
                        .fold(f64::NEG_INFINITY, f64::max),
                }
            })
            .collect();
        stats.sort_by(|a, b| a.avg_price.partial_cmp(&b.avg_price).unwrap());
        Ok(stats)
    }

    async fn recompute_property_rating(&self, property_id: Uuid) -> Result<(), sqlx::Error> {
        let ratings: Vec<f64> = self
            .reviews
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.property == property_id)
            .map(|r| r.rating)
            .collect();
        let mut properties = self.properties.lock().unwrap();
        if let Some(p) = properties.iter_mut().find(|p| p.id == property_id) {
            p.ratings_quantity = ratings.len() as i64;
            p.ratings_average = if ratings.is_empty() {
                4.5
            } else {
                ratings.iter().sum::<f64>() / ratings.len() as f64
            };
        }
        Ok(())
    }

    async fn list_reviews(
        &self,
        property: Option<Uuid>,
        desc: &QueryDescriptor,
    ) -> Result<(Vec<Review>, i64), sqlx::Error> {
        let reviews: Vec<Review> = self
            .reviews
            .lock()
            .unwrap()
            .iter()
            .filter(|r| property.map(|pid| r.property == pid).unwrap_or(true))
            .cloned()
            .collect();
        Ok(apply_descriptor(&reviews, desc))
    }

    async fn find_review(&self, id: Uuid) -> Result<Option<Review>, sqlx::Error> {
        Ok(self
            .reviews
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }

    async fn create_review(&self, review: &Review) -> Result<Review, sqlx::Error> {
        let mut reviews = self.reviews.lock().unwrap();
        if reviews
            .iter()
            .any(|r| r.property == review.property && r.user_id == review.user_id)
        {
            return Err(unique_violation("reviews_property_user_id_key"));
        }
        reviews.push(review.clone());
        Ok(review.clone())
    }

    async fn update_review(
        &self,
        id: Uuid,
        fields: &UpdateReviewFields,
    ) -> Result<Review, sqlx::Error> {
        let mut reviews = self.reviews.lock().unwrap();
        let r = reviews
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(sqlx::Error::RowNotFound)?;
        if let Some(review) = &fields.review {
            r.review = review.clone();
        }
        if let Some(rating) = fields.rating {
            r.rating = rating;
        }
        Ok(r.clone())
    }

    async fn delete_review(&self, id: Uuid) -> Result<Option<Review>, sqlx::Error> {
        let mut reviews = self.reviews.lock().unwrap();
        let pos = reviews.iter().position(|r| r.id == id);
        Ok(pos.map(|i| reviews.remove(i)))
    }
}

// --- App Assembly ---

pub struct TestApp {
    pub router: Router,
    pub repo: Arc<InMemoryRepository>,
    pub mailer: Arc<MockMailer>,
    pub media: Arc<MockMediaStore>,
    pub config: AppConfig,
}

pub fn spawn_app() -> TestApp {
    let repo = Arc::new(InMemoryRepository::default());
    let mailer = Arc::new(MockMailer::default());
    let media = Arc::new(MockMediaStore::default());
    let config = AppConfig::default();

    let state = AppState {
        repo: repo.clone(),
        media: media.clone(),
        mailer: mailer.clone(),
        config: config.clone(),
    };

    TestApp {
        router: create_router(state),
        repo,
        mailer,
        media,
        config,
    }
}

impl TestApp {
    /// Inserts a user directly and returns it together with a signed token.
    pub fn seed_user(&self, role: Role, verified: bool) -> (User, String) {
        let now = Utc::now();
        let id = Uuid::new_v4();
        let user = User {
            id,
            name: format!("Test {role:?}"),
            email: format!("{id}@example.com"),
            password_hash: auth::hash_password(TEST_PASSWORD).unwrap(),
            role,
            phone: None,
            photo: None,
            active: true,
            email_verified: verified,
            email_verification_token: None,
            email_verification_expires: None,
            password_reset_token: None,
            password_reset_expires: None,
            created_at: now,
            updated_at: now,
        };
        self.repo.users.lock().unwrap().push(user.clone());
        let token = auth::sign_token(user.id, &self.config).unwrap();
        (user, token)
    }

    /// Inserts a listing owned by the given user.
    pub fn seed_property(&self, owner: Uuid, title: &str, price: f64) -> Property {
        let now = Utc::now();
        let property = Property {
            id: Uuid::new_v4(),
            title: title.to_string(),
            slug: slugify(title),
            description: "A test listing".to_string(),
            price,
            bedrooms: 2,
            bathrooms: 2,
            area: 1200.0,
            longitude: 55.2708,
            latitude: 25.2048,
            amenities: vec!["parking".to_string()],
            listed_by: owner,
            ratings_average: 4.5,
            property_type: PropertyType::Apartment,
            created_at: now,
            updated_at: now,
            ..Default::default()
        };
        self.repo.properties.lock().unwrap().push(property.clone());
        property
    }
}

/// Sends one request through the router and returns status plus parsed body.
pub async fn send(
    router: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }
    let request = match body {
        Some(v) => builder
            .header("content-type", "application/json")
            .body(Body::from(v.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

/// Pulls the raw one-time token out of a captured email body (the last path
/// segment of the emailed link).
pub fn token_from_email(body: &str) -> String {
    body.split_whitespace()
        .find(|w| w.contains("/verify-email/") || w.contains("/reset-password/"))
        .and_then(|url| url.rsplit('/').next())
        .expect("email body contains a token link")
        .to_string()
}
