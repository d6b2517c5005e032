use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{
    models::{
        AdminUpdateUserFields, Property, PropertyTypeStats, Review, UpdateMeFields,
        UpdatePropertyFields, UpdateReviewFields, User,
    },
    query::{FilterValue, QueryDescriptor},
};

/// Repository
///
/// The persistence boundary of the application. Handlers only ever see this
/// trait; the production implementation is Postgres-backed and tests swap in
/// an in-memory double. All methods surface `sqlx::Error`, which the error
/// responder maps onto the HTTP taxonomy (RowNotFound -> 404, unique
/// violations -> 409).
#[async_trait]
pub trait Repository: Send + Sync {
    // Users.
    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, sqlx::Error>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, sqlx::Error>;
    async fn create_user(&self, user: &User) -> Result<User, sqlx::Error>;
    async fn list_users(&self, desc: &QueryDescriptor) -> Result<(Vec<User>, i64), sqlx::Error>;
    async fn update_user_profile(
        &self,
        id: Uuid,
        fields: &UpdateMeFields,
    ) -> Result<User, sqlx::Error>;
    async fn admin_update_user(
        &self,
        id: Uuid,
        fields: &AdminUpdateUserFields,
    ) -> Result<User, sqlx::Error>;
    async fn set_user_active(&self, id: Uuid, active: bool) -> Result<(), sqlx::Error>;
    /// Hard delete; returns the removed row so the caller can clean up its photo.
    async fn delete_user(&self, id: Uuid) -> Result<Option<User>, sqlx::Error>;

    // One-time token state (email verification, password reset).
    async fn set_verification_token(
        &self,
        id: Uuid,
        token_hash: Option<String>,
        expires: Option<DateTime<Utc>>,
    ) -> Result<(), sqlx::Error>;
    /// Matches the sha256 hash of a presented token regardless of expiry;
    /// callers compare the expiry stamp so an expired token reads differently
    /// from an unmatched one.
    async fn find_user_by_verification_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<User>, sqlx::Error>;
    async fn mark_email_verified(&self, id: Uuid) -> Result<(), sqlx::Error>;
    async fn set_password_reset_token(
        &self,
        id: Uuid,
        token_hash: Option<String>,
        expires: Option<DateTime<Utc>>,
    ) -> Result<(), sqlx::Error>;
    async fn find_user_by_reset_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<User>, sqlx::Error>;
    /// Stores the new hash and clears any outstanding reset token.
    async fn set_user_password(&self, id: Uuid, password_hash: &str) -> Result<(), sqlx::Error>;

    // Properties.
    async fn list_properties(
        &self,
        desc: &QueryDescriptor,
    ) -> Result<(Vec<Property>, i64), sqlx::Error>;
    async fn find_property(&self, id: Uuid) -> Result<Option<Property>, sqlx::Error>;
    /// Single-listing read path: bumps the view counter and returns the row.
    async fn find_property_and_bump_views(
        &self,
        id: Uuid,
    ) -> Result<Option<Property>, sqlx::Error>;
    async fn create_property(&self, property: &Property) -> Result<Property, sqlx::Error>;
    async fn update_property(
        &self,
        id: Uuid,
        fields: &UpdatePropertyFields,
        slug: Option<&str>,
    ) -> Result<Property, sqlx::Error>;
    /// Hard delete; reviews cascade at the schema level. Returns the removed
    /// row so the caller can delete its image files.
    async fn delete_property(&self, id: Uuid) -> Result<Option<Property>, sqlx::Error>;
    /// All listings whose central angle from (lat, lng) is within the given
    /// angular radius (radians), boundary inclusive.
    async fn properties_within_radius(
        &self,
        lat: f64,
        lng: f64,
        angular_radius: f64,
    ) -> Result<Vec<Property>, sqlx::Error>;
    async fn property_type_stats(&self) -> Result<Vec<PropertyTypeStats>, sqlx::Error>;
    /// Recomputes the rating aggregate from the property's current reviews.
    /// With no reviews the aggregate resets to the 4.5 / 0 defaults.
    async fn recompute_property_rating(&self, property_id: Uuid) -> Result<(), sqlx::Error>;

    // Reviews.
    async fn list_reviews(
        &self,
        property: Option<Uuid>,
        desc: &QueryDescriptor,
    ) -> Result<(Vec<Review>, i64), sqlx::Error>;
    async fn find_review(&self, id: Uuid) -> Result<Option<Review>, sqlx::Error>;
    async fn create_review(&self, review: &Review) -> Result<Review, sqlx::Error>;
    async fn update_review(
        &self,
        id: Uuid,
        fields: &UpdateReviewFields,
    ) -> Result<Review, sqlx::Error>;
    async fn delete_review(&self, id: Uuid) -> Result<Option<Review>, sqlx::Error>;
}

/// Shared handle injected into the router state.
pub type RepositoryState = Arc<dyn Repository>;

/// PostgresRepository
///
/// Production implementation over a sqlx connection pool. Filter and sort
/// clauses come from `QueryDescriptor`, whose column names are restricted to
/// the typed field sets; values are always bound, never interpolated.
#[derive(Clone)]
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Appends the descriptor's filter clauses to a builder whose SQL already ends
/// in a WHERE condition. Text filters compare against the column's text form so
/// enum columns filter by their wire names.
fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, desc: &QueryDescriptor) {
    for clause in &desc.filters {
        qb.push(" AND ");
        match &clause.value {
            FilterValue::Text(s) => {
                qb.push(clause.column)
                    .push("::text ")
                    .push(clause.op.sql())
                    .push(" ")
                    .push_bind(s.clone());
            }
            FilterValue::Number(n) => {
                qb.push(clause.column)
                    .push("::float8 ")
                    .push(clause.op.sql())
                    .push(" ")
                    .push_bind(*n);
            }
            FilterValue::Boolean(b) => {
                qb.push(clause.column)
                    .push(" ")
                    .push(clause.op.sql())
                    .push(" ")
                    .push_bind(*b);
            }
        }
    }
}

/// Appends ORDER BY / LIMIT / OFFSET. Sort columns come from the static
/// sortable sets, so pushing them as SQL text is safe.
fn push_sort_and_page(qb: &mut QueryBuilder<'_, Postgres>, desc: &QueryDescriptor) {
    if !desc.sort.is_empty() {
        qb.push(" ORDER BY ");
        for (i, clause) in desc.sort.iter().enumerate() {
            if i > 0 {
                qb.push(", ");
            }
            qb.push(clause.column)
                .push(if clause.descending { " DESC" } else { " ASC" });
        }
    }
    qb.push(" LIMIT ").push_bind(desc.limit);
    qb.push(" OFFSET ").push_bind(desc.offset());
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
    }

    async fn create_user(&self, user: &User) -> Result<User, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (
                id, name, email, password_hash, role, phone, photo, active,
                email_verified, email_verification_token, email_verification_expires,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING *
            "#,
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role)
        .bind(&user.phone)
        .bind(&user.photo)
        .bind(user.active)
        .bind(user.email_verified)
        .bind(&user.email_verification_token)
        .bind(user.email_verification_expires)
        .bind(user.created_at)
        .bind(user.updated_at)
        .fetch_one(&self.pool)
        .await
    }

    async fn list_users(&self, desc: &QueryDescriptor) -> Result<(Vec<User>, i64), sqlx::Error> {
        let mut count_qb = QueryBuilder::new("SELECT COUNT(*) FROM users WHERE TRUE");
        push_filters(&mut count_qb, desc);
        let total: i64 = count_qb.build_query_scalar().fetch_one(&self.pool).await?;

        let mut qb = QueryBuilder::new("SELECT * FROM users WHERE TRUE");
        push_filters(&mut qb, desc);
        push_sort_and_page(&mut qb, desc);
        let users = qb.build_query_as::<User>().fetch_all(&self.pool).await?;

        Ok((users, total))
    }

    async fn update_user_profile(
        &self,
        id: Uuid,
        fields: &UpdateMeFields,
    ) -> Result<User, sqlx::Error> {
        let mut qb = QueryBuilder::new("UPDATE users SET updated_at = now()");
        if let Some(name) = &fields.name {
            qb.push(", name = ").push_bind(name);
        }
        if let Some(email) = &fields.email {
            qb.push(", email = ").push_bind(email);
        }
        if let Some(phone) = &fields.phone {
            qb.push(", phone = ").push_bind(phone);
        }
        if let Some(photo) = &fields.photo {
            qb.push(", photo = ").push_bind(photo);
        }
        qb.push(" WHERE id = ").push_bind(id);
        qb.push(" RETURNING *");
        qb.build_query_as::<User>().fetch_one(&self.pool).await
    }

    async fn admin_update_user(
        &self,
        id: Uuid,
        fields: &AdminUpdateUserFields,
    ) -> Result<User, sqlx::Error> {
        let mut qb = QueryBuilder::new("UPDATE users SET updated_at = now()");
        if let Some(name) = &fields.name {
            qb.push(", name = ").push_bind(name);
        }
        if let Some(email) = &fields.email {
            qb.push(", email = ").push_bind(email);
        }
        if let Some(role) = fields.role {
            qb.push(", role = ").push_bind(role);
        }
        if let Some(active) = fields.active {
            qb.push(", active = ").push_bind(active);
        }
        if let Some(photo) = &fields.photo {
            qb.push(", photo = ").push_bind(photo);
        }
        qb.push(" WHERE id = ").push_bind(id);
        qb.push(" RETURNING *");
        qb.build_query_as::<User>().fetch_one(&self.pool).await
    }

    async fn set_user_active(&self, id: Uuid, active: bool) -> Result<(), sqlx::Error> {
        let result = sqlx::query("UPDATE users SET active = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(active)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(sqlx::Error::RowNotFound);
        }
        Ok(())
    }

    async fn delete_user(&self, id: Uuid) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>("DELETE FROM users WHERE id = $1 RETURNING *")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn set_verification_token(
        &self,
        id: Uuid,
        token_hash: Option<String>,
        expires: Option<DateTime<Utc>>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE users
            SET email_verification_token = $2,
                email_verification_expires = $3,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(token_hash)
        .bind(expires)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_user_by_verification_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT * FROM users
            WHERE email_verification_token = $1
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await
    }

    async fn mark_email_verified(&self, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE users
            SET email_verified = TRUE,
                email_verification_token = NULL,
                email_verification_expires = NULL,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_password_reset_token(
        &self,
        id: Uuid,
        token_hash: Option<String>,
        expires: Option<DateTime<Utc>>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE users
            SET password_reset_token = $2,
                password_reset_expires = $3,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(token_hash)
        .bind(expires)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_user_by_reset_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT * FROM users
            WHERE password_reset_token = $1
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await
    }

    async fn set_user_password(&self, id: Uuid, password_hash: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE users
            SET password_hash = $2,
                password_reset_token = NULL,
                password_reset_expires = NULL,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(password_hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_properties(
        &self,
        desc: &QueryDescriptor,
    ) -> Result<(Vec<Property>, i64), sqlx::Error> {
        let mut count_qb = QueryBuilder::new("SELECT COUNT(*) FROM properties WHERE TRUE");
        push_filters(&mut count_qb, desc);
        let total: i64 = count_qb.build_query_scalar().fetch_one(&self.pool).await?;

        let mut qb = QueryBuilder::new("SELECT * FROM properties WHERE TRUE");
        push_filters(&mut qb, desc);
        push_sort_and_page(&mut qb, desc);
        let properties = qb
            .build_query_as::<Property>()
            .fetch_all(&self.pool)
            .await?;

        Ok((properties, total))
    }

    async fn find_property(&self, id: Uuid) -> Result<Option<Property>, sqlx::Error> {
        sqlx::query_as::<_, Property>("SELECT * FROM properties WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn find_property_and_bump_views(
        &self,
        id: Uuid,
    ) -> Result<Option<Property>, sqlx::Error> {
        sqlx::query_as::<_, Property>(
            "UPDATE properties SET views = views + 1 WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn create_property(&self, property: &Property) -> Result<Property, sqlx::Error> {
        sqlx::query_as::<_, Property>(
            r#"
            INSERT INTO properties (
                id, title, description, price, price_per, property_type,
                bedrooms, bathrooms, area, area_unit, longitude, latitude,
                address, amenities, images, featured_image, status, listed_by,
                year_built, parking_spaces, furnishing_status, is_featured,
                views, ratings_average, ratings_quantity, slug, created_at, updated_at
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28
            )
            RETURNING *
            "#,
        )
        .bind(property.id)
        .bind(&property.title)
        .bind(&property.description)
        .bind(property.price)
        .bind(property.price_per)
        .bind(property.property_type)
        .bind(property.bedrooms)
        .bind(property.bathrooms)
        .bind(property.area)
        .bind(property.area_unit)
        .bind(property.longitude)
        .bind(property.latitude)
        .bind(&property.address)
        .bind(&property.amenities)
        .bind(&property.images)
        .bind(&property.featured_image)
        .bind(property.status)
        .bind(property.listed_by)
        .bind(property.year_built)
        .bind(property.parking_spaces)
        .bind(property.furnishing_status)
        .bind(property.is_featured)
        .bind(property.views)
        .bind(property.ratings_average)
        .bind(property.ratings_quantity)
        .bind(&property.slug)
        .bind(property.created_at)
        .bind(property.updated_at)
        .fetch_one(&self.pool)
        .await
    }

    async fn update_property(
        &self,
        id: Uuid,
        fields: &UpdatePropertyFields,
        slug: Option<&str>,
    ) -> Result<Property, sqlx::Error> {
        let mut qb = QueryBuilder::new("UPDATE properties SET updated_at = now()");
        if let Some(title) = &fields.title {
            qb.push(", title = ").push_bind(title);
        }
        if let Some(slug) = slug {
            qb.push(", slug = ").push_bind(slug);
        }
        if let Some(description) = &fields.description {
            qb.push(", description = ").push_bind(description);
        }
        if let Some(price) = fields.price {
            qb.push(", price = ").push_bind(price);
        }
        if let Some(price_per) = fields.price_per {
            qb.push(", price_per = ").push_bind(price_per);
        }
        if let Some(property_type) = fields.property_type {
            qb.push(", property_type = ").push_bind(property_type);
        }
        if let Some(bedrooms) = fields.bedrooms {
            qb.push(", bedrooms = ").push_bind(bedrooms);
        }
        if let Some(bathrooms) = fields.bathrooms {
            qb.push(", bathrooms = ").push_bind(bathrooms);
        }
        if let Some(area) = fields.area {
            qb.push(", area = ").push_bind(area);
        }
        if let Some(area_unit) = fields.area_unit {
            qb.push(", area_unit = ").push_bind(area_unit);
        }
        if let Some(longitude) = fields.longitude {
            qb.push(", longitude = ").push_bind(longitude);
        }
        if let Some(latitude) = fields.latitude {
            qb.push(", latitude = ").push_bind(latitude);
        }
        if let Some(address) = &fields.address {
            qb.push(", address = ").push_bind(address);
        }
        if let Some(amenities) = &fields.amenities {
            qb.push(", amenities = ").push_bind(amenities);
        }
        if let Some(status) = fields.status {
            qb.push(", status = ").push_bind(status);
        }
        if let Some(year_built) = fields.year_built {
            qb.push(", year_built = ").push_bind(year_built);
        }
        if let Some(parking_spaces) = fields.parking_spaces {
            qb.push(", parking_spaces = ").push_bind(parking_spaces);
        }
        if let Some(furnishing_status) = fields.furnishing_status {
            qb.push(", furnishing_status = ").push_bind(furnishing_status);
        }
        if let Some(is_featured) = fields.is_featured {
            qb.push(", is_featured = ").push_bind(is_featured);
        }
        if let Some(images) = &fields.images {
            qb.push(", images = ").push_bind(images);
        }
        if let Some(featured_image) = &fields.featured_image {
            qb.push(", featured_image = ").push_bind(featured_image);
        }
        qb.push(" WHERE id = ").push_bind(id);
        qb.push(" RETURNING *");
        qb.build_query_as::<Property>().fetch_one(&self.pool).await
    }

    async fn delete_property(&self, id: Uuid) -> Result<Option<Property>, sqlx::Error> {
        sqlx::query_as::<_, Property>("DELETE FROM properties WHERE id = $1 RETURNING *")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn properties_within_radius(
        &self,
        lat: f64,
        lng: f64,
        angular_radius: f64,
    ) -> Result<Vec<Property>, sqlx::Error> {
        // Spherical law of cosines; the cosine is clamped so rounding at zero
        // distance stays inside acos's domain.
        sqlx::query_as::<_, Property>(
            r#"
            SELECT * FROM properties
            WHERE acos(LEAST(1.0, GREATEST(-1.0,
                sin(radians($1)) * sin(radians(latitude)) +
                cos(radians($1)) * cos(radians(latitude)) * cos(radians(longitude - $2))
            ))) <= $3
            ORDER BY created_at DESC
            "#,
        )
        .bind(lat)
        .bind(lng)
        .bind(angular_radius)
        .fetch_all(&self.pool)
        .await
    }

    async fn property_type_stats(&self) -> Result<Vec<PropertyTypeStats>, sqlx::Error> {
        sqlx::query_as::<_, PropertyTypeStats>(
            r#"
            SELECT property_type,
                   COUNT(*)                 AS num_properties,
                   AVG(ratings_average)::float8 AS avg_rating,
                   AVG(price)::float8       AS avg_price,
                   MIN(price)::float8       AS min_price,
                   MAX(price)::float8       AS max_price
            FROM properties
            WHERE ratings_average >= 4.5
            GROUP BY property_type
            ORDER BY avg_price ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
    }

    async fn recompute_property_rating(&self, property_id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE properties
            SET ratings_quantity = agg.quantity,
                ratings_average = agg.average
            FROM (
                SELECT COUNT(*) AS quantity,
                       COALESCE(AVG(rating), 4.5)::float8 AS average
                FROM reviews
                WHERE property = $1
            ) AS agg
            WHERE id = $1
            "#,
        )
        .bind(property_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_reviews(
        &self,
        property: Option<Uuid>,
        desc: &QueryDescriptor,
    ) -> Result<(Vec<Review>, i64), sqlx::Error> {
        let mut count_qb = QueryBuilder::new("SELECT COUNT(*) FROM reviews WHERE TRUE");
        if let Some(pid) = property {
            count_qb.push(" AND property = ").push_bind(pid);
        }
        push_filters(&mut count_qb, desc);
        let total: i64 = count_qb.build_query_scalar().fetch_one(&self.pool).await?;

        let mut qb = QueryBuilder::new("SELECT * FROM reviews WHERE TRUE");
        if let Some(pid) = property {
            qb.push(" AND property = ").push_bind(pid);
        }
        push_filters(&mut qb, desc);
        push_sort_and_page(&mut qb, desc);
        let reviews = qb.build_query_as::<Review>().fetch_all(&self.pool).await?;

        Ok((reviews, total))
    }

    async fn find_review(&self, id: Uuid) -> Result<Option<Review>, sqlx::Error> {
        sqlx::query_as::<_, Review>("SELECT * FROM reviews WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn create_review(&self, review: &Review) -> Result<Review, sqlx::Error> {
        sqlx::query_as::<_, Review>(
            r#"
            INSERT INTO reviews (id, review, rating, property, user_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(review.id)
        .bind(&review.review)
        .bind(review.rating)
        .bind(review.property)
        .bind(review.user_id)
        .bind(review.created_at)
        .fetch_one(&self.pool)
        .await
    }

    async fn update_review(
        &self,
        id: Uuid,
        fields: &UpdateReviewFields,
    ) -> Result<Review, sqlx::Error> {
        let mut qb = QueryBuilder::new("UPDATE reviews SET id = id");
        if let Some(review) = &fields.review {
            qb.push(", review = ").push_bind(review);
        }
        if let Some(rating) = fields.rating {
            qb.push(", rating = ").push_bind(rating);
        }
        qb.push(" WHERE id = ").push_bind(id);
        qb.push(" RETURNING *");
        qb.build_query_as::<Review>().fetch_one(&self.pool).await
    }

    async fn delete_review(&self, id: Uuid) -> Result<Option<Review>, sqlx::Error> {
        sqlx::query_as::<_, Review>("DELETE FROM reviews WHERE id = $1 RETURNING *")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }
}
