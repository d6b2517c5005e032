use axum::{Router, extract::FromRef, http::HeaderName, routing::get};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    services::ServeDir,
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

// Core application services and components.
pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod mailer;
pub mod media;
pub mod models;
pub mod query;
pub mod repository;

// Routing segregation per resource.
pub mod routes;

// --- Public Re-exports ---

// Core state types for the application entry point and tests.
pub use config::{AppConfig, Env};
pub use error::AppError;
pub use mailer::{MailerState, MockMailer, SmtpMailer};
pub use media::{FsMediaStore, MediaState, MockMediaStore};
pub use repository::{PostgresRepository, Repository, RepositoryState};

/// ApiDoc
///
/// Generates the OpenAPI document from every `#[utoipa::path]` handler and
/// `ToSchema` model; the JSON is served at `/api-docs/openapi.json` and
/// browsable at `/swagger-ui`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::signup, handlers::login, handlers::logout, handlers::verify_email,
        handlers::resend_verification, handlers::forgot_password, handlers::reset_password,
        handlers::update_password,
        handlers::get_me, handlers::update_me, handlers::delete_me,
        handlers::list_users, handlers::get_user, handlers::update_user, handlers::delete_user,
        handlers::list_properties, handlers::get_property, handlers::property_stats,
        handlers::properties_within, handlers::create_property, handlers::update_property,
        handlers::delete_property,
        handlers::list_reviews, handlers::list_property_reviews, handlers::get_review,
        handlers::create_review, handlers::create_property_review,
        handlers::update_review, handlers::delete_review,
    ),
    components(
        schemas(
            models::User, models::Property, models::Review, models::Role,
            models::PricePer, models::PropertyType, models::AreaUnit,
            models::PropertyStatus, models::FurnishingStatus,
            models::SignupRequest, models::LoginRequest, models::ForgotPasswordRequest,
            models::ResetPasswordRequest, models::UpdatePasswordRequest,
            models::ResendVerificationRequest, models::UpdateMeFields,
            models::AdminUpdateUserFields, models::CreatePropertyRequest,
            models::UpdatePropertyFields, models::CreateReviewRequest,
            models::UpdateReviewFields, models::PropertyTypeStats,
        )
    ),
    tags(
        (name = "estate-portal", description = "Real-estate listings API")
    )
)]
struct ApiDoc;

/// AppState
///
/// The single immutable container of application services, shared across all
/// requests. Each service sits behind a trait object so tests can swap in
/// doubles without touching the router.
#[derive(Clone)]
pub struct AppState {
    /// Persistence boundary over the Postgres pool.
    pub repo: RepositoryState,
    /// Image processing and file storage.
    pub media: MediaState,
    /// Outbound email transport.
    pub mailer: MailerState,
    /// Loaded environment configuration.
    pub config: AppConfig,
}

// FromRef lets extractors pull individual services out of the shared state.

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for MediaState {
    fn from_ref(app_state: &AppState) -> MediaState {
        app_state.media.clone()
    }
}

impl FromRef<AppState> for MailerState {
    fn from_ref(app_state: &AppState) -> MailerState {
        app_state.mailer.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// create_router
///
/// Assembles the full application: the /api/v1 resource routers, the health
/// probe, Swagger, static file serving for uploaded images, and the
/// observability/CORS layers.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let x_request_id = HeaderName::from_static("x-request-id");

    let api = Router::new()
        .merge(routes::auth::auth_routes())
        .merge(routes::users::user_routes())
        .merge(routes::properties::property_routes())
        .merge(routes::reviews::review_routes());

    let upload_dir = state.config.upload_dir.clone();

    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Liveness probe for load balancers and monitoring.
        .route("/health", get(|| async { "ok" }))
        .nest("/api/v1", api)
        // Uploaded images are served statically, filenames only in the DB.
        .nest_service("/public/img", ServeDir::new(upload_dir))
        .with_state(state);

    base_router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(cors)
}

/// Span factory for TraceLayer: correlates every log line of a request by its
/// x-request-id.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
