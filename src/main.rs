use estate_portal::{
    AppState,
    config::{AppConfig, Env},
    create_router,
    mailer::{MailerState, SmtpMailer},
    media::{FsMediaStore, MediaState},
    repository::{PostgresRepository, RepositoryState},
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// main
///
/// The asynchronous entry point: configuration, logging, database (with
/// migrations), media storage, mail transport, then the HTTP server.
#[tokio::main]
async fn main() {
    // 1. Configuration (fail-fast on missing production secrets).
    dotenv::dotenv().ok();
    let config = AppConfig::load();

    // 2. Logging: RUST_LOG wins, with sensible local defaults; pretty output
    // locally, JSON in production for log aggregation.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "estate_portal=debug,tower_http=info,axum=trace".into());

    match config.env {
        Env::Local => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        Env::Production => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
    }

    tracing::info!("Application starting in {:?} mode", config.env);

    // 3. Database pool and schema migrations.
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.db_url)
        .await
        .expect("FATAL: Failed to connect to Postgres. Check DATABASE_URL.");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("FATAL: Failed to run database migrations.");

    let repo = Arc::new(PostgresRepository::new(pool)) as RepositoryState;

    // 4. Media storage (local filesystem under the public upload directory).
    let media = Arc::new(FsMediaStore::new(&config.upload_dir)) as MediaState;

    // 5. Mail transport.
    let mailer = Arc::new(
        SmtpMailer::from_config(&config).expect("FATAL: Failed to configure SMTP transport."),
    ) as MailerState;

    // 6. Unified state and router.
    let app_state = AppState {
        repo,
        media,
        mailer,
        config,
    };
    let app = create_router(app_state);

    let listener = TcpListener::bind("0.0.0.0:3000")
        .await
        .expect("FATAL: Failed to bind 0.0.0.0:3000");

    tracing::info!("Listening on 0.0.0.0:3000");
    tracing::info!("API documentation available at http://localhost:3000/swagger-ui");

    axum::serve(listener, app)
        .await
        .expect("FATAL: Server error");
}
