use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::limit::RequestBodyLimitLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rust_roleta_api::config::Config;
use rust_roleta_api::db::Database;
use rust_roleta_api::db_storage::PgLeadQueueStorage;
use rust_roleta_api::handlers::AppState;
use rust_roleta_api::routes;

/// Main entry point for the application.
///
/// Initializes tracing, loads configuration, connects to PostgreSQL and applies migrations,
/// then serves the trigger and management routes behind body-size and per-IP rate limits.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_roleta_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let db = Database::new(&config.database_url, config.db_max_connections).await?;
    tracing::info!("Database connection pool established");

    db.migrate().await?;
    tracing::info!("Schema migrations applied");

    let store = PgLeadQueueStorage::new(db.pool.clone(), config.lock_timeout());
    let app_state = Arc::new(AppState::new(Arc::new(store)));

    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(config.rate_limit_per_second)
            .burst_size(config.rate_limit_burst)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| {
                anyhow::anyhow!("RATE_LIMIT_PER_SECOND and RATE_LIMIT_BURST must be non-zero")
            })?,
    );
    tracing::info!(
        "Rate limit: {} req/s per IP, burst {}",
        config.rate_limit_per_second,
        config.rate_limit_burst
    );

    let api = routes::api_routes().layer(
        ServiceBuilder::new()
            .layer(RequestBodyLimitLayer::new(config.request_body_limit_bytes))
            .layer(GovernorLayer {
                config: governor_conf,
            }),
    );
    let app = routes::build_app(app_state, api);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
