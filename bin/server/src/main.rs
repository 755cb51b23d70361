use copper_courier_delivery::{FallbackDispatcher, GatewayClient, OfficialClient};
use copper_courier_quota::RateLimiter;
use copper_courier_server::config::ServerConfig;
use copper_courier_server::db::PgRateLimitStore;
use copper_courier_server::{AppState, router};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = ServerConfig::from_env().expect("failed to load configuration");
    tracing::info!("Loaded configuration");

    // Create database connection pool
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    // Run migrations
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .expect("failed to run migrations");

    let limiter = RateLimiter::new(
        config.rate_limit.to_config(),
        Arc::new(PgRateLimitStore::new(db_pool.clone())),
    );

    let dispatcher = FallbackDispatcher::new()
        .with_client(Arc::new(GatewayClient::new(config.gateway.clone())))
        .with_client(Arc::new(OfficialClient::new()));

    let state = Arc::new(AppState::new(db_pool, limiter, dispatcher));
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .expect("failed to bind to address");

    tracing::info!("listening on http://{}", config.listen_addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to listen for shutdown signal");
            tracing::info!("shutting down");
        })
        .await
        .expect("server error");
}
