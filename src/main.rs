use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::middleware;
use chrono::Utc;
use sea_orm::DatabaseConnection;
use sea_orm_migration::MigratorTrait;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pet_care_backend::{
    config::Config,
    db,
    middleware::rate_limit::{create_global_governor, log_request},
    routes,
    services::{auth, booking, mailer, payment, storage},
    utils::jwt::TokenService,
    AppState,
};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pet_care_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    tracing::info!("Starting server at {}", config.server_addr());

    // Connect to database
    let db = db::connect(&config)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Connected to database");

    // Run migrations
    migration::Migrator::up(&db, None)
        .await
        .expect("Failed to run migrations");
    tracing::info!("Migrations complete");

    // Seed admin account if configured
    if let (Some(email), Some(password)) = (&config.admin_email, &config.admin_password) {
        auth::seed_admin(&db, email, password, Utc::now())
            .await
            .expect("Failed to seed admin account");
    }

    let db = Arc::new(db);
    let mailer = mailer::from_config(&config).expect("Failed to build mailer");
    let storage = storage::from_config(&config).expect("Failed to build storage client");

    // Create app state
    let state = AppState {
        db: Arc::clone(&db),
        tokens: TokenService::new(&config.jwt_secret),
        mailer,
        storage,
        config: config.clone(),
    };

    tokio::spawn(run_scheduler(db, config.advance_interval_secs));

    // Create router with middleware
    let app = routes::create_router(state)
        .layer(TimeoutLayer::new(Duration::from_secs(config.request_timeout_secs)))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(middleware::from_fn(log_request))
        .layer(create_global_governor());

    // Start server with socket address for rate limiting
    let addr: SocketAddr = config.server_addr().parse().expect("Invalid address");
    let listener = TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("Failed to start server");
}

/// Moves due bookings along their lifecycle and drops expired webhook
/// dedupe records.
async fn run_scheduler(db: Arc<DatabaseConnection>, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));

    loop {
        interval.tick().await;
        let now = Utc::now();

        match booking::advance(&db, now).await {
            Ok(report) if report.started + report.finished > 0 => {
                tracing::info!(
                    started = report.started,
                    finished = report.finished,
                    skipped = report.skipped,
                    "Advanced bookings"
                );
            }
            Ok(_) => {}
            Err(e) => tracing::error!("Booking advance failed: {}", e),
        }

        if let Err(e) = payment::purge_webhook_events(&db, now).await {
            tracing::error!("Webhook event purge failed: {}", e);
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutting down");
}
