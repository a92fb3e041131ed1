//! MedDesk API Gateway
//!
//! HTTP entry point for the practice staff frontend.
//! Handles:
//! - Authentication and role checks
//! - Rate limiting
//! - Patient, document, note and staff CRUD
//! - Observability (logging, metrics)

mod handlers;
mod middleware;

use axum::{
    routing::{get, patch, post},
    Router,
};
use medesk_common::{
    auth::{HasJwt, JwtManager},
    config::AppConfig,
    db::DbPool,
    errors::AppError,
    metrics, telemetry,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DbPool,
    pub jwt: Arc<JwtManager>,
}

impl HasJwt for AppState {
    fn jwt(&self) -> &Arc<JwtManager> {
        &self.jwt
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    telemetry::init_tracing("info");

    info!("Starting MedDesk API Gateway v{}", medesk_common::VERSION);

    // Load configuration
    let config = AppConfig::load().map_err(|e| {
        tracing::error!(error = %e, "Failed to load configuration");
        e
    })?;

    let secret = config.auth.jwt_secret.clone().ok_or_else(|| AppError::Configuration {
        message: "JWT_SECRET must be set".to_string(),
    })?;

    let config = Arc::new(config);

    // Initialize metrics
    if config.observability.metrics_port > 0 {
        let metrics_addr = SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
        match metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(metrics_addr)
            .install()
        {
            Ok(()) => info!("Prometheus exporter listening on {}", metrics_addr),
            Err(e) => warn!(error = %e, "Metrics exporter not started"),
        }
    }
    metrics::register_metrics();

    // Initialize database connection
    info!("Connecting to database...");
    let db = DbPool::new(&config.database).await?;

    let state = AppState {
        config: config.clone(),
        db,
        jwt: Arc::new(JwtManager::new(&secret, config.auth.jwt_expiration_secs)),
    };

    let app = create_router(state)?;

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| AppError::Configuration {
            message: format!("Invalid listen address: {}", e),
        })?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Create the main application router
fn create_router(state: AppState) -> Result<Router, AppError> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let api_routes = Router::new()
        // Health endpoints (no auth)
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))

        // Authentication
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/me", get(handlers::auth::me))

        // Staff
        .route("/users", get(handlers::users::list_users).post(handlers::users::create_user))
        .route("/users/{id}", get(handlers::users::get_user).patch(handlers::users::update_user))

        // Patients
        .route(
            "/patients",
            get(handlers::patients::list_patients).post(handlers::patients::create_patient),
        )
        .route(
            "/patients/{id}",
            get(handlers::patients::get_patient)
                .patch(handlers::patients::update_patient)
                .delete(handlers::patients::delete_patient),
        )

        // Documents
        .route(
            "/patients/{id}/documents",
            get(handlers::documents::list_documents).post(handlers::documents::create_document),
        )
        .route(
            "/documents/{id}",
            get(handlers::documents::get_document).delete(handlers::documents::delete_document),
        )
        .route("/documents/{id}/extraction", patch(handlers::documents::update_extraction))

        // Notes
        .route(
            "/patients/{id}/notes",
            get(handlers::notes::list_notes).post(handlers::notes::create_note),
        )
        .route(
            "/notes/{id}",
            patch(handlers::notes::update_note).delete(handlers::notes::delete_note),
        );

    let mut app = Router::new()
        .nest("/api", api_routes)
        .layer(axum::middleware::from_fn(middleware::metrics::track_requests));

    if state.config.rate_limit.enabled {
        let limiter = middleware::rate_limit::create_rate_limiter(
            state.config.rate_limit.requests_per_second,
            state.config.rate_limit.burst,
        )?;
        app = app.layer(axum::middleware::from_fn_with_state(
            limiter,
            middleware::rate_limit::rate_limit_middleware,
        ));
    }

    Ok(app
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(propagate_id)
        .layer(request_id)
        .with_state(state))
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
