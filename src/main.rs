use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{http::StatusCode, response::Json, routing::get, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, Level};

use tally_server::auth::TokenVerifier;
use tally_server::coin::CoinRegistry;
use tally_server::config::Config;
use tally_server::rate_limit::{RateGuard, RateGuardConfig};
use tally_server::receipt::ReceiptStore;
use tally_server::review::repository::SqliteRepository;
use tally_server::review::ReviewStore;
use tally_server::routes::api_router;
use tally_server::AppState;

async fn health_check() -> Result<Json<serde_json::Value>, StatusCode> {
    Ok(Json(json!({
        "status": "healthy",
        "service": "tally"
    })))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    info!("Starting contribution review server");

    let config = Config::from_env().context("Failed to load configuration from environment")?;

    let db_path = config.state_dir.join("tally-state.db");
    info!("Using state database: {}", db_path.display());
    let repository =
        Arc::new(SqliteRepository::new(&db_path).context("Failed to initialize SQLite database")?);

    let receipt_store = ReceiptStore::new(config.receipt_dir.clone())
        .context("Failed to initialize receipt directory")?;

    let app_state = Arc::new(AppState {
        review_store: ReviewStore::new(repository.clone()),
        coin_registry: CoinRegistry::new(repository, config.allow_unknown_currency),
        receipt_store,
        token_verifier: TokenVerifier::new(&config.auth_secret),
        rate_guard: RateGuard::new(RateGuardConfig {
            max_requests: config.rate_limit_max_requests,
            window: config.rate_limit_window,
        }),
        min_contribution_amount: config.min_contribution_amount,
    });

    let app = Router::new()
        .route("/health", get(health_check))
        .merge(api_router(app_state.clone()))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(app_state);

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!("Server listening on port {}", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
