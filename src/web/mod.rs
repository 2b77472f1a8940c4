use axum::{Router, extract::DefaultBodyLimit, http::Method, routing::get};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::server::config::ServerConfig;
use crate::services::alert_ingestion::AlertIngestionService;

pub use self::error::AppError;

pub mod error;
pub mod models;
pub mod routes;

#[derive(Clone)]
pub struct AppState {
    pub ingestion: Arc<AlertIngestionService>,
    pub config: Arc<ServerConfig>,
}

async fn health_check_handler() -> &'static str {
    "OK"
}

pub fn create_axum_router(
    ingestion: Arc<AlertIngestionService>,
    config: Arc<ServerConfig>,
) -> Router {
    let body_limit = config.max_upload_bytes;
    let app_state = Arc::new(AppState { ingestion, config });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(vec![Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check_handler))
        .merge(routes::alert_routes::create_alert_router())
        .with_state(app_state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
