use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::api::handlers::{tables, translation, AppState};

/// Create router with application state
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/tables", get(tables::list_tables))
        .route("/api/tables/{table}/schema", get(tables::get_table_schema))
        .route("/api/translations", post(translation::create_translation))
        .route(
            "/api/translations/{fingerprint}/export",
            get(translation::export_translation),
        )
        .route("/api/cache/stats", get(translation::cache_stats))
        .route("/api/cache", delete(translation::clear_cache))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}
