use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::api::handlers::AppState;
use crate::api::middleware::AppError;
use crate::models::{ExportBundle, TranslateRequest, TranslateResponse};

/// Translate a natural language request into a validated SQL/DAX pair
///
/// Rejections are ordinary responses with `status: "rejected"`; only
/// infrastructure failures come back as errors.
pub async fn create_translation(
    State(state): State<AppState>,
    Json(payload): Json<TranslateRequest>,
) -> Result<Json<TranslateResponse>, AppError> {
    if payload.table.trim().is_empty() {
        return Err(AppError::Validation("Table cannot be empty".to_string()));
    }

    let outcome = state
        .translations
        .translate(&payload.table, &payload.prompt)
        .await?;

    Ok(Json(TranslateResponse::new(outcome.fingerprint, outcome.result)))
}

#[derive(Debug, Deserialize)]
pub struct ExportParams {
    pub table: String,
}

/// Export files for a cached, accepted translation
pub async fn export_translation(
    State(state): State<AppState>,
    Path(fingerprint): Path<String>,
    Query(params): Query<ExportParams>,
) -> Result<Json<ExportBundle>, AppError> {
    let result = state
        .translations
        .cached(&fingerprint)
        .ok_or_else(|| AppError::NotFound(format!("Translation {} not found", fingerprint)))?;

    let bundle = state
        .exporter
        .export(&result, &params.table)?
        .with_fingerprint(fingerprint);

    Ok(Json(bundle))
}

pub async fn cache_stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    let cache = state.translations.cache();
    let stats = cache.get_stats();

    Json(serde_json::json!({
        "stats": stats,
        "hit_ratio": stats.hit_ratio(),
        "entries": cache.size(),
        "in_flight": cache.in_flight(),
        "max_entries": state.config.cache.max_entries,
    }))
}

/// Drop every cached translation
pub async fn clear_cache(State(state): State<AppState>) -> StatusCode {
    state.translations.cache().clear();
    StatusCode::NO_CONTENT
}
