use axum::{
    extract::{Path, State},
    Json,
};

use crate::api::handlers::AppState;
use crate::api::middleware::AppError;

/// List base tables in the store
pub async fn list_tables(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let tables = state.translations.schema_reader().list_tables().await?;

    Ok(Json(serde_json::json!({
        "tables": tables
    })))
}

/// Column descriptors of one table; `exists` tells a missing table from an empty one
pub async fn get_table_schema(
    State(state): State<AppState>,
    Path(table): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    tracing::info!("Getting schema for table: {}", table);

    let reader = state.translations.schema_reader();
    let schema = reader.fetch_schema(&table).await?;
    let exists = !schema.is_empty() || reader.table_exists(&table).await?;

    Ok(Json(serde_json::json!({
        "table": schema.table(),
        "exists": exists,
        "columns": schema.columns(),
    })))
}
