use deadpool_postgres::{Config as PoolConfig, ManagerConfig, Pool, RecyclingMethod};
use tokio_postgres::NoTls;

use crate::api::middleware::AppError;
use crate::config::StoreConfig;

/// Builds the connection pool for the relational store.
///
/// Pool creation does not connect; an unreachable store only shows up on the
/// first checkout, which the schema reader reports as `SchemaUnavailable`.
pub fn create_store_pool(store: &StoreConfig) -> Result<Pool, AppError> {
    tracing::info!(
        "Creating connection pool for: {} (max_size: {})",
        mask_credentials(&store.url),
        store.max_pool_size
    );

    let mut cfg = PoolConfig::new();
    cfg.url = Some(store.url.clone());
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });

    let pool = cfg
        .create_pool(Some(deadpool_postgres::Runtime::Tokio1), NoTls)
        .map_err(|e| {
            tracing::error!("Failed to create connection pool: {}", e);
            AppError::SchemaUnavailable(format!("Failed to create connection pool: {}", e))
        })?;

    pool.resize(store.max_pool_size);

    Ok(pool)
}

/// Mask credentials in connection URL for safe logging
pub fn mask_credentials(url: &str) -> String {
    if let Ok(parsed_url) = url::Url::parse(url) {
        let mut masked = parsed_url.clone();
        if parsed_url.password().is_some() {
            let _ = masked.set_password(Some("***"));
        }
        masked.to_string()
    } else {
        "[invalid-url]".to_string()
    }
}

/// Server address (`host:port`) and database name of the store, as a BI
/// connection descriptor needs them.
pub fn store_location(url: &str) -> Result<(String, String), AppError> {
    let parsed = url::Url::parse(url)
        .map_err(|e| AppError::Internal(format!("Invalid store URL: {}", e)))?;

    let host = parsed
        .host_str()
        .ok_or_else(|| AppError::Internal("Store URL has no host".to_string()))?;
    let server = match parsed.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };
    let database = parsed.path().trim_start_matches('/').to_string();

    Ok((server, database))
}
