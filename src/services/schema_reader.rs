use deadpool_postgres::Pool;
use std::collections::BTreeMap;

use crate::api::middleware::AppError;
use crate::models::{ColumnMeta, SchemaSnapshot};

const DEFAULT_SCHEMA: &str = "public";

/// Read-only access to the store's schema catalog.
///
/// Nothing here is cached: a table can change between two calls.
#[async_trait::async_trait]
pub trait SchemaReader: Send + Sync {
    /// Ordered column descriptors; empty when the table is missing or has no columns
    async fn fetch_schema(&self, table: &str) -> Result<SchemaSnapshot, AppError>;

    /// Base tables outside the system schemas
    async fn list_tables(&self) -> Result<Vec<String>, AppError>;

    async fn table_exists(&self, table: &str) -> Result<bool, AppError>;
}

/// Splits `schema.table` (or bare `table`) after checking both parts are plain identifiers.
///
/// Both parts are unquoted identifiers, so they are folded to lowercase the
/// way PostgreSQL folds them before they reach the catalog.
pub fn parse_table_name(table: &str) -> Result<(String, String), AppError> {
    let parts: Vec<&str> = table.split('.').collect();
    let (schema, name) = match parts.as_slice() {
        [name] => (DEFAULT_SCHEMA, *name),
        [schema, name] => (*schema, *name),
        _ => {
            return Err(AppError::Validation(format!(
                "Invalid table name '{}': expected 'table' or 'schema.table'",
                table
            )))
        }
    };

    if !is_valid_identifier(schema) || !is_valid_identifier(name) {
        return Err(AppError::Validation(format!(
            "Invalid table name '{}': identifiers may only contain letters, digits, '_' and '$'",
            table
        )));
    }

    Ok((schema.to_lowercase(), name.to_lowercase()))
}

/// `public.Transactions` -> `transactions`, `Analytics.Orders` -> `analytics.orders`.
///
/// Only the default schema is dropped; any other qualifier is part of the table's identity.
pub fn normalize_table_name(table: &str) -> Result<String, AppError> {
    let (schema, name) = parse_table_name(table)?;
    Ok(qualified_name(&schema, &name))
}

fn qualified_name(schema: &str, name: &str) -> String {
    if schema == DEFAULT_SCHEMA {
        name.to_string()
    } else {
        format!("{}.{}", schema, name)
    }
}

pub fn is_valid_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    s.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Schema reader backed by PostgreSQL's information_schema
pub struct PostgresSchemaReader {
    pool: Pool,
}

impl PostgresSchemaReader {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn client(&self) -> Result<deadpool_postgres::Object, AppError> {
        self.pool.get().await.map_err(|e| {
            tracing::error!("Failed to get connection from pool: {}", e);
            AppError::SchemaUnavailable(format!("Failed to get connection from pool: {}", e))
        })
    }
}

#[async_trait::async_trait]
impl SchemaReader for PostgresSchemaReader {
    async fn fetch_schema(&self, table: &str) -> Result<SchemaSnapshot, AppError> {
        let (schema, name) = parse_table_name(table)?;
        let client = self.client().await?;

        let rows = client
            .query(
                r#"
                SELECT column_name, data_type, is_nullable
                FROM information_schema.columns
                WHERE table_schema = $1 AND table_name = $2
                ORDER BY ordinal_position
                "#,
                &[&schema, &name],
            )
            .await?;

        let columns = rows
            .iter()
            .map(|row| {
                ColumnMeta::new(
                    row.get::<_, String>(0),
                    row.get::<_, String>(1),
                    row.get::<_, String>(2) == "YES",
                )
            })
            .collect();

        tracing::debug!("Fetched {} columns for {}.{}", rows.len(), schema, name);

        SchemaSnapshot::new(qualified_name(&schema, &name), columns)
    }

    async fn list_tables(&self) -> Result<Vec<String>, AppError> {
        let client = self.client().await?;

        let rows = client
            .query(
                r#"
                SELECT table_schema, table_name
                FROM information_schema.tables
                WHERE table_type = 'BASE TABLE'
                    AND table_schema NOT IN ('pg_catalog', 'information_schema', 'pg_toast')
                ORDER BY table_schema, table_name
                "#,
                &[],
            )
            .await?;

        Ok(rows
            .iter()
            .map(|row| qualified_name(&row.get::<_, String>(0), &row.get::<_, String>(1)))
            .collect())
    }

    async fn table_exists(&self, table: &str) -> Result<bool, AppError> {
        let (schema, name) = parse_table_name(table)?;
        let client = self.client().await?;

        let row = client
            .query_one(
                r#"
                SELECT EXISTS (
                    SELECT 1 FROM information_schema.tables
                    WHERE table_schema = $1 AND table_name = $2
                )
                "#,
                &[&schema, &name],
            )
            .await?;

        Ok(row.get::<_, bool>(0))
    }
}

/// In-memory catalog, used for offline runs and tests
#[derive(Debug, Default, Clone)]
pub struct StaticSchemaReader {
    tables: BTreeMap<String, SchemaSnapshot>,
}

impl StaticSchemaReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshots are keyed by their normalized table name
    pub fn with_table(mut self, schema: SchemaSnapshot) -> Self {
        let key = normalize_table_name(schema.table()).unwrap_or_else(|_| schema.table().to_string());
        self.tables.insert(key, schema);
        self
    }
}

#[async_trait::async_trait]
impl SchemaReader for StaticSchemaReader {
    async fn fetch_schema(&self, table: &str) -> Result<SchemaSnapshot, AppError> {
        let name = normalize_table_name(table)?;
        Ok(self
            .tables
            .get(&name)
            .cloned()
            .unwrap_or_else(|| SchemaSnapshot::empty(name)))
    }

    async fn list_tables(&self) -> Result<Vec<String>, AppError> {
        Ok(self.tables.keys().cloned().collect())
    }

    async fn table_exists(&self, table: &str) -> Result<bool, AppError> {
        Ok(self.tables.contains_key(&normalize_table_name(table)?))
    }
}
