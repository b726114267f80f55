use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::api::middleware::AppError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable,
        }
    }
}

/// Ordered column descriptors of one table at a point in time.
///
/// Column names are unique under [`fold_identifier`], the one comparison rule
/// used for every name lookup. An empty column list is a legal snapshot: the
/// table has no columns or does not exist.
///
/// `table` is the normalized name: bare for the default schema, `schema.table`
/// otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaSnapshot {
    table: String,
    columns: Vec<ColumnMeta>,
}

impl SchemaSnapshot {
    pub fn new(table: impl Into<String>, columns: Vec<ColumnMeta>) -> Result<Self, AppError> {
        let table = table.into();
        let mut seen = HashSet::new();
        for column in &columns {
            if !seen.insert(fold_identifier(&column.name)) {
                return Err(AppError::SchemaConflict(format!(
                    "Column '{}' of table '{}' is ambiguous: names are matched case-insensitively",
                    column.name, table
                )));
            }
        }
        Ok(Self { table, columns })
    }

    pub fn empty(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn has_column(&self, name: &str) -> bool {
        let name = fold_identifier(name);
        self.columns.iter().any(|c| fold_identifier(&c.name) == name)
    }

    /// Matches a SQL relation against this snapshot's table. A table in the
    /// default schema may be written bare or as `public.table`; any other
    /// schema must be named.
    pub fn is_table(&self, relation: &str) -> bool {
        let relation = fold_identifier(&relation.replace('"', ""));
        let own = fold_identifier(&self.table);
        relation == own || (!own.contains('.') && relation == format!("public.{}", own))
    }

    /// Matches a DAX table name. Model tables carry no schema, so only the
    /// table part is compared.
    pub fn is_model_table(&self, name: &str) -> bool {
        let bare = |s: &str| fold_identifier(s.rsplit('.').next().unwrap_or(s));
        bare(name) == bare(&self.table)
    }
}

/// Case folding applied to every identifier comparison
pub fn fold_identifier(name: &str) -> String {
    name.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transactions() -> SchemaSnapshot {
        SchemaSnapshot::new(
            "transactions",
            vec![
                ColumnMeta::new("date", "date", false),
                ColumnMeta::new("fraud_flag", "integer", true),
                ColumnMeta::new("amount", "numeric", true),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_snapshot_preserves_declaration_order() {
        let schema = transactions();
        let names: Vec<&str> = schema.column_names().collect();
        assert_eq!(names, vec!["date", "fraud_flag", "amount"]);
    }

    #[test]
    fn test_duplicate_column_names_rejected() {
        let result = SchemaSnapshot::new(
            "t",
            vec![
                ColumnMeta::new("Amount", "numeric", true),
                ColumnMeta::new("amount", "numeric", true),
            ],
        );
        assert!(matches!(result, Err(AppError::SchemaConflict(_))));
    }

    #[test]
    fn test_column_lookup_is_case_insensitive() {
        let schema = transactions();
        assert!(schema.has_column("FRAUD_FLAG"));
        assert!(!schema.has_column("nonexistent_col"));
    }

    #[test]
    fn test_column_lookup_folds_non_ascii_names() {
        let schema = SchemaSnapshot::new("t", vec![ColumnMeta::new("Größe", "numeric", true)]).unwrap();
        assert!(schema.has_column("GRÖßE"));
    }

    #[test]
    fn test_default_schema_table_matches_bare_or_public() {
        let schema = transactions();
        assert!(schema.is_table("public.transactions"));
        assert!(schema.is_table("Transactions"));
        assert!(schema.is_table("public.\"transactions\""));
        assert!(!schema.is_table("analytics.transactions"));
        assert!(!schema.is_table("predictions"));
    }

    #[test]
    fn test_other_schema_table_must_be_qualified() {
        let schema = SchemaSnapshot::new(
            "analytics.transactions",
            vec![ColumnMeta::new("amount", "numeric", true)],
        )
        .unwrap();
        assert!(schema.is_table("analytics.transactions"));
        assert!(!schema.is_table("transactions"));
        assert!(!schema.is_table("public.transactions"));
        assert!(schema.is_model_table("transactions"));
    }
}
