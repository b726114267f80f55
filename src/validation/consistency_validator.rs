use crate::models::{RawGenerationOutput, RejectionReason, SchemaSnapshot, TranslationResult};
use crate::validation::dax_lexer::extract_references;
use crate::validation::sql_validator::SqlValidator;

/// Checks a generated (sql, dax) pair against the schema it was generated for.
///
/// All-or-nothing: a problem in either artifact rejects the whole pair, so an
/// accepted result is always safe to export as a unit. The first offender
/// wins and SQL is checked before DAX.
pub struct ConsistencyValidator;

impl ConsistencyValidator {
    pub fn validate(raw: &RawGenerationOutput, schema: &SchemaSnapshot) -> TranslationResult {
        let sql = raw.sql_text.trim();
        let dax = raw.dax_text.trim();

        match Self::check(sql, dax, schema) {
            Ok(()) => TranslationResult::accepted(sql, dax),
            Err(reason) => {
                tracing::debug!("Rejected generation for table {}: {}", schema.table(), reason);
                TranslationResult::rejected(sql, dax, reason)
            }
        }
    }

    fn check(sql: &str, dax: &str, schema: &SchemaSnapshot) -> Result<(), RejectionReason> {
        if sql.is_empty() && dax.is_empty() {
            return Err(RejectionReason::EmptyGeneration);
        }
        if !sql.is_empty() {
            Self::check_sql(sql, schema)?;
        }
        if !dax.is_empty() {
            Self::check_dax(dax, schema)?;
        }
        Ok(())
    }

    fn check_sql(sql: &str, schema: &SchemaSnapshot) -> Result<(), RejectionReason> {
        let refs = SqlValidator::analyze(sql)?;

        if let Some(relation) = refs
            .relations
            .iter()
            .find(|r| !schema.is_table(r))
        {
            return Err(RejectionReason::UnknownTable(relation.clone()));
        }
        if let Some(qualifier) = refs.unresolved_qualifiers.first() {
            return Err(RejectionReason::UnknownTable(qualifier.clone()));
        }

        match refs.columns.iter().find(|c| !schema.has_column(c)) {
            Some(column) => Err(RejectionReason::UnknownColumn(column.clone())),
            None => Ok(()),
        }
    }

    fn check_dax(dax: &str, schema: &SchemaSnapshot) -> Result<(), RejectionReason> {
        let refs =
            extract_references(dax).map_err(|e| RejectionReason::Unparseable(format!("dax: {}", e)))?;

        for reference in &refs.references {
            if let Some(table) = &reference.table {
                if !refs.is_variable(table) && !schema.is_model_table(table) {
                    return Err(RejectionReason::UnknownTable(table.clone()));
                }
            }
            if refs.is_local(&reference.column) {
                continue;
            }
            if !schema.has_column(&reference.column) {
                return Err(RejectionReason::UnknownColumn(reference.column.clone()));
            }
        }
        Ok(())
    }
}
