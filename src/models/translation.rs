use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use super::schema::SchemaSnapshot;
use crate::api::middleware::AppError;

/// One user submission: a table, its schema at submission time and the prompt.
#[derive(Debug, Clone)]
pub struct TranslationRequest {
    table: String,
    schema: SchemaSnapshot,
    prompt: String,
}

impl TranslationRequest {
    pub fn new(
        table: impl Into<String>,
        schema: SchemaSnapshot,
        prompt: &str,
    ) -> Result<Self, AppError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(AppError::Validation("Prompt cannot be empty".to_string()));
        }

        Ok(Self {
            table: table.into(),
            schema,
            prompt: prompt.to_string(),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn schema(&self) -> &SchemaSnapshot {
        &self.schema
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Cache identity: SHA-256 over the table, the ordered (name, type) pairs
    /// and the normalized prompt.
    pub fn fingerprint(&self) -> String {
        let columns: Vec<(&str, &str)> = self
            .schema
            .columns()
            .iter()
            .map(|c| (c.name.as_str(), c.data_type.as_str()))
            .collect();

        let canonical = serde_json::json!({
            "table": self.table,
            "columns": columns,
            "prompt": normalize_prompt(&self.prompt),
        });

        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Lowercase and collapse whitespace runs, so cosmetic edits share a cache entry.
pub fn normalize_prompt(prompt: &str) -> String {
    prompt
        .split_whitespace()
        .map(|word| word.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Text the generator produced, split into the two labelled artifacts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawGenerationOutput {
    pub sql_text: String,
    pub dax_text: String,
}

impl RawGenerationOutput {
    pub fn new(sql_text: impl Into<String>, dax_text: impl Into<String>) -> Self {
        Self {
            sql_text: sql_text.into(),
            dax_text: dax_text.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sql_text.trim().is_empty() && self.dax_text.trim().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranslationStatus {
    Accepted,
    Rejected,
}

/// Why the validator refused a generated pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionReason {
    UnknownColumn(String),
    UnknownTable(String),
    EmptyGeneration,
    Unparseable(String),
    NotReadOnly(String),
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::UnknownColumn(name) => write!(f, "UnknownColumn: {}", name),
            RejectionReason::UnknownTable(name) => write!(f, "UnknownTable: {}", name),
            RejectionReason::EmptyGeneration => write!(f, "EmptyGeneration"),
            RejectionReason::Unparseable(detail) => write!(f, "Unparseable: {}", detail),
            RejectionReason::NotReadOnly(kind) => write!(f, "NotReadOnly: {}", kind),
        }
    }
}

/// Validated outcome of one translation. Never mutated once cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationResult {
    pub sql: String,
    pub dax: String,
    pub status: TranslationStatus,
    pub rejection_reason: Option<String>,
}

impl TranslationResult {
    pub fn accepted(sql: impl Into<String>, dax: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            dax: dax.into(),
            status: TranslationStatus::Accepted,
            rejection_reason: None,
        }
    }

    pub fn rejected(sql: impl Into<String>, dax: impl Into<String>, reason: RejectionReason) -> Self {
        Self {
            sql: sql.into(),
            dax: dax.into(),
            status: TranslationStatus::Rejected,
            rejection_reason: Some(reason.to_string()),
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.status == TranslationStatus::Accepted
    }
}

#[derive(Debug, Deserialize)]
pub struct TranslateRequest {
    pub table: String,
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslateResponse {
    pub fingerprint: String,
    pub sql: String,
    pub dax: String,
    pub status: TranslationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl TranslateResponse {
    pub fn new(fingerprint: String, result: TranslationResult) -> Self {
        Self {
            fingerprint,
            sql: result.sql,
            dax: result.dax,
            status: result.status,
            reason: result.rejection_reason,
        }
    }
}
