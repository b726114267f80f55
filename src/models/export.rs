use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportFile {
    pub file_name: String,
    pub content: String,
}

/// Downloadable artifacts for one accepted translation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportBundle {
    pub id: String,
    pub table: String,
    /// Cache key of the translation the files were built from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    pub pbids_descriptor: serde_json::Value,
    pub dax_file: ExportFile,
    pub sql_file: ExportFile,
    pub created_at: DateTime<Utc>,
}

impl ExportBundle {
    pub fn new(
        table: String,
        pbids_descriptor: serde_json::Value,
        dax_file: ExportFile,
        sql_file: ExportFile,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            table,
            fingerprint: None,
            pbids_descriptor,
            dax_file,
            sql_file,
            created_at: Utc::now(),
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }
}
