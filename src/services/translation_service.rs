use std::sync::Arc;

use crate::api::middleware::AppError;
use crate::models::{TranslationRequest, TranslationResult};
use crate::services::generator::DualCodeGenerator;
use crate::services::prompt_compiler::PromptCompiler;
use crate::services::schema_reader::{parse_table_name, SchemaReader};
use crate::services::translation_cache::{CacheStats, TranslationCache};
use crate::validation::ConsistencyValidator;

/// A translation result together with the fingerprint it is cached under
#[derive(Debug, Clone)]
pub struct TranslationOutcome {
    pub fingerprint: String,
    pub result: TranslationResult,
}

/// Schema read -> prompt compile -> generate -> validate, behind the cache
pub struct TranslationService {
    schema_reader: Arc<dyn SchemaReader>,
    compiler: Arc<PromptCompiler>,
    generator: Arc<DualCodeGenerator>,
    cache: Arc<TranslationCache>,
}

impl TranslationService {
    pub fn new(
        schema_reader: Arc<dyn SchemaReader>,
        compiler: Arc<PromptCompiler>,
        generator: Arc<DualCodeGenerator>,
        cache: Arc<TranslationCache>,
    ) -> Self {
        Self {
            schema_reader,
            compiler,
            generator,
            cache,
        }
    }

    /// Translate a natural language request over `table` into a validated (sql, dax) pair.
    ///
    /// The schema is read fresh on every call so the fingerprint tracks schema
    /// changes; the generator only runs on a cache miss.
    pub async fn translate(&self, table: &str, prompt: &str) -> Result<TranslationOutcome, AppError> {
        if prompt.trim().is_empty() {
            return Err(AppError::Validation("Prompt cannot be empty".to_string()));
        }
        parse_table_name(table.trim())?;

        let schema = self.schema_reader.fetch_schema(table.trim()).await?;
        let request = TranslationRequest::new(schema.table(), schema.clone(), prompt)?;
        let fingerprint = request.fingerprint();

        tracing::info!(
            "Translating request for table {} ({} columns, fingerprint {})",
            request.table(),
            request.schema().columns().len(),
            &fingerprint[..12]
        );

        let compiler = Arc::clone(&self.compiler);
        let generator = Arc::clone(&self.generator);
        let result = self
            .cache
            .get_or_compute(&fingerprint, move || async move {
                let compiled = compiler.compile(request.table(), request.schema(), request.prompt())?;
                let raw = generator.generate(&compiled).await?;
                Ok(ConsistencyValidator::validate(&raw, request.schema()))
            })
            .await?;

        tracing::info!(
            "Translation {} for table {}: {:?}",
            &fingerprint[..12],
            schema.table(),
            result.status
        );

        Ok(TranslationOutcome { fingerprint, result })
    }

    /// Previously computed result, if still cached
    pub fn cached(&self, fingerprint: &str) -> Option<TranslationResult> {
        self.cache.peek(fingerprint)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.get_stats()
    }

    pub fn cache(&self) -> &TranslationCache {
        &self.cache
    }

    pub fn schema_reader(&self) -> &dyn SchemaReader {
        self.schema_reader.as_ref()
    }
}
