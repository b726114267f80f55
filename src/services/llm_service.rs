use reqwest::Client as HttpClient;
use serde_json::json;
use std::time::Duration;

use crate::api::middleware::AppError;
use crate::config::LlmConfig;
use crate::services::generator::Generator;

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    /// Generic completion gateway: `{prompt, max_tokens, temperature}` in, `text|content|response` out
    Gateway,
    /// Anthropic Messages API
    Anthropic,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self, AppError> {
        match s.to_lowercase().as_str() {
            "gateway" => Ok(LlmProvider::Gateway),
            "anthropic" | "claude" => Ok(LlmProvider::Anthropic),
            _ => Err(AppError::Validation(format!("Unsupported LLM provider: {}", s))),
        }
    }
}

/// LLM service generating SQL and DAX drafts from compiled prompts
pub struct LlmService {
    gateway_url: String,
    api_key: Option<String>,
    provider: LlmProvider,
    model: String,
    max_tokens: u32,
    temperature: f32,
    configured: bool,
    http_client: HttpClient,
}

impl LlmService {
    pub fn new(config: &LlmConfig) -> Result<Self, AppError> {
        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            gateway_url: config.gateway_url.clone(),
            api_key: config.api_key.clone(),
            provider: LlmProvider::from_str(&config.provider)?,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            configured: config.is_configured(),
            http_client,
        })
    }

    fn request_body(&self, prompt: &str) -> serde_json::Value {
        match self.provider {
            LlmProvider::Gateway => json!({
                "prompt": prompt,
                "model": self.model,
                "max_tokens": self.max_tokens,
                "temperature": self.temperature,
            }),
            LlmProvider::Anthropic => json!({
                "model": self.model,
                "max_tokens": self.max_tokens,
                "temperature": self.temperature,
                "messages": [{"role": "user", "content": prompt}],
            }),
        }
    }

    /// Call the LLM API with the compiled prompt
    async fn call_llm_api(&self, prompt: &str, timeout: Duration) -> Result<String, AppError> {
        let mut request = self
            .http_client
            .post(&self.gateway_url)
            .timeout(timeout)
            .json(&self.request_body(prompt));

        if let Some(api_key) = &self.api_key {
            request = match self.provider {
                LlmProvider::Gateway => request.header("Authorization", format!("Bearer {}", api_key)),
                LlmProvider::Anthropic => request
                    .header("x-api-key", api_key)
                    .header("anthropic-version", ANTHROPIC_VERSION),
            };
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::GenerationTimeout(format!("LLM request timed out: {}", e))
            } else {
                AppError::ProviderUnavailable(format!("Failed to call LLM service: {}", e))
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::ProviderUnavailable(format!(
                "LLM service returned error {}: {}",
                status, error_text
            )));
        }

        let result: serde_json::Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                AppError::GenerationTimeout(format!("LLM response timed out: {}", e))
            } else {
                AppError::ProviderUnavailable(format!("Failed to parse LLM response: {}", e))
            }
        })?;

        Ok(Self::extract_text(&result))
    }

    /// Pull the completion text out of either response shape.
    ///
    /// An unrecognised shape yields an empty string; the response parser then
    /// treats it as a malformed response instead of a provider failure.
    fn extract_text(result: &serde_json::Value) -> String {
        let text = result["text"]
            .as_str()
            .or_else(|| result["content"].as_str())
            .or_else(|| result["response"].as_str())
            .or_else(|| result["content"][0]["text"].as_str());

        match text {
            Some(text) => text.to_string(),
            None => {
                tracing::warn!("LLM response does not contain completion text");
                String::new()
            }
        }
    }

    /// Fallback generation using simple pattern matching over the compiled prompt.
    /// This is used when the LLM service is not configured.
    fn fallback_generation(&self, prompt: &str) -> String {
        let outline = PromptOutline::parse(prompt);

        if outline.columns.is_empty() {
            tracing::warn!("Fallback generation declined: no columns known for {}", outline.table);
            return "```sql\n```\n```dax\n```".to_string();
        }

        let request = outline.request.to_lowercase();
        let table = outline.table.as_str();
        let mentioned = |name: &str| request.contains(&name.to_lowercase().replace('_', " "))
            || request.contains(&name.to_lowercase());

        let group = outline
            .columns
            .iter()
            .find(|(name, _)| request.contains(&format!("by {}", name.to_lowercase())));

        let measure = outline.columns.iter().find(|(name, data_type)| {
            is_numeric_type(data_type)
                && mentioned(name.as_str())
                && group.map_or(true, |(group_name, _)| group_name != name)
        });

        let (sql_agg, dax_agg, label) = match measure {
            Some((name, _)) if request.contains("average") || request.contains("avg") || request.contains("mean") => (
                format!("AVG({})", name),
                format!("AVERAGE({}[{}])", table, name),
                format!("average_{}", name),
            ),
            Some((name, _)) if request.contains("total") || request.contains("sum") => (
                format!("SUM({})", name),
                format!("SUM({}[{}])", table, name),
                format!("total_{}", name),
            ),
            _ => (
                "COUNT(*)".to_string(),
                format!("COUNTROWS({})", table),
                "row_count".to_string(),
            ),
        };

        let (sql, dax) = match group {
            Some((name, _)) => (
                format!(
                    "SELECT {name}, {sql_agg} AS {label} FROM {table} GROUP BY {name} ORDER BY {name}"
                ),
                format!("EVALUATE SUMMARIZECOLUMNS({table}[{name}], \"{label}\", {dax_agg})"),
            ),
            None => (
                format!("SELECT {sql_agg} AS {label} FROM {table}"),
                format!("Result = {dax_agg}"),
            ),
        };

        tracing::warn!("Using fallback generation. Configure LLM service for better results. Generated: {}", sql);
        tracing::warn!("Request was: {}", outline.request);

        format!("```sql\n{}\n```\n```dax\n{}\n```", sql, dax)
    }
}

#[async_trait::async_trait]
impl Generator for LlmService {
    async fn complete(&self, prompt: &str, timeout: Duration) -> Result<String, AppError> {
        if !self.configured {
            return Ok(self.fallback_generation(prompt));
        }
        self.call_llm_api(prompt, timeout).await
    }
}

fn is_numeric_type(data_type: &str) -> bool {
    let data_type = data_type.to_lowercase();
    ["int", "numeric", "decimal", "double", "real", "float", "money"]
        .iter()
        .any(|t| data_type.contains(t))
}

/// Table, columns and request recovered from a compiled prompt
#[derive(Debug, Default)]
struct PromptOutline {
    table: String,
    columns: Vec<(String, String)>,
    request: String,
}

impl PromptOutline {
    fn parse(prompt: &str) -> Self {
        let mut outline = PromptOutline::default();
        let mut in_columns = false;

        for line in prompt.lines() {
            if let Some(table) = line.strip_prefix("Table: ") {
                if outline.table.is_empty() {
                    outline.table = table.trim().to_string();
                }
            } else if line.starts_with("Columns:") {
                in_columns = true;
            } else if in_columns {
                // Format: "  - name (type) [NOT NULL]"
                match line.trim().strip_prefix("- ") {
                    Some(entry) => {
                        if let Some((name, rest)) = entry.split_once(" (") {
                            let data_type = rest.split(')').next().unwrap_or_default();
                            outline.columns.push((name.to_string(), data_type.to_string()));
                        }
                    }
                    None => in_columns = false,
                }
            } else if let Some(request) = line.strip_prefix("Request: ") {
                // The user request is the last one, after the examples
                outline.request = request.trim().to_string();
            }
        }

        outline
    }
}
