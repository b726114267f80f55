use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::api::middleware::AppError;
use crate::models::RawGenerationOutput;
use crate::services::prompt_compiler::CompiledPrompt;
use crate::services::response_parser::split_labeled_blocks;

/// Text-completion capability of an LLM provider.
///
/// Implementations report `GenerationTimeout` when the provider did not
/// answer in time and `ProviderUnavailable` for every other failure.
#[async_trait::async_trait]
pub trait Generator: Send + Sync {
    async fn complete(&self, prompt: &str, timeout: Duration) -> Result<String, AppError>;
}

const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_failures: u32,
    last_failure: Option<Instant>,
}

/// Turns a compiled prompt into a (sql, dax) pair using a [`Generator`].
///
/// Each call is bounded by `timeout`; a timed-out attempt is retried once.
/// Consecutive provider failures open a circuit breaker that fails fast
/// until the cooldown has passed.
pub struct DualCodeGenerator {
    generator: Arc<dyn Generator>,
    timeout: Duration,
    failure_threshold: u32,
    cooldown: Duration,
    breaker: Mutex<BreakerState>,
}

impl DualCodeGenerator {
    pub fn new(generator: Arc<dyn Generator>, timeout: Duration) -> Self {
        Self {
            generator,
            timeout,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            cooldown: DEFAULT_COOLDOWN,
            breaker: Mutex::new(BreakerState::default()),
        }
    }

    pub fn with_circuit_breaker(mut self, failure_threshold: u32, cooldown: Duration) -> Self {
        self.failure_threshold = failure_threshold;
        self.cooldown = cooldown;
        self
    }

    pub async fn generate(&self, prompt: &CompiledPrompt) -> Result<RawGenerationOutput, AppError> {
        self.check_breaker()?;

        let response = match self.attempt(prompt).await {
            Err(AppError::GenerationTimeout(msg)) => {
                tracing::warn!("Generation for table {} timed out ({}), retrying once", prompt.table, msg);
                self.attempt(prompt).await
            }
            other => other,
        };

        let text = match response {
            Ok(text) => {
                self.record_success();
                text
            }
            Err(e) => {
                self.record_failure();
                return Err(e);
            }
        };

        let parsed = split_labeled_blocks(&text);
        if parsed.malformed {
            tracing::warn!(
                "Generator response for table {} had no sql or dax block; treating as empty",
                prompt.table
            );
        } else if prompt.expects_decline && !parsed.output.is_empty() {
            tracing::warn!("Generator produced code for table {} despite an empty schema", prompt.table);
        }

        Ok(parsed.output)
    }

    async fn attempt(&self, prompt: &CompiledPrompt) -> Result<String, AppError> {
        tokio::time::timeout(self.timeout, self.generator.complete(&prompt.text, self.timeout))
            .await
            .map_err(|_| {
                AppError::GenerationTimeout(format!(
                    "No response from generator within {} ms",
                    self.timeout.as_millis()
                ))
            })?
    }

    fn check_breaker(&self) -> Result<(), AppError> {
        let mut breaker = self.breaker.lock().unwrap_or_else(PoisonError::into_inner);
        if breaker.consecutive_failures < self.failure_threshold {
            return Ok(());
        }

        match breaker.last_failure {
            Some(at) if at.elapsed() < self.cooldown => Err(AppError::ProviderUnavailable(format!(
                "Circuit breaker open after {} consecutive failures; retry in {} s",
                breaker.consecutive_failures,
                self.cooldown.saturating_sub(at.elapsed()).as_secs()
            ))),
            _ => {
                tracing::info!("Circuit breaker cooldown elapsed, allowing generator calls");
                breaker.consecutive_failures = 0;
                Ok(())
            }
        }
    }

    fn record_success(&self) {
        let mut breaker = self.breaker.lock().unwrap_or_else(PoisonError::into_inner);
        breaker.consecutive_failures = 0;
        breaker.last_failure = None;
    }

    fn record_failure(&self) {
        let mut breaker = self.breaker.lock().unwrap_or_else(PoisonError::into_inner);
        breaker.consecutive_failures += 1;
        breaker.last_failure = Some(Instant::now());
        if breaker.consecutive_failures == self.failure_threshold {
            tracing::error!(
                "Generator failed {} times in a row, opening circuit breaker for {} s",
                breaker.consecutive_failures,
                self.cooldown.as_secs()
            );
        }
    }
}
