use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use nl_query_backend::api::handlers::AppState;
use nl_query_backend::api::routes::create_router;
use nl_query_backend::config::Config;
use nl_query_backend::services::{
    create_store_pool, mask_credentials, DualCodeGenerator, ExportPackager, LlmService,
    PostgresSchemaReader, PromptCompiler, TranslationCache, TranslationService,
};

const CACHE_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .with_ansi(config.logging.style != "never")
        .init();

    info!("Starting server on {}", config.server_address());
    info!("Reading schemas from {}", mask_credentials(&config.store.url));

    let pool = create_store_pool(&config.store).context("Failed to create store pool")?;
    let schema_reader = Arc::new(PostgresSchemaReader::new(pool));

    let llm = Arc::new(LlmService::new(&config.llm).context("Failed to create LLM client")?);
    if !config.llm.is_configured() {
        warn!("LLM_GATEWAY_URL not configured, using offline fallback generation");
    }

    let compiler = match &config.prompt.examples_path {
        Some(path) => {
            let examples = PromptCompiler::load_examples(path)
                .with_context(|| format!("Failed to load prompt examples from {}", path))?;
            info!("Loaded {} few-shot examples from {}", examples.len(), path);
            PromptCompiler::with_examples(examples)
        }
        None => PromptCompiler::new(),
    };

    let generator = DualCodeGenerator::new(llm, Duration::from_secs(config.llm.timeout_secs));
    let cache = Arc::new(TranslationCache::new(
        config.cache.max_entries,
        config.cache.ttl_secs,
    ));

    let cleanup_cache = Arc::clone(&cache);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CACHE_CLEANUP_INTERVAL);
        loop {
            interval.tick().await;
            cleanup_cache.cleanup_expired();
        }
    });

    let translations = TranslationService::new(
        schema_reader,
        Arc::new(compiler),
        Arc::new(generator),
        cache,
    );
    let exporter = ExportPackager::from_store_url(&config.store.url)?;

    let state = AppState {
        config: config.clone(),
        translations: Arc::new(translations),
        exporter: Arc::new(exporter),
    };
    let app = create_router(state);

    // Start server
    let addr: SocketAddr = config.server_address().parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
