//! pagesift server entry point.
//!
//! This is the main binary that boots the MCP server on stdio transport.
//! Logging goes to stderr to avoid interfering with the JSON-RPC protocol on stdout.
//!
//! The shared resources (result cache, render pool, completion client) are
//! built here once and handed to the pipeline; the render engine is launched
//! on first use and shut down when the transport closes.

use std::sync::Arc;

use anyhow::Result;
use pagesift_client::{
    ChromiumEngine, CompletionConfig, LectitoExtractor, OpenAiClient, Orchestrator, PageSource, PipelineOptions,
    RenderOptions, RenderPool,
};
use pagesift_core::{AppConfig, ContentCache};
use rmcp::service::serve_server;
use rmcp::transport::io::stdio;
use tracing_subscriber::EnvFilter;

mod handler;
mod tools;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load()?;
    if config.require_completion_api_key().is_err() {
        tracing::warn!("no completion API key configured; parse_url will fail until PAGESIFT_COMPLETION_API_KEY is set");
    }

    let cache = Arc::new(if config.cache_persistent {
        ContentCache::open(&config.db_path, config.cache_ttl(), config.cache_flush_every).await
    } else {
        ContentCache::in_memory(config.cache_ttl())
    });

    let engine = Arc::new(ChromiumEngine::from_config(&config));
    let pool = Arc::new(RenderPool::new(engine, RenderOptions::from_config(&config)));
    let completion = Arc::new(OpenAiClient::new(CompletionConfig::from_config(&config))?);

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&cache),
        Arc::clone(&pool) as Arc<dyn PageSource>,
        completion,
        Arc::new(LectitoExtractor::new()),
        PipelineOptions::from_config(&config),
    ));

    tracing::info!(
        extraction_mode = ?config.extraction_mode,
        cache_key_mode = ?config.cache_key_mode,
        max_concurrency = config.max_concurrency,
        persistent = config.cache_persistent,
        "Starting pagesift server on stdio transport"
    );

    let handler = handler::PagesiftServer::new(orchestrator);
    let transport = stdio();
    let server = serve_server(handler, transport).await?;

    let outcome = server.waiting().await;

    cache.flush().await;
    pool.shutdown().await;
    tracing::info!("pagesift server stopped");

    outcome?;
    Ok(())
}
