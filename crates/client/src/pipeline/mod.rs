//! The parse pipeline.
//!
//! One request moves through
//! `Fetching -> Cleaning -> Extracting -> Validating/Fallback -> Caching -> Done`
//! under a single deadline. Expiry, or cancellation of the caller's token,
//! drops the in-flight stage; render sessions still close because the pool
//! releases them on drop. Every failure after the request is accepted comes
//! back as a failed [`ParseResponse`], never as a panic or an `Err`.

pub mod normalize;
pub mod validate;

pub use normalize::normalize;
pub use validate::{is_placeholder_title, merge, validate};

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use pagesift_core::cache::url_key_material;
use pagesift_core::{
    AppConfig, CacheKeyMode, ContentCache, Error, ExtractionMode, ExtractionRecord, ParseRequest, ParseResponse,
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::clean::clean_html;
use crate::completion::{CompletionClient, ExtractionHints};
use crate::extract::Extractor;
use crate::guard::check_target;
use crate::render::RenderPool;
use crate::sandbox::{Bindings, Sandbox};

/// Source of rendered documents.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, Error>;
}

#[async_trait]
impl PageSource for RenderPool {
    async fn fetch(&self, url: &str) -> Result<String, Error> {
        RenderPool::fetch(self, url).await
    }
}

/// Pipeline settings.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub deadline: Duration,
    pub key_mode: CacheKeyMode,
    pub extraction_mode: ExtractionMode,
    pub max_content_chars: usize,
    pub sandbox_step_budget: u64,
    pub allow_private_hosts: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl PipelineOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            deadline: Duration::from_millis(config.deadline_ms),
            key_mode: config.cache_key_mode,
            extraction_mode: config.extraction_mode,
            max_content_chars: config.max_content_chars,
            sandbox_step_budget: config.sandbox_step_budget,
            allow_private_hosts: config.allow_private_hosts,
        }
    }
}

/// Pipeline stage, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Fetching,
    Cleaning,
    Extracting,
    Fallback,
    Caching,
}

/// Drives parse requests through the pipeline.
pub struct Orchestrator {
    cache: Arc<ContentCache>,
    pages: Arc<dyn PageSource>,
    completion: Arc<dyn CompletionClient>,
    fallback: Arc<dyn Extractor>,
    sandbox: Sandbox,
    opts: PipelineOptions,
}

impl Orchestrator {
    pub fn new(
        cache: Arc<ContentCache>, pages: Arc<dyn PageSource>, completion: Arc<dyn CompletionClient>,
        fallback: Arc<dyn Extractor>, opts: PipelineOptions,
    ) -> Self {
        Self { cache, pages, completion, fallback, sandbox: Sandbox::new(opts.sandbox_step_budget), opts }
    }

    pub fn cache(&self) -> &ContentCache {
        &self.cache
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.opts
    }

    /// Run one request to completion, timeout or cancellation.
    pub async fn parse(&self, request: &ParseRequest, cancel: &CancellationToken) -> ParseResponse {
        let started = Instant::now();
        tracing::info!(url = %request.url, variant = %request.variant(), "parse request");

        let token = cancel.child_token();
        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => Err(Error::Timeout("request cancelled".into())),
            result = tokio::time::timeout(self.opts.deadline, self.run(request)) => {
                result.unwrap_or_else(|_| {
                    Err(Error::Timeout(format!("deadline of {}ms exceeded", self.opts.deadline.as_millis())))
                })
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(record) => {
                tracing::info!(url = %request.url, kind = ?record.kind(), elapsed_ms, "parse succeeded");
                ParseResponse::success(record)
            }
            Err(e) => {
                tracing::error!(url = %request.url, error = %e, kind = ?e.kind(), elapsed_ms, "parse failed");
                ParseResponse::failure(&e)
            }
        }
    }

    async fn run(&self, request: &ParseRequest) -> Result<ExtractionRecord, Error> {
        let target = check_target(&request.url, self.opts.allow_private_hosts)?;
        let url_key = url_key_material(target.as_str(), &request.variant());

        if self.opts.key_mode == CacheKeyMode::Url
            && !request.force_refresh
            && let Some(record) = self.cached(&url_key)
        {
            return Ok(record);
        }

        trace_stage(Stage::Fetching, &target);
        let html = self.pages.fetch(target.as_str()).await?;

        trace_stage(Stage::Cleaning, &target);
        let cleaned = clean_html(&html, self.opts.max_content_chars);
        let key = match self.opts.key_mode {
            CacheKeyMode::Url => url_key,
            CacheKeyMode::Content => cleaned.clone(),
        };
        if self.opts.key_mode == CacheKeyMode::Content
            && !request.force_refresh
            && let Some(record) = self.cached(&key)
        {
            return Ok(record);
        }

        trace_stage(Stage::Extracting, &target);
        let hints = ExtractionHints::from_request(request);
        let primary = self.extract(&cleaned, &target, &hints).await?;

        let record = match validate(&primary) {
            Ok(()) => primary,
            Err(reason) => {
                trace_stage(Stage::Fallback, &target);
                tracing::warn!(url = %target, reason = %reason, "primary extraction rejected; trying fallback");
                let fallback = self.fallback.extract(&html, &target);
                merge(primary, fallback)
            }
        };

        trace_stage(Stage::Caching, &target);
        self.store(&key, &record);
        Ok(record)
    }

    async fn extract(&self, cleaned: &str, base_url: &Url, hints: &ExtractionHints) -> Result<ExtractionRecord, Error> {
        let raw = match self.opts.extraction_mode {
            ExtractionMode::Direct => self.completion.extract(cleaned, base_url, hints).await?,
            ExtractionMode::Codegen => {
                let program = self.completion.synthesize_program(cleaned, base_url, hints).await?;
                self.execute(program, cleaned.to_string(), base_url.to_string()).await?
            }
        };
        Ok(normalize(raw))
    }

    /// Run a generated program off the async workers; the step budget bounds it.
    async fn execute(&self, program: String, html: String, base_url: String) -> Result<Value, Error> {
        let sandbox = self.sandbox;
        let result = tokio::task::spawn_blocking(move || {
            sandbox.run(&program, &Bindings { html_content: &html, base_url: &base_url })
        })
        .await
        .map_err(|e| Error::SandboxExecution(format!("sandbox task failed: {e}")))?;

        Ok(result?)
    }

    fn cached(&self, key: &str) -> Option<ExtractionRecord> {
        let payload = self.cache.get(key)?;
        match decode_payload(payload) {
            Some(record) => {
                tracing::info!("cache hit");
                Some(record)
            }
            None => {
                tracing::warn!("cached payload could not be decoded; treating as a miss");
                None
            }
        }
    }

    fn store(&self, key: &str, record: &ExtractionRecord) {
        match serde_json::to_value(ParseResponse::success(record.clone())) {
            Ok(payload) => {
                if !self.cache.set(key, payload) {
                    tracing::debug!(kind = ?record.kind(), "result not cacheable");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to encode result for the cache"),
        }
    }
}

/// Read a cached payload: a response envelope or a bare record.
fn decode_payload(payload: Value) -> Option<ExtractionRecord> {
    if payload.get("data").is_some() {
        return serde_json::from_value::<ParseResponse>(payload).ok().and_then(|r| r.data);
    }
    serde_json::from_value(payload).ok()
}

fn trace_stage(stage: Stage, url: &Url) {
    tracing::debug!(?stage, url = %url, "pipeline stage");
}
