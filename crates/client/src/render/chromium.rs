//! Headless Chrome/Chromium engine using chromiumoxide.
//!
//! Each session gets its own CDP browser context, so cookies and storage
//! never leak between requests. Subresources the extractor ignores are
//! failed at the Fetch domain before they hit the network.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::Page;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::fetch::{EnableParams, EventRequestPaused, FailRequestParams, RequestPattern};
use chromiumoxide::cdp::browser_protocol::network::{ErrorReason, LoaderId, ResourceType};
use chromiumoxide::cdp::browser_protocol::page::{EventLifecycleEvent, NavigateParams, SetLifecycleEventsEnabledParams};
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use futures_util::StreamExt;
use pagesift_core::AppConfig;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use url::Url;

use super::{EngineHandle, RenderEngine, RenderError, RenderSession, ResourceKind, WaitCondition};

const READY_POLL: Duration = Duration::from_millis(100);
const SCROLL_SCRIPT: &str = "window.scrollTo(0, document.body ? document.body.scrollHeight : 0)";

/// Launches a headless Chromium.
#[derive(Debug, Clone)]
pub struct ChromiumEngine {
    executable: Option<PathBuf>,
    user_agent: String,
    viewport: (u32, u32),
}

impl ChromiumEngine {
    /// Use `executable` if given, otherwise let chromiumoxide find a browser.
    pub fn new(executable: Option<PathBuf>, user_agent: impl Into<String>) -> Self {
        Self { executable, user_agent: user_agent.into(), viewport: (1280, 720) }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.chrome_executable.clone(), config.user_agent.clone())
    }
}

#[async_trait::async_trait]
impl RenderEngine for ChromiumEngine {
    async fn launch(&self) -> Result<Arc<dyn EngineHandle>, RenderError> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-background-networking")
            .arg(format!("--user-agent={}", self.user_agent))
            .window_size(self.viewport.0, self.viewport.1);
        if let Some(path) = &self.executable {
            builder = builder.chrome_executable(path);
        }
        let config = builder.build().map_err(RenderError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| RenderError::Launch(e.to_string()))?;

        let events = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!("browser handler event error: {e}");
                }
            }
        });

        Ok(Arc::new(ChromiumHandle {
            shared: Arc::new(Shared { browser: RwLock::new(Some(browser)), events: std::sync::Mutex::new(Some(events)) }),
        }))
    }
}

struct Shared {
    browser: RwLock<Option<Browser>>,
    events: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    async fn dispose_context(&self, id: BrowserContextId) {
        let guard = self.browser.read().await;
        if let Some(browser) = guard.as_ref()
            && let Err(e) = browser.execute(DisposeBrowserContextParams::new(id)).await
        {
            tracing::debug!("browser context dispose failed: {e}");
        }
    }
}

/// A running Chromium process.
pub struct ChromiumHandle {
    shared: Arc<Shared>,
}

#[async_trait::async_trait]
impl EngineHandle for ChromiumHandle {
    async fn open_session(&self) -> Result<Box<dyn RenderSession>, RenderError> {
        let guard = self.shared.browser.read().await;
        let browser = guard.as_ref().ok_or(RenderError::BrowserClosed)?;

        let context_id = browser
            .execute(CreateBrowserContextParams::default())
            .await
            .map_err(|e| RenderError::Session(e.to_string()))?
            .result
            .browser_context_id;

        let mut target = CreateTargetParams::new("about:blank");
        target.browser_context_id = Some(context_id.clone());

        let page = match browser.new_page(target).await {
            Ok(page) => page,
            Err(e) => {
                drop(guard);
                self.shared.dispose_context(context_id).await;
                return Err(RenderError::Session(e.to_string()));
            }
        };

        Ok(Box::new(ChromiumSession {
            page,
            context_id,
            shared: Arc::clone(&self.shared),
            interceptor: None,
            navigated: false,
        }))
    }

    async fn close(&self) -> Result<(), RenderError> {
        let browser = self.shared.browser.write().await.take();
        let events = self.shared.events.lock().unwrap_or_else(|e| e.into_inner()).take();

        let result = match browser {
            Some(mut browser) => {
                let closed = browser.close().await.map(|_| ()).map_err(|e| RenderError::Launch(e.to_string()));
                if let Err(e) = browser.wait().await {
                    tracing::debug!("browser process wait failed: {e}");
                }
                closed
            }
            None => Ok(()),
        };

        if let Some(events) = events {
            events.abort();
        }
        result
    }
}

/// One browser context with a single page.
pub struct ChromiumSession {
    page: Page,
    context_id: BrowserContextId,
    shared: Arc<Shared>,
    interceptor: Option<JoinHandle<()>>,
    navigated: bool,
}

impl ChromiumSession {
    async fn start_navigation(&mut self, url: &Url) -> Result<Option<LoaderId>, RenderError> {
        self.navigated = true;
        let response = self
            .page
            .execute(NavigateParams::new(url.as_str()))
            .await
            .map_err(|e| RenderError::Navigation(e.to_string()))?;

        match &response.result.error_text {
            Some(error) => Err(RenderError::Navigation(error.clone())),
            None => Ok(response.result.loader_id.clone()),
        }
    }

    async fn ready_state(&self) -> Result<String, RenderError> {
        self.page
            .evaluate("document.readyState")
            .await
            .map_err(|e| RenderError::ContentRetrieval(e.to_string()))?
            .into_value::<String>()
            .map_err(|e| RenderError::ContentRetrieval(e.to_string()))
    }
}

fn resource_type(kind: ResourceKind) -> ResourceType {
    match kind {
        ResourceKind::Image => ResourceType::Image,
        ResourceKind::Font => ResourceType::Font,
        ResourceKind::Media => ResourceType::Media,
        ResourceKind::Stylesheet => ResourceType::Stylesheet,
    }
}

#[async_trait::async_trait]
impl RenderSession for ChromiumSession {
    async fn block_resources(&mut self, kinds: &[ResourceKind]) -> Result<(), RenderError> {
        let patterns: Vec<RequestPattern> = kinds
            .iter()
            .map(|kind| RequestPattern::builder().resource_type(resource_type(*kind)).build())
            .collect();

        let mut paused = self
            .page
            .event_listener::<EventRequestPaused>()
            .await
            .map_err(|e| RenderError::Session(e.to_string()))?;
        self.page
            .execute(EnableParams::builder().patterns(patterns).build())
            .await
            .map_err(|e| RenderError::Session(e.to_string()))?;

        let page = self.page.clone();
        self.interceptor = Some(tokio::spawn(async move {
            while let Some(event) = paused.next().await {
                let fail = FailRequestParams::new(event.request_id.clone(), ErrorReason::BlockedByClient);
                if let Err(e) = page.execute(fail).await {
                    tracing::trace!("failed to abort blocked request: {e}");
                }
            }
        }));
        Ok(())
    }

    async fn navigate(&mut self, url: &Url, until: WaitCondition) -> Result<(), RenderError> {
        match until {
            WaitCondition::NetworkIdle => {
                self.page
                    .execute(SetLifecycleEventsEnabledParams::new(true))
                    .await
                    .map_err(|e| RenderError::Navigation(e.to_string()))?;
                let mut lifecycle = self
                    .page
                    .event_listener::<EventLifecycleEvent>()
                    .await
                    .map_err(|e| RenderError::Navigation(e.to_string()))?;

                let loader = self.start_navigation(url).await?;
                while let Some(event) = lifecycle.next().await {
                    let same_load = loader.as_ref().is_none_or(|id| *id == event.loader_id);
                    if same_load && event.name == "networkIdle" {
                        return Ok(());
                    }
                }
                Err(RenderError::BrowserClosed)
            }
            WaitCondition::DomContentLoaded => {
                if !self.navigated {
                    self.start_navigation(url).await?;
                }
                loop {
                    if self.ready_state().await? != "loading" {
                        return Ok(());
                    }
                    tokio::time::sleep(READY_POLL).await;
                }
            }
        }
    }

    async fn scroll(&mut self) -> Result<(), RenderError> {
        self.page
            .evaluate(SCROLL_SCRIPT)
            .await
            .map(|_| ())
            .map_err(|e| RenderError::ContentRetrieval(e.to_string()))
    }

    async fn content(&mut self) -> Result<String, RenderError> {
        self.page
            .content()
            .await
            .map_err(|e| RenderError::ContentRetrieval(e.to_string()))
    }

    async fn close(self: Box<Self>) -> Result<(), RenderError> {
        let ChromiumSession { page, context_id, shared, interceptor, .. } = *self;
        if let Some(interceptor) = interceptor {
            interceptor.abort();
        }

        let closed = page.close().await.map_err(|e| RenderError::Session(e.to_string()));
        shared.dispose_context(context_id).await;
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore = "requires Chrome/Chromium installation"]
    async fn test_chromium_engine_launch() {
        let engine = ChromiumEngine::new(None, "pagesift-test");
        let handle = engine.launch().await.unwrap();
        handle.close().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires network and Chrome/Chromium"]
    async fn test_render_simple_page() {
        let engine = ChromiumEngine::new(None, "pagesift-test");
        let handle = engine.launch().await.unwrap();
        let mut session = handle.open_session().await.unwrap();

        session.block_resources(crate::render::BLOCKED_RESOURCES).await.unwrap();
        let url = Url::parse("https://example.com").unwrap();
        session.navigate(&url, WaitCondition::DomContentLoaded).await.unwrap();

        let html = session.content().await.unwrap();
        assert!(html.contains("Example Domain"));

        session.close().await.unwrap();
        handle.close().await.unwrap();
    }
}
