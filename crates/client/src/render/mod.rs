//! Headless browser rendering for JS-heavy pages.
//!
//! The browser is abstracted behind three traits so the pool can be driven by
//! a real Chromium (feature `render`) or by a scripted engine in tests:
//!
//! - [`RenderEngine`] launches the shared browser process once
//! - [`EngineHandle`] is that process; it opens isolated sessions
//! - [`RenderSession`] is one browser context plus one page

#[cfg(feature = "render")]
pub mod chromium;
pub mod pool;

pub use pool::RenderPool;

use std::sync::Arc;
use std::time::Duration;

use pagesift_core::{AppConfig, Error};
use thiserror::Error;
use url::Url;

/// Errors that can occur during page rendering.
#[derive(Debug, Error)]
pub enum RenderError {
    /// Failed to launch or connect to browser.
    #[error("browser launch failed: {0}")]
    Launch(String),

    /// Failed to open an isolated browsing session.
    #[error("session setup failed: {0}")]
    Session(String),

    /// Navigation reported an error.
    #[error("navigation failed: {0}")]
    Navigation(String),

    /// Failed to read back the page.
    #[error("content retrieval failed: {0}")]
    ContentRetrieval(String),

    /// A wait condition did not resolve in time.
    #[error("render timeout after {0}ms")]
    Timeout(u64),

    /// Browser closed unexpectedly.
    #[error("browser closed unexpectedly")]
    BrowserClosed,
}

impl From<RenderError> for Error {
    fn from(err: RenderError) -> Self {
        match err {
            RenderError::Launch(msg) => Error::RenderInit(msg),
            other => Error::Fetch(other.to_string()),
        }
    }
}

/// Page readiness condition used during navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitCondition {
    /// No pending network activity.
    NetworkIdle,
    /// DOM constructed; subresources may still be loading.
    DomContentLoaded,
}

/// Subresource classes refused inside a render session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Image,
    Font,
    Media,
    Stylesheet,
}

/// Everything the extractor never looks at.
pub const BLOCKED_RESOURCES: &[ResourceKind] =
    &[ResourceKind::Image, ResourceKind::Font, ResourceKind::Media, ResourceKind::Stylesheet];

/// Options for rendering a page.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Maximum number of concurrently open sessions.
    pub max_concurrency: usize,

    /// Budget for the strict wait condition.
    pub navigation_timeout: Duration,

    /// Budget for the loose wait condition.
    pub fallback_wait: Duration,

    /// Fixed delay after the loose wait.
    pub settle_delay: Duration,

    /// Lazy-load scrolls after the page is ready (1-3).
    pub scroll_iterations: u32,

    pub scroll_delay: Duration,

    /// Skip the private/reserved host check.
    pub allow_private_hosts: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl RenderOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_concurrency: config.max_concurrency.max(1),
            navigation_timeout: Duration::from_millis(config.navigation_timeout_ms),
            fallback_wait: Duration::from_millis(config.fallback_wait_ms),
            settle_delay: Duration::from_millis(config.settle_delay_ms),
            scroll_iterations: config.scroll_iterations.clamp(1, 3),
            scroll_delay: Duration::from_millis(config.scroll_delay_ms),
            allow_private_hosts: config.allow_private_hosts,
        }
    }
}

/// Launches the shared browser process.
#[async_trait::async_trait]
pub trait RenderEngine: Send + Sync {
    async fn launch(&self) -> Result<Arc<dyn EngineHandle>, RenderError>;
}

/// A running browser shared by every session.
#[async_trait::async_trait]
pub trait EngineHandle: Send + Sync {
    /// Open a new isolated context with one blank page.
    async fn open_session(&self) -> Result<Box<dyn RenderSession>, RenderError>;

    /// Close the browser process.
    async fn close(&self) -> Result<(), RenderError>;
}

/// One isolated browsing context plus one page.
#[async_trait::async_trait]
pub trait RenderSession: Send {
    /// Abort subresource requests of the given kinds.
    async fn block_resources(&mut self, kinds: &[ResourceKind]) -> Result<(), RenderError>;

    /// Navigate (if not already navigating) and wait for `until`.
    ///
    /// Callers bound this with a timeout; implementations must tolerate being
    /// dropped mid-wait and called again with a looser condition.
    async fn navigate(&mut self, url: &Url, until: WaitCondition) -> Result<(), RenderError>;

    /// Scroll to the bottom of the document once.
    async fn scroll(&mut self) -> Result<(), RenderError>;

    /// Serialized document as it currently stands.
    async fn content(&mut self) -> Result<String, RenderError>;

    /// Close the page and dispose of its context.
    async fn close(self: Box<Self>) -> Result<(), RenderError>;
}
