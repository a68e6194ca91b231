//! Bounded-concurrency render pool.
//!
//! One browser process is launched lazily and shared; at most
//! `max_concurrency` sessions are open at any moment. A session is always
//! closed before its permit goes back to the semaphore, including when the
//! caller's future is dropped mid-render.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use pagesift_core::Error;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use url::Url;

use super::{BLOCKED_RESOURCES, EngineHandle, RenderEngine, RenderError, RenderOptions, RenderSession, WaitCondition};
use crate::guard::check_target;

/// How far page loading got before the document was read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The strict condition was met.
    Idle,
    /// The loose condition was met after the strict one lapsed.
    Settled,
    /// Neither condition was met; the page is read as it stands.
    Degraded,
}

#[derive(Debug, Default)]
struct SessionCounters {
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl SessionCounters {
    fn opened(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn closed(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A failed launch is reported to later callers for this long instead of retried.
const LAUNCH_RETRY_AFTER: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct LaunchFailure {
    at: tokio::time::Instant,
    message: String,
}

/// Shared rendering resource manager.
pub struct RenderPool {
    engine: Arc<dyn RenderEngine>,
    handle: RwLock<Option<Arc<dyn EngineHandle>>>,
    init_lock: Mutex<()>,
    last_failure: RwLock<Option<LaunchFailure>>,
    permits: Arc<Semaphore>,
    counters: Arc<SessionCounters>,
    opts: RenderOptions,
}

impl RenderPool {
    pub fn new(engine: Arc<dyn RenderEngine>, opts: RenderOptions) -> Self {
        Self {
            engine,
            handle: RwLock::new(None),
            init_lock: Mutex::new(()),
            last_failure: RwLock::new(None),
            permits: Arc::new(Semaphore::new(opts.max_concurrency.max(1))),
            counters: Arc::new(SessionCounters::default()),
            opts,
        }
    }

    fn current(&self) -> Option<Arc<dyn EngineHandle>> {
        self.handle.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.current().is_some()
    }

    /// Sessions open right now.
    pub fn active_sessions(&self) -> usize {
        self.counters.active.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously open sessions seen so far.
    pub fn peak_sessions(&self) -> usize {
        self.counters.peak.load(Ordering::SeqCst)
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Launch the shared engine if it is not running yet.
    ///
    /// Concurrent first callers all wait on the same launch; the engine is
    /// started exactly once. A failed launch is not retried for
    /// `LAUNCH_RETRY_AFTER`, so callers queued behind it fail without
    /// relaunching.
    pub async fn initialize(&self) -> Result<Arc<dyn EngineHandle>, Error> {
        if let Some(handle) = self.current() {
            return Ok(handle);
        }

        let _guard = self.init_lock.lock().await;
        if let Some(handle) = self.current() {
            return Ok(handle);
        }
        if let Some(message) = self.recent_failure() {
            return Err(Error::RenderInit(message));
        }

        let started = Instant::now();
        let handle = match self.engine.launch().await {
            Ok(handle) => handle,
            Err(e) => {
                let err = Error::from(e);
                let message = match &err {
                    Error::RenderInit(message) => message.clone(),
                    other => other.to_string(),
                };
                *self.last_failure.write().unwrap_or_else(|e| e.into_inner()) =
                    Some(LaunchFailure { at: tokio::time::Instant::now(), message });
                return Err(err);
            }
        };
        *self.last_failure.write().unwrap_or_else(|e| e.into_inner()) = None;
        *self.handle.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::clone(&handle));
        tracing::info!(elapsed_ms = started.elapsed().as_millis() as u64, "render engine launched");

        Ok(handle)
    }

    fn recent_failure(&self) -> Option<String> {
        let failure = self.last_failure.read().unwrap_or_else(|e| e.into_inner());
        failure
            .as_ref()
            .filter(|f| f.at.elapsed() < LAUNCH_RETRY_AFTER)
            .map(|f| format!("{} (launch retried after {}s)", f.message, LAUNCH_RETRY_AFTER.as_secs()))
    }

    /// Close the shared engine. Safe to call repeatedly or before initialization.
    pub async fn shutdown(&self) {
        let _guard = self.init_lock.lock().await;
        let handle = self.handle.write().unwrap_or_else(|e| e.into_inner()).take();

        if let Some(handle) = handle {
            match handle.close().await {
                Ok(()) => tracing::info!("render engine shut down"),
                Err(e) => tracing::warn!(error = %e, "render engine did not close cleanly"),
            }
        }
    }

    /// Render `url` and return the serialized document.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidUrl` / `Error::InvalidInput` for a refused target
    /// - `Error::RenderInit` if the engine cannot be launched
    /// - `Error::Fetch` if no session can be opened or the page cannot be read
    pub async fn fetch(&self, url: &str) -> Result<String, Error> {
        let target = check_target(url, self.opts.allow_private_hosts)?;
        let handle = self.initialize().await?;

        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| Error::Fetch("render pool is closed".into()))?;

        let (session, permit) = PendingSession::start(handle, permit).wait().await?;
        let mut guard = SessionGuard::new(session, permit, Arc::clone(&self.counters));

        let started = Instant::now();
        let result = match guard.session.as_mut() {
            Some(session) => self.drive(session.as_mut(), &target).await,
            None => Err(Error::Fetch("render session already released".into())),
        };
        guard.release().await;

        match &result {
            Ok(html) => tracing::info!(
                url = %target,
                bytes = html.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "rendered page"
            ),
            Err(e) => tracing::warn!(url = %target, error = %e, "render failed"),
        }
        result
    }

    async fn drive(&self, session: &mut dyn RenderSession, url: &Url) -> Result<String, Error> {
        if let Err(e) = session.block_resources(BLOCKED_RESOURCES).await {
            tracing::warn!(url = %url, error = %e, "resource filter not installed");
        }

        let readiness = self.wait_until_ready(session, url).await;
        tracing::debug!(url = %url, ?readiness, "page ready");

        for _ in 0..self.opts.scroll_iterations {
            if let Err(e) = session.scroll().await {
                tracing::debug!(url = %url, error = %e, "scroll failed");
                break;
            }
            tokio::time::sleep(self.opts.scroll_delay).await;
        }

        Ok(session.content().await?)
    }

    /// Strict wait first, then the loose one plus a settle delay.
    ///
    /// Neither a timeout nor a navigation error aborts the render.
    async fn wait_until_ready(&self, session: &mut dyn RenderSession, url: &Url) -> Readiness {
        match timeout(self.opts.navigation_timeout, session.navigate(url, WaitCondition::NetworkIdle)).await {
            Ok(Ok(())) => return Readiness::Idle,
            Ok(Err(e)) => tracing::warn!(url = %url, error = %e, "navigation failed; retrying with loose wait"),
            Err(_) => tracing::warn!(
                url = %url,
                timeout_ms = self.opts.navigation_timeout.as_millis() as u64,
                "network idle not reached; retrying with loose wait"
            ),
        }

        let readiness = match timeout(self.opts.fallback_wait, session.navigate(url, WaitCondition::DomContentLoaded)).await
        {
            Ok(Ok(())) => Readiness::Settled,
            Ok(Err(e)) => {
                tracing::warn!(url = %url, error = %e, "loose navigation failed; reading page as-is");
                Readiness::Degraded
            }
            Err(_) => {
                tracing::warn!(
                    url = %url,
                    timeout_ms = self.opts.fallback_wait.as_millis() as u64,
                    "DOM not ready; reading page as-is"
                );
                Readiness::Degraded
            }
        };

        tokio::time::sleep(self.opts.settle_delay).await;
        readiness
    }
}

/// A session being opened on its own task, with the permit it will use.
///
/// If the wait is dropped before the session arrives, a spawned task collects
/// it, closes it and then frees the permit.
struct PendingSession {
    task: Option<JoinHandle<Result<Box<dyn RenderSession>, RenderError>>>,
    permit: Option<OwnedSemaphorePermit>,
}

impl PendingSession {
    fn start(handle: Arc<dyn EngineHandle>, permit: OwnedSemaphorePermit) -> Self {
        let task = tokio::spawn(async move { handle.open_session().await });
        Self { task: Some(task), permit: Some(permit) }
    }

    async fn wait(mut self) -> Result<(Box<dyn RenderSession>, OwnedSemaphorePermit), Error> {
        let outcome = match self.task.as_mut() {
            Some(task) => task.await,
            None => return Err(Error::Fetch("render session already collected".into())),
        };
        self.task = None;
        let permit = self
            .permit
            .take()
            .ok_or_else(|| Error::Fetch("render permit already released".into()))?;

        match outcome {
            Ok(Ok(session)) => Ok((session, permit)),
            Ok(Err(e)) => Err(e.into()),
            Err(e) => Err(Error::Fetch(format!("render session task failed: {e}"))),
        }
    }
}

impl Drop for PendingSession {
    fn drop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        let permit = self.permit.take();

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Ok(Ok(session)) = task.await
                        && let Err(e) = session.close().await
                    {
                        tracing::warn!(error = %e, "abandoned render session did not close cleanly");
                    }
                    drop(permit);
                });
            }
            Err(_) => task.abort(),
        }
    }
}

/// Owns an open session and its permit.
///
/// `release` closes the session and then frees the permit. If the guard is
/// dropped without `release` (the fetch future was cancelled), both move into
/// a spawned task that does the same.
struct SessionGuard {
    session: Option<Box<dyn RenderSession>>,
    permit: Option<OwnedSemaphorePermit>,
    counters: Arc<SessionCounters>,
}

impl SessionGuard {
    fn new(session: Box<dyn RenderSession>, permit: OwnedSemaphorePermit, counters: Arc<SessionCounters>) -> Self {
        counters.opened();
        Self { session: Some(session), permit: Some(permit), counters }
    }

    async fn release(mut self) {
        if let Some(session) = self.session.take() {
            close_session(session, &self.counters).await;
        }
        drop(self.permit.take());
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        let permit = self.permit.take();
        let counters = Arc::clone(&self.counters);

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    close_session(session, &counters).await;
                    drop(permit);
                });
            }
            Err(_) => {
                tracing::warn!("render session dropped outside a runtime; not closed");
                counters.closed();
            }
        }
    }
}

async fn close_session(session: Box<dyn RenderSession>, counters: &SessionCounters) {
    if let Err(e) = session.close().await {
        tracing::warn!(error = %e, "render session did not close cleanly");
    }
    counters.closed();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{RenderError, ResourceKind};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    #[derive(Clone, Copy)]
    enum Nav {
        Ok,
        IdleHangs,
        AlwaysHangs,
        Fails,
    }

    #[derive(Default)]
    struct Probe {
        launches: AtomicUsize,
        opened: AtomicUsize,
        closed: AtomicUsize,
        scrolls: AtomicUsize,
        blocked: StdMutex<Vec<ResourceKind>>,
        conditions: StdMutex<Vec<WaitCondition>>,
    }

    struct MockEngine {
        probe: Arc<Probe>,
        nav: Nav,
        nav_delay: Duration,
        launch_delay: Duration,
        open_delay: Duration,
        fail_launch: bool,
        fail_content: bool,
    }

    impl MockEngine {
        fn new(nav: Nav) -> Self {
            Self {
                probe: Arc::new(Probe::default()),
                nav,
                nav_delay: Duration::ZERO,
                launch_delay: Duration::ZERO,
                open_delay: Duration::ZERO,
                fail_launch: false,
                fail_content: false,
            }
        }
    }

    #[async_trait::async_trait]
    impl RenderEngine for MockEngine {
        async fn launch(&self) -> Result<Arc<dyn EngineHandle>, RenderError> {
            self.probe.launches.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.launch_delay).await;
            if self.fail_launch {
                return Err(RenderError::Launch("chrome not found".into()));
            }
            Ok(Arc::new(MockHandle {
                probe: Arc::clone(&self.probe),
                nav: self.nav,
                nav_delay: self.nav_delay,
                open_delay: self.open_delay,
                fail_content: self.fail_content,
            }))
        }
    }

    struct MockHandle {
        probe: Arc<Probe>,
        nav: Nav,
        nav_delay: Duration,
        open_delay: Duration,
        fail_content: bool,
    }

    #[async_trait::async_trait]
    impl EngineHandle for MockHandle {
        async fn open_session(&self) -> Result<Box<dyn RenderSession>, RenderError> {
            self.probe.opened.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.open_delay).await;
            Ok(Box::new(MockSession {
                probe: Arc::clone(&self.probe),
                nav: self.nav,
                nav_delay: self.nav_delay,
                fail_content: self.fail_content,
            }))
        }

        async fn close(&self) -> Result<(), RenderError> {
            Ok(())
        }
    }

    struct MockSession {
        probe: Arc<Probe>,
        nav: Nav,
        nav_delay: Duration,
        fail_content: bool,
    }

    #[async_trait::async_trait]
    impl RenderSession for MockSession {
        async fn block_resources(&mut self, kinds: &[ResourceKind]) -> Result<(), RenderError> {
            self.probe.blocked.lock().unwrap().extend_from_slice(kinds);
            Ok(())
        }

        async fn navigate(&mut self, _url: &Url, until: WaitCondition) -> Result<(), RenderError> {
            self.probe.conditions.lock().unwrap().push(until);
            tokio::time::sleep(self.nav_delay).await;
            match (self.nav, until) {
                (Nav::Ok, _) => Ok(()),
                (Nav::IdleHangs, WaitCondition::NetworkIdle) | (Nav::AlwaysHangs, _) => {
                    std::future::pending::<()>().await;
                    Ok(())
                }
                (Nav::IdleHangs, WaitCondition::DomContentLoaded) => Ok(()),
                (Nav::Fails, _) => Err(RenderError::Navigation("net::ERR_CONNECTION_RESET".into())),
            }
        }

        async fn scroll(&mut self) -> Result<(), RenderError> {
            self.probe.scrolls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn content(&mut self) -> Result<String, RenderError> {
            if self.fail_content {
                return Err(RenderError::BrowserClosed);
            }
            Ok("<html><body><p>rendered</p></body></html>".into())
        }

        async fn close(self: Box<Self>) -> Result<(), RenderError> {
            self.probe.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn fast_opts(max_concurrency: usize) -> RenderOptions {
        RenderOptions {
            max_concurrency,
            navigation_timeout: Duration::from_millis(50),
            fallback_wait: Duration::from_millis(50),
            settle_delay: Duration::ZERO,
            scroll_iterations: 2,
            scroll_delay: Duration::ZERO,
            allow_private_hosts: false,
        }
    }

    #[tokio::test]
    async fn test_fetch_returns_content_and_blocks_resources() {
        let engine = MockEngine::new(Nav::Ok);
        let probe = Arc::clone(&engine.probe);
        let pool = RenderPool::new(Arc::new(engine), fast_opts(2));

        let html = pool.fetch("https://example.com/article").await.unwrap();
        assert!(html.contains("rendered"));
        assert_eq!(probe.blocked.lock().unwrap().as_slice(), BLOCKED_RESOURCES);
        assert_eq!(probe.scrolls.load(Ordering::SeqCst), 2);
        assert_eq!(*probe.conditions.lock().unwrap(), vec![WaitCondition::NetworkIdle]);
        assert_eq!(probe.closed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.active_sessions(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_peak_sessions_bounded() {
        let mut engine = MockEngine::new(Nav::Ok);
        engine.nav_delay = Duration::from_millis(20);
        let probe = Arc::clone(&engine.probe);
        let pool = Arc::new(RenderPool::new(Arc::new(engine), fast_opts(2)));

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let pool = Arc::clone(&pool);
                tokio::spawn(async move { pool.fetch(&format!("https://example.com/{i}")).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert!(pool.peak_sessions() <= 2, "peak was {}", pool.peak_sessions());
        assert!(pool.peak_sessions() >= 1);
        assert_eq!(probe.opened.load(Ordering::SeqCst), 8);
        assert_eq!(probe.closed.load(Ordering::SeqCst), 8);
        assert_eq!(pool.active_sessions(), 0);
        assert_eq!(pool.available_permits(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_initialize_launches_once() {
        let mut engine = MockEngine::new(Nav::Ok);
        engine.launch_delay = Duration::from_millis(20);
        let probe = Arc::clone(&engine.probe);
        let pool = Arc::new(RenderPool::new(Arc::new(engine), fast_opts(4)));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let pool = Arc::clone(&pool);
                tokio::spawn(async move { pool.initialize().await.map(|_| ()) })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(probe.launches.load(Ordering::SeqCst), 1);
        assert!(pool.is_initialized());
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let pool = RenderPool::new(Arc::new(MockEngine::new(Nav::Ok)), fast_opts(1));
        pool.shutdown().await;
        assert!(!pool.is_initialized());

        pool.initialize().await.unwrap();
        pool.shutdown().await;
        pool.shutdown().await;
        assert!(!pool.is_initialized());
    }

    #[tokio::test]
    async fn test_launch_failure_fails_fast() {
        let mut engine = MockEngine::new(Nav::Ok);
        engine.fail_launch = true;
        let probe = Arc::clone(&engine.probe);
        let pool = RenderPool::new(Arc::new(engine), fast_opts(1));

        let err = pool.fetch("https://example.com").await.unwrap_err();
        assert!(matches!(err, Error::RenderInit(_)));
        assert_eq!(probe.opened.load(Ordering::SeqCst), 0);
        assert_eq!(pool.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_strict_timeout_falls_back_to_loose_wait() {
        let engine = MockEngine::new(Nav::IdleHangs);
        let probe = Arc::clone(&engine.probe);
        let pool = RenderPool::new(Arc::new(engine), fast_opts(1));

        let html = pool.fetch("https://example.com/slow").await.unwrap();
        assert!(html.contains("rendered"));
        assert_eq!(
            *probe.conditions.lock().unwrap(),
            vec![WaitCondition::NetworkIdle, WaitCondition::DomContentLoaded]
        );
    }

    #[tokio::test]
    async fn test_navigation_errors_degrade() {
        let engine = MockEngine::new(Nav::Fails);
        let pool = RenderPool::new(Arc::new(engine), fast_opts(1));
        assert!(pool.fetch("https://example.com/flaky").await.is_ok());
    }

    #[tokio::test]
    async fn test_session_closed_when_content_fails() {
        let mut engine = MockEngine::new(Nav::Ok);
        engine.fail_content = true;
        let probe = Arc::clone(&engine.probe);
        let pool = RenderPool::new(Arc::new(engine), fast_opts(1));

        let err = pool.fetch("https://example.com").await.unwrap_err();
        assert!(matches!(err, Error::Fetch(_)));
        assert_eq!(probe.closed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.active_sessions(), 0);
        assert_eq!(pool.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_fetch_still_closes_session() {
        let engine = MockEngine::new(Nav::AlwaysHangs);
        let probe = Arc::clone(&engine.probe);
        let mut opts = fast_opts(1);
        opts.navigation_timeout = Duration::from_secs(60);
        opts.fallback_wait = Duration::from_secs(60);
        let pool = RenderPool::new(Arc::new(engine), opts);

        let outcome = timeout(Duration::from_millis(30), pool.fetch("https://example.com/hang")).await;
        assert!(outcome.is_err());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(probe.closed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.active_sessions(), 0);
        assert_eq!(pool.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_cancel_while_opening_closes_session() {
        let mut engine = MockEngine::new(Nav::Ok);
        engine.open_delay = Duration::from_millis(80);
        let probe = Arc::clone(&engine.probe);
        let pool = RenderPool::new(Arc::new(engine), fast_opts(1));

        let outcome = timeout(Duration::from_millis(20), pool.fetch("https://example.com/slow-open")).await;
        assert!(outcome.is_err());
        assert_eq!(probe.opened.load(Ordering::SeqCst), 1);
        assert_eq!(probe.closed.load(Ordering::SeqCst), 0);
        assert_eq!(pool.available_permits(), 0);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(probe.closed.load(Ordering::SeqCst), probe.opened.load(Ordering::SeqCst));
        assert_eq!(pool.active_sessions(), 0);
        assert_eq!(pool.available_permits(), 1);

        let html = pool.fetch("https://example.com/after").await.unwrap();
        assert!(html.contains("rendered"));
        assert_eq!(probe.closed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_queued_callers_share_launch_failure() {
        let mut engine = MockEngine::new(Nav::Ok);
        engine.fail_launch = true;
        engine.launch_delay = Duration::from_millis(20);
        let probe = Arc::clone(&engine.probe);
        let pool = Arc::new(RenderPool::new(Arc::new(engine), fast_opts(2)));

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let pool = Arc::clone(&pool);
                tokio::spawn(async move { pool.fetch(&format!("https://example.com/{i}")).await })
            })
            .collect();
        for task in tasks {
            let err = task.await.unwrap().unwrap_err();
            assert!(matches!(err, Error::RenderInit(_)), "got {err:?}");
        }

        assert_eq!(probe.launches.load(Ordering::SeqCst), 1);
        assert!(!pool.is_initialized());
    }

    #[tokio::test(start_paused = true)]
    async fn test_launch_retried_after_failure_window() {
        let mut engine = MockEngine::new(Nav::Ok);
        engine.fail_launch = true;
        let probe = Arc::clone(&engine.probe);
        let pool = RenderPool::new(Arc::new(engine), fast_opts(1));

        assert!(pool.initialize().await.is_err());
        assert!(pool.initialize().await.is_err());
        assert_eq!(probe.launches.load(Ordering::SeqCst), 1);

        tokio::time::advance(LAUNCH_RETRY_AFTER + Duration::from_millis(1)).await;
        assert!(pool.initialize().await.is_err());
        assert_eq!(probe.launches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_private_target_refused_before_launch() {
        let engine = MockEngine::new(Nav::Ok);
        let probe = Arc::clone(&engine.probe);
        let pool = RenderPool::new(Arc::new(engine), fast_opts(1));

        let err = pool.fetch("http://192.168.1.1/router").await.unwrap_err();
        assert!(matches!(err, Error::InvalidUrl(_)));
        assert_eq!(probe.launches.load(Ordering::SeqCst), 0);
    }
}
