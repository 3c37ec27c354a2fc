//! Search acquirer
//!
//! Drives a fresh headless browser per query and tracks whether the browser
//! runtime is usable:
//! - `Unknown`: launch and close a browser to check the runtime
//! - `NotInstalled` / `InstallFailed`: try one bootstrap install per call,
//!   then launch once with the installed executables before reporting `Ready`
//! - `Ready`: run the search session
//!
//! A session that fails because the runtime disappeared moves the state back
//! to `NotInstalled`; any other failure leaves it untouched.

use parking_lot::Mutex;
use regex::RegexSet;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use agora_core::{
    default_engine, SearchEngine, SearchHit, DEFAULT_SETTLE_DELAY_MS, MAX_SEARCH_RESULTS,
};

use crate::{
    extract_snippets, BrowserConfig, BrowserError, BrowserLauncher, BrowserSession,
    CommandInstaller, RuntimeInstaller, WebDriverLauncher,
};

/// Availability of the browser runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Unknown,
    Ready,
    NotInstalled,
    InstallFailed,
}

/// Errors from search acquisition, each a single user-facing message
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Please enter a search query")]
    EmptyQuery,

    #[error("Search error: {detail}\n\nPlease run the following command to install the browser runtime:\n\n    {command}\n\nThen restart the application.")]
    RuntimeMissing { detail: String, command: String },

    #[error("The browser runtime is not installed ({reason}). Please run the following command:\n\n    {command}\n\nThen restart the application.")]
    InstallFailed { reason: String, command: String },

    #[error("Search error: {0}")]
    Extraction(String),

    #[error("No search results found for '{query}'")]
    NoResults { query: String },
}

/// Search session configuration
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Engine to drive
    pub engine: &'static SearchEngine,
    /// Fixed wait after submitting the query
    pub settle_delay: Duration,
    /// Maximum result blocks to extract
    pub max_results: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            engine: default_engine(),
            settle_delay: Duration::from_millis(DEFAULT_SETTLE_DELAY_MS),
            max_results: MAX_SEARCH_RESULTS,
        }
    }
}

/// Runs web searches in a headless browser
pub struct SearchAcquirer {
    launcher: Arc<dyn BrowserLauncher>,
    installer: Arc<dyn RuntimeInstaller>,
    config: SearchConfig,
    state: Mutex<RuntimeState>,
}

impl SearchAcquirer {
    pub fn new(
        launcher: Arc<dyn BrowserLauncher>,
        installer: Arc<dyn RuntimeInstaller>,
        config: SearchConfig,
    ) -> Self {
        Self {
            launcher,
            installer,
            config,
            state: Mutex::new(RuntimeState::Unknown),
        }
    }

    /// Acquirer backed by chromedriver and the default install command
    pub fn with_webdriver(browser: BrowserConfig, config: SearchConfig) -> Self {
        Self::new(
            Arc::new(WebDriverLauncher::new(browser)),
            Arc::new(CommandInstaller::default()),
            config,
        )
    }

    /// Current runtime state
    pub fn state(&self) -> RuntimeState {
        *self.state.lock()
    }

    fn set_state(&self, state: RuntimeState) {
        let mut current = self.state.lock();
        if *current != state {
            debug!("Browser runtime state {:?} -> {:?}", *current, state);
            *current = state;
        }
    }

    /// Command a user can run to install the runtime by hand
    pub fn remediation_command(&self) -> String {
        self.installer.remediation_command()
    }

    /// Engine used for searches
    pub fn engine(&self) -> &'static SearchEngine {
        self.config.engine
    }

    /// Launch and immediately close a browser to learn whether the runtime works
    pub async fn check_runtime(&self) -> RuntimeState {
        let state = match self.check_launch().await {
            Ok(()) => RuntimeState::Ready,
            Err(e) => {
                warn!("Browser runtime check failed: {}", e);
                RuntimeState::NotInstalled
            }
        };

        self.set_state(state);
        state
    }

    async fn check_launch(&self) -> Result<(), BrowserError> {
        let session = self.launcher.launch().await?;
        if let Err(e) = session.close().await {
            warn!("Failed to close check browser: {}", e);
        }
        Ok(())
    }

    async fn ensure_ready(&self) -> Result<(), SearchError> {
        if self.state() == RuntimeState::Unknown {
            self.check_runtime().await;
        }

        match self.state() {
            RuntimeState::Ready => Ok(()),
            _ => self.bootstrap().await,
        }
    }

    /// Install the runtime, then launch it once before trusting it
    async fn bootstrap(&self) -> Result<(), SearchError> {
        info!("Browser runtime missing, attempting installation");

        let outcome = match self.installer.install().await {
            Ok(runtime) => {
                self.launcher.use_runtime(&runtime);
                self.check_launch().await
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => {
                self.set_state(RuntimeState::Ready);
                Ok(())
            }
            Err(e) => {
                warn!("Browser runtime installation failed: {}", e);
                self.set_state(RuntimeState::InstallFailed);
                Err(SearchError::InstallFailed {
                    reason: e.to_string(),
                    command: self.installer.remediation_command(),
                })
            }
        }
    }

    /// Search the web for `query` and return the extracted snippets
    pub async fn acquire(&self, query: &str) -> Result<SearchHit, SearchError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(SearchError::EmptyQuery);
        }

        self.ensure_ready().await?;

        info!("Searching {} for: {}", self.config.engine.name, query);

        let html = match self.run_session(query).await {
            Ok(html) => html,
            Err(e) => {
                let detail = e.to_string();
                if is_runtime_missing(&detail) {
                    self.set_state(RuntimeState::NotInstalled);
                    return Err(SearchError::RuntimeMissing {
                        detail,
                        command: self.installer.remediation_command(),
                    });
                }
                return Err(SearchError::Extraction(detail));
            }
        };

        let snippet_text = extract_snippets(&html, self.config.engine, self.config.max_results)
            .map_err(SearchError::Extraction)?;

        if snippet_text.is_empty() {
            return Err(SearchError::NoResults {
                query: query.to_string(),
            });
        }

        debug!("Extracted {} characters of snippets", snippet_text.len());
        Ok(SearchHit::new(query, snippet_text))
    }

    /// One browser session; the browser is closed on every path
    async fn run_session(&self, query: &str) -> Result<String, BrowserError> {
        let session = self.launcher.launch().await?;

        let outcome = self.search_page(session.as_ref(), query).await;

        if let Err(e) = session.close().await {
            warn!("Failed to close browser: {}", e);
        }

        outcome
    }

    async fn search_page(
        &self,
        session: &dyn BrowserSession,
        query: &str,
    ) -> Result<String, BrowserError> {
        let engine = self.config.engine;

        session.goto(engine.home_url).await?;
        session.fill(engine.input_selector, query).await?;
        session.press_enter(engine.input_selector).await?;

        tokio::time::sleep(self.config.settle_delay).await;

        session.content().await
    }
}

/// Whether an error message says the browser runtime is not installed
pub fn is_runtime_missing(message: &str) -> bool {
    static PATTERNS: OnceLock<RegexSet> = OnceLock::new();

    PATTERNS
        .get_or_init(|| {
            RegexSet::new([
                r"(?i)executable doesn't exist",
                r"(?i)looks like .+ was just installed",
                r"(?i)cannot find (chrome|chromium) binary",
                r"(?i)no chrome binary",
                r"(?i)this version of chromedriver only supports",
            ])
            .expect("runtime patterns are valid regexes")
        })
        .is_match(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InstalledRuntime;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const PAGE: &str = r#"<div class="c-container"><div class="content-right">Rust is a language.</div></div>"#;

    #[derive(Default)]
    struct Counters {
        launches: AtomicUsize,
        closes: AtomicUsize,
        installs: AtomicUsize,
        submits: AtomicUsize,
        dropped_sessions: AtomicUsize,
    }

    struct FakeLauncher {
        installed: Arc<AtomicBool>,
        counters: Arc<Counters>,
        html: String,
        goto_error: Option<String>,
    }

    #[async_trait]
    impl BrowserLauncher for FakeLauncher {
        async fn launch(&self) -> Result<Box<dyn BrowserSession>, BrowserError> {
            self.counters.launches.fetch_add(1, Ordering::SeqCst);
            if !self.installed.load(Ordering::SeqCst) {
                return Err(BrowserError::Launch(
                    "Executable doesn't exist: /fake/chromedriver".to_string(),
                ));
            }
            Ok(Box::new(FakeSession {
                counters: self.counters.clone(),
                html: self.html.clone(),
                goto_error: self.goto_error.clone(),
            }))
        }

        fn use_runtime(&self, runtime: &InstalledRuntime) {
            if runtime.driver_path.is_some() {
                self.installed.store(true, Ordering::SeqCst);
            }
        }
    }

    struct FakeSession {
        counters: Arc<Counters>,
        html: String,
        goto_error: Option<String>,
    }

    #[async_trait]
    impl BrowserSession for FakeSession {
        async fn goto(&self, url: &str) -> Result<(), BrowserError> {
            match &self.goto_error {
                Some(message) => Err(BrowserError::Navigation(format!("{}: {}", url, message))),
                None => Ok(()),
            }
        }

        async fn fill(&self, _selector: &str, _text: &str) -> Result<(), BrowserError> {
            Ok(())
        }

        async fn press_enter(&self, _selector: &str) -> Result<(), BrowserError> {
            self.counters.submits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn content(&self) -> Result<String, BrowserError> {
            Ok(self.html.clone())
        }

        async fn close(self: Box<Self>) -> Result<(), BrowserError> {
            self.counters.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl Drop for FakeSession {
        fn drop(&mut self) {
            self.counters.dropped_sessions.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Clone, Copy)]
    enum Install {
        /// Reports a usable driver
        Works,
        /// Exits cleanly but leaves nothing the launcher can use
        NoEffect,
        /// Exits with an error
        Fails,
    }

    struct FakeInstaller {
        install: Install,
        counters: Arc<Counters>,
    }

    #[async_trait]
    impl RuntimeInstaller for FakeInstaller {
        async fn install(&self) -> Result<InstalledRuntime, BrowserError> {
            self.counters.installs.fetch_add(1, Ordering::SeqCst);
            match self.install {
                Install::Works => Ok(InstalledRuntime {
                    driver_path: Some("/fake/cache/chromedriver".into()),
                    browser_binary: Some("/fake/cache/chrome".into()),
                }),
                Install::NoEffect => Ok(InstalledRuntime::default()),
                Install::Fails => Err(BrowserError::Install("download failed".to_string())),
            }
        }

        fn remediation_command(&self) -> String {
            "fake-install chromium".to_string()
        }
    }

    struct Harness {
        acquirer: SearchAcquirer,
        installed: Arc<AtomicBool>,
        counters: Arc<Counters>,
    }

    fn harness(installed: bool, install: Install, html: &str, goto_error: Option<&str>) -> Harness {
        harness_with(installed, install, html, goto_error, Duration::ZERO)
    }

    fn harness_with(
        installed: bool,
        install: Install,
        html: &str,
        goto_error: Option<&str>,
        settle_delay: Duration,
    ) -> Harness {
        let installed = Arc::new(AtomicBool::new(installed));
        let counters = Arc::new(Counters::default());

        let launcher = FakeLauncher {
            installed: installed.clone(),
            counters: counters.clone(),
            html: html.to_string(),
            goto_error: goto_error.map(str::to_string),
        };
        let installer = FakeInstaller {
            install,
            counters: counters.clone(),
        };
        let config = SearchConfig {
            settle_delay,
            ..Default::default()
        };

        Harness {
            acquirer: SearchAcquirer::new(Arc::new(launcher), Arc::new(installer), config),
            installed,
            counters,
        }
    }

    #[tokio::test]
    async fn test_successful_search() {
        let h = harness(true, Install::Works, PAGE, None);

        let hit = h.acquirer.acquire("  test ").await.unwrap();

        assert_eq!(hit.query, "test");
        assert_eq!(hit.snippet_text, "Rust is a language.");
        assert_eq!(h.acquirer.state(), RuntimeState::Ready);
        // check + session, both closed
        assert_eq!(h.counters.launches.load(Ordering::SeqCst), 2);
        assert_eq!(h.counters.closes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_query() {
        let h = harness(true, Install::Works, PAGE, None);

        let err = h.acquirer.acquire("   ").await.unwrap_err();

        assert!(matches!(err, SearchError::EmptyQuery));
        assert_eq!(h.counters.launches.load(Ordering::SeqCst), 0);
        assert_eq!(h.acquirer.state(), RuntimeState::Unknown);
    }

    #[tokio::test]
    async fn test_bootstrap_then_search() {
        let h = harness(false, Install::Works, PAGE, None);

        let first = h.acquirer.acquire("test").await;
        assert!(first.is_ok());
        assert_eq!(h.counters.installs.load(Ordering::SeqCst), 1);
        assert!(h.installed.load(Ordering::SeqCst));

        let second = h.acquirer.acquire("test").await.unwrap();
        assert_eq!(second.query, "test");
        assert_eq!(h.counters.installs.load(Ordering::SeqCst), 1);
        assert_eq!(h.acquirer.state(), RuntimeState::Ready);
    }

    #[tokio::test]
    async fn test_bootstrap_failure_carries_command() {
        let h = harness(false, Install::Fails, PAGE, None);

        let err = h.acquirer.acquire("test").await.unwrap_err();

        assert!(matches!(err, SearchError::InstallFailed { .. }));
        assert!(err.to_string().contains("fake-install chromium"));
        assert_eq!(h.acquirer.state(), RuntimeState::InstallFailed);

        // InstallFailed is retried on the next call
        let _ = h.acquirer.acquire("test").await;
        assert_eq!(h.counters.installs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_install_without_usable_runtime_is_not_ready() {
        let h = harness(false, Install::NoEffect, PAGE, None);

        let err = h.acquirer.acquire("test").await.unwrap_err();

        assert!(matches!(err, SearchError::InstallFailed { .. }));
        assert!(err.to_string().contains("fake-install chromium"));
        assert!(err.to_string().contains("Executable doesn't exist"));
        assert_eq!(h.acquirer.state(), RuntimeState::InstallFailed);
        // first check + post-install check, no search session
        assert_eq!(h.counters.launches.load(Ordering::SeqCst), 2);
        assert_eq!(h.counters.submits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancelled_search_drops_browser() {
        let h = harness_with(true, Install::Works, PAGE, None, Duration::from_secs(30));
        let acquirer = Arc::new(h.acquirer);

        let running = acquirer.clone();
        let task = tokio::spawn(async move { running.acquire("test").await });

        tokio::time::timeout(Duration::from_secs(5), async {
            while h.counters.submits.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        // Only the check browser has gone so far
        assert_eq!(h.counters.dropped_sessions.load(Ordering::SeqCst), 1);

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        assert_eq!(h.counters.dropped_sessions.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_runtime_lost_during_session() {
        let h = harness(true, Install::Works, PAGE, None);
        assert_eq!(h.acquirer.check_runtime().await, RuntimeState::Ready);

        h.installed.store(false, Ordering::SeqCst);
        let err = h.acquirer.acquire("test").await.unwrap_err();

        assert!(matches!(err, SearchError::RuntimeMissing { .. }));
        assert!(err.to_string().contains("fake-install chromium"));
        assert_eq!(h.acquirer.state(), RuntimeState::NotInstalled);
    }

    #[tokio::test]
    async fn test_navigation_failure_closes_browser() {
        let h = harness(true, Install::Works, PAGE, Some("net::ERR_NAME_NOT_RESOLVED"));

        let err = h.acquirer.acquire("test").await.unwrap_err();

        assert!(matches!(err, SearchError::Extraction(_)));
        assert_eq!(h.acquirer.state(), RuntimeState::Ready);
        assert_eq!(
            h.counters.launches.load(Ordering::SeqCst),
            h.counters.closes.load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn test_no_results() {
        let h = harness(true, Install::Works, "<html><body></body></html>", None);

        let err = h.acquirer.acquire("obscure").await.unwrap_err();
        assert!(matches!(err, SearchError::NoResults { ref query } if query == "obscure"));
    }

    #[test]
    fn test_is_runtime_missing() {
        assert!(is_runtime_missing("Executable doesn't exist at /root/.cache/chrome"));
        assert!(is_runtime_missing("session not created: unknown error: cannot find Chrome binary"));
        assert!(is_runtime_missing("session not created: This version of ChromeDriver only supports Chrome version 120"));
        assert!(!is_runtime_missing("Navigation failed: timeout"));
    }
}
