//! Browser automation boundary
//!
//! The search acquirer depends on this capability set, not on a specific
//! browser driver. `queryAll`/`textContent` are answered from the rendered
//! DOM snapshot returned by [`BrowserSession::content`].

use async_trait::async_trait;
use thiserror::Error;

use crate::InstalledRuntime;

/// Errors from browser automation
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("Failed to launch browser: {0}")]
    Launch(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Browser command failed: {0}")]
    Command(String),

    #[error("Browser runtime installation failed: {0}")]
    Install(String),
}

/// Starts fresh browser instances
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    /// Launch a new headless browser with one blank page
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, BrowserError>;

    /// Use executables from a fresh installation for later launches
    fn use_runtime(&self, _runtime: &InstalledRuntime) {}
}

/// One live browser instance and its page
///
/// Dropping a session without calling [`BrowserSession::close`] must still
/// release the underlying browser process.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Navigate the page to a URL
    async fn goto(&self, url: &str) -> Result<(), BrowserError>;

    /// Replace the value of the element matching `selector`
    async fn fill(&self, selector: &str, text: &str) -> Result<(), BrowserError>;

    /// Press Enter in the element matching `selector`
    async fn press_enter(&self, selector: &str) -> Result<(), BrowserError>;

    /// Serialized DOM of the current page
    async fn content(&self) -> Result<String, BrowserError>;

    /// Close the browser
    async fn close(self: Box<Self>) -> Result<(), BrowserError>;
}
