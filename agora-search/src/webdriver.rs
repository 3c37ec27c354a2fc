//! WebDriver-backed headless Chrome
//!
//! Every launch spawns its own `chromedriver` on a free local port and opens
//! one Chrome session through it. Closing or dropping the session deletes it
//! first and only then kills the driver, so Chrome is not left behind.

use async_trait::async_trait;
use fantoccini::{elements::Element, Client, ClientBuilder, Locator};
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use std::future::Future;
use std::net::TcpListener;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::{BrowserError, BrowserLauncher, BrowserSession, InstalledRuntime};

/// WebDriver code point for the Enter key
const ENTER_KEY: char = '\u{E007}';

/// Browser configuration
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    /// chromedriver executable (looked up on PATH when not absolute)
    pub driver_path: String,
    /// Chrome binary, when not in the driver's default location
    pub chrome_binary: Option<String>,
    /// Run without a window
    pub headless: bool,
    /// How long to wait for the driver to accept a session
    pub startup_timeout_secs: u64,
    /// Send a random desktop user agent
    pub rotate_user_agent: bool,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            driver_path: "chromedriver".to_string(),
            chrome_binary: None,
            headless: true,
            startup_timeout_secs: 10,
            rotate_user_agent: true,
        }
    }
}

/// User agents for rotation
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36",
];

/// Get a random user agent
pub fn random_user_agent() -> &'static str {
    use rand::Rng;
    let idx = rand::thread_rng().gen_range(0..USER_AGENTS.len());
    USER_AGENTS[idx]
}

/// Launches headless Chrome through chromedriver
pub struct WebDriverLauncher {
    config: RwLock<BrowserConfig>,
}

impl WebDriverLauncher {
    pub fn new(config: BrowserConfig) -> Self {
        Self {
            config: RwLock::new(config),
        }
    }

    /// Configuration used for the next launch
    pub fn config(&self) -> BrowserConfig {
        self.config.read().clone()
    }

    fn spawn_driver(config: &BrowserConfig, port: u16) -> Result<Child, BrowserError> {
        Command::new(&config.driver_path)
            .arg(format!("--port={}", port))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => BrowserError::Launch(format!(
                    "Executable doesn't exist: {}",
                    config.driver_path
                )),
                _ => BrowserError::Launch(format!("{}: {}", config.driver_path, e)),
            })
    }

    /// Open a session, retrying while the driver is still starting up
    async fn connect(config: &BrowserConfig, url: &str) -> Result<Client, BrowserError> {
        let deadline = Instant::now() + Duration::from_secs(config.startup_timeout_secs);

        loop {
            let mut builder =
                ClientBuilder::rustls().map_err(|e| BrowserError::Launch(e.to_string()))?;
            builder.capabilities(capabilities(config));

            match builder.connect(url).await {
                Ok(client) => return Ok(client),
                Err(e) => {
                    let message = e.to_string();
                    if !is_connect_error(&message) || Instant::now() >= deadline {
                        return Err(BrowserError::Launch(message));
                    }
                    debug!("Waiting for WebDriver at {}: {}", url, message);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
}

/// Session capabilities for headless Chrome
fn capabilities(config: &BrowserConfig) -> Map<String, Value> {
    let mut args = vec![
        "--disable-gpu".to_string(),
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
    ];
    if config.headless {
        args.push("--headless=new".to_string());
    }
    if config.rotate_user_agent {
        args.push(format!("--user-agent={}", random_user_agent()));
    }

    let mut chrome = json!({ "args": args });
    if let Some(binary) = &config.chrome_binary {
        chrome["binary"] = json!(binary);
    }

    let mut caps = Map::new();
    caps.insert("browserName".to_string(), json!("chrome"));
    caps.insert("goog:chromeOptions".to_string(), chrome);
    caps
}

#[async_trait]
impl BrowserLauncher for WebDriverLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, BrowserError> {
        let config = self.config();
        let port = free_port()?;
        let driver = Self::spawn_driver(&config, port)?;
        let url = format!("http://127.0.0.1:{}", port);

        debug!("Started {} on port {}", config.driver_path, port);

        // The driver is killed on drop if the session cannot be opened
        let client = Self::connect(&config, &url).await?;

        Ok(Box::new(WebDriverSession {
            client,
            driver: Some(driver),
        }))
    }

    fn use_runtime(&self, runtime: &InstalledRuntime) {
        let mut config = self.config.write();
        if let Some(path) = &runtime.driver_path {
            config.driver_path = path.display().to_string();
        }
        if let Some(path) = &runtime.browser_binary {
            config.chrome_binary = Some(path.display().to_string());
        }
        info!(
            "Using chromedriver {} with browser {:?}",
            config.driver_path, config.chrome_binary
        );
    }
}

/// A Chrome session and the driver process serving it
///
/// `driver` is `None` once the session has been ended.
struct WebDriverSession {
    client: Client,
    driver: Option<Child>,
}

impl WebDriverSession {
    async fn find(&self, selector: &str) -> Result<Element, BrowserError> {
        self.client
            .find(Locator::Css(selector))
            .await
            .map_err(|e| BrowserError::ElementNotFound(format!("{}: {}", selector, e)))
    }
}

#[async_trait]
impl BrowserSession for WebDriverSession {
    async fn goto(&self, url: &str) -> Result<(), BrowserError> {
        self.client
            .goto(url)
            .await
            .map_err(|e| BrowserError::Navigation(format!("{}: {}", url, e)))
    }

    async fn fill(&self, selector: &str, text: &str) -> Result<(), BrowserError> {
        let element = self.find(selector).await?;
        element
            .clear()
            .await
            .map_err(|e| BrowserError::Command(e.to_string()))?;
        element
            .send_keys(text)
            .await
            .map_err(|e| BrowserError::Command(e.to_string()))
    }

    async fn press_enter(&self, selector: &str) -> Result<(), BrowserError> {
        let element = self.find(selector).await?;
        element
            .send_keys(&ENTER_KEY.to_string())
            .await
            .map_err(|e| BrowserError::Command(e.to_string()))
    }

    async fn content(&self) -> Result<String, BrowserError> {
        self.client
            .source()
            .await
            .map_err(|e| BrowserError::Command(e.to_string()))
    }

    async fn close(mut self: Box<Self>) -> Result<(), BrowserError> {
        let driver = self.driver.take();
        end_session(self.client.clone().close(), driver).await
    }
}

impl Drop for WebDriverSession {
    fn drop(&mut self) {
        let Some(driver) = self.driver.take() else {
            return;
        };

        // Without a runtime the driver is still killed on drop, leaving Chrome to exit on its own
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let client = self.client.clone();
            handle.spawn(async move {
                if let Err(e) = end_session(client.close(), Some(driver)).await {
                    debug!("Abandoned browser session: {}", e);
                }
            });
        }
    }
}

/// Delete the WebDriver session, then stop the driver that served it
async fn end_session<F, E>(close: F, driver: Option<Child>) -> Result<(), BrowserError>
where
    F: Future<Output = Result<(), E>>,
    E: std::fmt::Display,
{
    let closed = close
        .await
        .map_err(|e| BrowserError::Command(e.to_string()));

    if let Some(mut driver) = driver {
        if let Err(e) = driver.kill().await {
            warn!("Failed to stop chromedriver: {}", e);
        }
    }

    closed
}

/// Ask the OS for an unused local port
fn free_port() -> Result<u16, BrowserError> {
    let listener = TcpListener::bind(("127.0.0.1", 0))
        .map_err(|e| BrowserError::Launch(format!("no free port: {}", e)))?;
    listener
        .local_addr()
        .map(|addr| addr.port())
        .map_err(|e| BrowserError::Launch(format!("no free port: {}", e)))
}

/// Whether a session error means the driver is not listening yet
fn is_connect_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    !lower.contains("session not created") && lower.contains("connect")
}
