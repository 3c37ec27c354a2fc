//! Browser runtime bootstrap
//!
//! When the browser runtime is missing, the acquirer tries one automatic
//! install before giving up with the remediation command. The default
//! installer fetches Chrome and a matching chromedriver into a local cache
//! with `@puppeteer/browsers` and reports where they landed.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::BrowserError;

/// Executables produced by an installation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstalledRuntime {
    pub driver_path: Option<PathBuf>,
    pub browser_binary: Option<PathBuf>,
}

impl InstalledRuntime {
    /// Record one `<browser>@<build> <path>` line printed by the installer
    fn record_line(&mut self, line: &str) {
        let Some((spec, path)) = line.trim().split_once(char::is_whitespace) else {
            return;
        };
        let Some((browser, _build)) = spec.split_once('@') else {
            return;
        };
        let path = PathBuf::from(path.trim());

        match browser {
            "chromedriver" => self.driver_path = Some(path),
            "chrome" | "chromium" | "chrome-headless-shell" => self.browser_binary = Some(path),
            _ => {}
        }
    }

    fn merge(&mut self, other: InstalledRuntime) {
        if other.driver_path.is_some() {
            self.driver_path = other.driver_path;
        }
        if other.browser_binary.is_some() {
            self.browser_binary = other.browser_binary;
        }
    }
}

/// Parse installer output into the executables it reports
pub fn parse_install_output(stdout: &str) -> InstalledRuntime {
    let mut runtime = InstalledRuntime::default();
    for line in stdout.lines() {
        runtime.record_line(line);
    }
    runtime
}

/// Installs the browser runtime
#[async_trait]
pub trait RuntimeInstaller: Send + Sync {
    /// Attempt the installation
    async fn install(&self) -> Result<InstalledRuntime, BrowserError>;

    /// Exact command a user can run to install by hand
    fn remediation_command(&self) -> String;
}

#[derive(Debug, Clone)]
struct InstallStep {
    program: String,
    args: Vec<String>,
}

impl InstallStep {
    fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Runs install commands as child processes, in order
#[derive(Debug, Clone)]
pub struct CommandInstaller {
    steps: Vec<InstallStep>,
}

impl Default for CommandInstaller {
    fn default() -> Self {
        Self::puppeteer_browsers(&default_cache_dir())
    }
}

impl CommandInstaller {
    pub fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { steps: Vec::new() }.then(program, args)
    }

    /// Run another command after the previous ones succeed
    pub fn then<I, S>(mut self, program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.steps.push(InstallStep {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Chrome and chromedriver from the stable channel, installed under `cache_dir`
    pub fn puppeteer_browsers(cache_dir: &Path) -> Self {
        let path = cache_dir.display().to_string();
        let install = |browser: &str| {
            vec![
                "--yes".to_string(),
                "@puppeteer/browsers".to_string(),
                "install".to_string(),
                browser.to_string(),
                "--path".to_string(),
                path.clone(),
            ]
        };

        Self::new("npx", install("chrome@stable")).then("npx", install("chromedriver@stable"))
    }

    async fn run_step(&self, step: &InstallStep) -> Result<InstalledRuntime, BrowserError> {
        debug!("Running {}", step.command_line());

        let output = Command::new(&step.program)
            .args(&step.args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| BrowserError::Install(format!("{}: {}", step.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("Browser runtime install exited with {}", output.status);
            return Err(BrowserError::Install(format!(
                "{} ({})",
                output.status,
                stderr.trim()
            )));
        }

        Ok(parse_install_output(&String::from_utf8_lossy(&output.stdout)))
    }
}

#[async_trait]
impl RuntimeInstaller for CommandInstaller {
    async fn install(&self) -> Result<InstalledRuntime, BrowserError> {
        info!("Installing browser runtime: {}", self.remediation_command());

        let mut runtime = InstalledRuntime::default();
        for step in &self.steps {
            runtime.merge(self.run_step(step).await?);
        }

        info!("Browser runtime installed: {:?}", runtime);
        Ok(runtime)
    }

    fn remediation_command(&self) -> String {
        self.steps
            .iter()
            .map(InstallStep::command_line)
            .collect::<Vec<_>>()
            .join(" && ")
    }
}

/// Per-user cache for downloaded browsers
pub fn default_cache_dir() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".cache").join("agora").join("browsers"),
        None => std::env::temp_dir().join("agora-browsers"),
    }
}
