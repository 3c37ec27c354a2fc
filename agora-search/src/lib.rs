//! Agora Search Layer
//!
//! Web search through a headless browser:
//! - Browser automation boundary and a WebDriver (chromedriver) implementation
//! - Browser runtime bootstrap
//! - Prioritized snippet extraction
//! - Search acquisition with runtime state tracking

pub mod browser;
pub mod webdriver;
pub mod install;
pub mod extract;
pub mod acquirer;

pub use browser::*;
pub use webdriver::*;
pub use install::*;
pub use extract::*;
pub use acquirer::*;
