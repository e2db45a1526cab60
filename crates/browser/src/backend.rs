//! The seam between session management and a concrete remote-control
//! protocol.
//!
//! A [`BrowserBackend`] drives exactly one browser for one task. Lifecycle
//! methods take `&mut self`; page operations only read through `&self`.

use std::time::Duration;

use async_trait::async_trait;
use bdd_core::{BrowserKind, Locator, WaitUntil};

use crate::error::Result;
use crate::flags::SessionFlags;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOptions {
    pub browser: BrowserKind,
    pub headless: bool,
    /// Accept self-signed and otherwise invalid certificates.
    pub accept_insecure_certs: bool,
    /// Extra arguments appended after the platform defaults.
    pub extra_args: Vec<String>,
}

impl LaunchOptions {
    pub fn new(browser: BrowserKind, headless: bool) -> Self {
        Self {
            browser,
            headless,
            accept_insecure_certs: true,
            extra_args: Vec::new(),
        }
    }

    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContextOptions {
    pub viewport: Viewport,
    pub ignore_https_errors: bool,
}

#[async_trait]
pub trait BrowserBackend: Send + Sync {
    /// Starts the remote-control subsystem, failing with
    /// `StartupTimeout` once `timeout` elapses.
    async fn start(&mut self, timeout: Duration) -> Result<()>;

    async fn launch(&mut self, options: &LaunchOptions) -> Result<()>;

    /// Actively probes the browser; also refreshes the shared flags.
    async fn is_connected(&self) -> bool;

    async fn new_context(&mut self, options: &ContextOptions) -> Result<()>;

    async fn new_page(&mut self, default_timeout: Duration) -> Result<()>;

    /// Hooks updated by the backend whenever it observes a disconnect,
    /// crash or close.
    fn flags(&self) -> SessionFlags;

    async fn close_page(&mut self) -> Result<()>;

    async fn close_context(&mut self) -> Result<()>;

    async fn close_browser(&mut self) -> Result<()>;

    async fn stop(&mut self) -> Result<()>;

    /// Navigates and returns the main document's HTTP status when the
    /// browser exposes it.
    async fn goto(&self, url: &str, wait_until: WaitUntil, timeout: Duration)
        -> Result<Option<u16>>;

    async fn click(&self, target: &Locator, timeout: Duration) -> Result<()>;

    async fn fill(&self, target: &Locator, value: &str, timeout: Duration) -> Result<()>;

    async fn count(&self, target: &Locator) -> Result<usize>;

    async fn is_visible(&self, target: &Locator) -> Result<bool>;

    /// Text of the first match, or of the whole document when `target`
    /// is `None`.
    async fn text_content(&self, target: Option<&Locator>) -> Result<String>;

    async fn current_url(&self) -> Result<String>;
}
