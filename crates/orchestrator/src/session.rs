//! Browser session lifecycle for one task.
//!
//! [`BrowserSessionManager::acquire`] hands out an owned [`BrowserSession`];
//! the caller must pass it back to [`BrowserSessionManager::release`] on
//! every exit path. Release is idempotent and each teardown stage is
//! attempted even when an earlier one fails.

use std::sync::Arc;
use std::time::Duration;

use bdd_core::RunConfig;
use browser::{
    BrowserBackend, BrowserError, ContextOptions, DriverConfig, LaunchOptions, SessionFlags,
    Viewport, WebDriverBackend,
};
use tracing::{debug, error, info, warn};

use crate::error::{OrchestratorError, Result};

/// Creates one backend per task.
pub trait BackendFactory: Send + Sync {
    fn create(&self, config: &RunConfig) -> Box<dyn BrowserBackend>;
}

/// Backends speaking W3C WebDriver, sharing one endpoint configuration.
#[derive(Debug, Clone, Default)]
pub struct WebDriverFactory {
    driver: DriverConfig,
}

impl WebDriverFactory {
    pub fn new(driver: DriverConfig) -> Self {
        Self { driver }
    }
}

impl BackendFactory for WebDriverFactory {
    fn create(&self, config: &RunConfig) -> Box<dyn BrowserBackend> {
        Box::new(WebDriverBackend::new(self.driver.clone(), config.browser))
    }
}

/// True when a graphical display is reachable for headed browsers.
pub fn display_available() -> bool {
    if !cfg!(target_os = "linux") {
        return true;
    }
    ["DISPLAY", "WAYLAND_DISPLAY"]
        .iter()
        .any(|var| std::env::var(var).map(|v| !v.is_empty()).unwrap_or(false))
}

#[derive(Debug, Clone)]
pub struct SessionPolicy {
    pub startup_timeout: Duration,
    pub launch_attempts: u32,
    pub page_attempts: u32,
    /// Pause before re-verifying the browser after a failed page attempt.
    pub page_settle_delay: Duration,
    pub viewport: Viewport,
    pub ignore_https_errors: bool,
    pub display_probe: fn() -> bool,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            startup_timeout: Duration::from_secs(30),
            launch_attempts: 3,
            page_attempts: 3,
            page_settle_delay: Duration::from_secs(1),
            viewport: Viewport::default(),
            ignore_https_errors: true,
            display_probe: display_available,
        }
    }
}

impl SessionPolicy {
    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn with_page_settle_delay(mut self, delay: Duration) -> Self {
        self.page_settle_delay = delay;
        self
    }

    pub fn with_display_probe(mut self, probe: fn() -> bool) -> Self {
        self.display_probe = probe;
        self
    }
}

/// One browser, context and page owned by a single task.
pub struct BrowserSession {
    task_id: String,
    backend: Option<Box<dyn BrowserBackend>>,
    flags: SessionFlags,
    headless: bool,
    default_timeout: Duration,
}

impl BrowserSession {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// `None` once the session has been released.
    pub fn backend(&self) -> Option<&dyn BrowserBackend> {
        self.backend.as_deref()
    }

    pub fn flags(&self) -> &SessionFlags {
        &self.flags
    }

    /// Headless mode actually in effect, after any forced substitution.
    pub fn headless(&self) -> bool {
        self.headless
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn is_released(&self) -> bool {
        self.backend.is_none()
    }

    /// Why the session cannot be driven, or `None` when it can.
    pub fn unavailable_reason(&self) -> Option<&'static str> {
        if self.backend.is_none() {
            Some("session already released")
        } else if self.flags.is_crashed() {
            Some("browser crashed")
        } else if self.flags.is_closed() {
            Some("page closed")
        } else if !self.flags.is_connected() {
            Some("browser disconnected")
        } else {
            None
        }
    }

    pub fn is_usable(&self) -> bool {
        self.unavailable_reason().is_none()
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        let Some(mut backend) = self.backend.take() else {
            return;
        };

        warn!(task_id = %self.task_id, "Browser session dropped without release");

        let flags = self.flags.clone();
        let task_id = std::mem::take(&mut self.task_id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    teardown(backend.as_mut(), &flags, &task_id).await;
                });
            }
            Err(_) => warn!(task_id = %task_id, "No runtime available for browser cleanup"),
        }
    }
}

#[derive(Clone)]
pub struct BrowserSessionManager {
    factory: Arc<dyn BackendFactory>,
    policy: SessionPolicy,
}

impl BrowserSessionManager {
    pub fn new(factory: Arc<dyn BackendFactory>, policy: SessionPolicy) -> Self {
        Self { factory, policy }
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    pub async fn acquire(&self, task_id: &str, config: &RunConfig) -> Result<BrowserSession> {
        let mut backend = self.factory.create(config);
        let flags = backend.flags();

        let established = self.establish(backend.as_mut(), task_id, config).await;
        match established {
            Ok(headless) => {
                info!(
                    task_id = %task_id,
                    browser = config.browser.as_str(),
                    headless,
                    "Browser session acquired"
                );
                Ok(BrowserSession {
                    task_id: task_id.to_string(),
                    backend: Some(backend),
                    flags,
                    headless,
                    default_timeout: Duration::from_millis(config.timeout_ms),
                })
            }
            Err(e) => {
                error!(task_id = %task_id, error = %e, "Browser session acquisition failed");
                teardown(backend.as_mut(), &flags, task_id).await;
                Err(e)
            }
        }
    }

    /// Runs the acquisition protocol; returns the effective headless mode.
    async fn establish(
        &self,
        backend: &mut dyn BrowserBackend,
        task_id: &str,
        config: &RunConfig,
    ) -> Result<bool> {
        backend
            .start(self.policy.startup_timeout)
            .await
            .map_err(|e| match e {
                BrowserError::StartupTimeout(timeout) => OrchestratorError::StartupTimeout(timeout),
                other => OrchestratorError::session_unavailable(format!(
                    "driver failed to start: {}",
                    other
                )),
            })?;

        let mut headless = config.headless;
        if !headless && !(self.policy.display_probe)() {
            warn!(task_id = %task_id, "No display available, forcing headless mode");
            headless = true;
        }

        let options = LaunchOptions::new(config.browser, headless);
        self.launch_with_retries(backend, task_id, &options).await?;

        let context = self.context_options();
        backend.new_context(&context).await.map_err(|e| {
            OrchestratorError::session_unavailable(format!("context creation failed: {}", e))
        })?;

        let default_timeout = Duration::from_millis(config.timeout_ms);
        let mut last_error = None;
        for attempt in 1..=self.policy.page_attempts {
            if attempt == self.policy.page_attempts && attempt > 1 {
                warn!(task_id = %task_id, attempt, "Relaunching browser headless for page creation");
                headless = true;
                if let Err(e) = self.relaunch_headless(backend, &options, &context).await {
                    warn!(task_id = %task_id, error = %e, "Headless relaunch failed");
                    last_error = Some(e);
                    continue;
                }
            }

            match backend.new_page(default_timeout).await {
                Ok(()) => return Ok(headless),
                Err(e) => {
                    warn!(task_id = %task_id, attempt, error = %e, "Page creation failed");
                    last_error = Some(e);
                }
            }

            if attempt < self.policy.page_attempts {
                tokio::time::sleep(self.policy.page_settle_delay).await;
                let connected = backend.is_connected().await;
                debug!(task_id = %task_id, attempt, connected, "Re-verified browser after page failure");
            }
        }

        Err(OrchestratorError::session_unavailable(format!(
            "page creation failed after {} attempts: {}",
            self.policy.page_attempts,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    async fn launch_with_retries(
        &self,
        backend: &mut dyn BrowserBackend,
        task_id: &str,
        options: &LaunchOptions,
    ) -> Result<()> {
        let mut last_error = String::from("browser not connected after launch");
        for attempt in 1..=self.policy.launch_attempts {
            match backend.launch(options).await {
                Ok(()) if backend.is_connected().await => return Ok(()),
                Ok(()) => {
                    warn!(task_id = %task_id, attempt, "Browser launched but not connected");
                    last_error = String::from("browser not connected after launch");
                }
                Err(e) => {
                    warn!(task_id = %task_id, attempt, error = %e, "Browser launch failed");
                    last_error = e.to_string();
                }
            }
        }

        Err(OrchestratorError::session_unavailable(format!(
            "launch failed after {} attempts: {}",
            self.policy.launch_attempts, last_error
        )))
    }

    async fn relaunch_headless(
        &self,
        backend: &mut dyn BrowserBackend,
        options: &LaunchOptions,
        context: &ContextOptions,
    ) -> std::result::Result<(), BrowserError> {
        if let Err(e) = backend.close_browser().await {
            debug!(error = %e, "Closing browser before relaunch failed");
        }
        backend.launch(&options.clone().headless(true)).await?;
        backend.new_context(context).await
    }

    fn context_options(&self) -> ContextOptions {
        ContextOptions {
            viewport: self.policy.viewport,
            ignore_https_errors: self.policy.ignore_https_errors,
        }
    }

    /// Tears the session down. Safe to call repeatedly.
    pub async fn release(&self, session: &mut BrowserSession) {
        let Some(mut backend) = session.backend.take() else {
            debug!(task_id = %session.task_id, "Browser session already released");
            return;
        };

        teardown(backend.as_mut(), &session.flags, &session.task_id).await;
        info!(task_id = %session.task_id, "Browser session released");
    }
}

/// Closes page, context and browser, then stops the driver. Every stage
/// runs regardless of earlier failures.
async fn teardown(backend: &mut dyn BrowserBackend, flags: &SessionFlags, task_id: &str) {
    if !flags.is_closed() {
        if let Err(e) = backend.close_page().await {
            warn!(task_id = %task_id, error = %e, "Closing page failed");
        }
    }

    if let Err(e) = backend.close_context().await {
        warn!(task_id = %task_id, error = %e, "Closing context failed");
    }

    if backend.is_connected().await {
        if let Err(e) = backend.close_browser().await {
            warn!(task_id = %task_id, error = %e, "Closing browser failed");
        }
    }

    if let Err(e) = backend.stop().await {
        warn!(task_id = %task_id, error = %e, "Stopping driver failed");
    }

    flags.mark_closed();
    flags.mark_disconnected();
}
