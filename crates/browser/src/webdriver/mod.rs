//! [`BrowserBackend`] over the W3C WebDriver protocol.
//!
//! WebDriver has no isolated browser contexts, so a context here is the
//! session's window geometry and a page is a dedicated tab.

mod capabilities;
mod client;
mod service;

use std::time::Duration;

use async_trait::async_trait;
use bdd_core::{BrowserKind, Locator, WaitUntil};
use serde_json::Value;
use tokio::time::Instant;

pub use client::WebDriverClient;
pub use service::{DriverConfig, DriverService};

use crate::backend::{BrowserBackend, ContextOptions, LaunchOptions};
use crate::error::{BrowserError, Result};
use crate::flags::SessionFlags;

const ELEMENT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const READY_STATE_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// How long resource activity must stay flat to count as network idle.
const NETWORK_IDLE_WINDOW: Duration = Duration::from_millis(500);

const RESPONSE_STATUS_SCRIPT: &str = "const entry = performance.getEntriesByType('navigation')[0]; \
     return entry && entry.responseStatus ? entry.responseStatus : null;";
const READY_STATE_SCRIPT: &str = "return document.readyState;";
const RESOURCE_COUNT_SCRIPT: &str = "return performance.getEntriesByType('resource').length;";
const BODY_TEXT_SCRIPT: &str = "return document.body ? document.body.innerText : '';";

pub struct WebDriverBackend {
    service: DriverService,
    client: WebDriverClient,
    flags: SessionFlags,
    launched: Option<LaunchOptions>,
    page: Option<String>,
}

impl WebDriverBackend {
    pub fn new(config: DriverConfig, browser: BrowserKind) -> Self {
        let flags = SessionFlags::new();
        let service = DriverService::new(config, browser);
        let client = WebDriverClient::new(service.url(), flags.clone());

        Self {
            service,
            client,
            flags,
            launched: None,
            page: None,
        }
    }

    pub fn client(&self) -> &WebDriverClient {
        &self.client
    }

    async fn first_element(&self, target: &Locator) -> Result<Option<String>> {
        Ok(self.client.find_elements(target).await?.into_iter().next())
    }

    /// Polls until `target` resolves or the deadline passes.
    async fn wait_for_element(&self, target: &Locator, timeout: Duration) -> Result<String> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(element) = self.first_element(target).await? {
                return Ok(element);
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::ElementNotFound(format!(
                    "{} not found within {}ms",
                    target,
                    timeout.as_millis()
                )));
            }
            tokio::time::sleep(ELEMENT_POLL_INTERVAL).await;
        }
    }

    async fn wait_for_ready_state(&self, wait_until: WaitUntil, deadline: Instant) -> Result<()> {
        if wait_until == WaitUntil::DomContentLoaded {
            // The session's eager load strategy already waited for this.
            return Ok(());
        }

        loop {
            let state = self.client.execute(READY_STATE_SCRIPT, Vec::new()).await?;
            if state.as_str() == Some("complete") {
                break;
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::Timeout(format!(
                    "document did not reach '{}'",
                    wait_until.as_str()
                )));
            }
            tokio::time::sleep(READY_STATE_POLL_INTERVAL).await;
        }

        if wait_until == WaitUntil::NetworkIdle {
            self.wait_for_network_idle(deadline).await?;
        }
        Ok(())
    }

    async fn wait_for_network_idle(&self, deadline: Instant) -> Result<()> {
        let mut last = self.resource_count().await?;
        loop {
            if Instant::now() + NETWORK_IDLE_WINDOW > deadline {
                return Err(BrowserError::Timeout("network did not become idle".to_string()));
            }
            tokio::time::sleep(NETWORK_IDLE_WINDOW).await;
            let current = self.resource_count().await?;
            if current == last {
                return Ok(());
            }
            last = current;
        }
    }

    async fn resource_count(&self) -> Result<u64> {
        let value = self.client.execute(RESOURCE_COUNT_SCRIPT, Vec::new()).await?;
        Ok(value.as_u64().unwrap_or(0))
    }

    async fn response_status(&self) -> Option<u16> {
        match self.client.execute(RESPONSE_STATUS_SCRIPT, Vec::new()).await {
            Ok(Value::Number(n)) => n.as_u64().and_then(|code| u16::try_from(code).ok()),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!(error = %e, "Response status unavailable");
                None
            }
        }
    }
}

#[async_trait]
impl BrowserBackend for WebDriverBackend {
    async fn start(&mut self, timeout: Duration) -> Result<()> {
        self.service.start(&self.client, timeout).await
    }

    async fn launch(&mut self, options: &LaunchOptions) -> Result<()> {
        if self.client.session_id().is_some() {
            tracing::debug!("Replacing existing browser session");
            if let Err(e) = self.client.delete_session().await {
                tracing::debug!(error = %e, "Previous session already gone");
            }
            self.page = None;
        }

        let capabilities = capabilities::session_capabilities(options);
        let session_id = self.client.new_session(capabilities).await?;
        tracing::info!(
            session_id = %session_id,
            browser = options.browser.as_str(),
            headless = options.headless,
            "Browser launched"
        );

        self.launched = Some(options.clone());
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        if self.client.session_id().is_none() {
            return false;
        }
        self.client.current_window().await.is_ok() && self.flags.is_connected()
    }

    async fn new_context(&mut self, options: &ContextOptions) -> Result<()> {
        let launched_insecure = self
            .launched
            .as_ref()
            .map(|l| l.accept_insecure_certs)
            .unwrap_or(false);
        if options.ignore_https_errors && !launched_insecure {
            tracing::warn!("Certificate relaxation must be requested at launch; ignoring");
        }

        self.client
            .set_window_rect(options.viewport.width, options.viewport.height)
            .await
    }

    async fn new_page(&mut self, default_timeout: Duration) -> Result<()> {
        let handle = self.client.new_window().await?;
        self.client.switch_to_window(&handle).await?;
        self.client
            .set_timeouts(default_timeout, default_timeout)
            .await?;
        self.page = Some(handle);
        Ok(())
    }

    fn flags(&self) -> SessionFlags {
        self.flags.clone()
    }

    async fn close_page(&mut self) -> Result<()> {
        let Some(_handle) = self.page.take() else {
            return Ok(());
        };
        self.flags.mark_closed();

        let remaining = self.client.close_window().await?;
        if let Some(handle) = remaining.first() {
            self.client.switch_to_window(handle).await?;
        }
        Ok(())
    }

    async fn close_context(&mut self) -> Result<()> {
        // Nothing to tear down beyond the page; geometry dies with the session.
        Ok(())
    }

    async fn close_browser(&mut self) -> Result<()> {
        self.page = None;
        self.launched = None;
        self.client.delete_session().await
    }

    async fn stop(&mut self) -> Result<()> {
        self.service.stop();
        Ok(())
    }

    async fn goto(
        &self,
        url: &str,
        wait_until: WaitUntil,
        timeout: Duration,
    ) -> Result<Option<u16>> {
        let deadline = Instant::now() + timeout;
        self.client.set_timeouts(timeout, timeout).await?;
        self.client.navigate(url, timeout).await?;
        self.wait_for_ready_state(wait_until, deadline).await?;
        Ok(self.response_status().await)
    }

    async fn click(&self, target: &Locator, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let element = self.wait_for_element(target, timeout).await?;
        loop {
            match self.client.element_click(&element).await {
                Err(BrowserError::NotInteractable(_)) if Instant::now() < deadline => {
                    tokio::time::sleep(ELEMENT_POLL_INTERVAL).await;
                }
                other => return other,
            }
        }
    }

    async fn fill(&self, target: &Locator, value: &str, timeout: Duration) -> Result<()> {
        let element = self.wait_for_element(target, timeout).await?;
        self.client.element_clear(&element).await?;
        self.client.element_send_keys(&element, value).await
    }

    async fn count(&self, target: &Locator) -> Result<usize> {
        Ok(self.client.find_elements(target).await?.len())
    }

    async fn is_visible(&self, target: &Locator) -> Result<bool> {
        match self.first_element(target).await? {
            Some(element) => self.client.element_displayed(&element).await,
            None => Ok(false),
        }
    }

    async fn text_content(&self, target: Option<&Locator>) -> Result<String> {
        let Some(target) = target else {
            let value = self.client.execute(BODY_TEXT_SCRIPT, Vec::new()).await?;
            return Ok(value.as_str().unwrap_or_default().to_string());
        };

        let element = self
            .first_element(target)
            .await?
            .ok_or_else(|| BrowserError::ElementNotFound(target.to_string()))?;
        self.client.element_text(&element).await
    }

    async fn current_url(&self) -> Result<String> {
        self.client.current_url().await
    }
}
