use std::net::TcpListener;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use bdd_core::BrowserKind;
use tokio::time::Instant;

use super::client::WebDriverClient;
use crate::error::{BrowserError, Result};

const HEALTH_CHECK_TIMEOUT_MS: u64 = 500;
const STARTUP_POLL_INTERVAL_MS: u64 = 250;

/// Where the WebDriver endpoint comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverConfig {
    /// An already running endpoint (`WEBDRIVER_URL`); nothing is spawned.
    pub url: Option<String>,
    /// Explicit driver binary (`WEBDRIVER_BINARY`); otherwise looked up on
    /// `PATH`.
    pub binary: Option<PathBuf>,
}

impl DriverConfig {
    pub fn external(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            binary: None,
        }
    }
}

/// A chromedriver/geckodriver/safaridriver process owned by one session,
/// or a handle on an external endpoint.
pub struct DriverService {
    browser: BrowserKind,
    binary: Option<PathBuf>,
    url: String,
    port: Option<u16>,
    child: Option<Child>,
}

impl DriverService {
    pub fn new(config: DriverConfig, browser: BrowserKind) -> Self {
        let (url, port) = match config.url {
            Some(url) => (url.trim_end_matches('/').to_string(), None),
            None => {
                let port = free_port().unwrap_or_else(|| default_port(browser));
                (format!("http://127.0.0.1:{}", port), Some(port))
            }
        };

        Self {
            browser,
            binary: config.binary,
            url,
            port,
            child: None,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_external(&self) -> bool {
        self.port.is_none()
    }

    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }

    fn find_binary(&self) -> Option<PathBuf> {
        if let Some(ref binary) = self.binary {
            return Some(binary.clone());
        }
        which::which(driver_name(self.browser)).ok()
    }

    /// Brings the endpoint up and waits until it reports ready.
    pub async fn start(&mut self, client: &WebDriverClient, timeout: Duration) -> Result<()> {
        let health_timeout = Duration::from_millis(HEALTH_CHECK_TIMEOUT_MS);

        if client.status(health_timeout).await {
            tracing::debug!(url = %self.url, "WebDriver endpoint already ready");
            return Ok(());
        }

        if let Some(port) = self.port {
            self.spawn(port)?;
        }

        let deadline = Instant::now() + timeout;
        let mut attempt = 0u32;
        while Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(STARTUP_POLL_INTERVAL_MS)).await;
            attempt += 1;

            if client.status(health_timeout).await {
                tracing::info!(url = %self.url, attempt, "WebDriver endpoint ready");
                return Ok(());
            }

            tracing::debug!(url = %self.url, attempt, "WebDriver endpoint not ready yet");
        }

        self.stop();
        Err(BrowserError::StartupTimeout(timeout))
    }

    fn spawn(&mut self, port: u16) -> Result<()> {
        let binary = self.find_binary().ok_or_else(|| {
            BrowserError::DriverNotFound(format!(
                "'{}' is not on PATH; install it or set WEBDRIVER_BINARY",
                driver_name(self.browser)
            ))
        })?;

        tracing::debug!(binary = ?binary, port, "Starting WebDriver");

        let child = Command::new(&binary)
            .args(port_args(self.browser, port))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        self.child = Some(child);
        Ok(())
    }

    /// Kills the driver process if this service spawned one.
    pub fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            tracing::debug!(url = %self.url, "Stopping WebDriver");
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl Drop for DriverService {
    fn drop(&mut self) {
        self.stop();
    }
}

fn driver_name(browser: BrowserKind) -> &'static str {
    match browser {
        BrowserKind::Chromium => "chromedriver",
        BrowserKind::Firefox => "geckodriver",
        BrowserKind::Webkit => "safaridriver",
    }
}

fn default_port(browser: BrowserKind) -> u16 {
    match browser {
        BrowserKind::Chromium => 9515,
        BrowserKind::Firefox => 4444,
        BrowserKind::Webkit => 4445,
    }
}

fn port_args(browser: BrowserKind, port: u16) -> Vec<String> {
    match browser {
        BrowserKind::Chromium => vec![format!("--port={}", port)],
        BrowserKind::Firefox => vec!["--port".to_string(), port.to_string()],
        BrowserKind::Webkit => vec!["-p".to_string(), port.to_string()],
    }
}

/// Asks the OS for an unused local port so concurrent sessions never
/// share a driver.
fn free_port() -> Option<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").ok()?;
    listener.local_addr().ok().map(|addr| addr.port())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::SessionFlags;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_port_args() {
        assert_eq!(port_args(BrowserKind::Chromium, 9000), vec!["--port=9000"]);
        assert_eq!(port_args(BrowserKind::Firefox, 9000), vec!["--port", "9000"]);
        assert_eq!(port_args(BrowserKind::Webkit, 9000), vec!["-p", "9000"]);
    }

    #[test]
    fn test_local_service_gets_own_port() {
        let service = DriverService::new(DriverConfig::default(), BrowserKind::Chromium);
        assert!(!service.is_external());
        assert!(service.url().starts_with("http://127.0.0.1:"));
    }

    #[tokio::test]
    async fn test_start_with_ready_external_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "value": { "ready": true } })),
            )
            .mount(&server)
            .await;

        let mut service = DriverService::new(DriverConfig::external(server.uri()), BrowserKind::Chromium);
        let client = WebDriverClient::new(service.url(), SessionFlags::new());

        service.start(&client, Duration::from_secs(1)).await.unwrap();
        assert!(service.is_external());
        assert!(!service.is_running());
    }

    #[tokio::test]
    async fn test_start_times_out_when_never_ready() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "value": { "ready": false } })),
            )
            .mount(&server)
            .await;

        let mut service = DriverService::new(DriverConfig::external(server.uri()), BrowserKind::Firefox);
        let client = WebDriverClient::new(service.url(), SessionFlags::new());

        let err = service
            .start(&client, Duration::from_millis(600))
            .await
            .unwrap_err();
        assert!(matches!(err, BrowserError::StartupTimeout(_)));
    }

    #[tokio::test]
    async fn test_missing_binary_is_reported() {
        let config = DriverConfig {
            url: None,
            binary: Some(PathBuf::from("/nonexistent/driver-binary")),
        };
        let mut service = DriverService::new(config, BrowserKind::Chromium);
        let client = WebDriverClient::new(service.url(), SessionFlags::new());

        let err = service
            .start(&client, Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(matches!(err, BrowserError::Io(_)));
    }
}
