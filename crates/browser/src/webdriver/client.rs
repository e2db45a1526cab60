//! Minimal W3C WebDriver wire client.
//!
//! Every failed command is reported to the shared [`SessionFlags`] before
//! it is returned, so the owning session sees crashes and closes without
//! polling.

use std::sync::Mutex;
use std::time::Duration;

use bdd_core::Locator;
use reqwest::{Client, Method};
use serde_json::{json, Value};
use tracing::debug;

use super::capabilities::locator_using;
use crate::error::{BrowserError, Result};
use crate::flags::SessionFlags;

/// Key under which W3C drivers return element references.
const ELEMENT_KEY: &str = "element-6066-11e4-a07c-4f9f4f3b7ed6";

/// Headroom added on top of a command's own timeout before the HTTP call
/// itself is abandoned.
const REQUEST_GRACE: Duration = Duration::from_secs(10);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub struct WebDriverClient {
    http: Client,
    base_url: String,
    session_id: Mutex<Option<String>>,
    flags: SessionFlags,
}

impl WebDriverClient {
    pub fn new(base_url: &str, flags: SessionFlags) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            session_id: Mutex::new(None),
            flags,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().ok().and_then(|guard| guard.clone())
    }

    fn set_session_id(&self, id: Option<String>) {
        if let Ok(mut guard) = self.session_id.lock() {
            *guard = id;
        }
    }

    fn session_path(&self, suffix: &str) -> Result<String> {
        let id = self.session_id().ok_or(BrowserError::NoSession)?;
        Ok(format!("/session/{}{}", id, suffix))
    }

    /// `GET /status`; true once the driver reports it can create sessions.
    pub async fn status(&self, timeout: Duration) -> bool {
        let url = format!("{}/status", self.base_url);
        let Ok(response) = self.http.get(&url).timeout(timeout).send().await else {
            return false;
        };
        let Ok(body) = response.json::<Value>().await else {
            return false;
        };
        body["value"]["ready"].as_bool().unwrap_or(false)
    }

    async fn command(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        let result = self.send(method, path, body, timeout).await;
        if let Err(ref e) = result {
            self.flags.observe(e);
        }
        result
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        debug!(method = %method, url = %url, "WebDriver command");

        let mut request = self.http.request(method, &url).timeout(timeout);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                BrowserError::Timeout(format!("{} did not answer within {:?}", path, timeout))
            } else if e.is_connect() {
                BrowserError::Disconnected(e.to_string())
            } else {
                BrowserError::Http(e)
            }
        })?;

        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| BrowserError::InvalidResponse(e.to_string()))?;
        let value = payload.get("value").cloned().unwrap_or(Value::Null);

        if status.is_success() {
            return Ok(value);
        }

        let code = value["error"].as_str().unwrap_or("unknown error");
        let message = value["message"].as_str().unwrap_or_default();
        Err(BrowserError::from_wire(code, message))
    }

    pub async fn new_session(&self, capabilities: Value) -> Result<String> {
        let value = self
            .command(Method::POST, "/session", Some(capabilities), DEFAULT_REQUEST_TIMEOUT)
            .await
            .map_err(|e| match e {
                BrowserError::Protocol { message, .. } => BrowserError::LaunchFailed(message),
                other => other,
            })?;

        let id = value["sessionId"]
            .as_str()
            .ok_or_else(|| BrowserError::InvalidResponse("missing sessionId".to_string()))?
            .to_string();

        self.set_session_id(Some(id.clone()));
        self.flags.mark_connected();
        Ok(id)
    }

    /// Ends the session; a no-op when none is active.
    pub async fn delete_session(&self) -> Result<()> {
        let Some(id) = self.session_id() else {
            return Ok(());
        };
        let path = format!("/session/{}", id);
        let result = self
            .command(Method::DELETE, &path, None, DEFAULT_REQUEST_TIMEOUT)
            .await;

        self.set_session_id(None);
        self.flags.mark_disconnected();
        result.map(|_| ())
    }

    pub async fn current_window(&self) -> Result<String> {
        let path = self.session_path("/window")?;
        let value = self
            .command(Method::GET, &path, None, DEFAULT_REQUEST_TIMEOUT)
            .await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| BrowserError::InvalidResponse("window handle is not a string".to_string()))
    }

    pub async fn new_window(&self) -> Result<String> {
        let path = self.session_path("/window/new")?;
        let value = self
            .command(
                Method::POST,
                &path,
                Some(json!({ "type": "tab" })),
                DEFAULT_REQUEST_TIMEOUT,
            )
            .await?;
        value["handle"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| BrowserError::InvalidResponse("missing window handle".to_string()))
    }

    pub async fn switch_to_window(&self, handle: &str) -> Result<()> {
        let path = self.session_path("/window")?;
        self.command(
            Method::POST,
            &path,
            Some(json!({ "handle": handle })),
            DEFAULT_REQUEST_TIMEOUT,
        )
        .await
        .map(|_| ())
    }

    /// Closes the current window and returns the remaining handles.
    pub async fn close_window(&self) -> Result<Vec<String>> {
        let path = self.session_path("/window")?;
        let value = self
            .command(Method::DELETE, &path, None, DEFAULT_REQUEST_TIMEOUT)
            .await?;
        Ok(value
            .as_array()
            .map(|handles| {
                handles
                    .iter()
                    .filter_map(|h| h.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }

    pub async fn set_window_rect(&self, width: u32, height: u32) -> Result<()> {
        let path = self.session_path("/window/rect")?;
        self.command(
            Method::POST,
            &path,
            Some(json!({ "width": width, "height": height })),
            DEFAULT_REQUEST_TIMEOUT,
        )
        .await
        .map(|_| ())
    }

    pub async fn set_timeouts(&self, page_load: Duration, script: Duration) -> Result<()> {
        let path = self.session_path("/timeouts")?;
        self.command(
            Method::POST,
            &path,
            Some(json!({
                "pageLoad": page_load.as_millis() as u64,
                "script": script.as_millis() as u64,
                "implicit": 0,
            })),
            DEFAULT_REQUEST_TIMEOUT,
        )
        .await
        .map(|_| ())
    }

    pub async fn navigate(&self, url: &str, timeout: Duration) -> Result<()> {
        let path = self.session_path("/url")?;
        self.command(
            Method::POST,
            &path,
            Some(json!({ "url": url })),
            timeout + REQUEST_GRACE,
        )
        .await
        .map(|_| ())
    }

    pub async fn current_url(&self) -> Result<String> {
        let path = self.session_path("/url")?;
        let value = self
            .command(Method::GET, &path, None, DEFAULT_REQUEST_TIMEOUT)
            .await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| BrowserError::InvalidResponse("url is not a string".to_string()))
    }

    pub async fn execute(&self, script: &str, args: Vec<Value>) -> Result<Value> {
        let path = self.session_path("/execute/sync")?;
        self.command(
            Method::POST,
            &path,
            Some(json!({ "script": script, "args": args })),
            DEFAULT_REQUEST_TIMEOUT,
        )
        .await
    }

    /// Element references matching `locator`; empty when nothing matches.
    pub async fn find_elements(&self, locator: &Locator) -> Result<Vec<String>> {
        let path = self.session_path("/elements")?;
        let value = self
            .command(
                Method::POST,
                &path,
                Some(json!({
                    "using": locator_using(locator.strategy),
                    "value": locator.selector,
                })),
                DEFAULT_REQUEST_TIMEOUT,
            )
            .await?;

        let elements = value
            .as_array()
            .ok_or_else(|| BrowserError::InvalidResponse("elements is not an array".to_string()))?;
        Ok(elements
            .iter()
            .filter_map(|e| e[ELEMENT_KEY].as_str().map(str::to_string))
            .collect())
    }

    pub async fn element_click(&self, element: &str) -> Result<()> {
        let path = self.session_path(&format!("/element/{}/click", element))?;
        self.command(Method::POST, &path, Some(json!({})), DEFAULT_REQUEST_TIMEOUT)
            .await
            .map(|_| ())
    }

    pub async fn element_clear(&self, element: &str) -> Result<()> {
        let path = self.session_path(&format!("/element/{}/clear", element))?;
        self.command(Method::POST, &path, Some(json!({})), DEFAULT_REQUEST_TIMEOUT)
            .await
            .map(|_| ())
    }

    pub async fn element_send_keys(&self, element: &str, text: &str) -> Result<()> {
        let path = self.session_path(&format!("/element/{}/value", element))?;
        self.command(
            Method::POST,
            &path,
            Some(json!({ "text": text })),
            DEFAULT_REQUEST_TIMEOUT,
        )
        .await
        .map(|_| ())
    }

    pub async fn element_displayed(&self, element: &str) -> Result<bool> {
        let path = self.session_path(&format!("/element/{}/displayed", element))?;
        let value = self
            .command(Method::GET, &path, None, DEFAULT_REQUEST_TIMEOUT)
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    pub async fn element_text(&self, element: &str) -> Result<String> {
        let path = self.session_path(&format!("/element/{}/text", element))?;
        let value = self
            .command(Method::GET, &path, None, DEFAULT_REQUEST_TIMEOUT)
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_with_session(server: &MockServer) -> (WebDriverClient, SessionFlags) {
        Mock::given(method("POST"))
            .and(path("/session"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": { "sessionId": "abc", "capabilities": {} }
            })))
            .mount(server)
            .await;

        let flags = SessionFlags::new();
        let client = WebDriverClient::new(&server.uri(), flags.clone());
        client.new_session(json!({ "capabilities": {} })).await.unwrap();
        (client, flags)
    }

    #[tokio::test]
    async fn test_new_session_marks_connected() {
        let server = MockServer::start().await;
        let (client, flags) = client_with_session(&server).await;

        assert_eq!(client.session_id().as_deref(), Some("abc"));
        assert!(flags.is_usable());
    }

    #[tokio::test]
    async fn test_status_ready() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": { "ready": true, "message": "ready" }
            })))
            .mount(&server)
            .await;

        let client = WebDriverClient::new(&server.uri(), SessionFlags::new());
        assert!(client.status(Duration::from_millis(500)).await);
    }

    #[tokio::test]
    async fn test_find_elements_parses_references() {
        let server = MockServer::start().await;
        let (client, _) = client_with_session(&server).await;

        Mock::given(method("POST"))
            .and(path("/session/abc/elements"))
            .and(body_partial_json(json!({ "using": "css selector", "value": ".item" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [
                    { "element-6066-11e4-a07c-4f9f4f3b7ed6": "e1" },
                    { "element-6066-11e4-a07c-4f9f4f3b7ed6": "e2" }
                ]
            })))
            .mount(&server)
            .await;

        let elements = client.find_elements(&Locator::css(".item")).await.unwrap();
        assert_eq!(elements, vec!["e1", "e2"]);
    }

    #[tokio::test]
    async fn test_timeout_error_is_mapped() {
        let server = MockServer::start().await;
        let (client, flags) = client_with_session(&server).await;

        Mock::given(method("POST"))
            .and(path("/session/abc/url"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "value": { "error": "timeout", "message": "page load timed out" }
            })))
            .mount(&server)
            .await;

        let err = client
            .navigate("https://slow.example", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(flags.is_usable());
    }

    #[tokio::test]
    async fn test_invalid_session_marks_closed() {
        let server = MockServer::start().await;
        let (client, flags) = client_with_session(&server).await;

        Mock::given(method("GET"))
            .and(path("/session/abc/url"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "value": { "error": "invalid session id", "message": "session deleted" }
            })))
            .mount(&server)
            .await;

        let err = client.current_url().await.unwrap_err();
        assert!(err.is_session_lost());
        assert!(flags.is_closed());
        assert!(!flags.is_usable());
    }

    #[tokio::test]
    async fn test_commands_without_session_fail() {
        let client = WebDriverClient::new("http://127.0.0.1:1", SessionFlags::new());
        let err = client.current_url().await.unwrap_err();
        assert!(matches!(err, BrowserError::NoSession));
    }

    #[tokio::test]
    async fn test_delete_session_without_session_is_noop() {
        let client = WebDriverClient::new("http://127.0.0.1:1", SessionFlags::new());
        assert!(client.delete_session().await.is_ok());
    }
}
