use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrowserError {
    #[error("Driver did not become ready within {}ms", .0.as_millis())]
    StartupTimeout(Duration),

    #[error("Driver binary not found: {0}")]
    DriverNotFound(String),

    #[error("Browser launch failed: {0}")]
    LaunchFailed(String),

    #[error("No active browser session")]
    NoSession,

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Browser session closed: {0}")]
    SessionClosed(String),

    #[error("Browser crashed: {0}")]
    Crashed(String),

    #[error("Browser disconnected: {0}")]
    Disconnected(String),

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Element not interactable: {0}")]
    NotInteractable(String),

    #[error("WebDriver error ({code}): {message}")]
    Protocol { code: String, message: String },

    #[error("Invalid driver response: {0}")]
    InvalidResponse(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BrowserError {
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Http(e) => e.is_timeout(),
            _ => false,
        }
    }

    /// The session can no longer be driven and must not be reused.
    pub fn is_session_lost(&self) -> bool {
        match self {
            Self::SessionClosed(_) | Self::Crashed(_) | Self::Disconnected(_) | Self::NoSession => {
                true
            }
            Self::Http(e) => e.is_connect(),
            _ => false,
        }
    }

    /// Maps a W3C WebDriver error code and message onto the local taxonomy.
    pub fn from_wire(code: &str, message: &str) -> Self {
        let message = message.to_string();
        let lowered = message.to_ascii_lowercase();

        match code {
            "timeout" | "script timeout" => Self::Timeout(message),
            "invalid session id" | "no such window" => Self::SessionClosed(message),
            "no such element" | "stale element reference" => Self::ElementNotFound(message),
            "element not interactable" | "element click intercepted" => {
                Self::NotInteractable(message)
            }
            "session not created" => Self::LaunchFailed(message),
            _ if is_crash_message(&lowered) => Self::Crashed(message),
            _ if lowered.contains("disconnected") || lowered.contains("not reachable") => {
                Self::Disconnected(message)
            }
            _ => Self::Protocol {
                code: code.to_string(),
                message,
            },
        }
    }
}

fn is_crash_message(lowered: &str) -> bool {
    lowered.contains("crash") || lowered.contains("target closed")
}

pub type Result<T> = std::result::Result<T, BrowserError>;
