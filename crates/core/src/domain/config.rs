use serde::{Deserialize, Serialize};

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BrowserKind {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl BrowserKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chromium => "chromium",
            Self::Firefox => "firefox",
            Self::Webkit => "webkit",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chromium" | "chrome" => Some(Self::Chromium),
            "firefox" => Some(Self::Firefox),
            "webkit" | "safari" => Some(Self::Webkit),
            _ => None,
        }
    }
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_headless() -> bool {
    true
}

/// Per-task execution configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default = "default_timeout_ms", alias = "timeout")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub browser: BrowserKind,
    #[serde(default = "default_headless")]
    pub headless: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            browser: BrowserKind::default(),
            headless: true,
        }
    }
}

impl RunConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn with_browser(mut self, browser: BrowserKind) -> Self {
        self.browser = browser;
        self
    }
}

/// Configuration as submitted by a caller; unset fields fall back to
/// process-wide defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunConfigOverrides {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default, alias = "timeout")]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub browser: Option<BrowserKind>,
    #[serde(default)]
    pub headless: Option<bool>,
}

impl RunConfigOverrides {
    pub fn apply_to(self, base: RunConfig) -> RunConfig {
        RunConfig {
            base_url: self.base_url.or(base.base_url),
            timeout_ms: self.timeout_ms.unwrap_or(base.timeout_ms),
            browser: self.browser.unwrap_or(base.browser),
            headless: self.headless.unwrap_or(base.headless),
        }
    }
}
