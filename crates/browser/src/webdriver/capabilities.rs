use bdd_core::{BrowserKind, LocatorStrategy};
use serde_json::{json, Value};

use crate::backend::LaunchOptions;

/// Chromium flags needed to run inside containers and CI sandboxes.
const LINUX_CHROMIUM_ARGS: &[&str] = &[
    "--no-sandbox",
    "--disable-dev-shm-usage",
    "--disable-gpu",
    "--disable-setuid-sandbox",
    "--no-zygote",
];

pub(crate) fn chromium_args(headless: bool, linux: bool) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    if linux {
        args.extend(LINUX_CHROMIUM_ARGS.iter().map(|a| a.to_string()));
    }
    args.push("--disable-blink-features=AutomationControlled".to_string());
    if headless {
        args.push("--headless=new".to_string());
    }
    args
}

/// W3C `capabilities` payload for a new session.
pub(crate) fn session_capabilities(options: &LaunchOptions) -> Value {
    let mut always_match = json!({
        "acceptInsecureCerts": options.accept_insecure_certs,
        "pageLoadStrategy": "eager",
    });

    match options.browser {
        BrowserKind::Chromium => {
            let mut args = chromium_args(options.headless, cfg!(target_os = "linux"));
            args.extend(options.extra_args.iter().cloned());
            always_match["browserName"] = json!("chrome");
            always_match["goog:chromeOptions"] = json!({ "args": args });
        }
        BrowserKind::Firefox => {
            let mut args = Vec::new();
            if options.headless {
                args.push("-headless".to_string());
            }
            args.extend(options.extra_args.iter().cloned());
            always_match["browserName"] = json!("firefox");
            always_match["moz:firefoxOptions"] = json!({ "args": args });
        }
        BrowserKind::Webkit => {
            if options.headless {
                tracing::warn!("Safari has no headless mode; launching with a window");
            }
            always_match["browserName"] = json!("safari");
        }
    }

    json!({ "capabilities": { "alwaysMatch": always_match } })
}

/// WebDriver `using` value for a locator strategy.
pub(crate) fn locator_using(strategy: LocatorStrategy) -> &'static str {
    match strategy {
        LocatorStrategy::Css => "css selector",
        LocatorStrategy::XPath => "xpath",
        LocatorStrategy::LinkText => "link text",
        LocatorStrategy::PartialLinkText => "partial link text",
        LocatorStrategy::TagName => "tag name",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chromium_linux_args() {
        let args = chromium_args(true, true);
        assert!(args.contains(&"--no-sandbox".to_string()));
        assert!(args.contains(&"--no-zygote".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("--headless=new"));
    }

    #[test]
    fn test_chromium_headed_non_linux_args() {
        let args = chromium_args(false, false);
        assert_eq!(args, vec!["--disable-blink-features=AutomationControlled"]);
    }

    #[test]
    fn test_firefox_capabilities() {
        let caps = session_capabilities(&LaunchOptions::new(BrowserKind::Firefox, true));
        let always = &caps["capabilities"]["alwaysMatch"];

        assert_eq!(always["browserName"], "firefox");
        assert_eq!(always["moz:firefoxOptions"]["args"][0], "-headless");
        assert_eq!(always["acceptInsecureCerts"], true);
        assert_eq!(always["pageLoadStrategy"], "eager");
    }

    #[test]
    fn test_webkit_maps_to_safari() {
        let caps = session_capabilities(&LaunchOptions::new(BrowserKind::Webkit, false));
        assert_eq!(caps["capabilities"]["alwaysMatch"]["browserName"], "safari");
    }

    #[test]
    fn test_locator_using() {
        assert_eq!(locator_using(LocatorStrategy::Css), "css selector");
        assert_eq!(locator_using(LocatorStrategy::PartialLinkText), "partial link text");
    }
}
