#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bdd_core::{Locator, RunConfig, WaitUntil};
use browser::{BrowserBackend, BrowserError, ContextOptions, LaunchOptions, SessionFlags};
use orchestrator::{
    BackendFactory, BrowserSessionManager, ExecutorConfig, SessionPolicy, TaskOrchestrator,
    TaskRegistry,
};

#[derive(Debug, Clone, Default)]
pub struct FakeElement {
    pub count: usize,
    pub visible: bool,
    pub text: String,
}

impl FakeElement {
    pub fn visible(text: &str) -> Self {
        Self {
            count: 1,
            visible: true,
            text: text.to_string(),
        }
    }
}

/// How `goto` behaves for a URL.
#[derive(Debug, Clone)]
pub enum NavScript {
    Ok(u16),
    /// Times out for the first `n` attempts, then succeeds.
    TimeoutTimes(u32),
    AlwaysTimeout,
    Crash,
    Panic,
}

#[derive(Debug, Default)]
pub struct Script {
    pub startup_timeout: bool,
    pub launch_failures: u32,
    pub page_failures: u32,
    pub navigation: HashMap<String, NavScript>,
    pub elements: HashMap<String, FakeElement>,
    pub body_text: String,
}

#[derive(Debug, Default)]
pub struct Calls {
    pub starts: u32,
    pub launches: Vec<bool>,
    pub contexts: u32,
    pub pages: u32,
    pub gotos: HashMap<String, u32>,
    pub clicks: Vec<String>,
    pub fills: Vec<(String, String)>,
    pub close_pages: u32,
    pub close_contexts: u32,
    pub close_browsers: u32,
    pub stops: u32,
}

#[derive(Debug, Default)]
struct Shared {
    script: Script,
    calls: Calls,
    url: String,
    flags: Vec<SessionFlags>,
}

/// Scripted browser shared by every backend the factory hands out.
#[derive(Clone, Default)]
pub struct FakeBrowser {
    shared: Arc<Mutex<Shared>>,
}

impl FakeBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, f: impl FnOnce(&mut Script)) -> &Self {
        f(&mut self.shared.lock().unwrap().script);
        self
    }

    pub fn page(&self, url: &str, status: u16) -> &Self {
        self.navigation(url, NavScript::Ok(status))
    }

    pub fn navigation(&self, url: &str, nav: NavScript) -> &Self {
        self.script(|s| {
            s.navigation.insert(url.to_string(), nav);
        })
    }

    pub fn element(&self, selector: &str, element: FakeElement) -> &Self {
        self.script(|s| {
            s.elements.insert(selector.to_string(), element);
        })
    }

    pub fn calls<T>(&self, f: impl FnOnce(&Calls) -> T) -> T {
        f(&self.shared.lock().unwrap().calls)
    }

    pub fn gotos(&self, url: &str) -> u32 {
        self.calls(|c| c.gotos.get(url).copied().unwrap_or(0))
    }

    /// Flags of every backend created so far.
    pub fn flags(&self) -> Vec<SessionFlags> {
        self.shared.lock().unwrap().flags.clone()
    }

    pub fn factory(&self) -> Arc<dyn BackendFactory> {
        Arc::new(FakeFactory {
            browser: self.clone(),
        })
    }
}

struct FakeFactory {
    browser: FakeBrowser,
}

impl BackendFactory for FakeFactory {
    fn create(&self, _config: &RunConfig) -> Box<dyn BrowserBackend> {
        let flags = SessionFlags::new();
        self.browser.shared.lock().unwrap().flags.push(flags.clone());
        Box::new(FakeBackend {
            browser: self.browser.clone(),
            flags,
        })
    }
}

struct FakeBackend {
    browser: FakeBrowser,
    flags: SessionFlags,
}

impl FakeBackend {
    fn with<T>(&self, f: impl FnOnce(&mut Shared) -> T) -> T {
        f(&mut self.browser.shared.lock().unwrap())
    }

    fn element(&self, target: &Locator) -> Option<FakeElement> {
        self.with(|s| s.script.elements.get(&target.selector).cloned())
    }
}

#[async_trait]
impl BrowserBackend for FakeBackend {
    async fn start(&mut self, timeout: Duration) -> browser::Result<()> {
        self.with(|s| {
            s.calls.starts += 1;
            if s.script.startup_timeout {
                Err(BrowserError::StartupTimeout(timeout))
            } else {
                Ok(())
            }
        })
    }

    async fn launch(&mut self, options: &LaunchOptions) -> browser::Result<()> {
        let result = self.with(|s| {
            s.calls.launches.push(options.headless);
            if s.script.launch_failures > 0 {
                s.script.launch_failures -= 1;
                Err(BrowserError::LaunchFailed("browser exited".to_string()))
            } else {
                Ok(())
            }
        });
        if result.is_ok() {
            self.flags.mark_connected();
        }
        result
    }

    async fn is_connected(&self) -> bool {
        self.flags.is_connected()
    }

    async fn new_context(&mut self, _options: &ContextOptions) -> browser::Result<()> {
        self.with(|s| s.calls.contexts += 1);
        Ok(())
    }

    async fn new_page(&mut self, _default_timeout: Duration) -> browser::Result<()> {
        self.with(|s| {
            s.calls.pages += 1;
            if s.script.page_failures > 0 {
                s.script.page_failures -= 1;
                Err(BrowserError::Protocol {
                    code: "unknown error".to_string(),
                    message: "cannot open tab".to_string(),
                })
            } else {
                Ok(())
            }
        })
    }

    fn flags(&self) -> SessionFlags {
        self.flags.clone()
    }

    async fn close_page(&mut self) -> browser::Result<()> {
        self.with(|s| s.calls.close_pages += 1);
        self.flags.mark_closed();
        Ok(())
    }

    async fn close_context(&mut self) -> browser::Result<()> {
        self.with(|s| s.calls.close_contexts += 1);
        Ok(())
    }

    async fn close_browser(&mut self) -> browser::Result<()> {
        self.with(|s| s.calls.close_browsers += 1);
        self.flags.mark_disconnected();
        Ok(())
    }

    async fn stop(&mut self) -> browser::Result<()> {
        self.with(|s| s.calls.stops += 1);
        Ok(())
    }

    async fn goto(
        &self,
        url: &str,
        _wait_until: WaitUntil,
        timeout: Duration,
    ) -> browser::Result<Option<u16>> {
        let nav = self.with(|s| {
            *s.calls.gotos.entry(url.to_string()).or_default() += 1;
            let nav = s
                .script
                .navigation
                .get(url)
                .cloned()
                .unwrap_or(NavScript::Ok(200));
            if let NavScript::TimeoutTimes(n) = nav {
                if n > 0 {
                    s.script
                        .navigation
                        .insert(url.to_string(), NavScript::TimeoutTimes(n - 1));
                    return NavScript::AlwaysTimeout;
                }
                return NavScript::Ok(200);
            }
            nav
        });

        match nav {
            NavScript::Ok(status) => {
                self.with(|s| s.url = url.to_string());
                Ok(Some(status))
            }
            NavScript::TimeoutTimes(_) | NavScript::AlwaysTimeout => Err(BrowserError::Timeout(
                format!("navigation exceeded {}ms", timeout.as_millis()),
            )),
            NavScript::Crash => {
                let error = BrowserError::Crashed("tab crashed".to_string());
                self.flags.observe(&error);
                Err(error)
            }
            NavScript::Panic => panic!("driver exploded"),
        }
    }

    async fn click(&self, target: &Locator, _timeout: Duration) -> browser::Result<()> {
        match self.element(target) {
            Some(element) if element.count > 0 => {
                self.with(|s| s.calls.clicks.push(target.selector.clone()));
                Ok(())
            }
            _ => Err(BrowserError::ElementNotFound(target.to_string())),
        }
    }

    async fn fill(&self, target: &Locator, value: &str, _timeout: Duration) -> browser::Result<()> {
        match self.element(target) {
            Some(element) if element.count > 0 => {
                self.with(|s| {
                    s.calls
                        .fills
                        .push((target.selector.clone(), value.to_string()))
                });
                Ok(())
            }
            _ => Err(BrowserError::ElementNotFound(target.to_string())),
        }
    }

    async fn count(&self, target: &Locator) -> browser::Result<usize> {
        Ok(self.element(target).map_or(0, |e| e.count))
    }

    async fn is_visible(&self, target: &Locator) -> browser::Result<bool> {
        Ok(self.element(target).is_some_and(|e| e.count > 0 && e.visible))
    }

    async fn text_content(&self, target: Option<&Locator>) -> browser::Result<String> {
        match target {
            None => Ok(self.with(|s| s.script.body_text.clone())),
            Some(target) => match self.element(target) {
                Some(element) if element.count > 0 => Ok(element.text),
                _ => Err(BrowserError::ElementNotFound(target.to_string())),
            },
        }
    }

    async fn current_url(&self) -> browser::Result<String> {
        Ok(self.with(|s| s.url.clone()))
    }
}

fn no_display() -> bool {
    false
}

fn with_display() -> bool {
    true
}

pub fn fast_policy() -> SessionPolicy {
    SessionPolicy::default()
        .with_startup_timeout(Duration::from_millis(100))
        .with_page_settle_delay(Duration::ZERO)
        .with_display_probe(with_display)
}

pub fn headless_only_policy() -> SessionPolicy {
    fast_policy().with_display_probe(no_display)
}

pub fn sessions(browser: &FakeBrowser, policy: SessionPolicy) -> BrowserSessionManager {
    BrowserSessionManager::new(browser.factory(), policy)
}

pub fn orchestrator(browser: &FakeBrowser) -> TaskOrchestrator {
    TaskOrchestrator::new(
        Arc::new(TaskRegistry::in_memory()),
        sessions(browser, fast_policy()),
        events::EventBus::new(),
        ExecutorConfig::default().with_navigation_retry_delay(Duration::ZERO),
    )
}

/// Orchestrator whose registry persists to `repository`, as a server
/// process would.
pub fn durable_orchestrator(
    browser: &FakeBrowser,
    repository: db::ExecutionRepository,
) -> TaskOrchestrator {
    TaskOrchestrator::new(
        Arc::new(TaskRegistry::in_memory().with_durable(repository)),
        sessions(browser, fast_policy()),
        events::EventBus::new(),
        ExecutorConfig::default().with_navigation_retry_delay(Duration::ZERO),
    )
}

pub fn run_config() -> RunConfig {
    RunConfig::default().with_base_url("https://shop.example")
}
