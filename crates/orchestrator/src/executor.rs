//! Executes one step against a live session and turns the outcome into a
//! [`StepResult`]. Nothing here returns an error: every failure is
//! classified and recorded on the result.

use std::time::Duration;

use bdd_core::{
    ActionKind, ActionStep, FailureCategory, Locator, NavigationStep, RunConfig, Step, StepPhase,
    StepResult, ValidationKind, ValidationStep, WaitUntil,
};
use browser::{BrowserBackend, BrowserError};
use reqwest::Url;
use tracing::{debug, error, info, warn};

use crate::classifier::{ErrorClassifier, StepError};
use crate::session::BrowserSession;

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Pause between navigation attempts after a timeout.
    pub navigation_retry_delay: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            navigation_retry_delay: Duration::from_secs(2),
        }
    }
}

impl ExecutorConfig {
    pub fn with_navigation_retry_delay(mut self, delay: Duration) -> Self {
        self.navigation_retry_delay = delay;
        self
    }
}

/// Successful step outcome before it is folded into a [`StepResult`].
struct Outcome {
    message: String,
    response_code: Option<u16>,
}

impl Outcome {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            response_code: None,
        }
    }
}

pub struct StepExecutor<'a> {
    session: &'a BrowserSession,
    run: &'a RunConfig,
    config: &'a ExecutorConfig,
}

impl<'a> StepExecutor<'a> {
    pub fn new(session: &'a BrowserSession, run: &'a RunConfig, config: &'a ExecutorConfig) -> Self {
        Self {
            session,
            run,
            config,
        }
    }

    pub async fn execute(&self, step: &Step, phase: StepPhase) -> StepResult {
        let pending = StepResult::begin(step, phase);
        let description = pending.step.clone();

        let (attempts, outcome) = match step {
            Step::Navigation(nav) => self.navigate(nav).await,
            Step::Action(action) => (1, self.act(action).await),
            Step::Validation(validation) => (1, self.validate(validation).await),
        };
        let pending = pending.with_attempts(attempts);

        match outcome {
            Ok(outcome) => {
                debug!(
                    task_id = %self.session.task_id(),
                    step = %description,
                    "Step passed"
                );
                pending
                    .with_response_code(outcome.response_code)
                    .pass(outcome.message)
            }
            Err(e) => self.fail(pending, &description, e),
        }
    }

    fn fail(&self, pending: StepResult, description: &str, error: StepError) -> StepResult {
        let category = ErrorClassifier::classify(&error);
        let detail = error.to_string();
        let task_id = self.session.task_id();

        let message = match category {
            FailureCategory::Timeout => {
                warn!(task_id = %task_id, step = %description, error = %detail, "Step timed out");
                format!("Timed out: {}", detail)
            }
            FailureCategory::SessionClosedOrCrashed => {
                warn!(task_id = %task_id, step = %description, error = %detail, "Browser session lost");
                format!("Browser session unavailable: {}", session_reason(&error))
            }
            FailureCategory::AssertionFailure => {
                info!(task_id = %task_id, step = %description, reason = %detail, "Assertion failed");
                detail.clone()
            }
            FailureCategory::UnclassifiedError => {
                error!(task_id = %task_id, step = %description, error = ?error, "Step failed");
                format!("Error executing step: {}", detail)
            }
        };

        pending.fail(category, message, Some(detail))
    }

    /// Backend to drive, or why the session may not be touched.
    fn backend(&self) -> Result<&'a dyn BrowserBackend, StepError> {
        if let Some(reason) = self.session.unavailable_reason() {
            return Err(StepError::SessionUnavailable(reason.to_string()));
        }
        self.session
            .backend()
            .ok_or_else(|| StepError::SessionUnavailable("session already released".to_string()))
    }

    fn resolve_url(&self, raw: &str) -> Result<String, StepError> {
        if let Ok(url) = Url::parse(raw) {
            return Ok(url.to_string());
        }

        let base = self.run.base_url.as_deref().ok_or_else(|| {
            StepError::InvalidStep(format!("relative url '{}' without a base_url", raw))
        })?;
        Url::parse(base)
            .and_then(|base| base.join(raw))
            .map(|url| url.to_string())
            .map_err(|e| StepError::InvalidStep(format!("cannot resolve url '{}': {}", raw, e)))
    }

    /// Returns the number of attempts made alongside the outcome.
    async fn navigate(&self, step: &NavigationStep) -> (u32, Result<Outcome, StepError>) {
        let url = match self.resolve_url(&step.url) {
            Ok(url) => url,
            Err(e) => return (0, Err(e)),
        };
        let timeout = Duration::from_millis(step.timeout_ms);
        let max_attempts = step.max_attempts();

        let mut attempt = 0;
        loop {
            attempt += 1;
            let backend = match self.backend() {
                Ok(backend) => backend,
                Err(e) => return (attempt, Err(e)),
            };

            info!(
                task_id = %self.session.task_id(),
                url = %url,
                attempt,
                max_attempts,
                "Navigating"
            );

            let error = match backend.goto(&url, step.wait_until, timeout).await {
                Ok(response_code) => {
                    return (
                        attempt,
                        Ok(Outcome {
                            message: format!("Navigated to {} (attempt {})", url, attempt),
                            response_code,
                        }),
                    );
                }
                Err(e) => StepError::Browser(e),
            };

            let category = ErrorClassifier::classify(&error);
            if !ErrorClassifier::is_retryable(category) || attempt >= max_attempts {
                return (attempt, Err(error));
            }

            warn!(
                task_id = %self.session.task_id(),
                url = %url,
                attempt,
                error = %error,
                "Navigation attempt timed out, retrying"
            );
            tokio::time::sleep(self.config.navigation_retry_delay).await;
        }
    }

    async fn act(&self, step: &ActionStep) -> Result<Outcome, StepError> {
        let backend = self.backend()?;
        let timeout = self.session.default_timeout();

        match step.action {
            ActionKind::Click => {
                let target = required_target(step.target.as_ref(), "click")?;
                backend.click(target, timeout).await?;
                Ok(Outcome::new(format!("Clicked element: {}", target)))
            }
            ActionKind::Fill => {
                let target = required_target(step.target.as_ref(), "fill")?;
                let value = step
                    .value
                    .as_deref()
                    .ok_or_else(|| StepError::InvalidStep("fill action requires a value".into()))?;
                backend.fill(target, value, timeout).await?;
                Ok(Outcome::new(format!("Entered '{}' into {}", value, target)))
            }
            ActionKind::Navigate => {
                let raw = step
                    .value
                    .as_deref()
                    .ok_or_else(|| StepError::InvalidStep("navigate action requires a url".into()))?;
                let url = self.resolve_url(raw)?;
                let response_code = backend
                    .goto(&url, WaitUntil::default(), timeout)
                    .await?;
                Ok(Outcome {
                    message: format!("Navigated to {}", url),
                    response_code,
                })
            }
        }
    }

    async fn validate(&self, step: &ValidationStep) -> Result<Outcome, StepError> {
        let backend = self.backend()?;
        let kind = step.validation.as_str();

        match step.validation {
            ValidationKind::ElementExists => {
                let target = required_target(step.target.as_ref(), kind)?;
                let count = backend.count(target).await?;
                if count > 0 {
                    Ok(Outcome::new(format!("Element {} exists (count: {})", target, count)))
                } else {
                    Err(StepError::Assertion(format!("Element {} does not exist", target)))
                }
            }
            ValidationKind::ElementVisible => {
                let target = required_target(step.target.as_ref(), kind)?;
                if backend.is_visible(target).await? {
                    Ok(Outcome::new(format!("Element {} is visible", target)))
                } else {
                    Err(StepError::Assertion(format!("Element {} is not visible", target)))
                }
            }
            ValidationKind::TextContent | ValidationKind::TextContains => {
                let expected = required_text(step.expected_text.as_deref(), kind)?;
                let actual = read_text(backend, step.target.as_ref()).await?;
                let matched = if step.validation == ValidationKind::TextContent {
                    normalize(&actual) == normalize(expected)
                } else {
                    actual.contains(expected)
                };

                if matched {
                    Ok(Outcome::new(format!("Text matches: {}", expected)))
                } else {
                    Err(StepError::Assertion(format!(
                        "Text mismatch. Expected: {}, Got: {}",
                        expected,
                        actual.trim()
                    )))
                }
            }
            ValidationKind::UrlContains => {
                let expected = required_text(step.expected_text.as_deref(), kind)?;
                let current = backend.current_url().await?;
                if current.contains(expected) {
                    Ok(Outcome::new(format!("URL contains '{}': {}", expected, current)))
                } else {
                    Err(StepError::Assertion(format!(
                        "URL does not contain '{}'. Current URL: {}",
                        expected, current
                    )))
                }
            }
            ValidationKind::ElementCount => {
                let target = required_target(step.target.as_ref(), kind)?;
                let expectation = step.expected_count.ok_or_else(|| {
                    StepError::InvalidStep(format!("{} validation requires expected_result", kind))
                })?;
                let count = i64::try_from(backend.count(target).await?).unwrap_or(i64::MAX);
                if expectation.matches(count) {
                    Ok(Outcome::new(format!("Count of {} is {} ({})", target, count, expectation)))
                } else {
                    Err(StepError::Assertion(format!(
                        "Count of {} is {}, expected {}",
                        target, count, expectation
                    )))
                }
            }
            ValidationKind::TextCount => {
                let target = required_target(step.target.as_ref(), kind)?;
                let expectation = step.expected_count.ok_or_else(|| {
                    StepError::InvalidStep(format!("{} validation requires expected_result", kind))
                })?;
                let text = read_text(backend, Some(target)).await?;
                let count = parse_count(&text);
                if expectation.matches(count) {
                    Ok(Outcome::new(format!("Count in {} is {} ({})", target, count, expectation)))
                } else {
                    Err(StepError::Assertion(format!(
                        "Count in {} is {}, expected {}",
                        target, count, expectation
                    )))
                }
            }
        }
    }
}

/// Reads text for a validation; a missing element fails the expectation.
async fn read_text(
    backend: &dyn BrowserBackend,
    target: Option<&Locator>,
) -> Result<String, StepError> {
    match backend.text_content(target).await {
        Ok(text) => Ok(text),
        Err(BrowserError::ElementNotFound(_)) => Err(StepError::Assertion(format!(
            "Element {} not found",
            target.map(Locator::to_string).unwrap_or_else(|| "body".to_string())
        ))),
        Err(e) => Err(e.into()),
    }
}

fn required_target<'s>(target: Option<&'s Locator>, kind: &str) -> Result<&'s Locator, StepError> {
    target.ok_or_else(|| StepError::InvalidStep(format!("{} requires a target element", kind)))
}

fn required_text<'s>(text: Option<&'s str>, kind: &str) -> Result<&'s str, StepError> {
    text.ok_or_else(|| StepError::InvalidStep(format!("{} requires expected_text", kind)))
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Integer rendered in a badge such as "3" or "1,204 items"; empty is 0.
fn parse_count(text: &str) -> i64 {
    let digits: String = text
        .trim()
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit() || *c == ',')
        .filter(char::is_ascii_digit)
        .collect();
    digits.parse().unwrap_or(0)
}

fn session_reason(error: &StepError) -> String {
    match error {
        StepError::SessionUnavailable(reason) => reason.clone(),
        StepError::Browser(BrowserError::Crashed(_)) => "browser crashed".to_string(),
        StepError::Browser(e) => e.to_string(),
        other => other.to_string(),
    }
}
