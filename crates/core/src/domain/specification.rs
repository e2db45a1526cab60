use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

pub const DEFAULT_NAVIGATION_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_NAVIGATION_RETRIES: u32 = 1;

/// A normalized feature specification: feature metadata plus its scenarios.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Specification {
    #[serde(default)]
    pub feature: Feature,
    pub scenarios: Vec<Scenario>,
}

impl Specification {
    pub fn new(feature: Feature, scenarios: Vec<Scenario>) -> Self {
        Self { feature, scenarios }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Feature {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Feature {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
        }
    }

    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            "Unknown Test"
        } else {
            &self.name
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StepPhase {
    Given,
    When,
    Then,
}

impl StepPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Given => "given",
            Self::When => "when",
            Self::Then => "then",
        }
    }
}

/// One Given/When/Then sequence. Immutable once its task starts running.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Scenario {
    #[serde(default, alias = "scenario_id")]
    pub id: String,
    #[serde(default, alias = "scenario_name")]
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub given: Vec<Step>,
    #[serde(default)]
    pub when: Vec<Step>,
    #[serde(default)]
    pub then: Vec<Step>,
}

impl Scenario {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn given(mut self, step: impl Into<Step>) -> Self {
        self.given.push(step.into());
        self
    }

    pub fn when(mut self, step: impl Into<Step>) -> Self {
        self.when.push(step.into());
        self
    }

    pub fn then(mut self, step: impl Into<Step>) -> Self {
        self.then.push(step.into());
        self
    }

    pub fn total_steps(&self) -> usize {
        self.given.len() + self.when.len() + self.then.len()
    }

    /// Steps of one phase, in declared order.
    pub fn steps(&self, phase: StepPhase) -> &[Step] {
        match phase {
            StepPhase::Given => &self.given,
            StepPhase::When => &self.when,
            StepPhase::Then => &self.then,
        }
    }

    pub fn label(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    /// Rejects scenarios that cannot be executed at all.
    pub fn validate(&self) -> Result<()> {
        if self.total_steps() == 0 {
            return Err(CoreError::malformed(self.label(), "scenario has no steps"));
        }

        for phase in [StepPhase::Given, StepPhase::When, StepPhase::Then] {
            for (index, step) in self.steps(phase).iter().enumerate() {
                step.validate().map_err(|reason| {
                    CoreError::malformed(
                        self.label(),
                        format!("{} step {}: {}", phase.as_str(), index + 1, reason),
                    )
                })?;
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Step {
    Navigation(NavigationStep),
    Action(ActionStep),
    Validation(ValidationStep),
}

impl Step {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Navigation(_) => "navigation",
            Self::Action(_) => "action",
            Self::Validation(_) => "validation",
        }
    }

    /// Human-readable step text, falling back to a generated summary.
    pub fn description(&self) -> String {
        let explicit = match self {
            Self::Navigation(step) => &step.description,
            Self::Action(step) => &step.description,
            Self::Validation(step) => &step.description,
        };
        if !explicit.trim().is_empty() {
            return explicit.clone();
        }

        match self {
            Self::Navigation(step) => format!("navigate to {}", step.url),
            Self::Action(step) => match &step.target {
                Some(target) => format!("{} {}", step.action.as_str(), target),
                None => format!(
                    "{} {}",
                    step.action.as_str(),
                    step.value.as_deref().unwrap_or_default()
                ),
            },
            Self::Validation(step) => match &step.target {
                Some(target) => format!("{} {}", step.validation.as_str(), target),
                None => step.validation.as_str().to_string(),
            },
        }
    }

    fn validate(&self) -> std::result::Result<(), String> {
        match self {
            Self::Navigation(step) => {
                if step.url.trim().is_empty() {
                    return Err("navigation step requires a url".to_string());
                }
                Ok(())
            }
            Self::Action(step) => step.validate(),
            Self::Validation(step) => step.validate(),
        }
    }
}

impl From<NavigationStep> for Step {
    fn from(step: NavigationStep) -> Self {
        Self::Navigation(step)
    }
}

impl From<ActionStep> for Step {
    fn from(step: ActionStep) -> Self {
        Self::Action(step)
    }
}

impl From<ValidationStep> for Step {
    fn from(step: ValidationStep) -> Self {
        Self::Validation(step)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum WaitUntil {
    Load,
    #[default]
    DomContentLoaded,
    NetworkIdle,
}

impl WaitUntil {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::DomContentLoaded => "domcontentloaded",
            Self::NetworkIdle => "networkidle",
        }
    }
}

fn default_navigation_timeout_ms() -> u64 {
    DEFAULT_NAVIGATION_TIMEOUT_MS
}

fn default_navigation_retries() -> u32 {
    DEFAULT_NAVIGATION_RETRIES
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NavigationStep {
    #[serde(default, alias = "step")]
    pub description: String,
    pub url: String,
    #[serde(default)]
    pub wait_until: WaitUntil,
    #[serde(default = "default_navigation_timeout_ms", alias = "timeout")]
    pub timeout_ms: u64,
    /// Additional attempts after the first one, spent on timeouts only.
    #[serde(default = "default_navigation_retries")]
    pub retries: u32,
}

impl NavigationStep {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            description: String::new(),
            url: url.into(),
            wait_until: WaitUntil::default(),
            timeout_ms: DEFAULT_NAVIGATION_TIMEOUT_MS,
            retries: DEFAULT_NAVIGATION_RETRIES,
        }
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_wait_until(mut self, wait_until: WaitUntil) -> Self {
        self.wait_until = wait_until;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum LocatorStrategy {
    #[default]
    #[serde(rename = "css")]
    Css,
    #[serde(rename = "xpath")]
    XPath,
    #[serde(rename = "link_text")]
    LinkText,
    #[serde(rename = "partial_link_text")]
    PartialLinkText,
    #[serde(rename = "tag_name")]
    TagName,
}

impl LocatorStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Css => "css",
            Self::XPath => "xpath",
            Self::LinkText => "link_text",
            Self::PartialLinkText => "partial_link_text",
            Self::TagName => "tag_name",
        }
    }
}

/// Declarative reference to a page element.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Locator {
    #[serde(default)]
    pub strategy: LocatorStrategy,
    #[serde(alias = "locator")]
    pub selector: String,
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Self {
            strategy: LocatorStrategy::Css,
            selector: selector.into(),
        }
    }

    pub fn xpath(selector: impl Into<String>) -> Self {
        Self {
            strategy: LocatorStrategy::XPath,
            selector: selector.into(),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.strategy {
            LocatorStrategy::Css => write!(f, "{}", self.selector),
            other => write!(f, "{}={}", other.as_str(), self.selector),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Click,
    Fill,
    Navigate,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Click => "click",
            Self::Fill => "fill",
            Self::Navigate => "navigate",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionStep {
    #[serde(default, alias = "step")]
    pub description: String,
    pub action: ActionKind,
    #[serde(default, alias = "element")]
    pub target: Option<Locator>,
    #[serde(default, alias = "search_term", alias = "url")]
    pub value: Option<String>,
}

impl ActionStep {
    pub fn click(target: Locator) -> Self {
        Self {
            description: String::new(),
            action: ActionKind::Click,
            target: Some(target),
            value: None,
        }
    }

    pub fn fill(target: Locator, value: impl Into<String>) -> Self {
        Self {
            description: String::new(),
            action: ActionKind::Fill,
            target: Some(target),
            value: Some(value.into()),
        }
    }

    pub fn navigate(url: impl Into<String>) -> Self {
        Self {
            description: String::new(),
            action: ActionKind::Navigate,
            target: None,
            value: Some(url.into()),
        }
    }

    fn validate(&self) -> std::result::Result<(), String> {
        match self.action {
            ActionKind::Click if self.target.is_none() => {
                Err("click action requires a target element".to_string())
            }
            ActionKind::Fill if self.target.is_none() => {
                Err("fill action requires a target element".to_string())
            }
            ActionKind::Fill if self.value.is_none() => {
                Err("fill action requires a value".to_string())
            }
            ActionKind::Navigate if self.value.as_deref().map_or(true, str::is_empty) => {
                Err("navigate action requires a url".to_string())
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ValidationKind {
    ElementExists,
    ElementVisible,
    TextContent,
    TextContains,
    UrlContains,
    /// Number of elements matching the target.
    ElementCount,
    /// Integer rendered inside the target element (e.g. a cart badge).
    #[serde(alias = "cart_items_count")]
    TextCount,
}

impl ValidationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ElementExists => "element_exists",
            Self::ElementVisible => "element_visible",
            Self::TextContent => "text_content",
            Self::TextContains => "text_contains",
            Self::UrlContains => "url_contains",
            Self::ElementCount => "element_count",
            Self::TextCount => "text_count",
        }
    }

    fn needs_target(&self) -> bool {
        !matches!(self, Self::UrlContains)
    }

    fn needs_expected_text(&self) -> bool {
        matches!(self, Self::TextContent | Self::TextContains | Self::UrlContains)
    }

    fn needs_expected_count(&self) -> bool {
        matches!(self, Self::ElementCount | Self::TextCount)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationStep {
    #[serde(default, alias = "step")]
    pub description: String,
    #[serde(alias = "validation_type")]
    pub validation: ValidationKind,
    #[serde(default, alias = "element")]
    pub target: Option<Locator>,
    #[serde(default)]
    pub expected_text: Option<String>,
    #[serde(default, alias = "expected_result")]
    pub expected_count: Option<CountExpectation>,
}

impl ValidationStep {
    pub fn new(validation: ValidationKind) -> Self {
        Self {
            description: String::new(),
            validation,
            target: None,
            expected_text: None,
            expected_count: None,
        }
    }

    pub fn with_target(mut self, target: Locator) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_expected_text(mut self, text: impl Into<String>) -> Self {
        self.expected_text = Some(text.into());
        self
    }

    pub fn with_expected_count(mut self, expectation: CountExpectation) -> Self {
        self.expected_count = Some(expectation);
        self
    }

    fn validate(&self) -> std::result::Result<(), String> {
        let kind = self.validation.as_str();
        if self.validation.needs_target() && self.target.is_none() {
            return Err(format!("{kind} validation requires a target element"));
        }
        if self.validation.needs_expected_text() && self.expected_text.is_none() {
            return Err(format!("{kind} validation requires expected_text"));
        }
        if self.validation.needs_expected_count() && self.expected_count.is_none() {
            return Err(format!("{kind} validation requires expected_result"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Comparator {
    pub fn holds(&self, actual: i64, expected: i64) -> bool {
        match self {
            Self::Eq => actual == expected,
            Self::Gt => actual > expected,
            Self::Gte => actual >= expected,
            Self::Lt => actual < expected,
            Self::Lte => actual <= expected,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
        }
    }
}

/// Numeric expectation evaluated against an extracted count.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "CountExpectationRepr")]
pub struct CountExpectation {
    pub op: Comparator,
    pub value: i64,
}

impl CountExpectation {
    pub fn new(op: Comparator, value: i64) -> Self {
        Self { op, value }
    }

    pub fn equals(value: i64) -> Self {
        Self::new(Comparator::Eq, value)
    }

    pub fn greater_than(value: i64) -> Self {
        Self::new(Comparator::Gt, value)
    }

    pub fn matches(&self, actual: i64) -> bool {
        self.op.holds(actual, self.value)
    }

    /// Parses the named forms used by specification authors,
    /// e.g. `greater_than_0`, `at_most_3` or a bare integer.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if let Ok(value) = raw.parse::<i64>() {
            return Some(Self::equals(value));
        }

        const PREFIXES: [(&str, Comparator); 7] = [
            ("greater_than_", Comparator::Gt),
            ("less_than_", Comparator::Lt),
            ("at_least_", Comparator::Gte),
            ("at_most_", Comparator::Lte),
            ("equal_to_", Comparator::Eq),
            ("equals_", Comparator::Eq),
            ("exactly_", Comparator::Eq),
        ];

        PREFIXES.iter().find_map(|(prefix, op)| {
            raw.strip_prefix(prefix)
                .and_then(|rest| rest.parse::<i64>().ok())
                .map(|value| Self::new(*op, value))
        })
    }
}

impl fmt::Display for CountExpectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.op.symbol(), self.value)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CountExpectationRepr {
    Exact(i64),
    Named(String),
    Explicit { op: Comparator, value: i64 },
}

impl TryFrom<CountExpectationRepr> for CountExpectation {
    type Error = String;

    fn try_from(repr: CountExpectationRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            CountExpectationRepr::Exact(value) => Ok(Self::equals(value)),
            CountExpectationRepr::Explicit { op, value } => Ok(Self::new(op, value)),
            CountExpectationRepr::Named(raw) => {
                Self::parse(&raw).ok_or_else(|| format!("unrecognized count expectation '{raw}'"))
            }
        }
    }
}
