use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::specification::{Feature, Scenario, Step, StepPhase};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Passed,
    Failed,
}

/// Failure taxonomy, in escalation order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    Timeout,
    SessionClosedOrCrashed,
    AssertionFailure,
    UnclassifiedError,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::SessionClosedOrCrashed => "session_closed_or_crashed",
            Self::AssertionFailure => "assertion_failure",
            Self::UnclassifiedError => "unclassified_error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepResult {
    pub step: String,
    pub kind: String,
    pub phase: StepPhase,
    pub status: StepStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<FailureCategory>,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_status: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl StepResult {
    /// Starts a result for `step`; finish it with [`StepResult::pass`] or
    /// [`StepResult::fail`].
    pub fn begin(step: &Step, phase: StepPhase) -> Self {
        let now = Utc::now();
        Self {
            step: step.description(),
            kind: step.kind().to_string(),
            phase,
            status: StepStatus::Failed,
            message: String::new(),
            error: None,
            category: None,
            attempts: 0,
            response_code: None,
            response_status: None,
            started_at: now,
            ended_at: now,
        }
    }

    pub fn pass(mut self, message: impl Into<String>) -> Self {
        self.status = StepStatus::Passed;
        self.message = message.into();
        self.error = None;
        self.category = None;
        self.ended_at = Utc::now();
        self
    }

    pub fn fail(
        mut self,
        category: FailureCategory,
        message: impl Into<String>,
        error: Option<String>,
    ) -> Self {
        self.status = StepStatus::Failed;
        self.category = Some(category);
        self.message = message.into();
        self.error = error;
        self.ended_at = Utc::now();
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_response_code(mut self, code: Option<u16>) -> Self {
        self.response_code = code;
        self.response_status = code.map(|c| response_status_label(c).to_string());
        self
    }

    pub fn is_passed(&self) -> bool {
        self.status == StepStatus::Passed
    }
}

pub fn response_status_label(code: u16) -> &'static str {
    if (200..300).contains(&code) {
        "OK"
    } else {
        "ERROR"
    }
}

/// Scenario outcomes are strictly binary; `partial` exists only at task level.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStatus {
    Passed,
    Failed,
}

impl ScenarioStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScenarioResult {
    pub scenario_id: String,
    pub scenario_name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub status: ScenarioStatus,
    pub steps: Vec<StepResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl ScenarioResult {
    pub fn new(scenario: &Scenario, started_at: DateTime<Utc>) -> Self {
        Self {
            scenario_id: scenario.id.clone(),
            scenario_name: scenario.name.clone(),
            tags: scenario.tags.clone(),
            status: ScenarioStatus::Passed,
            steps: Vec::new(),
            error: None,
            started_at,
            ended_at: started_at,
        }
    }

    /// Result for a scenario rejected before any step ran.
    pub fn rejected(scenario: &Scenario, reason: impl Into<String>) -> Self {
        let mut result = Self::new(scenario, Utc::now());
        result.status = ScenarioStatus::Failed;
        result.error = Some(reason.into());
        result.ended_at = Utc::now();
        result
    }

    pub fn is_passed(&self) -> bool {
        self.status == ScenarioStatus::Passed
    }

    pub fn first_step(&self) -> Option<&StepResult> {
        self.steps.first()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Passed,
    Failed,
    Partial,
}

impl ExecutionStatus {
    /// `passed` when nothing failed, `failed` when nothing passed,
    /// `partial` otherwise.
    pub fn aggregate(passed: usize, failed: usize) -> Self {
        if failed == 0 {
            Self::Passed
        } else if passed == 0 {
            Self::Failed
        } else {
            Self::Partial
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Partial => "partial",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Summary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub pass_rate: String,
}

impl Summary {
    pub fn from_scenarios(scenarios: &[ScenarioResult]) -> Self {
        let total = scenarios.len();
        let passed = scenarios.iter().filter(|s| s.is_passed()).count();
        let failed = total - passed;
        Self {
            total,
            passed,
            failed,
            pass_rate: format_pass_rate(passed, total),
        }
    }
}

pub fn format_pass_rate(passed: usize, total: usize) -> String {
    if total == 0 {
        return "0%".to_string();
    }
    format!("{:.2}%", passed as f64 / total as f64 * 100.0)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionResult {
    pub feature: Feature,
    pub scenarios: Vec<ScenarioResult>,
    pub summary: Summary,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_status: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl ExecutionResult {
    pub fn from_scenarios(
        feature: Feature,
        scenarios: Vec<ScenarioResult>,
        started_at: DateTime<Utc>,
    ) -> Self {
        let summary = Summary::from_scenarios(&scenarios);
        let status = ExecutionStatus::aggregate(summary.passed, summary.failed);
        let first_step = scenarios.first().and_then(ScenarioResult::first_step);
        let response_code = first_step.and_then(|s| s.response_code);
        let response_status = first_step.and_then(|s| s.response_status.clone());

        Self {
            feature,
            scenarios,
            summary,
            status,
            error: None,
            response_code,
            response_status,
            started_at,
            ended_at: Utc::now(),
        }
    }

    /// Result of a run that could not execute any scenario.
    pub fn aborted(feature: Feature, error: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            feature,
            scenarios: Vec::new(),
            summary: Summary::from_scenarios(&[]),
            status: ExecutionStatus::Failed,
            error: Some(error.into()),
            response_code: None,
            response_status: None,
            started_at,
            ended_at: Utc::now(),
        }
    }
}
