//! Maps low-level step failures onto [`FailureCategory`], which decides
//! between retrying, failing the step, and escalating.

use bdd_core::FailureCategory;
use browser::BrowserError;

/// Why a single step attempt failed.
#[derive(Debug)]
pub enum StepError {
    /// The session was crashed, closed or released before the attempt.
    SessionUnavailable(String),
    /// A validation ran and its expectation was not met.
    Assertion(String),
    /// The step cannot be carried out as declared.
    InvalidStep(String),
    Browser(BrowserError),
}

impl std::fmt::Display for StepError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SessionUnavailable(reason) => write!(f, "Browser session unavailable: {}", reason),
            Self::Assertion(message) => write!(f, "{}", message),
            Self::InvalidStep(reason) => write!(f, "Invalid step: {}", reason),
            Self::Browser(e) => write!(f, "{}", e),
        }
    }
}

impl From<BrowserError> for StepError {
    fn from(error: BrowserError) -> Self {
        Self::Browser(error)
    }
}

pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn classify(error: &StepError) -> FailureCategory {
        match error {
            StepError::SessionUnavailable(_) => FailureCategory::SessionClosedOrCrashed,
            StepError::Assertion(_) => FailureCategory::AssertionFailure,
            StepError::InvalidStep(_) => FailureCategory::UnclassifiedError,
            StepError::Browser(e) if e.is_session_lost() => FailureCategory::SessionClosedOrCrashed,
            StepError::Browser(e) if e.is_timeout() => FailureCategory::Timeout,
            StepError::Browser(_) => FailureCategory::UnclassifiedError,
        }
    }

    /// Only timeouts are worth another attempt.
    pub fn is_retryable(category: FailureCategory) -> bool {
        category == FailureCategory::Timeout
    }

    /// Ends the scenario without touching the session again.
    pub fn escalates(category: FailureCategory) -> bool {
        category == FailureCategory::SessionClosedOrCrashed
    }
}
