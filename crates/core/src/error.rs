use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Invalid task status transition from {from} to {to}")]
    InvalidStatusTransition { from: String, to: String },

    #[error("Malformed scenario '{scenario}': {reason}")]
    MalformedScenario { scenario: String, reason: String },

    #[error("Validation error: {0}")]
    Validation(String),
}

impl CoreError {
    pub fn malformed(scenario: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedScenario {
            scenario: scenario.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = CoreError::TaskNotFound("abc-123".to_string());
        assert!(error.to_string().contains("abc-123"));
    }

    #[test]
    fn test_malformed_display() {
        let error = CoreError::malformed("Add to cart", "scenario has no steps");
        assert_eq!(
            error.to_string(),
            "Malformed scenario 'Add to cart': scenario has no steps"
        );
    }
}
