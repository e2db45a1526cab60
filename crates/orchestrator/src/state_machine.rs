use bdd_core::TaskStatus;

use crate::error::{OrchestratorError, Result};

/// Task lifecycle: `pending -> running -> {completed, failed}`, never
/// backwards.
pub struct TaskStateMachine;

impl TaskStateMachine {
    pub fn validate_transition(from: &TaskStatus, to: &TaskStatus) -> Result<()> {
        if Self::allowed_transitions(from).contains(to) {
            Ok(())
        } else {
            Err(OrchestratorError::InvalidTransition {
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            })
        }
    }

    pub fn allowed_transitions(from: &TaskStatus) -> Vec<TaskStatus> {
        match from {
            TaskStatus::Pending => vec![TaskStatus::Running],
            TaskStatus::Running => vec![TaskStatus::Completed, TaskStatus::Failed],
            TaskStatus::Completed | TaskStatus::Failed => vec![],
        }
    }

    pub fn can_transition(from: &TaskStatus, to: &TaskStatus) -> bool {
        Self::validate_transition(from, to).is_ok()
    }
}
