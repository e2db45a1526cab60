use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::config::RunConfig;
use super::result::ExecutionResult;
use super::specification::Specification;
use super::task::{Task, TaskStatus};

/// Persisted shape of a task, identical for the file and durable tiers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskRecord {
    pub task_id: String,
    pub test_id: String,
    pub feature_name: String,
    pub status: TaskStatus,
    pub specification: Specification,
    pub configuration: RunConfig,
    pub result: Option<ExecutionResult>,
    pub error: Option<String>,
    pub total_scenarios: u32,
    pub passed_scenarios: u32,
    pub failed_scenarios: u32,
    pub pass_rate: Option<String>,
    pub response_code: Option<u16>,
    pub response_status: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl From<&Task> for TaskRecord {
    fn from(task: &Task) -> Self {
        let summary = task.result.as_ref().map(|r| &r.summary);

        Self {
            task_id: task.id.clone(),
            test_id: task.test_id(),
            feature_name: task.feature_name().to_string(),
            status: task.status,
            specification: task.specification.clone(),
            configuration: task.configuration.clone(),
            result: task.result.clone(),
            error: task.error.clone(),
            total_scenarios: summary.map_or(0, |s| s.total as u32),
            passed_scenarios: summary.map_or(0, |s| s.passed as u32),
            failed_scenarios: summary.map_or(0, |s| s.failed as u32),
            pass_rate: summary.map(|s| s.pass_rate.clone()),
            response_code: task.result.as_ref().and_then(|r| r.response_code),
            response_status: task.result.as_ref().and_then(|r| r.response_status.clone()),
            created_at: task.created_at,
            updated_at: task.updated_at,
            start_time: task.started_at,
            end_time: task.ended_at,
        }
    }
}

impl From<TaskRecord> for Task {
    fn from(record: TaskRecord) -> Self {
        Self {
            id: record.task_id,
            specification: record.specification,
            configuration: record.configuration,
            status: record.status,
            result: record.result,
            error: record.error,
            created_at: record.created_at,
            updated_at: record.updated_at,
            started_at: record.start_time,
            ended_at: record.end_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::result::{ScenarioResult, ScenarioStatus};
    use crate::domain::specification::{Feature, Scenario};

    #[test]
    fn test_record_from_pending_task() {
        let task = Task::new(
            Specification::new(Feature::new("Search"), Vec::new()),
            RunConfig::default(),
        );
        let record = TaskRecord::from(&task);

        assert_eq!(record.task_id, task.id);
        assert_eq!(record.test_id.len(), 8);
        assert_eq!(record.feature_name, "Search");
        assert_eq!(record.status, TaskStatus::Pending);
        assert_eq!(record.total_scenarios, 0);
        assert!(record.pass_rate.is_none());
    }

    #[test]
    fn test_record_carries_summary() {
        let scenario = Scenario::new("a", "A");
        let mut passed = ScenarioResult::new(&scenario, Utc::now());
        passed.status = ScenarioStatus::Passed;
        let mut failed = passed.clone();
        failed.status = ScenarioStatus::Failed;

        let mut task = Task::new(
            Specification::new(Feature::new("Search"), vec![scenario]),
            RunConfig::default(),
        );
        task.status = TaskStatus::Completed;
        task.result = Some(ExecutionResult::from_scenarios(
            Feature::new("Search"),
            vec![passed, failed],
            Utc::now(),
        ));

        let record = TaskRecord::from(&task);
        assert_eq!(record.total_scenarios, 2);
        assert_eq!(record.passed_scenarios, 1);
        assert_eq!(record.failed_scenarios, 1);
        assert_eq!(record.pass_rate.as_deref(), Some("50.00%"));

        let restored = Task::from(record);
        assert_eq!(restored, task);
    }

    #[test]
    fn test_record_json_field_names() {
        let task = Task::new(
            Specification::new(Feature::new("Search"), Vec::new()),
            RunConfig::default(),
        );
        let value = serde_json::to_value(TaskRecord::from(&task)).unwrap();

        for field in [
            "task_id",
            "test_id",
            "feature_name",
            "status",
            "specification",
            "configuration",
            "result",
            "error",
            "total_scenarios",
            "passed_scenarios",
            "failed_scenarios",
            "pass_rate",
            "response_code",
            "response_status",
            "created_at",
            "updated_at",
            "start_time",
            "end_time",
        ] {
            assert!(value.get(field).is_some(), "missing field {field}");
        }
        assert_eq!(value["status"], "pending");
    }
}
