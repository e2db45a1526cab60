use bdd_core::{TaskRecord, TaskStatus};
use chrono::{DateTime, TimeZone, Utc};

use crate::error::{DbError, Result};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ExecutionRow {
    pub task_id: String,
    pub test_id: String,
    pub feature_name: String,
    pub status: String,
    pub specification: String,
    pub configuration: String,
    pub result: Option<String>,
    pub error: Option<String>,
    pub total_scenarios: i64,
    pub passed_scenarios: i64,
    pub failed_scenarios: i64,
    pub pass_rate: Option<String>,
    pub response_code: Option<i64>,
    pub response_status: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
}

impl ExecutionRow {
    pub fn into_domain(self) -> Result<TaskRecord> {
        let status = TaskStatus::parse(&self.status).ok_or_else(|| DbError::InvalidRow {
            task_id: self.task_id.clone(),
            reason: format!("unknown status '{}'", self.status),
        })?;

        Ok(TaskRecord {
            test_id: self.test_id,
            feature_name: self.feature_name,
            status,
            specification: serde_json::from_str(&self.specification)?,
            configuration: serde_json::from_str(&self.configuration)?,
            result: self.result.as_deref().map(serde_json::from_str).transpose()?,
            error: self.error,
            total_scenarios: self.total_scenarios.max(0) as u32,
            passed_scenarios: self.passed_scenarios.max(0) as u32,
            failed_scenarios: self.failed_scenarios.max(0) as u32,
            pass_rate: self.pass_rate,
            response_code: self.response_code.and_then(|c| u16::try_from(c).ok()),
            response_status: self.response_status,
            created_at: millis_to_datetime(self.created_at),
            updated_at: millis_to_datetime(self.updated_at),
            start_time: self.start_time.map(millis_to_datetime),
            end_time: self.end_time.map(millis_to_datetime),
            task_id: self.task_id,
        })
    }
}

impl TryFrom<&TaskRecord> for ExecutionRow {
    type Error = DbError;

    fn try_from(record: &TaskRecord) -> Result<Self> {
        Ok(Self {
            task_id: record.task_id.clone(),
            test_id: record.test_id.clone(),
            feature_name: record.feature_name.clone(),
            status: record.status.as_str().to_string(),
            specification: serde_json::to_string(&record.specification)?,
            configuration: serde_json::to_string(&record.configuration)?,
            result: record.result.as_ref().map(serde_json::to_string).transpose()?,
            error: record.error.clone(),
            total_scenarios: i64::from(record.total_scenarios),
            passed_scenarios: i64::from(record.passed_scenarios),
            failed_scenarios: i64::from(record.failed_scenarios),
            pass_rate: record.pass_rate.clone(),
            response_code: record.response_code.map(i64::from),
            response_status: record.response_status.clone(),
            created_at: record.created_at.timestamp_millis(),
            updated_at: record.updated_at.timestamp_millis(),
            start_time: record.start_time.map(|t| t.timestamp_millis()),
            end_time: record.end_time.map(|t| t.timestamp_millis()),
        })
    }
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}
