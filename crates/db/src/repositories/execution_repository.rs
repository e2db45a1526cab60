use bdd_core::TaskRecord;
use sqlx::SqlitePool;

use crate::error::Result;
use crate::models::ExecutionRow;

pub const DEFAULT_HISTORY_LIMIT: u32 = 50;

const SELECT_COLUMNS: &str = r#"
    SELECT task_id, test_id, feature_name, status, specification, configuration,
           result, error, total_scenarios, passed_scenarios, failed_scenarios,
           pass_rate, response_code, response_status, created_at, updated_at,
           start_time, end_time
    FROM test_executions
"#;

/// Durable history of task records, keyed by `task_id`.
#[derive(Clone)]
pub struct ExecutionRepository {
    pool: SqlitePool,
}

impl ExecutionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts the record or overwrites the existing row for its task.
    pub async fn upsert(&self, record: &TaskRecord) -> Result<()> {
        let row = ExecutionRow::try_from(record)?;

        sqlx::query(
            r#"
            INSERT INTO test_executions (
                task_id, test_id, feature_name, status, specification, configuration,
                result, error, total_scenarios, passed_scenarios, failed_scenarios,
                pass_rate, response_code, response_status, created_at, updated_at,
                start_time, end_time
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(task_id) DO UPDATE SET
                test_id = excluded.test_id,
                feature_name = excluded.feature_name,
                status = excluded.status,
                specification = excluded.specification,
                configuration = excluded.configuration,
                result = excluded.result,
                error = excluded.error,
                total_scenarios = excluded.total_scenarios,
                passed_scenarios = excluded.passed_scenarios,
                failed_scenarios = excluded.failed_scenarios,
                pass_rate = excluded.pass_rate,
                response_code = excluded.response_code,
                response_status = excluded.response_status,
                updated_at = excluded.updated_at,
                start_time = excluded.start_time,
                end_time = excluded.end_time
            "#,
        )
        .bind(&row.task_id)
        .bind(&row.test_id)
        .bind(&row.feature_name)
        .bind(&row.status)
        .bind(&row.specification)
        .bind(&row.configuration)
        .bind(&row.result)
        .bind(&row.error)
        .bind(row.total_scenarios)
        .bind(row.passed_scenarios)
        .bind(row.failed_scenarios)
        .bind(&row.pass_rate)
        .bind(row.response_code)
        .bind(&row.response_status)
        .bind(row.created_at)
        .bind(row.updated_at)
        .bind(row.start_time)
        .bind(row.end_time)
        .execute(&self.pool)
        .await?;

        tracing::debug!(task_id = %row.task_id, status = %row.status, "Execution record saved");
        Ok(())
    }

    pub async fn find_by_id(&self, task_id: &str) -> Result<Option<TaskRecord>> {
        let query = format!("{} WHERE task_id = ?", SELECT_COLUMNS);
        let row: Option<ExecutionRow> = sqlx::query_as(&query)
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(ExecutionRow::into_domain).transpose()
    }

    /// Most recent executions first.
    pub async fn find_all(&self, limit: u32) -> Result<Vec<TaskRecord>> {
        let query = format!("{} ORDER BY created_at DESC LIMIT ?", SELECT_COLUMNS);
        let rows: Vec<ExecutionRow> = sqlx::query_as(&query)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(ExecutionRow::into_domain).collect()
    }

    /// Tasks still `pending` or `running`, oldest first.
    pub async fn find_unfinished(&self) -> Result<Vec<TaskRecord>> {
        let query = format!(
            "{} WHERE status IN ('pending', 'running') ORDER BY created_at ASC",
            SELECT_COLUMNS
        );
        let rows: Vec<ExecutionRow> = sqlx::query_as(&query).fetch_all(&self.pool).await?;

        rows.into_iter().map(ExecutionRow::into_domain).collect()
    }
}
