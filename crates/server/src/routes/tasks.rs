use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use bdd_core::{ExecutionResult, RunConfigOverrides, Specification, Task, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct SubmitTaskRequest {
    /// Normalized specification: `feature`, `scenarios` and an optional
    /// `configuration` block.
    #[schema(value_type = Object)]
    pub specification: Value,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SubmitTaskResponse {
    pub task_id: String,
    pub status: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TaskStatusResponse {
    pub task_id: String,
    pub status: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TaskResponse {
    pub task_id: String,
    pub test_id: String,
    pub feature_name: String,
    pub status: String,
    #[schema(value_type = Object)]
    pub configuration: Value,
    #[schema(value_type = Option<Object>)]
    pub result: Option<ExecutionResult>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl From<Task> for TaskResponse {
    fn from(task: Task) -> Self {
        Self {
            test_id: task.test_id(),
            feature_name: task.feature_name().to_string(),
            status: task.status.as_str().to_string(),
            configuration: serde_json::to_value(&task.configuration).unwrap_or(Value::Null),
            result: task.result,
            error: task.error,
            created_at: task.created_at,
            updated_at: task.updated_at,
            start_time: task.started_at,
            end_time: task.ended_at,
            task_id: task.id,
        }
    }
}

/// Splits a submission into the specification tree and its run
/// configuration, filling unset fields from `defaults`.
pub fn parse_submission(
    mut raw: Value,
    defaults: &bdd_core::RunConfig,
) -> Result<(Specification, bdd_core::RunConfig), AppError> {
    let object = raw
        .as_object_mut()
        .ok_or_else(|| AppError::BadRequest("Specification must be a JSON object".to_string()))?;
    if !object.contains_key("scenarios") {
        return Err(AppError::BadRequest(
            "Invalid specification format: missing scenarios".to_string(),
        ));
    }

    let overrides = match object.remove("configuration") {
        Some(Value::Null) | None => RunConfigOverrides::default(),
        Some(value) => serde_json::from_value(value)
            .map_err(|e| AppError::BadRequest(format!("Invalid configuration: {}", e)))?,
    };
    let specification = serde_json::from_value(raw)
        .map_err(|e| AppError::BadRequest(format!("Invalid specification: {}", e)))?;

    Ok((specification, overrides.apply_to(defaults.clone())))
}

#[utoipa::path(
    post,
    path = "/api/tasks",
    request_body = SubmitTaskRequest,
    responses(
        (status = 202, description = "Task accepted", body = SubmitTaskResponse),
        (status = 400, description = "Malformed specification"),
    ),
    tag = "tasks"
)]
pub async fn submit_task(
    State(state): State<AppState>,
    Json(payload): Json<SubmitTaskRequest>,
) -> Result<(StatusCode, Json<SubmitTaskResponse>), AppError> {
    let (specification, config) = parse_submission(payload.specification, &state.run_defaults)?;

    let task_id = state.orchestrator.submit(specification, config).await;
    state.workers.spawn(task_id.clone());

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitTaskResponse {
            task_id,
            status: TaskStatus::Pending.as_str().to_string(),
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/api/tasks/{id}",
    params(("id" = String, Path, description = "Task ID")),
    responses(
        (status = 200, description = "Task", body = TaskResponse),
        (status = 404, description = "Task not found"),
    ),
    tag = "tasks"
)]
pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TaskResponse>, AppError> {
    let task = state.orchestrator.registry().get(&id).await?;
    Ok(Json(task.into()))
}

#[utoipa::path(
    get,
    path = "/api/tasks/{id}/status",
    params(("id" = String, Path, description = "Task ID")),
    responses(
        (status = 200, description = "Task status", body = TaskStatusResponse),
        (status = 404, description = "Task not found"),
    ),
    tag = "tasks"
)]
pub async fn get_task_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TaskStatusResponse>, AppError> {
    let task = state.orchestrator.registry().get(&id).await?;
    Ok(Json(TaskStatusResponse {
        task_id: task.id,
        status: task.status.as_str().to_string(),
    }))
}

#[utoipa::path(
    get,
    path = "/api/tasks/{id}/result",
    params(("id" = String, Path, description = "Task ID")),
    responses(
        (status = 200, description = "Execution result"),
        (status = 404, description = "Task not found"),
        (status = 409, description = "Task has not finished"),
    ),
    tag = "tasks"
)]
pub async fn get_task_result(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ExecutionResult>, AppError> {
    let task = state.orchestrator.registry().get(&id).await?;

    match task.result {
        Some(result) if task.status.is_terminal() => Ok(Json(result)),
        _ => Err(AppError::Conflict(format!(
            "Task {} is {}",
            task.id,
            task.status.as_str()
        ))),
    }
}
