use axum::extract::{Path, Query, State};
use axum::Json;
use bdd_core::TaskRecord;
use db::DEFAULT_HISTORY_LIMIT;
use serde::Deserialize;

use crate::error::AppError;
use crate::state::AppState;

const MAX_HISTORY_LIMIT: u32 = 500;

#[derive(Debug, Deserialize)]
pub struct ExecutionsQuery {
    pub limit: Option<u32>,
}

#[utoipa::path(
    get,
    path = "/api/executions",
    params(
        ("limit" = Option<u32>, Query, description = "Maximum number of records, newest first (default 50)"),
    ),
    responses(
        (status = 200, description = "Execution history"),
    ),
    tag = "executions"
)]
pub async fn list_executions(
    State(state): State<AppState>,
    Query(query): Query<ExecutionsQuery>,
) -> Result<Json<Vec<TaskRecord>>, AppError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .min(MAX_HISTORY_LIMIT);
    let records = state.orchestrator.registry().list(limit).await?;
    Ok(Json(records))
}

#[utoipa::path(
    get,
    path = "/api/executions/{task_id}",
    params(("task_id" = String, Path, description = "Task ID")),
    responses(
        (status = 200, description = "Execution record"),
        (status = 404, description = "Execution not found"),
    ),
    tag = "executions"
)]
pub async fn get_execution(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskRecord>, AppError> {
    let record = state.orchestrator.registry().record(&task_id).await?;
    Ok(Json(record))
}
