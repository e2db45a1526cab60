pub mod config;
pub mod error;
pub mod routes;
pub mod state;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use state::AppState;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "BDD Runner API",
        version = "0.1.0",
        description = "Submit behavioral test specifications and poll their execution"
    ),
    paths(
        routes::health_check,
        routes::submit_task,
        routes::get_task,
        routes::get_task_status,
        routes::get_task_result,
        routes::list_executions,
        routes::get_execution,
        routes::sse::events_stream,
    ),
    components(schemas(
        routes::HealthResponse,
        routes::SubmitTaskRequest,
        routes::SubmitTaskResponse,
        routes::TaskStatusResponse,
        routes::TaskResponse,
        events::EventEnvelope,
        events::Event,
    )),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "tasks", description = "Task submission and polling"),
        (name = "executions", description = "Execution history"),
        (name = "events", description = "Real-time event streaming (SSE)"),
    )
)]
pub struct ApiDoc;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api/openapi.json", ApiDoc::openapi()))
        .route("/health", get(routes::health_check))
        .route("/api/tasks", post(routes::submit_task))
        .route("/api/tasks/{id}", get(routes::get_task))
        .route("/api/tasks/{id}/status", get(routes::get_task_status))
        .route("/api/tasks/{id}/result", get(routes::get_task_result))
        .route("/api/executions", get(routes::list_executions))
        .route("/api/executions/{task_id}", get(routes::get_execution))
        .route("/api/events", get(routes::sse::events_stream))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
