use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use axum_test::TestServer;
use bdd_core::{Locator, RunConfig, WaitUntil};
use browser::{BrowserBackend, ContextOptions, LaunchOptions, SessionFlags};
use orchestrator::BackendFactory;
use serde_json::{json, Value};
use server::config::AppConfig;
use server::{create_router, state::AppState};
use tempfile::TempDir;

/// Browser that loads every page and finds a single visible `#result`.
struct StaticBackend {
    flags: SessionFlags,
    hold_startup: bool,
}

#[async_trait]
impl BrowserBackend for StaticBackend {
    async fn start(&mut self, _timeout: Duration) -> browser::Result<()> {
        if self.hold_startup {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Ok(())
    }

    async fn launch(&mut self, _options: &LaunchOptions) -> browser::Result<()> {
        self.flags.mark_connected();
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.flags.is_connected()
    }

    async fn new_context(&mut self, _options: &ContextOptions) -> browser::Result<()> {
        Ok(())
    }

    async fn new_page(&mut self, _default_timeout: Duration) -> browser::Result<()> {
        Ok(())
    }

    fn flags(&self) -> SessionFlags {
        self.flags.clone()
    }

    async fn close_page(&mut self) -> browser::Result<()> {
        self.flags.mark_closed();
        Ok(())
    }

    async fn close_context(&mut self) -> browser::Result<()> {
        Ok(())
    }

    async fn close_browser(&mut self) -> browser::Result<()> {
        self.flags.mark_disconnected();
        Ok(())
    }

    async fn stop(&mut self) -> browser::Result<()> {
        Ok(())
    }

    async fn goto(
        &self,
        _url: &str,
        _wait_until: WaitUntil,
        _timeout: Duration,
    ) -> browser::Result<Option<u16>> {
        Ok(Some(200))
    }

    async fn click(&self, _target: &Locator, _timeout: Duration) -> browser::Result<()> {
        Ok(())
    }

    async fn fill(&self, _target: &Locator, _value: &str, _timeout: Duration) -> browser::Result<()> {
        Ok(())
    }

    async fn count(&self, target: &Locator) -> browser::Result<usize> {
        Ok(usize::from(target.selector == "#result"))
    }

    async fn is_visible(&self, target: &Locator) -> browser::Result<bool> {
        Ok(target.selector == "#result")
    }

    async fn text_content(&self, _target: Option<&Locator>) -> browser::Result<String> {
        Ok("Results".to_string())
    }

    async fn current_url(&self) -> browser::Result<String> {
        Ok("https://shop.example/".to_string())
    }
}

struct StaticFactory {
    hold_startup: bool,
}

impl BackendFactory for StaticFactory {
    fn create(&self, _config: &RunConfig) -> Box<dyn BrowserBackend> {
        Box::new(StaticBackend {
            flags: SessionFlags::new(),
            hold_startup: self.hold_startup,
        })
    }
}

fn test_config(temp_dir: &TempDir) -> AppConfig {
    AppConfig {
        results_dir: temp_dir.path().join("results"),
        database_url: format!("sqlite:{}", temp_dir.path().join("executions.db").display()),
        ..AppConfig::default()
    }
}

async fn setup_test_server(hold_startup: bool) -> (TestServer, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let server = start_server(&temp_dir, hold_startup).await;
    (server, temp_dir)
}

async fn start_server(temp_dir: &TempDir, hold_startup: bool) -> TestServer {
    let config = test_config(temp_dir);
    let state = AppState::with_factory(&config, Arc::new(StaticFactory { hold_startup }))
        .await
        .expect("Failed to build state");
    TestServer::new(create_router(state)).expect("Failed to create test server")
}

fn specification(visible_selector: &str) -> Value {
    json!({
        "specification": {
            "feature": {"name": "Search"},
            "configuration": {"base_url": "https://shop.example", "timeout": 5000},
            "scenarios": [{
                "scenario_id": "s1",
                "scenario_name": "Search shows results",
                "given": [{"kind": "navigation", "step": "open home", "url": "/"}],
                "when": [{
                    "kind": "action",
                    "step": "search",
                    "action": "fill",
                    "element": {"locator": "#q"},
                    "value": "laptop"
                }],
                "then": [{
                    "kind": "validation",
                    "step": "results visible",
                    "validation_type": "element_visible",
                    "element": {"locator": visible_selector}
                }]
            }]
        }
    })
}

async fn submit(server: &TestServer, body: &Value) -> String {
    let response = server.post("/api/tasks").json(body).await;
    response.assert_status(StatusCode::ACCEPTED);
    let body: Value = response.json();
    assert_eq!(body["status"], "pending");
    body["task_id"].as_str().unwrap().to_string()
}

async fn wait_for_terminal(server: &TestServer, task_id: &str) -> Value {
    for _ in 0..500 {
        let body: Value = server
            .get(&format!("/api/tasks/{}/status", task_id))
            .await
            .json();
        if body["status"] == "completed" || body["status"] == "failed" {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {} never finished", task_id);
}

mod health {
    use super::*;

    #[tokio::test]
    async fn test_health_endpoint() {
        let (server, _temp_dir) = setup_test_server(false).await;

        let response = server.get("/health").await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["status"], "ok");
        assert!(body["version"].is_string());
    }

    #[tokio::test]
    async fn test_openapi_document() {
        let (server, _temp_dir) = setup_test_server(false).await;

        let response = server.get("/api/openapi.json").await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert!(body["paths"]["/api/tasks"].is_object());
    }
}

mod tasks {
    use super::*;

    #[tokio::test]
    async fn test_submit_and_poll_until_completed() {
        let (server, _temp_dir) = setup_test_server(false).await;

        let task_id = submit(&server, &specification("#result")).await;
        let status = wait_for_terminal(&server, &task_id).await;
        assert_eq!(status["status"], "completed");
        assert_eq!(status["task_id"], task_id);

        let result: Value = server
            .get(&format!("/api/tasks/{}/result", task_id))
            .await
            .json();
        assert_eq!(result["status"], "passed");
        assert_eq!(result["summary"]["pass_rate"], "100.00%");
        assert_eq!(result["scenarios"][0]["steps"].as_array().unwrap().len(), 3);
        assert_eq!(result["response_code"], 200);

        let task: Value = server.get(&format!("/api/tasks/{}", task_id)).await.json();
        assert_eq!(task["feature_name"], "Search");
        assert_eq!(task["test_id"], &task_id[..8]);
        assert_eq!(task["configuration"]["timeout_ms"], 5000);
    }

    #[tokio::test]
    async fn test_failed_assertion_is_still_completed() {
        let (server, _temp_dir) = setup_test_server(false).await;

        let task_id = submit(&server, &specification("#missing")).await;
        wait_for_terminal(&server, &task_id).await;

        let result: Value = server
            .get(&format!("/api/tasks/{}/result", task_id))
            .await
            .json();
        assert_eq!(result["status"], "failed");
        assert_eq!(result["summary"]["pass_rate"], "0.00%");
        assert_eq!(
            result["scenarios"][0]["steps"][2]["category"],
            "assertion_failure"
        );
    }

    #[tokio::test]
    async fn test_result_conflicts_while_running() {
        let (server, _temp_dir) = setup_test_server(true).await;

        let task_id = submit(&server, &specification("#result")).await;
        let response = server.get(&format!("/api/tasks/{}/result", task_id)).await;
        response.assert_status(StatusCode::CONFLICT);
        let body: Value = response.json();
        assert_eq!(body["error"], "conflict");
    }

    #[tokio::test]
    async fn test_unknown_task_is_not_found() {
        let (server, _temp_dir) = setup_test_server(false).await;

        for path in [
            "/api/tasks/nope",
            "/api/tasks/nope/status",
            "/api/tasks/nope/result",
            "/api/executions/nope",
        ] {
            let response = server.get(path).await;
            response.assert_status_not_found();
            let body: Value = response.json();
            assert_eq!(body["error"], "not_found");
        }
    }

    #[tokio::test]
    async fn test_submit_without_scenarios_is_bad_request() {
        let (server, _temp_dir) = setup_test_server(false).await;

        let response = server
            .post("/api/tasks")
            .json(&json!({"specification": {"feature": {"name": "Empty"}}}))
            .await;
        response.assert_status_bad_request();
        let body: Value = response.json();
        assert_eq!(body["error"], "bad_request");
    }
}

mod executions {
    use super::*;

    #[tokio::test]
    async fn test_history_lists_finished_tasks() {
        let (server, temp_dir) = setup_test_server(false).await;

        let first = submit(&server, &specification("#result")).await;
        wait_for_terminal(&server, &first).await;
        let second = submit(&server, &specification("#missing")).await;
        wait_for_terminal(&server, &second).await;

        let records: Value = server.get("/api/executions").await.json();
        assert_eq!(records.as_array().unwrap().len(), 2);

        let limited: Value = server.get("/api/executions?limit=1").await.json();
        assert_eq!(limited.as_array().unwrap().len(), 1);

        let record: Value = server.get(&format!("/api/executions/{}", first)).await.json();
        assert_eq!(record["task_id"], first);
        assert_eq!(record["status"], "completed");
        assert_eq!(record["total_scenarios"], 1);
        assert_eq!(record["passed_scenarios"], 1);
        assert_eq!(record["pass_rate"], "100.00%");
        assert_eq!(record["response_status"], "OK");

        let snapshot = temp_dir.path().join("results").join(format!("{}.json", first));
        assert!(snapshot.exists());
    }
}

mod restart {
    use super::*;
    use bdd_core::{Specification, Task, TaskRecord, TaskStatus};

    fn stored_task(status: TaskStatus) -> Task {
        let specification: Specification =
            serde_json::from_value(specification("#result")["specification"].clone()).unwrap();
        let mut task = Task::new(
            specification,
            RunConfig::default().with_base_url("https://shop.example"),
        );
        task.status = status;
        task
    }

    #[tokio::test]
    async fn test_startup_settles_tasks_left_unfinished() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(&temp_dir);
        let pool = db::create_pool(&config.database_url).await.unwrap();
        db::run_migrations(&pool).await.unwrap();
        let repository = db::ExecutionRepository::new(pool);

        let running = stored_task(TaskStatus::Running);
        let pending = stored_task(TaskStatus::Pending);
        repository.upsert(&TaskRecord::from(&running)).await.unwrap();
        repository.upsert(&TaskRecord::from(&pending)).await.unwrap();

        let server = start_server(&temp_dir, false).await;

        let status: Value = server
            .get(&format!("/api/tasks/{}/status", running.id))
            .await
            .json();
        assert_eq!(status["status"], "failed");
        let task: Value = server.get(&format!("/api/tasks/{}", running.id)).await.json();
        assert!(task["error"].as_str().unwrap().starts_with("Interrupted"));
        assert!(task["result"].is_object());

        let resumed = wait_for_terminal(&server, &pending.id).await;
        assert_eq!(resumed["status"], "completed");
    }
}
