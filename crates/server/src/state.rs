use std::sync::{Arc, RwLock};

use anyhow::Context;
use bdd_core::RunConfig;
use events::EventBus;
use orchestrator::{
    BackendFactory, BrowserSessionManager, ExecutorConfig, SessionPolicy, TaskOrchestrator,
    TaskRegistry, WebDriverFactory, WorkerPool,
};

use crate::config::AppConfig;
use crate::routes::sse::{
    spawn_event_recorder, EventBuffer, SharedEventBuffer, DEFAULT_EVENT_BUFFER_SIZE,
};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: TaskOrchestrator,
    pub workers: WorkerPool,
    pub event_bus: EventBus,
    pub event_buffer: SharedEventBuffer,
    /// Applied to submissions that leave configuration fields out.
    pub run_defaults: RunConfig,
}

impl AppState {
    /// Must be called inside a tokio runtime; the SSE replay buffer is fed
    /// by a spawned recorder task.
    pub fn new(orchestrator: TaskOrchestrator, max_concurrent: usize, run_defaults: RunConfig) -> Self {
        let event_bus = orchestrator.events().clone();
        let workers = WorkerPool::new(orchestrator.clone(), max_concurrent);
        let event_buffer = Arc::new(RwLock::new(EventBuffer::new(DEFAULT_EVENT_BUFFER_SIZE)));
        spawn_event_recorder(&event_bus, Arc::clone(&event_buffer));

        Self {
            orchestrator,
            workers,
            event_bus,
            event_buffer,
            run_defaults,
        }
    }

    /// Opens the durable store and wires every component with WebDriver
    /// backends.
    pub async fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        Self::with_factory(config, Arc::new(WebDriverFactory::new(config.driver()))).await
    }

    pub async fn with_factory(
        config: &AppConfig,
        factory: Arc<dyn BackendFactory>,
    ) -> anyhow::Result<Self> {
        let pool = db::create_pool(&config.database_url)
            .await
            .context("Failed to create database pool")?;
        db::run_migrations(&pool)
            .await
            .context("Failed to run database migrations")?;

        let registry = TaskRegistry::new(config.registry())
            .with_durable(db::ExecutionRepository::new(pool));
        let sessions = BrowserSessionManager::new(factory, SessionPolicy::default());
        let orchestrator = TaskOrchestrator::new(
            Arc::new(registry),
            sessions,
            EventBus::new(),
            ExecutorConfig::default(),
        );

        tracing::info!(
            database = %config.database_url,
            results_dir = %config.results_dir.display(),
            max_concurrent_tasks = config.max_concurrent_tasks,
            "Application state ready"
        );

        let pending = orchestrator
            .recover_interrupted()
            .await
            .context("Failed to recover interrupted tasks")?;
        let state = Self::new(orchestrator, config.max_concurrent_tasks, config.run_defaults());
        for task_id in pending {
            state.workers.spawn(task_id);
        }

        Ok(state)
    }
}
