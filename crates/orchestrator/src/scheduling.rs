//! Where task execution happens: a bounded pool for concurrent tasks, and a
//! blocking entry point that never nests inside a running runtime.

use std::sync::Arc;

use bdd_core::Task;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::error::{OrchestratorError, Result};
use crate::orchestrator::TaskOrchestrator;

pub const DEFAULT_MAX_CONCURRENT_TASKS: usize = 4;

/// Runs submitted tasks concurrently, at most `max_concurrent` at a time.
/// Each running task holds one browser session.
#[derive(Clone)]
pub struct WorkerPool {
    orchestrator: TaskOrchestrator,
    permits: Arc<Semaphore>,
    max_concurrent: usize,
}

impl WorkerPool {
    pub fn new(orchestrator: TaskOrchestrator, max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            orchestrator,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    pub fn orchestrator(&self) -> &TaskOrchestrator {
        &self.orchestrator
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Tasks currently holding a slot.
    pub fn active(&self) -> usize {
        self.max_concurrent - self.permits.available_permits()
    }

    /// Queues the task and returns immediately.
    pub fn spawn(&self, task_id: String) -> JoinHandle<()> {
        let orchestrator = self.orchestrator.clone();
        let permits = self.permits.clone();

        tokio::spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!(task_id = %task_id, error = %e, "Worker pool closed");
                    return;
                }
            };

            debug!(task_id = %task_id, "Worker slot acquired");
            if let Err(e) = orchestrator.run(&task_id).await {
                error!(task_id = %task_id, error = %e, "Task run failed");
            }
        })
    }
}

/// Whether the caller already sits inside an async runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingContext {
    /// No runtime is active; one can be created on this thread.
    Inline,
    /// A runtime is active; execution must move to its own thread.
    Isolated,
}

impl SchedulingContext {
    pub fn current() -> Self {
        if tokio::runtime::Handle::try_current().is_ok() {
            Self::Isolated
        } else {
            Self::Inline
        }
    }
}

/// Runs a task to completion from synchronous code.
pub fn run_blocking(
    orchestrator: &TaskOrchestrator,
    task_id: &str,
    context: SchedulingContext,
) -> Result<Task> {
    match context {
        SchedulingContext::Inline => run_on_fresh_runtime(orchestrator, task_id),
        SchedulingContext::Isolated => {
            let orchestrator = orchestrator.clone();
            let task_id = task_id.to_string();
            std::thread::Builder::new()
                .name(format!("task-{}", task_id))
                .spawn(move || run_on_fresh_runtime(&orchestrator, &task_id))?
                .join()
                .map_err(|_| OrchestratorError::ExecutionFailed("task thread panicked".to_string()))?
        }
    }
}

fn run_on_fresh_runtime(orchestrator: &TaskOrchestrator, task_id: &str) -> Result<Task> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(orchestrator.run(task_id))
}
