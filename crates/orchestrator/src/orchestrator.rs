use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use bdd_core::{ExecutionResult, RunConfig, ScenarioResult, Specification, Task, TaskStatus};
use chrono::Utc;
use events::{Event, EventBus};
use futures::FutureExt;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::executor::ExecutorConfig;
use crate::registry::TaskRegistry;
use crate::scenario::ScenarioRunner;
use crate::session::{BrowserSession, BrowserSessionManager};
use crate::state_machine::TaskStateMachine;

/// Drives a task from submission to a terminal status.
///
/// `run` owns the task's only browser session and releases it on every
/// exit path, including a panic inside scenario execution.
#[derive(Clone)]
pub struct TaskOrchestrator {
    registry: Arc<TaskRegistry>,
    sessions: BrowserSessionManager,
    events: EventBus,
    config: ExecutorConfig,
}

impl TaskOrchestrator {
    pub fn new(
        registry: Arc<TaskRegistry>,
        sessions: BrowserSessionManager,
        events: EventBus,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            registry,
            sessions,
            events,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Records a pending task and returns its identifier without running it.
    pub async fn submit(&self, specification: Specification, config: RunConfig) -> String {
        let task = Task::new(specification, config);
        let task_id = task.id.clone();
        let feature_name = task.feature_name().to_string();

        self.registry.put(task).await;
        info!(task_id = %task_id, feature = %feature_name, "Task submitted");
        self.events.emit(Event::TaskSubmitted {
            task_id: task_id.clone(),
            feature_name,
        });

        task_id
    }

    /// Runs a pending task to completion and returns its final state.
    ///
    /// Session acquisition failures end the task as `failed` rather than
    /// surfacing as an error; only lookup and transition errors propagate.
    pub async fn run(&self, task_id: &str) -> Result<Task> {
        let mut task = self.registry.get(task_id).await?;
        self.transition(&mut task, TaskStatus::Running)?;
        task.started_at = Some(Utc::now());
        self.registry.update(task.clone()).await;

        let started_at = task.started_at.unwrap_or_else(Utc::now);
        let feature = task.specification.feature.clone();

        let mut session = match self.sessions.acquire(&task.id, &task.configuration).await {
            Ok(session) => session,
            Err(e) => {
                error!(task_id = %task.id, error = %e, "Task aborted before any scenario ran");
                let message = e.to_string();
                task.result = Some(ExecutionResult::aborted(feature, &message, started_at));
                task.error = Some(message);
                return self.finish(task, TaskStatus::Failed).await;
            }
        };

        let outcome = AssertUnwindSafe(self.run_scenarios(&session, &task))
            .catch_unwind()
            .await;
        self.sessions.release(&mut session).await;

        match outcome {
            Ok(scenarios) => {
                let result = ExecutionResult::from_scenarios(feature, scenarios, started_at);
                info!(
                    task_id = %task.id,
                    status = result.status.as_str(),
                    passed = result.summary.passed,
                    failed = result.summary.failed,
                    pass_rate = %result.summary.pass_rate,
                    "Task execution finished"
                );
                task.result = Some(result);
                self.finish(task, TaskStatus::Completed).await
            }
            Err(panic) => {
                let message = format!("Execution panicked: {}", panic_message(panic.as_ref()));
                error!(task_id = %task.id, error = %message, "Task execution panicked");
                task.result = Some(ExecutionResult::aborted(feature, &message, started_at));
                task.error = Some(message);
                self.finish(task, TaskStatus::Failed).await
            }
        }
    }

    /// Settles tasks a previous process left unfinished. Tasks caught
    /// `running` end as `failed`; tasks still `pending` are returned so the
    /// caller can schedule them again.
    pub async fn recover_interrupted(&self) -> Result<Vec<String>> {
        let mut pending = Vec::new();

        for mut task in self.registry.unfinished().await? {
            match task.status {
                TaskStatus::Pending => {
                    self.registry.put(task.clone()).await;
                    pending.push(task.id);
                }
                TaskStatus::Running => {
                    let message = "Interrupted: the runner stopped while this task was running";
                    let started_at = task.started_at.unwrap_or(task.created_at);
                    warn!(task_id = %task.id, "Marking interrupted task as failed");
                    task.result = Some(ExecutionResult::aborted(
                        task.specification.feature.clone(),
                        message,
                        started_at,
                    ));
                    task.error = Some(message.to_string());
                    self.finish(task, TaskStatus::Failed).await?;
                }
                TaskStatus::Completed | TaskStatus::Failed => {}
            }
        }

        if !pending.is_empty() {
            info!(count = pending.len(), "Rescheduling tasks left pending");
        }
        Ok(pending)
    }

    async fn run_scenarios(&self, session: &BrowserSession, task: &Task) -> Vec<ScenarioResult> {
        let runner = ScenarioRunner::new(session, &task.configuration, &self.config, &self.events);
        let mut results = Vec::with_capacity(task.specification.scenarios.len());

        for scenario in &task.specification.scenarios {
            if let Some(reason) = session.unavailable_reason() {
                warn!(
                    task_id = %task.id,
                    scenario = %scenario.label(),
                    reason,
                    "Running scenario without a usable session"
                );
            }
            results.push(runner.run(scenario).await);
        }

        results
    }

    async fn finish(&self, mut task: Task, status: TaskStatus) -> Result<Task> {
        self.transition(&mut task, status)?;
        task.ended_at = Some(Utc::now());
        self.registry.update(task.clone()).await;
        info!(task_id = %task.id, status = status.as_str(), "Task finished");
        Ok(task)
    }

    fn transition(&self, task: &mut Task, to: TaskStatus) -> Result<()> {
        TaskStateMachine::validate_transition(&task.status, &to)?;
        let from = std::mem::replace(&mut task.status, to);
        self.events.emit(Event::TaskStatusChanged {
            task_id: task.id.clone(),
            from_status: from.as_str().to_string(),
            to_status: to.as_str().to_string(),
        });
        Ok(())
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
