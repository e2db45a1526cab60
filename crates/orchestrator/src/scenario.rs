//! Runs one scenario through its Given/When/Then phases.

use bdd_core::{RunConfig, Scenario, ScenarioResult, ScenarioStatus, StepPhase, StepStatus};
use chrono::Utc;
use events::{Event, EventBus};
use tracing::{debug, info, warn};

use crate::classifier::ErrorClassifier;
use crate::executor::{ExecutorConfig, StepExecutor};
use crate::session::BrowserSession;

/// Scenario progress. Only forward transitions exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioPhase {
    NotStarted,
    RunningGiven,
    RunningWhen,
    RunningThen,
    Done(ScenarioStatus),
}

impl ScenarioPhase {
    fn rank(&self) -> u8 {
        match self {
            Self::NotStarted => 0,
            Self::RunningGiven => 1,
            Self::RunningWhen => 2,
            Self::RunningThen => 3,
            Self::Done(_) => 4,
        }
    }

    pub fn running(phase: StepPhase) -> Self {
        match phase {
            StepPhase::Given => Self::RunningGiven,
            StepPhase::When => Self::RunningWhen,
            StepPhase::Then => Self::RunningThen,
        }
    }

    /// A scenario may skip phases (an empty When) or finish from any
    /// running phase, but never move backwards or leave `Done`.
    pub fn can_transition(&self, to: &ScenarioPhase) -> bool {
        match (self, to) {
            (Self::Done(_), _) => false,
            (Self::NotStarted, Self::Done(_)) => true,
            _ => to.rank() > self.rank(),
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done(_))
    }
}

pub struct ScenarioRunner<'a> {
    session: &'a BrowserSession,
    run: &'a RunConfig,
    config: &'a ExecutorConfig,
    events: &'a EventBus,
}

impl<'a> ScenarioRunner<'a> {
    pub fn new(
        session: &'a BrowserSession,
        run: &'a RunConfig,
        config: &'a ExecutorConfig,
        events: &'a EventBus,
    ) -> Self {
        Self {
            session,
            run,
            config,
            events,
        }
    }

    /// Never fails: malformed input and step errors end up in the result.
    pub async fn run(&self, scenario: &Scenario) -> ScenarioResult {
        let task_id = self.session.task_id();

        if let Err(e) = scenario.validate() {
            warn!(task_id = %task_id, scenario = %scenario.label(), error = %e, "Scenario rejected");
            let result = ScenarioResult::rejected(scenario, e.to_string());
            self.emit_finished(&result);
            return result;
        }

        info!(
            task_id = %task_id,
            scenario = %scenario.label(),
            steps = scenario.total_steps(),
            "Scenario started"
        );

        let mut result = ScenarioResult::new(scenario, Utc::now());
        let mut state = ScenarioPhase::NotStarted;
        let executor = StepExecutor::new(self.session, self.run, self.config);

        'phases: for phase in [StepPhase::Given, StepPhase::When, StepPhase::Then] {
            let steps = scenario.steps(phase);
            if steps.is_empty() {
                continue;
            }
            state = self.advance(state, ScenarioPhase::running(phase));

            for step in steps {
                let step_result = executor.execute(step, phase).await;
                self.events.emit(Event::StepFinished {
                    task_id: task_id.to_string(),
                    scenario_id: scenario.id.clone(),
                    step: step_result.step.clone(),
                    status: status_label(step_result.status).to_string(),
                });

                let failed = !step_result.is_passed();
                let category = step_result.category;
                let message = step_result.message.clone();
                result.steps.push(step_result);

                if failed {
                    result.status = ScenarioStatus::Failed;
                    result.error = Some(match category {
                        Some(c) if ErrorClassifier::escalates(c) => {
                            format!("Scenario aborted: {}", message)
                        }
                        _ => message,
                    });
                    break 'phases;
                }
            }
        }

        state = self.advance(state, ScenarioPhase::Done(result.status));
        debug!(task_id = %task_id, scenario = %scenario.label(), state = ?state, "Scenario done");

        result.ended_at = Utc::now();
        info!(
            task_id = %task_id,
            scenario = %scenario.label(),
            status = result.status.as_str(),
            steps_run = result.steps.len(),
            "Scenario finished"
        );
        self.emit_finished(&result);
        result
    }

    fn advance(&self, from: ScenarioPhase, to: ScenarioPhase) -> ScenarioPhase {
        debug_assert!(from.can_transition(&to), "{:?} -> {:?}", from, to);
        to
    }

    fn emit_finished(&self, result: &ScenarioResult) {
        self.events.emit(Event::ScenarioFinished {
            task_id: self.session.task_id().to_string(),
            scenario_id: result.scenario_id.clone(),
            status: result.status.as_str().to_string(),
        });
    }
}

fn status_label(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Passed => "passed",
        StepStatus::Failed => "failed",
    }
}
