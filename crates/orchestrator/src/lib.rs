//! Test execution orchestration.
//!
//! A task is submitted as pending, then run: one browser session is
//! acquired, each scenario runs through its Given/When/Then phases, the
//! session is released and the aggregated result is persisted to every
//! registry tier.

pub mod classifier;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod registry;
pub mod scenario;
pub mod scheduling;
pub mod session;
pub mod state_machine;

pub use classifier::{ErrorClassifier, StepError};
pub use error::{OrchestratorError, Result};
pub use executor::{ExecutorConfig, StepExecutor};
pub use orchestrator::TaskOrchestrator;
pub use registry::{DurableStore, FileStore, RegistryConfig, TaskRegistry, TaskStore};
pub use scenario::{ScenarioPhase, ScenarioRunner};
pub use scheduling::{run_blocking, SchedulingContext, WorkerPool, DEFAULT_MAX_CONCURRENT_TASKS};
pub use session::{
    display_available, BackendFactory, BrowserSession, BrowserSessionManager, SessionPolicy,
    WebDriverFactory,
};
pub use state_machine::TaskStateMachine;
