//! Domain model for behavioral test execution.
//!
//! Specifications (feature, scenarios, Given/When/Then steps), per-task
//! configuration, task lifecycle and the result types produced by a run.

pub mod domain;
mod error;

pub use domain::*;
pub use error::{CoreError, Result};
