mod executions;
mod health;
pub mod sse;
mod tasks;

pub use executions::*;
pub use health::*;
pub use tasks::*;
