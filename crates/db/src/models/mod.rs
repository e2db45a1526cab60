mod execution;

pub use execution::ExecutionRow;
