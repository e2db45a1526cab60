mod error;
pub mod models;
mod pool;
pub mod repositories;

pub use error::*;
pub use models::ExecutionRow;
pub use pool::*;
pub use repositories::*;
