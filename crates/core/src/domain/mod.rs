mod config;
mod record;
mod result;
mod specification;
mod task;

pub use config::*;
pub use record::*;
pub use result::*;
pub use specification::*;
pub use task::*;
