//! Task lifecycle events.
//!
//! The orchestrator publishes onto an [`EventBus`]; the HTTP layer relays
//! the stream to clients over SSE.

mod bus;
mod types;

pub use bus::EventBus;
pub use types::*;
