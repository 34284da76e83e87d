// Storage - snapshot-isolated state store and event queue
// Principle: state and events roll back in lock-step, or not at all

pub mod events;
pub mod state;

pub use events::*;
pub use state::*;
