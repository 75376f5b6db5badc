//! Background scheduling for file sessions.
//!
//! One logical queue drives all persistence; sessions debounce their flushes
//! with a single re-armable timer each.

pub mod queue;

pub use queue::{Job, TaskQueue, TimerHandle};
