//! Status notifications for the sequencer.
//!
//! Every dispatch, cancellation, lock and conclusion is published on an [`EventBus`]
//! so consoles and loggers can follow sequences without touching the engine.

mod bus;
mod types;

pub use bus::EventBus;
pub use types::*;
