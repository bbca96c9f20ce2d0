//! Domain types shared by the sequencer crates.
//!
//! Nothing in here performs I/O: resources, sub-commands and their replies,
//! the sequence state machine, and the shapes of persisted records.

pub mod domain;
mod error;

pub use domain::*;
pub use error::*;
