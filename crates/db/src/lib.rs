//! Persistence for sequence, status, visit and group records.
//!
//! [`SequenceStore`] is the boundary the engine writes through; [`SqliteStore`] backs it with
//! `sqlx` and [`MemoryStore`] keeps everything in process.

mod error;
mod memory;
pub mod models;
mod pool;
pub mod repositories;
mod store;

pub use error::*;
pub use memory::MemoryStore;
pub use pool::*;
pub use repositories::*;
pub use store::*;
