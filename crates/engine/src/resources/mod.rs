//! Resource inventory and admission.
//!
//! - [`ResourceRegistry`] - names known to the engine, fed by the topology source
//! - [`AdmissionController`] - all-or-nothing lock/free
//! - [`ResourceGuard`] - frees a sequence's locks when dropped

mod admission;
mod guard;
mod registry;

pub use admission::{AdmissionController, ResourcePlan};
pub use guard::ResourceGuard;
pub use registry::{ResourceRegistry, TopologyEvent};
