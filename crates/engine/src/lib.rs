pub mod config;
pub mod directory;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod job;
pub mod resources;
pub mod sequence;
pub mod visit;

pub use config::{EngineConfig, DEFAULT_CONFIG_FILE};
pub use directory::{LookupFilter, SequenceDirectory};
pub use engine::{Engine, EngineBuilder};
pub use error::{EngineError, Result};
pub use gateway::{
    CommandGateway, DispatchContext, DispatchRequest, DispatchSignal, GatewayError,
    SimulatedGateway,
};
pub use job::Job;
pub use resources::{AdmissionController, ResourceGuard, ResourcePlan, ResourceRegistry, TopologyEvent};
pub use sequence::{
    ArgumentResolver, ImpliedResource, ResubmitMode, Sequence, SequenceProfile, StandardProfile,
    SubCommandFailure, TimeLimitHeuristic,
};
pub use visit::{CounterSource, IdentifierSource, Visit, VisitAllocator, FRAMES_PER_VISIT};
