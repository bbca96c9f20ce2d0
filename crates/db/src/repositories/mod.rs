mod group_repository;
mod sequence_repository;
mod visit_repository;

pub use group_repository::*;
pub use sequence_repository::*;
pub use visit_repository::*;
