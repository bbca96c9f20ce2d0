mod command;
mod record;
mod resource;
mod status;

pub use command::*;
pub use record::*;
pub use resource::*;
pub use status::*;
