mod cluster;
mod command;
mod status;
mod version;

pub use cluster::*;
pub use command::*;
pub use status::*;
pub use version::*;
