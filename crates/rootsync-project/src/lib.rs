pub mod inspector;
pub mod listeners;
pub mod manifest;
pub mod manifest_project;
pub mod memory;
pub mod persist;
pub mod watch;

pub use inspector::*;
pub use listeners::*;
pub use manifest::*;
pub use manifest_project::*;
pub use memory::*;
pub use persist::*;
pub use watch::*;
