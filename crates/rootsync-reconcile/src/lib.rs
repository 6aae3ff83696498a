pub mod changeset;
pub mod gate;
pub mod manager;
pub mod metrics;
pub mod reconciler;
pub mod scanner;
pub mod store;

pub use changeset::*;
pub use gate::*;
pub use manager::*;
pub use metrics::*;
pub use reconciler::*;
pub use scanner::*;
pub use store::*;
