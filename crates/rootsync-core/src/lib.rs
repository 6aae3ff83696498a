pub mod config;
pub mod error;
pub mod suppression;
pub mod traits;
pub mod types;
pub mod write_lock;

pub use config::*;
pub use error::*;
pub use suppression::*;
pub use traits::*;
pub use types::*;
pub use write_lock::*;
