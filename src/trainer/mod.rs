pub use checkpoint::*;
pub use config::*;
pub use error::*;
pub use meter::*;
pub use metrics::*;
pub use trainer::*;

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod meter;
pub mod metrics;
pub mod trainer;
