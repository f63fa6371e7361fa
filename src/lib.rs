pub mod core;
pub mod dataset;
pub mod nn;
pub mod optim;
pub mod trainer;
pub mod util;

pub use ndarray;
