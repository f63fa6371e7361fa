pub use adam::*;
pub use gradient_descent::*;
pub use optimizer::*;
pub use steplr::*;

pub mod adam;
pub mod gradient_descent;
pub mod optimizer;
pub mod steplr;
