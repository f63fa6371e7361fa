pub use act_funcs::*;
pub use dropout::*;
pub use linear::*;
pub use loss::*;
pub use module::*;
pub use sequential::*;

pub mod act_funcs;
pub mod dropout;
pub mod linear;
pub mod loss;
pub mod module;
pub mod sequential;
