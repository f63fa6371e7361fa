pub use dataset::*;
pub use load_external::*;
pub use tensor_dataset::*;

pub mod dataset;
pub mod load_external;
pub mod tensor_dataset;
