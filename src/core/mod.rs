pub use device::*;
pub use state_dict::*;
pub use tensor::*;

pub mod device;
pub mod state_dict;
pub mod tensor;
