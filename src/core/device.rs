use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// The device a [`Tensor`](super::Tensor) lives on.
///
/// The ndarray backend only holds tensors in host memory, so [`Device::Cpu`] is the only device that is ever available. `Cuda` exists so that configurations written for accelerator training still parse, and fail loudly when a transfer is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    #[default]
    Cpu,
    Cuda(usize),
}

impl Device {
    /// Whether tensors can be placed on this device by the current backend.
    pub fn is_available(&self) -> bool {
        matches!(self, Device::Cpu)
    }
}

impl Display for Device {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(index) => write!(f, "cuda:{}", index),
        }
    }
}
