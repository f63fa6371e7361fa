use anyhow::Result;
use itertools::Itertools;
use linked_hash_map::LinkedHashMap;
use ndarray::IxDyn;
use serde::{Deserialize, Serialize};

use super::{tensor::Array, Tensor};

/// A `StateDict` is a collection of named tensors. It uses [LinkedHashMap] to preserve the insertion order of the tensors, so that parameters are saved, loaded and handed to optimizers in the order the model declares them.
///
/// Parameters of child modules are named by their path, e.g. `"0.weight"` for the weight of the first layer of a [`Sequential`](crate::nn::Sequential).
pub type StateDict = LinkedHashMap<String, Tensor>;

/// The serializable counterpart of a [`StateDict`].
pub type StateRecord = LinkedHashMap<String, TensorData>;

/// The plain data of a tensor: its shape and its elements in row-major order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorData {
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

impl TensorData {
    pub fn into_array(self) -> Result<Array> {
        Ok(Array::from_shape_vec(IxDyn(&self.shape), self.values)?)
    }

    pub fn into_tensor(self) -> Result<Tensor> {
        Ok(Tensor::from_array(self.into_array()?))
    }
}

impl From<&Array> for TensorData {
    fn from(array: &Array) -> Self {
        TensorData {
            shape: array.shape().to_vec(),
            values: array.iter().copied().collect(),
        }
    }
}

impl From<&Tensor> for TensorData {
    fn from(tensor: &Tensor) -> Self {
        TensorData::from(&*tensor.data())
    }
}

/// Snapshot the values of a [`StateDict`].
pub fn to_record(state_dict: &StateDict) -> StateRecord {
    state_dict
        .iter()
        .map(|(name, tensor)| (name.clone(), TensorData::from(tensor)))
        .collect()
}

/// Rebuild detached tensors from a [`StateRecord`].
pub fn from_record(record: StateRecord) -> Result<StateDict> {
    record
        .into_iter()
        .map(|(name, data)| Ok((name, data.into_tensor()?)))
        .collect()
}

/// Total number of scalar elements across all tensors of a [`StateDict`].
pub fn parameter_count(state_dict: &StateDict) -> usize {
    state_dict
        .values()
        .map(|tensor| tensor.size().iter().product::<usize>())
        .sum()
}

/// A one-line summary like `0.weight[3, 2], 0.bias[3]`.
pub fn describe(state_dict: &StateDict) -> String {
    state_dict
        .iter()
        .map(|(name, tensor)| format!("{}{:?}", name, tensor.size()))
        .join(", ")
}
