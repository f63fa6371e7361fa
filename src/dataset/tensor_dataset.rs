use anyhow::Result;

use crate::core::Tensor;

use super::{dataset::ensure_same_len, Dataset};

/// An in-memory dataset of `(input, label)` tensor pairs. Collating stacks each side along a new leading axis.
#[derive(Debug, Clone, Default)]
pub struct TensorDataset {
    samples: Vec<(Tensor, Tensor)>,
}

impl Dataset for TensorDataset {
    type DataType = (Tensor, Tensor);
    type BatchType = (Tensor, Tensor);

    fn data(&self) -> &[Self::DataType] {
        &self.samples
    }

    fn collate(data: Vec<&Self::DataType>) -> Result<Self::BatchType> {
        let (inputs, labels): (Vec<_>, Vec<_>) = data
            .into_iter()
            .map(|(input, label)| (input.clone(), label.clone()))
            .unzip();
        Ok((Tensor::stack(&inputs)?, Tensor::stack(&labels)?))
    }
}

impl TensorDataset {
    pub fn from_tensors(inputs: Vec<Tensor>, labels: Vec<Tensor>) -> Result<Self> {
        ensure_same_len(inputs.len(), labels.len())?;
        Ok(Self {
            samples: inputs.into_iter().zip(labels).collect(),
        })
    }

    pub fn inputs(&self) -> impl Iterator<Item = &Tensor> {
        self.samples.iter().map(|(input, _)| input)
    }

    pub fn labels(&self) -> impl Iterator<Item = &Tensor> {
        self.samples.iter().map(|(_, label)| label)
    }
}

impl FromIterator<(Tensor, Tensor)> for TensorDataset {
    fn from_iter<T: IntoIterator<Item = (Tensor, Tensor)>>(iter: T) -> Self {
        TensorDataset {
            samples: iter.into_iter().collect(),
        }
    }
}
