use anyhow::Result;

use crate::core::Tensor;

/// A loss function comparing a model's output with the ground-truth labels.
pub trait Criterion<OutputType = Tensor, LabelType = Tensor> {
    /// Computes a scalar loss that `backward` can be called on.
    fn loss(&self, output: &OutputType, labels: &LabelType) -> Result<Tensor>;

    /// Top-`k` accuracy in percent, for criteria where that is meaningful.
    fn accuracy(&self, _output: &OutputType, _labels: &LabelType, _k: usize) -> Result<Option<f64>> {
        Ok(None)
    }
}

/// Mean squared error. Output and labels must have the same shape.
#[derive(Debug, Clone, Copy, Default)]
pub struct MseLoss;

impl Criterion for MseLoss {
    fn loss(&self, output: &Tensor, labels: &Tensor) -> Result<Tensor> {
        output.mse_loss(labels)
    }
}

/// Softmax cross entropy over `[batch, classes]` logits, with one class index per label.
#[derive(Debug, Clone, Copy, Default)]
pub struct CrossEntropyLoss;

impl Criterion for CrossEntropyLoss {
    fn loss(&self, output: &Tensor, labels: &Tensor) -> Result<Tensor> {
        output.cross_entropy(labels)
    }

    fn accuracy(&self, output: &Tensor, labels: &Tensor, k: usize) -> Result<Option<f64>> {
        output.topk_accuracy(labels, k).map(Some)
    }
}
