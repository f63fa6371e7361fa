use anyhow::Result;

use crate::core::Tensor;

use super::{Module, Trainable};

/// ReLU activation function.
///
/// See [Rectified Linear Units Improve Restricted Boltzmann Machines](https://www.cs.toronto.edu/~fritz/absps/reluICML.pdf).
#[derive(Debug, Clone, Copy, Default)]
pub struct ReLU;

/// Logistic sigmoid activation function.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sigmoid;

/// Hyperbolic tangent activation function.
#[derive(Debug, Clone, Copy, Default)]
pub struct Tanh;

impl Trainable for ReLU {}
impl Trainable for Sigmoid {}
impl Trainable for Tanh {}

impl Module for ReLU {
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        Ok(input.relu())
    }
}

impl Module for Sigmoid {
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        Ok(input.sigmoid())
    }
}

impl Module for Tanh {
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        Ok(input.tanh())
    }
}
