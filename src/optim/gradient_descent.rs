use anyhow::{bail, Result};
use derive_builder::Builder;
use linked_hash_map::LinkedHashMap;

use crate::core::{Array, Tensor};

use super::{
    optimizer::{check_buffers, load_buffers, save_buffers},
    AlgorithmState, OptimizerAlgorithm,
};

/// Stochastic gradient descent with optional momentum and L2 weight decay.
#[derive(Builder, Debug, Clone)]
#[builder(pattern = "owned")]
pub struct GradientDescent {
    #[builder(default = "0.")]
    momentum: f64,
    #[builder(default = "0.")]
    weight_decay: f64,
    #[builder(setter(skip))]
    velocity: Vec<Array>,
}

impl OptimizerAlgorithm for GradientDescent {
    fn init(&mut self, trainable_parameters: &[Tensor]) {
        self.velocity = trainable_parameters
            .iter()
            .map(|parameter| Array::zeros(parameter.data().raw_dim()))
            .collect();
    }

    fn step(&mut self, trainable_parameters: &[Tensor], learning_rate: f64) -> Result<()> {
        if self.velocity.len() != trainable_parameters.len() {
            bail!(
                "{} momentum buffers for {} parameters",
                self.velocity.len(),
                trainable_parameters.len()
            );
        }
        let (momentum, weight_decay) = (self.momentum as f32, self.weight_decay as f32);
        for (parameter, velocity) in trainable_parameters.iter().zip(self.velocity.iter_mut()) {
            let mut grad = match parameter.grad() {
                Some(grad) => grad,
                None => continue,
            };
            if velocity.shape() != grad.shape() {
                bail!(
                    "momentum buffer of shape {:?} does not match parameter of shape {:?}",
                    velocity.shape(),
                    grad.shape()
                );
            }
            if weight_decay != 0.0 {
                grad = grad + &parameter.data().mapv(|p| p * weight_decay);
            }
            if momentum != 0.0 {
                *velocity = &*velocity * momentum + &grad;
                grad = velocity.clone();
            }
            parameter.update(|value| value.scaled_add(-(learning_rate as f32), &grad));
        }
        Ok(())
    }

    fn state(&self) -> AlgorithmState {
        let mut buffers = LinkedHashMap::new();
        buffers.insert("momentum_buffer".to_owned(), save_buffers(&self.velocity));
        AlgorithmState { step: 0, buffers }
    }

    fn check_state(&self, state: &AlgorithmState, parameters: &[Tensor]) -> Result<()> {
        check_buffers(state, "momentum_buffer", parameters)
    }

    fn load_state(&mut self, mut state: AlgorithmState) -> Result<()> {
        self.velocity = load_buffers(&mut state, "momentum_buffer")?;
        Ok(())
    }
}

impl GradientDescent {
    pub fn new(momentum: f64) -> GradientDescent {
        GradientDescent {
            momentum,
            weight_decay: 0.,
            velocity: Vec::new(),
        }
    }
}
