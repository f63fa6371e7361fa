use anyhow::{ensure, Result};
use derive_builder::Builder;

/// Maps an epoch index to the learning rate to use for that epoch.
pub trait LrScheduler {
    fn learning_rate(&self, epoch: usize) -> f64;
}

/// Decays the learning rate by `gamma` every `step_size` epochs:
/// `base_lr * gamma ^ (epoch / step_size)`.
#[derive(Builder, Debug, Clone, Copy, PartialEq)]
#[builder(pattern = "owned", build_fn(validate = "Self::validate"))]
pub struct StepLR {
    base_lr: f64,
    #[builder(default = "30")]
    step_size: usize,
    #[builder(default = "0.1")]
    gamma: f64,
}

impl StepLRBuilder {
    fn validate(&self) -> Result<(), String> {
        match self.step_size {
            Some(0) => Err("step_size must be positive".to_owned()),
            _ => Ok(()),
        }
    }
}

impl StepLR {
    pub fn new(base_lr: f64, step_size: usize, gamma: f64) -> Result<StepLR> {
        ensure!(step_size > 0, "step_size must be positive");
        Ok(StepLR {
            base_lr,
            step_size,
            gamma,
        })
    }

    pub fn base_lr(&self) -> f64 {
        self.base_lr
    }

    pub fn step_size(&self) -> usize {
        self.step_size
    }

    pub fn gamma(&self) -> f64 {
        self.gamma
    }
}

impl LrScheduler for StepLR {
    fn learning_rate(&self, epoch: usize) -> f64 {
        let decays = (epoch / self.step_size).min(i32::MAX as usize) as i32;
        self.base_lr * self.gamma.powi(decays)
    }
}
