use anyhow::Result;
use derive_builder::Builder;
use linked_hash_map::LinkedHashMap;
use rand::{rngs::StdRng, SeedableRng};

use crate::core::{StateDict, Tensor};

use super::{Module, Trainable};

#[derive(Builder, Debug, Clone)]
#[builder(pattern = "owned")]
pub struct LinearConfig {
    pub input_dim: usize,
    pub output_dim: usize,
    #[builder(default = "true")]
    pub bias: bool,
    /// Seed for the weight initialization. Fresh entropy is used when unset.
    #[builder(default = "None", setter(strip_option))]
    pub seed: Option<u64>,
}

/// A simple fully-connected layer, computing `input · weightᵀ + bias`.
#[derive(Debug)]
pub struct Linear {
    pub weight: Tensor,
    pub bias: Option<Tensor>,
}

impl Trainable for Linear {
    fn parameters(&self) -> StateDict {
        let mut result = LinkedHashMap::new();
        result.insert("weight".to_owned(), self.weight.clone());
        if let Some(bias) = &self.bias {
            result.insert("bias".to_owned(), bias.clone());
        }
        result
    }
}

impl Module for Linear {
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let output = input.matmul(&self.weight.t()?)?;
        match &self.bias {
            Some(bias) => output.add(bias),
            None => Ok(output),
        }
    }
}

impl Linear {
    /// Creates a layer with weights drawn from `U(-1/sqrt(input_dim), 1/sqrt(input_dim))`.
    pub fn new(config: LinearConfig) -> Linear {
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let bound = if config.input_dim == 0 {
            0.0
        } else {
            1.0 / (config.input_dim as f32).sqrt()
        };
        let weight = Tensor::uniform(
            &[config.output_dim, config.input_dim],
            -bound,
            bound,
            &mut rng,
        );
        weight.set_requires_grad(true);
        let bias = config.bias.then(|| {
            let bias = Tensor::uniform(&[config.output_dim], -bound, bound, &mut rng);
            bias.set_requires_grad(true);
            bias
        });
        Linear { weight, bias }
    }
}

/// A [`Linear`] layer with bias and random initialization.
pub fn linear(input_dim: usize, output_dim: usize) -> Linear {
    Linear::new(LinearConfig {
        input_dim,
        output_dim,
        bias: true,
        seed: None,
    })
}
