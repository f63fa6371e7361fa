use anyhow::{bail, Result};
use derive_builder::Builder;
use linked_hash_map::LinkedHashMap;
use ndarray::Zip;

use crate::core::{Array, Tensor};

use super::{
    optimizer::{check_buffers, load_buffers, save_buffers},
    AlgorithmState, OptimizerAlgorithm,
};

/// See [Adam: A Method for Stochastic Optimization](https://arxiv.org/abs/1412.6980).
#[derive(Builder, Debug, Clone)]
#[builder(pattern = "owned")]
pub struct Adam {
    #[builder(default = "(0.9,0.999)")]
    betas: (f64, f64),
    #[builder(default = "1e-8")]
    eps: f64,
    #[builder(default = "0.")]
    weight_decay: f64,
    #[builder(setter(skip))]
    step: u64,
    #[builder(setter(skip))]
    m: Vec<Array>,
    #[builder(setter(skip))]
    v: Vec<Array>,
}

impl OptimizerAlgorithm for Adam {
    fn init(&mut self, trainable_parameters: &[Tensor]) {
        self.step = 0;
        self.m = trainable_parameters
            .iter()
            .map(|parameter| Array::zeros(parameter.data().raw_dim()))
            .collect();
        self.v = self.m.clone();
    }

    fn step(&mut self, trainable_parameters: &[Tensor], learning_rate: f64) -> Result<()> {
        if self.m.len() != trainable_parameters.len() || self.v.len() != trainable_parameters.len() {
            bail!(
                "{} adam moments for {} parameters",
                self.m.len().min(self.v.len()),
                trainable_parameters.len()
            );
        }
        self.step += 1;
        let (beta1, beta2) = (self.betas.0 as f32, self.betas.1 as f32);
        let (eps, weight_decay, lr) = (self.eps as f32, self.weight_decay as f32, learning_rate as f32);
        let bias_correction1 = 1.0 - beta1.powi(self.step as i32);
        let bias_correction2 = 1.0 - beta2.powi(self.step as i32);

        for (i, parameter) in trainable_parameters.iter().enumerate() {
            let mut grad = match parameter.grad() {
                Some(grad) => grad,
                None => continue,
            };
            let (m, v) = (&mut self.m[i], &mut self.v[i]);
            if m.shape() != grad.shape() || v.shape() != grad.shape() {
                bail!(
                    "adam buffers of shape {:?} do not match parameter of shape {:?}",
                    m.shape(),
                    grad.shape()
                );
            }
            if weight_decay != 0.0 {
                grad = grad + &parameter.data().mapv(|p| p * weight_decay);
            }
            Zip::from(&mut *m)
                .and(&mut *v)
                .and(&grad)
                .for_each(|m, v, &g| {
                    *m = beta1 * *m + (1.0 - beta1) * g;
                    *v = beta2 * *v + (1.0 - beta2) * g * g;
                });
            parameter.update(|value| {
                Zip::from(value).and(&*m).and(&*v).for_each(|p, &m, &v| {
                    let m_hat = m / bias_correction1;
                    let v_hat = v / bias_correction2;
                    *p -= lr * m_hat / (v_hat.sqrt() + eps);
                })
            });
        }
        Ok(())
    }

    fn state(&self) -> AlgorithmState {
        let mut buffers = LinkedHashMap::new();
        buffers.insert("exp_avg".to_owned(), save_buffers(&self.m));
        buffers.insert("exp_avg_sq".to_owned(), save_buffers(&self.v));
        AlgorithmState {
            step: self.step,
            buffers,
        }
    }

    fn check_state(&self, state: &AlgorithmState, parameters: &[Tensor]) -> Result<()> {
        check_buffers(state, "exp_avg", parameters)?;
        check_buffers(state, "exp_avg_sq", parameters)
    }

    fn load_state(&mut self, mut state: AlgorithmState) -> Result<()> {
        let m = load_buffers(&mut state, "exp_avg")?;
        let v = load_buffers(&mut state, "exp_avg_sq")?;
        if m.len() != v.len() {
            bail!("adam state has {} first moments but {} second moments", m.len(), v.len());
        }
        self.m = m;
        self.v = v;
        self.step = state.step;
        Ok(())
    }
}

impl Default for Adam {
    fn default() -> Self {
        Adam {
            betas: (0.9, 0.999),
            eps: 1e-8,
            weight_decay: 0.,
            step: 0,
            m: Vec::new(),
            v: Vec::new(),
        }
    }
}

pub fn adam() -> Adam {
    Adam::default()
}
