use anyhow::{ensure, Result};
use derive_builder::Builder;
use ndarray::IxDyn;
use parking_lot::{Mutex, RwLock};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::core::{Array, Tensor};

use super::{Module, ModuleMode, Trainable};

#[derive(Builder, Debug, Clone)]
#[builder(pattern = "owned")]
pub struct DropoutConfig {
    #[builder(default = "0.5")]
    pub p: f64,
    #[builder(default = "None", setter(strip_option))]
    pub seed: Option<u64>,
}

/// Zeroes each element with probability `p` in training mode and rescales the rest by `1 / (1 - p)`. Acts as the identity in evaluation mode.
#[derive(Debug)]
pub struct Dropout {
    p: f64,
    mode: RwLock<ModuleMode>,
    rng: Mutex<StdRng>,
}

impl Trainable for Dropout {
    fn set_mode(&self, mode: ModuleMode) {
        *self.mode.write() = mode;
    }
}

impl Module for Dropout {
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        if *self.mode.read() == ModuleMode::Eval || self.p == 0.0 {
            return Ok(input.clone());
        }
        if self.p >= 1.0 {
            return Ok(input.mul_scalar(0.0));
        }
        let keep = 1.0 - self.p;
        let scale = (1.0 / keep) as f32;
        let mut rng = self.rng.lock();
        let mask = Array::from_shape_fn(IxDyn(&input.size()), |_| {
            if rng.gen_bool(keep) {
                scale
            } else {
                0.0
            }
        });
        input.mul(&Tensor::from_array(mask))
    }
}

impl Dropout {
    pub fn new(config: DropoutConfig) -> Result<Self> {
        ensure!(
            (0.0..=1.0).contains(&config.p),
            "dropout probability must be in [0, 1], got {}",
            config.p
        );
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            p: config.p,
            mode: RwLock::new(ModuleMode::Train),
            rng: Mutex::new(rng),
        })
    }

    pub fn mode(&self) -> ModuleMode {
        *self.mode.read()
    }
}
