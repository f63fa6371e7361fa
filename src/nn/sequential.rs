use std::ops::{Deref, DerefMut};

use anyhow::Result;

use crate::core::{StateDict, Tensor};

use super::{Module, ModuleMode, Trainable};

/// A module composed by a sequential of modules.
///
/// Parameters of the `i`-th module are exposed as `"{i}.{name}"`.
#[derive(Debug, Default)]
pub struct Sequential(Vec<Box<dyn Module>>);

impl Deref for Sequential {
    type Target = Vec<Box<dyn Module>>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Sequential {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl From<Vec<Box<dyn Module>>> for Sequential {
    fn from(seq: Vec<Box<dyn Module>>) -> Self {
        Sequential(seq)
    }
}

impl FromIterator<Box<dyn Module>> for Sequential {
    fn from_iter<I: IntoIterator<Item = Box<dyn Module>>>(iter: I) -> Self {
        Sequential(iter.into_iter().collect())
    }
}

impl Trainable for Sequential {
    fn parameters(&self) -> StateDict {
        let mut state_dict = StateDict::new();
        for (i, module) in self.iter().enumerate() {
            for (name, parameter) in module.parameters() {
                state_dict.insert(format!("{}.{}", i, name), parameter);
            }
        }
        state_dict
    }

    fn set_mode(&self, mode: ModuleMode) {
        self.iter().for_each(|module| module.set_mode(mode));
    }
}

impl Module for Sequential {
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let mut x = input.clone();
        for module in self.iter() {
            x = module.forward(&x)?;
        }
        Ok(x)
    }
}

#[macro_export]
macro_rules! seq {
    ($($module:expr),* $(,)?) => {
        {
            $crate::nn::sequential::Sequential::from(vec![$(Box::new($module) as Box<dyn $crate::nn::Module>,)*])
        }
    };
}
