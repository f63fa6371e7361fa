use std::fmt::Debug;

use anyhow::{bail, Result};
use itertools::Itertools;
use linked_hash_map::LinkedHashMap;

use crate::core::{StateDict, Tensor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleMode {
    Train,
    Eval,
}

/// A trait for anything that has trainable parameters.
pub trait Trainable: Debug {
    /// Defines the trainable parameters of the module, including those of child modules, keyed by their path.
    ///
    /// By default, this returns an empty map. If your module has trainable parameters, you should override this method.
    fn parameters(&self) -> StateDict {
        LinkedHashMap::new()
    }

    /// Returns the number of parameter tensors of the module.
    fn parameter_size(&self) -> usize {
        self.parameters().len()
    }

    /// Load the parameters from another `StateDict`.
    ///
    /// Every parameter with a matching name is overwritten with the value from `parameters`. Names missing from `parameters` are left untouched. A shape mismatch is an error, and nothing is overwritten then.
    fn load(&self, parameters: &StateDict) -> Result<()> {
        let own = self.parameters();
        for (name, parameter) in &own {
            if let Some(other) = parameters.get(name) {
                check_shape(name, parameter, other)?;
            }
        }
        for (name, parameter) in &own {
            if let Some(other) = parameters.get(name) {
                parameter.assign(&other.value())?;
            }
        }
        Ok(())
    }

    /// Check that `parameters` names exactly the parameters of this module, with the same shapes.
    fn check_strict(&self, parameters: &StateDict) -> Result<()> {
        let own = self.parameters();
        let missing = own
            .keys()
            .filter(|name| !parameters.contains_key(*name))
            .join(", ");
        let unexpected = parameters
            .keys()
            .filter(|name| !own.contains_key(*name))
            .join(", ");
        if !missing.is_empty() || !unexpected.is_empty() {
            bail!(
                "parameter names do not match: missing [{}], unexpected [{}]",
                missing,
                unexpected
            );
        }
        for (name, parameter) in &own {
            if let Some(other) = parameters.get(name) {
                check_shape(name, parameter, other)?;
            }
        }
        Ok(())
    }

    /// Like [`Trainable::load`], but every parameter must be present in `parameters` and nothing else may be.
    fn load_strict(&self, parameters: &StateDict) -> Result<()> {
        self.check_strict(parameters)?;
        self.load(parameters)
    }

    /// Returns all trainable parameters that are not frozen.
    fn training_parameters(&self) -> Vec<Tensor> {
        self.parameters()
            .into_iter()
            .map(|(_, parameter)| parameter)
            .filter(|tensor| tensor.requires_grad())
            .collect()
    }

    /// Freeze the trainable parameters of the module.
    fn freeze(&self) {
        for tensor in self.parameters().values() {
            tensor.set_requires_grad(false);
        }
    }

    /// Unfreeze the trainable parameters of the module.
    fn unfreeze(&self) {
        for tensor in self.parameters().values() {
            tensor.set_requires_grad(true);
        }
    }

    /// Clear the gradients of the trainable parameters of the module.
    fn zero_grad(&self) {
        self.parameters().values().for_each(Tensor::zero_grad);
    }

    /// Switch the module and its children between training and evaluation behaviour.
    ///
    /// Most modules behave the same in both modes, so the default does nothing.
    fn set_mode(&self, _mode: ModuleMode) {}

    fn train(&self) {
        self.set_mode(ModuleMode::Train)
    }

    fn eval(&self) {
        self.set_mode(ModuleMode::Eval)
    }
}

/// A module is a neural network layer, which can be seen as a function from `Tensor` to `Tensor`, with some trainable parameters.
pub trait Module<InputType = Tensor, OutputType = Tensor>: Trainable {
    /// The forward function for Module.
    fn forward(&self, input: &InputType) -> Result<OutputType>;
}

fn check_shape(name: &str, parameter: &Tensor, other: &Tensor) -> Result<()> {
    if other.size() != parameter.size() {
        bail!(
            "shape mismatch for parameter {}: expected {:?}, got {:?}",
            name,
            parameter.size(),
            other.size()
        );
    }
    Ok(())
}
