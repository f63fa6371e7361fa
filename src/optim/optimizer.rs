use anyhow::{bail, Result};
use linked_hash_map::LinkedHashMap;
use serde::{Deserialize, Serialize};

use crate::{
    core::{Tensor, TensorData},
    nn::Trainable,
};

/// The persistent state of one [`OptimizerAlgorithm`]: its own step counter and named per-parameter buffers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmState {
    pub step: u64,
    pub buffers: LinkedHashMap<String, Vec<TensorData>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamGroupState {
    pub learning_rate: f64,
    pub state: AlgorithmState,
}

/// Everything needed to resume an optimizer: the step counter and the state of every parameter group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizerState {
    pub step: u64,
    pub param_groups: Vec<ParamGroupState>,
}

/// An update rule, such as gradient descent or Adam, applied to one group of parameters.
pub trait OptimizerAlgorithm {
    /// Allocate per-parameter buffers.
    fn init(&mut self, parameters: &[Tensor]);
    /// Update `parameters` in place from their accumulated gradients. Parameters without a gradient are skipped.
    fn step(&mut self, parameters: &[Tensor], learning_rate: f64) -> Result<()>;
    fn state(&self) -> AlgorithmState;
    /// Check that `state` holds one buffer of the right shape per parameter, without changing anything.
    fn check_state(&self, state: &AlgorithmState, parameters: &[Tensor]) -> Result<()>;
    /// Replace the buffers with those of `state`. Call [`OptimizerAlgorithm::check_state`] first.
    fn load_state(&mut self, state: AlgorithmState) -> Result<()>;
}

/// What a training loop needs from an optimizer.
pub trait Optimize {
    /// Clear the gradients of every parameter the optimizer updates.
    fn zero_grad(&mut self);
    fn step(&mut self) -> Result<()>;
    /// The learning rate of each parameter group.
    fn learning_rates(&self) -> Vec<f64>;
    /// Mutable access to the learning rate of each parameter group.
    fn learning_rates_mut(&mut self) -> Vec<&mut f64>;
    fn state_dict(&self) -> OptimizerState;
    /// Whether [`Optimize::load_state_dict`] would accept `state`. Nothing is changed.
    fn check_state_dict(&self, _state: &OptimizerState) -> Result<()> {
        Ok(())
    }
    /// Restore a saved state. On error the optimizer is left as it was.
    fn load_state_dict(&mut self, state: OptimizerState) -> Result<()>;
}

/// A set of parameters sharing one learning rate and one algorithm instance.
pub struct ParamGroup<T: OptimizerAlgorithm> {
    pub learning_rate: f64,
    parameters: Vec<Tensor>,
    algorithm: T,
}

impl<T: OptimizerAlgorithm> ParamGroup<T> {
    pub fn parameters(&self) -> &[Tensor] {
        &self.parameters
    }

    pub fn algorithm(&self) -> &T {
        &self.algorithm
    }
}

pub struct Optimizer<T: OptimizerAlgorithm> {
    param_groups: Vec<ParamGroup<T>>,
    step: u64,
}

impl<T: OptimizerAlgorithm> Optimizer<T> {
    /// Optimize every unfrozen parameter of `model` with a single parameter group.
    pub fn new<M: Trainable + ?Sized>(model: &M, algorithm: T, learning_rate: f64) -> Optimizer<T> {
        Self::from_parameters(model.training_parameters(), algorithm, learning_rate)
    }

    pub fn from_parameters(parameters: Vec<Tensor>, algorithm: T, learning_rate: f64) -> Optimizer<T> {
        let mut optimizer = Optimizer {
            param_groups: Vec::new(),
            step: 0,
        };
        optimizer.add_param_group(parameters, algorithm, learning_rate);
        optimizer
    }

    pub fn add_param_group(&mut self, parameters: Vec<Tensor>, mut algorithm: T, learning_rate: f64) {
        algorithm.init(&parameters);
        self.param_groups.push(ParamGroup {
            learning_rate,
            parameters,
            algorithm,
        });
    }

    pub fn param_groups(&self) -> &[ParamGroup<T>] {
        &self.param_groups
    }

    pub fn param_groups_mut(&mut self) -> &mut [ParamGroup<T>] {
        &mut self.param_groups
    }

    /// Number of completed steps.
    pub fn steps(&self) -> u64 {
        self.step
    }
}

impl<T: OptimizerAlgorithm> Optimize for Optimizer<T> {
    fn zero_grad(&mut self) {
        self.param_groups
            .iter()
            .flat_map(|group| group.parameters.iter())
            .for_each(Tensor::zero_grad);
    }

    fn step(&mut self) -> Result<()> {
        for group in &mut self.param_groups {
            group.algorithm.step(&group.parameters, group.learning_rate)?;
        }
        self.step += 1;
        Ok(())
    }

    fn learning_rates(&self) -> Vec<f64> {
        self.param_groups.iter().map(|group| group.learning_rate).collect()
    }

    fn learning_rates_mut(&mut self) -> Vec<&mut f64> {
        self.param_groups
            .iter_mut()
            .map(|group| &mut group.learning_rate)
            .collect()
    }

    fn state_dict(&self) -> OptimizerState {
        OptimizerState {
            step: self.step,
            param_groups: self
                .param_groups
                .iter()
                .map(|group| ParamGroupState {
                    learning_rate: group.learning_rate,
                    state: group.algorithm.state(),
                })
                .collect(),
        }
    }

    fn check_state_dict(&self, state: &OptimizerState) -> Result<()> {
        if state.param_groups.len() != self.param_groups.len() {
            bail!(
                "optimizer state has {} parameter groups, but the optimizer has {}",
                state.param_groups.len(),
                self.param_groups.len()
            );
        }
        for (i, (group, group_state)) in self.param_groups.iter().zip(&state.param_groups).enumerate() {
            group
                .algorithm
                .check_state(&group_state.state, &group.parameters)
                .map_err(|err| err.context(format!("parameter group {}", i)))?;
        }
        Ok(())
    }

    fn load_state_dict(&mut self, state: OptimizerState) -> Result<()> {
        self.check_state_dict(&state)?;
        for (group, group_state) in self.param_groups.iter_mut().zip(state.param_groups) {
            group.algorithm.load_state(group_state.state)?;
            group.learning_rate = group_state.learning_rate;
        }
        self.step = state.step;
        Ok(())
    }
}

/// Turn per-parameter buffers into their serializable form.
pub(crate) fn save_buffers(buffers: &[crate::core::Array]) -> Vec<TensorData> {
    buffers.iter().map(TensorData::from).collect()
}

/// Restore per-parameter buffers saved by [`save_buffers`].
pub(crate) fn load_buffers(state: &mut AlgorithmState, name: &str) -> Result<Vec<crate::core::Array>> {
    match state.buffers.remove(name) {
        Some(buffers) => buffers.into_iter().map(TensorData::into_array).collect(),
        None => bail!("optimizer state is missing the {} buffers", name),
    }
}

/// Check that `state` holds a `name` buffer for every parameter, shaped like the parameter.
pub(crate) fn check_buffers(state: &AlgorithmState, name: &str, parameters: &[Tensor]) -> Result<()> {
    let buffers = match state.buffers.get(name) {
        Some(buffers) => buffers,
        None => bail!("optimizer state is missing the {} buffers", name),
    };
    if buffers.len() != parameters.len() {
        bail!(
            "optimizer state has {} {} buffers for {} parameters",
            buffers.len(),
            name,
            parameters.len()
        );
    }
    for (i, (buffer, parameter)) in buffers.iter().zip(parameters).enumerate() {
        let shape = parameter.size();
        if buffer.shape != shape || buffer.values.len() != shape.iter().product::<usize>() {
            bail!(
                "{} buffer {} has shape {:?}, but its parameter has shape {:?}",
                name,
                i,
                buffer.shape,
                shape
            );
        }
    }
    Ok(())
}
