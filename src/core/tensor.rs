use std::{
    collections::{hash_map::Entry, HashMap, HashSet},
    fmt::{Debug, Formatter},
    sync::Arc,
};

use anyhow::{anyhow, bail, Result};
use ndarray::{Array2, ArrayD, Axis, Ix2, IxDyn, Zip};
use parking_lot::{RwLock, RwLockReadGuard};
use rand::{distributions::Uniform, Rng};

use super::Device;

/// The dense storage behind every [`Tensor`].
pub type Array = ArrayD<f32>;

type BackwardFn = Box<dyn Fn(&Array) -> Result<Vec<Array>> + Send + Sync>;

/// Records how a tensor was computed, so that gradients can flow back to its parents.
struct GradFn {
    parents: Vec<Tensor>,
    backward: BackwardFn,
}

struct TensorNode {
    value: RwLock<Array>,
    grad: RwLock<Option<Array>>,
    requires_grad: RwLock<bool>,
    device: Device,
    grad_fn: Option<GradFn>,
}

/// A shared handle to an n-dimensional `f32` array with reverse-mode automatic differentiation.
///
/// Cloning a [`Tensor`] is cheap and yields another handle to the same storage. This is how a module and its optimizer share parameters: the optimizer mutates the value in place with [`Tensor::update`], and the module observes the new value on its next forward pass.
///
/// Every operation returns a new tensor. When at least one input requires grad (or was itself computed from one), the result remembers its inputs and [`Tensor::backward`] can later propagate gradients into every leaf tensor that requires grad.
#[derive(Clone)]
pub struct Tensor {
    node: Arc<TensorNode>,
}

impl Tensor {
    /// Wraps an array as a leaf tensor on the cpu.
    pub fn from_array(value: Array) -> Tensor {
        Self::leaf(value, Device::Cpu)
    }

    fn leaf(value: Array, device: Device) -> Tensor {
        Tensor {
            node: Arc::new(TensorNode {
                value: RwLock::new(value),
                grad: RwLock::new(None),
                requires_grad: RwLock::new(false),
                device,
                grad_fn: None,
            }),
        }
    }

    fn from_op(value: Array, parents: Vec<Tensor>, backward: BackwardFn) -> Tensor {
        let device = parents
            .first()
            .map(Tensor::device)
            .unwrap_or_default();
        let grad_fn = if parents.iter().any(Tensor::tracks_grad) {
            Some(GradFn { parents, backward })
        } else {
            None
        };
        Tensor {
            node: Arc::new(TensorNode {
                value: RwLock::new(value),
                grad: RwLock::new(None),
                requires_grad: RwLock::new(false),
                device,
                grad_fn,
            }),
        }
    }

    pub fn from_vec(values: Vec<f32>, shape: &[usize]) -> Result<Tensor> {
        let value = Array::from_shape_vec(IxDyn(shape), values)?;
        Ok(Self::from_array(value))
    }

    /// Builds a 1-d tensor from a slice.
    pub fn from_slice(values: &[f32]) -> Tensor {
        Self::from_array(ndarray::Array1::from(values.to_vec()).into_dyn())
    }

    /// Builds a 0-d tensor holding a single value.
    pub fn scalar(value: f32) -> Tensor {
        Self::from_array(Array::from_elem(IxDyn(&[]), value))
    }

    pub fn zeros(shape: &[usize]) -> Tensor {
        Self::from_array(Array::zeros(IxDyn(shape)))
    }

    pub fn ones(shape: &[usize]) -> Tensor {
        Self::from_array(Array::ones(IxDyn(shape)))
    }

    /// Samples every element uniformly from `[low, high)`. A degenerate range fills the tensor with `low`.
    pub fn uniform<R: Rng>(shape: &[usize], low: f32, high: f32, rng: &mut R) -> Tensor {
        if !(low < high) || !(high - low).is_finite() {
            return Self::from_array(Array::from_elem(IxDyn(shape), low));
        }
        let distribution = Uniform::new(low, high);
        Self::from_array(Array::from_shape_fn(IxDyn(shape), |_| {
            rng.sample(&distribution)
        }))
    }

    /// Stacks tensors of identical shape along a new leading axis. The result does not track gradients.
    pub fn stack(tensors: &[Tensor]) -> Result<Tensor> {
        if tensors.is_empty() {
            bail!("cannot stack an empty list of tensors");
        }
        let values = tensors.iter().map(Tensor::value).collect::<Vec<_>>();
        let views = values.iter().map(|value| value.view()).collect::<Vec<_>>();
        let stacked = ndarray::stack(Axis(0), &views).map_err(|_| {
            anyhow!(
                "cannot stack tensors of shapes {:?}",
                values.iter().map(|value| value.shape().to_vec()).collect::<Vec<_>>()
            )
        })?;
        Ok(Self::leaf(stacked, tensors[0].device()))
    }

    fn id(&self) -> usize {
        Arc::as_ptr(&self.node) as usize
    }

    fn tracks_grad(&self) -> bool {
        self.node.grad_fn.is_some() || *self.node.requires_grad.read()
    }

    pub fn size(&self) -> Vec<usize> {
        self.node.value.read().shape().to_vec()
    }

    /// Number of scalar elements, i.e. the product of all dimension sizes.
    pub fn numel(&self) -> usize {
        self.node.value.read().len()
    }

    pub fn device(&self) -> Device {
        self.node.device
    }

    /// Borrow the underlying array without copying it.
    pub fn data(&self) -> RwLockReadGuard<'_, Array> {
        self.node.value.read()
    }

    /// A copy of the underlying array.
    pub fn value(&self) -> Array {
        self.node.value.read().clone()
    }

    /// The elements in row-major order.
    pub fn to_vec(&self) -> Vec<f32> {
        self.node.value.read().iter().copied().collect()
    }

    /// The value of a tensor holding exactly one element.
    pub fn item(&self) -> Result<f64> {
        let value = self.node.value.read();
        match value.len() {
            1 => Ok(value.iter().next().copied().unwrap_or_default() as f64),
            n => bail!("item() needs a tensor with one element, got {} elements", n),
        }
    }

    pub fn requires_grad(&self) -> bool {
        *self.node.requires_grad.read()
    }

    pub fn set_requires_grad(&self, requires_grad: bool) -> &Self {
        *self.node.requires_grad.write() = requires_grad;
        self
    }

    pub fn is_leaf(&self) -> bool {
        self.node.grad_fn.is_none()
    }

    /// The accumulated gradient, if `backward` has reached this tensor since the last `zero_grad`.
    pub fn grad(&self) -> Option<Array> {
        self.node.grad.read().clone()
    }

    pub fn zero_grad(&self) {
        *self.node.grad.write() = None;
    }

    /// Mutate the value in place. Shape changes are the caller's responsibility.
    pub fn update<F: FnOnce(&mut Array)>(&self, f: F) {
        f(&mut *self.node.value.write());
    }

    /// Overwrite the value with another array of the same shape.
    pub fn assign(&self, value: &Array) -> Result<()> {
        let mut current = self.node.value.write();
        if current.shape() != value.shape() {
            bail!(
                "cannot assign a value of shape {:?} to a tensor of shape {:?}",
                value.shape(),
                current.shape()
            );
        }
        current.assign(value);
        Ok(())
    }

    /// A new leaf tensor sharing nothing with this one.
    pub fn detach(&self) -> Tensor {
        Self::leaf(self.value(), self.device())
    }

    /// Place the tensor on `device`. Moving to the device the tensor already lives on returns the same handle.
    pub fn to_device(&self, device: Device) -> Result<Tensor> {
        if device == self.device() {
            return Ok(self.clone());
        }
        if !device.is_available() {
            bail!("device {} is not available to the ndarray backend", device);
        }
        Ok(Self::leaf(self.value(), device))
    }

    /// Whether two tensors have the same shape and a summed squared difference below `tolerance`.
    pub fn allclose(&self, other: &Tensor, tolerance: f64) -> bool {
        let (lhs, rhs) = (self.value(), other.value());
        if lhs.shape() != rhs.shape() {
            return false;
        }
        let distance: f64 = lhs
            .iter()
            .zip(rhs.iter())
            .map(|(a, b)| ((a - b) as f64).powi(2))
            .sum();
        distance < tolerance
    }

    pub fn add(&self, other: &Tensor) -> Result<Tensor> {
        let value = zip_broadcast(&self.value(), &other.value(), |a, b| a + b)?;
        Ok(Self::from_op(
            value,
            vec![self.clone(), other.clone()],
            Box::new(|grad| Ok(vec![grad.clone(), grad.clone()])),
        ))
    }

    pub fn sub(&self, other: &Tensor) -> Result<Tensor> {
        let value = zip_broadcast(&self.value(), &other.value(), |a, b| a - b)?;
        Ok(Self::from_op(
            value,
            vec![self.clone(), other.clone()],
            Box::new(|grad| Ok(vec![grad.clone(), grad.mapv(|g| -g)])),
        ))
    }

    /// Element-wise product.
    pub fn mul(&self, other: &Tensor) -> Result<Tensor> {
        let (lhs, rhs) = (self.value(), other.value());
        let value = zip_broadcast(&lhs, &rhs, |a, b| a * b)?;
        Ok(Self::from_op(
            value,
            vec![self.clone(), other.clone()],
            Box::new(move |grad| {
                Ok(vec![
                    zip_broadcast(grad, &rhs, |g, b| g * b)?,
                    zip_broadcast(grad, &lhs, |g, a| g * a)?,
                ])
            }),
        ))
    }

    pub fn mul_scalar(&self, scalar: f32) -> Tensor {
        let value = self.data().mapv(|a| a * scalar);
        Self::from_op(
            value,
            vec![self.clone()],
            Box::new(move |grad| Ok(vec![grad.mapv(|g| g * scalar)])),
        )
    }

    /// Matrix product of two 2-d tensors.
    pub fn matmul(&self, other: &Tensor) -> Result<Tensor> {
        let lhs = to_matrix(&self.data())?;
        let rhs = to_matrix(&other.data())?;
        if lhs.ncols() != rhs.nrows() {
            bail!(
                "matmul shape mismatch: {:?} x {:?}",
                lhs.shape(),
                rhs.shape()
            );
        }
        let value = lhs.dot(&rhs).into_dyn();
        Ok(Self::from_op(
            value,
            vec![self.clone(), other.clone()],
            Box::new(move |grad| {
                let grad = to_matrix(grad)?;
                Ok(vec![
                    grad.dot(&rhs.t()).into_dyn(),
                    lhs.t().dot(&grad).into_dyn(),
                ])
            }),
        ))
    }

    /// Transpose of a 2-d tensor.
    pub fn t(&self) -> Result<Tensor> {
        let value = to_matrix(&self.data())?.t().to_owned().into_dyn();
        Ok(Self::from_op(
            value,
            vec![self.clone()],
            Box::new(|grad| Ok(vec![to_matrix(grad)?.t().to_owned().into_dyn()])),
        ))
    }

    pub fn square(&self) -> Tensor {
        let input = self.value();
        let value = input.mapv(|a| a * a);
        Self::from_op(
            value,
            vec![self.clone()],
            Box::new(move |grad| Ok(vec![zip_broadcast(grad, &input, |g, a| 2.0 * a * g)?])),
        )
    }

    /// Sum of all elements, as a 0-d tensor.
    pub fn sum(&self) -> Tensor {
        let shape = self.size();
        let value = Array::from_elem(IxDyn(&[]), self.data().sum());
        Self::from_op(
            value,
            vec![self.clone()],
            Box::new(move |grad| Ok(vec![Array::from_elem(IxDyn(&shape), grad.sum())])),
        )
    }

    /// Mean of all elements, as a 0-d tensor.
    pub fn mean(&self) -> Result<Tensor> {
        let shape = self.size();
        let count = self.numel();
        if count == 0 {
            bail!("mean of an empty tensor");
        }
        let value = Array::from_elem(IxDyn(&[]), self.data().sum() / count as f32);
        Ok(Self::from_op(
            value,
            vec![self.clone()],
            Box::new(move |grad| {
                Ok(vec![Array::from_elem(
                    IxDyn(&shape),
                    grad.sum() / count as f32,
                )])
            }),
        ))
    }

    pub fn relu(&self) -> Tensor {
        let input = self.value();
        let value = input.mapv(|a| a.max(0.0));
        Self::from_op(
            value,
            vec![self.clone()],
            Box::new(move |grad| {
                Ok(vec![zip_broadcast(grad, &input, |g, a| {
                    if a > 0.0 {
                        g
                    } else {
                        0.0
                    }
                })?])
            }),
        )
    }

    pub fn sigmoid(&self) -> Tensor {
        let value = self.data().mapv(|a| 1.0 / (1.0 + (-a).exp()));
        let output = value.clone();
        Self::from_op(
            value,
            vec![self.clone()],
            Box::new(move |grad| Ok(vec![zip_broadcast(grad, &output, |g, s| g * s * (1.0 - s))?])),
        )
    }

    pub fn tanh(&self) -> Tensor {
        let value = self.data().mapv(f32::tanh);
        let output = value.clone();
        Self::from_op(
            value,
            vec![self.clone()],
            Box::new(move |grad| Ok(vec![zip_broadcast(grad, &output, |g, t| g * (1.0 - t * t))?])),
        )
    }

    /// Mean squared error against a target of exactly the same shape.
    pub fn mse_loss(&self, target: &Tensor) -> Result<Tensor> {
        if self.size() != target.size() {
            bail!(
                "mse_loss expects matching shapes, got {:?} and {:?}",
                self.size(),
                target.size()
            );
        }
        self.sub(target)?.square().mean()
    }

    /// Softmax cross entropy between `[batch, classes]` logits and class indices, averaged over the batch.
    ///
    /// `labels` holds one class index per row, stored as floats.
    pub fn cross_entropy(&self, labels: &Tensor) -> Result<Tensor> {
        let logits = to_matrix(&self.data())?;
        let (rows, classes) = logits.dim();
        if rows == 0 {
            bail!("cross_entropy of an empty batch");
        }
        let targets = class_indices(&labels.data(), rows, classes)?;

        let mut probabilities = Array2::<f32>::zeros((rows, classes));
        let mut loss = 0.0f32;
        for (i, row) in logits.outer_iter().enumerate() {
            let max = row.fold(f32::NEG_INFINITY, |m, &x| m.max(x));
            let exp = row.mapv(|x| (x - max).exp());
            let total = exp.sum();
            loss -= row[targets[i]] - max - total.ln();
            probabilities.row_mut(i).assign(&(exp / total));
        }

        let label_shape = labels.size();
        let value = Array::from_elem(IxDyn(&[]), loss / rows as f32);
        Ok(Self::from_op(
            value,
            vec![self.clone(), labels.clone()],
            Box::new(move |grad| {
                let scale = grad.sum() / rows as f32;
                let mut logits_grad = probabilities.clone();
                for (i, &target) in targets.iter().enumerate() {
                    logits_grad[[i, target]] -= 1.0;
                }
                logits_grad.mapv_inplace(|g| g * scale);
                Ok(vec![logits_grad.into_dyn(), Array::zeros(IxDyn(&label_shape))])
            }),
        ))
    }

    /// Percentage of rows whose label is among the `k` highest scores.
    pub fn topk_accuracy(&self, labels: &Tensor, k: usize) -> Result<f64> {
        let scores = to_matrix(&self.data())?;
        let (rows, classes) = scores.dim();
        if rows == 0 {
            bail!("accuracy of an empty batch");
        }
        let targets = class_indices(&labels.data(), rows, classes)?;
        let correct = scores
            .outer_iter()
            .zip(targets)
            .filter(|(row, target)| {
                let score = row[*target];
                row.iter().filter(|&&other| other > score).count() < k
            })
            .count();
        Ok(100.0 * correct as f64 / rows as f64)
    }

    /// Back-propagate from this scalar tensor, accumulating gradients into every leaf that requires grad.
    pub fn backward(&self) -> Result<()> {
        if self.numel() != 1 {
            bail!(
                "backward can only start from a tensor with one element, got shape {:?}",
                self.size()
            );
        }
        if !self.tracks_grad() {
            bail!("tensor does not require grad and has no grad_fn");
        }

        let mut grads: HashMap<usize, Array> = HashMap::new();
        grads.insert(self.id(), Array::ones(IxDyn(&self.size())));
        for tensor in self.topological_order() {
            let grad = match grads.remove(&tensor.id()) {
                Some(grad) => grad,
                None => continue,
            };
            match &tensor.node.grad_fn {
                Some(grad_fn) => {
                    let parent_grads = (grad_fn.backward)(&grad)?;
                    for (parent, parent_grad) in grad_fn.parents.iter().zip(parent_grads) {
                        if !parent.tracks_grad() {
                            continue;
                        }
                        let parent_grad = reduce_to_shape(parent_grad, &parent.size())?;
                        match grads.entry(parent.id()) {
                            Entry::Occupied(mut entry) => *entry.get_mut() += &parent_grad,
                            Entry::Vacant(entry) => {
                                entry.insert(parent_grad);
                            }
                        }
                    }
                }
                None => tensor.accumulate_grad(grad),
            }
        }
        Ok(())
    }

    fn accumulate_grad(&self, grad: Array) {
        if !self.requires_grad() {
            return;
        }
        let mut slot = self.node.grad.write();
        *slot = Some(match slot.take() {
            Some(accumulated) => accumulated + &grad,
            None => grad,
        });
    }

    /// Every tensor reachable from this one, ordered so that each tensor comes before its inputs.
    fn topological_order(&self) -> Vec<Tensor> {
        let mut order = Vec::new();
        let mut visited = HashSet::new();
        let mut stack = vec![(self.clone(), false)];
        while let Some((tensor, expanded)) = stack.pop() {
            if expanded {
                order.push(tensor);
                continue;
            }
            if !visited.insert(tensor.id()) {
                continue;
            }
            stack.push((tensor.clone(), true));
            if let Some(grad_fn) = &tensor.node.grad_fn {
                for parent in &grad_fn.parents {
                    if !visited.contains(&parent.id()) {
                        stack.push((parent.clone(), false));
                    }
                }
            }
        }
        order.reverse();
        order
    }
}

impl Debug for Tensor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.size())
            .field("device", &self.device())
            .field("requires_grad", &self.requires_grad())
            .field("value", &*self.data())
            .finish()
    }
}

impl From<Array> for Tensor {
    fn from(value: Array) -> Self {
        Tensor::from_array(value)
    }
}

fn to_matrix(array: &Array) -> Result<Array2<f32>> {
    array
        .clone()
        .into_dimensionality::<Ix2>()
        .map_err(|_| anyhow!("expected a 2-d tensor, got shape {:?}", array.shape()))
}

fn class_indices(labels: &Array, rows: usize, classes: usize) -> Result<Vec<usize>> {
    if labels.len() != rows {
        bail!(
            "expected {} class labels, got shape {:?}",
            rows,
            labels.shape()
        );
    }
    labels
        .iter()
        .map(|&label| {
            if label < 0.0 || label.fract() != 0.0 || label as usize >= classes {
                bail!("invalid class label {} for {} classes", label, classes);
            }
            Ok(label as usize)
        })
        .collect()
}

fn broadcast_shape(lhs: &[usize], rhs: &[usize]) -> Result<Vec<usize>> {
    let ndim = lhs.len().max(rhs.len());
    let dim_at = |shape: &[usize], axis: usize| {
        let offset = ndim - shape.len();
        if axis < offset {
            1
        } else {
            shape[axis - offset]
        }
    };
    (0..ndim)
        .map(|axis| match (dim_at(lhs, axis), dim_at(rhs, axis)) {
            (l, r) if l == r => Ok(l),
            (1, r) => Ok(r),
            (l, 1) => Ok(l),
            _ => Err(anyhow!(
                "shapes {:?} and {:?} cannot be broadcast together",
                lhs,
                rhs
            )),
        })
        .collect()
}

fn zip_broadcast<F: Fn(f32, f32) -> f32>(lhs: &Array, rhs: &Array, f: F) -> Result<Array> {
    let shape = IxDyn(&broadcast_shape(lhs.shape(), rhs.shape())?);
    let lhs = lhs
        .broadcast(shape.clone())
        .ok_or_else(|| anyhow!("cannot broadcast {:?} to {:?}", lhs.shape(), shape))?;
    let rhs = rhs
        .broadcast(shape.clone())
        .ok_or_else(|| anyhow!("cannot broadcast {:?} to {:?}", rhs.shape(), shape))?;
    Ok(Zip::from(&lhs).and(&rhs).map_collect(|&a, &b| f(a, b)))
}

/// Sum a broadcast gradient back down to the shape of the input it flows into.
fn reduce_to_shape(mut grad: Array, shape: &[usize]) -> Result<Array> {
    if grad.ndim() < shape.len() {
        bail!(
            "gradient of shape {:?} cannot flow into a tensor of shape {:?}",
            grad.shape(),
            shape
        );
    }
    while grad.ndim() > shape.len() {
        grad = grad.sum_axis(Axis(0));
    }
    for (axis, &dim) in shape.iter().enumerate() {
        if dim == 1 && grad.shape()[axis] != 1 {
            grad = grad.sum_axis(Axis(axis)).insert_axis(Axis(axis));
        }
    }
    if grad.shape() != shape {
        bail!(
            "gradient of shape {:?} cannot flow into a tensor of shape {:?}",
            grad.shape(),
            shape
        );
    }
    Ok(grad)
}
