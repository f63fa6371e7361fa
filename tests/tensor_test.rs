use trainkit::{assert_tensor_eq, core::Tensor, tensor};

#[test]
fn backward_accumulates_into_leaves() {
    let a = tensor!([3.0]);
    let b = tensor!([1.0]);
    a.set_requires_grad(true);
    b.set_requires_grad(true);

    // p = ab + a + b
    let p = a.mul(&b).unwrap().add(&a).unwrap().add(&b).unwrap();
    p.sum().backward().unwrap();

    assert_eq!(p.to_vec(), vec![7.0]);
    assert_eq!(a.grad().unwrap().into_raw_vec(), vec![2.0]);
    assert_eq!(b.grad().unwrap().into_raw_vec(), vec![4.0]);
}

#[test]
fn linear_regression_gradient() {
    let x = tensor!([[1.0], [2.0]]);
    let y = tensor!([[3.0], [5.0]]);
    let w = tensor!([[0.0]]);
    w.set_requires_grad(true);

    let loss = x.matmul(&w).unwrap().mse_loss(&y).unwrap();
    assert!((loss.item().unwrap() - 17.0).abs() < 1e-6);
    loss.backward().unwrap();
    // d/dw mean((xw - y)^2) = mean(2 x (xw - y)) = (2*1*-3 + 2*2*-5) / 2
    assert_tensor_eq!(Tensor::from(w.grad().unwrap()), tensor!([[-13.0]]));
}

#[test]
fn zero_grad_clears_accumulated_gradient() {
    let w = tensor!([1.0, 2.0]);
    w.set_requires_grad(true);
    w.square().sum().backward().unwrap();
    w.square().sum().backward().unwrap();
    assert_eq!(w.grad().unwrap().into_raw_vec(), vec![4.0, 8.0]);
    w.zero_grad();
    assert!(w.grad().is_none());
}

#[test]
fn backward_needs_a_scalar() {
    let w = tensor!([1.0, 2.0]);
    w.set_requires_grad(true);
    assert!(w.square().backward().is_err());
}

#[test]
fn stack_adds_a_leading_axis() {
    let stacked = Tensor::stack(&[tensor!([1.0, 2.0]), tensor!([3.0, 4.0])]).unwrap();
    assert_tensor_eq!(stacked, tensor!([[1.0, 2.0], [3.0, 4.0]]));
    assert!(Tensor::stack(&[tensor!([1.0]), tensor!([1.0, 2.0])]).is_err());
}
