use proptest::prelude::*;
use trainkit::{
    core::Tensor,
    nn::{Linear, LinearConfigBuilder, Module, Trainable},
    optim::{
        adam, AdamBuilder, GradientDescent, GradientDescentBuilder, LrScheduler, Optimize,
        Optimizer, StepLR,
    },
    tensor,
};

fn regression_data() -> (Tensor, Tensor) {
    let inputs = tensor!([[1.0], [3.0], [5.0], [4.0], [8.0], [10.0], [2.0], [6.0]]);
    let labels = tensor!([[4.0], [10.0], [16.], [13.0], [25.], [31.], [7.], [19.0]]);
    (inputs, labels)
}

fn model(seed: u64) -> Linear {
    Linear::new(
        LinearConfigBuilder::default()
            .input_dim(1)
            .output_dim(1)
            .seed(seed)
            .build()
            .unwrap(),
    )
}

fn fit<O: Optimize>(model: &Linear, optimizer: &mut O, steps: usize) -> f64 {
    let (inputs, labels) = regression_data();
    let mut loss_value = f64::INFINITY;
    for _ in 0..steps {
        optimizer.zero_grad();
        let loss = model.forward(&inputs).unwrap().mse_loss(&labels).unwrap();
        loss.backward().unwrap();
        optimizer.step().unwrap();
        loss_value = loss.item().unwrap();
    }
    loss_value
}

#[test]
fn gradient_descent_fits_a_line() {
    let model = model(42);
    let mut optimizer = Optimizer::new(&model, GradientDescent::new(0.), 0.01);
    fit(&model, &mut optimizer, 5000);

    let weight = model.weight.item().unwrap();
    let bias = model.bias.as_ref().unwrap().item().unwrap();
    println!("weight: {}, bias: {}", weight, bias);
    assert!((weight - 3.0).abs() < 1e-2);
    assert!((bias - 1.0).abs() < 1e-2);
    assert_eq!(optimizer.steps(), 5000);
}

#[test]
fn momentum_fits_a_line() {
    let model = model(3);
    let algorithm = GradientDescentBuilder::default().momentum(0.9).build().unwrap();
    let mut optimizer = Optimizer::new(&model, algorithm, 0.001);
    let loss = fit(&model, &mut optimizer, 3000);
    assert!(loss < 1e-3, "loss {}", loss);
}

#[test]
fn adam_reduces_loss() {
    let model = model(7);
    let mut optimizer = Optimizer::new(&model, adam(), 0.01);
    let first = fit(&model, &mut optimizer, 1);
    let last = fit(&model, &mut optimizer, 5000);
    println!("first: {}, last: {}", first, last);
    assert!(last < first);
    assert!(last < 1.0);
}

#[test]
fn frozen_parameters_are_not_updated() {
    let model = model(5);
    model.bias.as_ref().unwrap().set_requires_grad(false);
    let bias = model.bias.as_ref().unwrap().item().unwrap();

    let mut optimizer = Optimizer::new(&model, GradientDescent::new(0.), 0.01);
    assert_eq!(optimizer.param_groups()[0].parameters().len(), 1);
    fit(&model, &mut optimizer, 10);
    assert_eq!(model.bias.as_ref().unwrap().item().unwrap(), bias);
}

#[test]
fn optimizer_state_round_trips() {
    let trained = model(1);
    let algorithm = AdamBuilder::default().weight_decay(1e-4).build().unwrap();
    let mut optimizer = Optimizer::new(&trained, algorithm, 0.01);
    fit(&trained, &mut optimizer, 20);
    let state = optimizer.state_dict();
    assert_eq!(state.step, 20);
    assert_eq!(state.param_groups[0].state.step, 20);

    let fresh = model(2);
    let mut restored = Optimizer::new(&fresh, adam(), 0.5);
    restored.load_state_dict(state.clone()).unwrap();
    assert_eq!(restored.state_dict(), state);
    assert_eq!(restored.learning_rates(), vec![0.01]);
}

#[test]
fn optimizer_state_needs_matching_groups() {
    let first = model(1);
    let mut optimizer = Optimizer::new(&first, GradientDescent::new(0.9), 0.1);
    let mut state = optimizer.state_dict();
    state.param_groups.clear();
    assert!(optimizer.load_state_dict(state).is_err());
}

#[test]
fn optimizer_state_must_match_parameter_shapes() {
    let narrow = model(1);
    let mut trained = Optimizer::new(&narrow, GradientDescent::new(0.9), 0.1);
    fit(&narrow, &mut trained, 3);

    let wide = Linear::new(
        LinearConfigBuilder::default()
            .input_dim(2)
            .output_dim(1)
            .seed(2)
            .build()
            .unwrap(),
    );
    let mut optimizer = Optimizer::new(&wide, GradientDescent::new(0.9), 0.5);
    let before = optimizer.state_dict();
    assert!(optimizer.load_state_dict(trained.state_dict()).is_err());
    assert_eq!(optimizer.state_dict(), before);
    assert_eq!(optimizer.learning_rates(), vec![0.5]);
}

#[test]
fn optimizer_state_must_carry_every_buffer() {
    let trained = model(1);
    let mut optimizer = Optimizer::new(&trained, adam(), 0.01);
    fit(&trained, &mut optimizer, 5);
    let before = optimizer.state_dict();

    let mut missing = before.clone();
    missing.param_groups[0].state.buffers.remove("exp_avg_sq");
    assert!(optimizer.load_state_dict(missing).is_err());

    let mut short = before.clone();
    for (_, buffers) in short.param_groups[0].state.buffers.iter_mut() {
        buffers.pop();
    }
    assert!(optimizer.load_state_dict(short).is_err());

    assert_eq!(optimizer.state_dict(), before);
    assert_eq!(optimizer.steps(), 5);
    // The kept state still drives the next step.
    fit(&trained, &mut optimizer, 1);
    assert_eq!(optimizer.state_dict().param_groups[0].state.step, 6);
}

#[test]
fn learning_rates_are_mutable_per_group() {
    let first = model(1);
    let second = model(2);
    let mut optimizer = Optimizer::new(&first, GradientDescent::new(0.), 0.1);
    optimizer.add_param_group(second.training_parameters(), GradientDescent::new(0.), 0.2);
    assert_eq!(optimizer.learning_rates(), vec![0.1, 0.2]);
    for lr in optimizer.learning_rates_mut() {
        *lr = 0.05;
    }
    assert_eq!(optimizer.learning_rates(), vec![0.05, 0.05]);
}

#[test]
fn step_lr_decays_every_step_size_epochs() {
    let scheduler = StepLR::new(0.1, 30, 0.1).unwrap();
    assert_eq!(scheduler.learning_rate(0), 0.1);
    assert!((scheduler.learning_rate(30) - 0.01).abs() < 1e-12);
    assert!((scheduler.learning_rate(60) - 0.001).abs() < 1e-12);
    assert!(StepLR::new(0.1, 0, 0.1).is_err());
}

proptest! {
    #[test]
    fn step_lr_is_piecewise_constant_and_non_increasing(
        base in 1e-4f64..1.0,
        gamma in 0.01f64..=1.0,
        step_size in 1usize..50,
        epoch in 0usize..500,
    ) {
        let scheduler = StepLR::new(base, step_size, gamma).unwrap();
        let lr = scheduler.learning_rate(epoch);
        prop_assert!(scheduler.learning_rate(epoch + 1) <= lr);
        let start = epoch - epoch % step_size;
        prop_assert_eq!(scheduler.learning_rate(start), lr);
        prop_assert!(lr <= base);
    }
}
