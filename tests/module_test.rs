use trainkit::{
    core::{StateDict, Tensor},
    nn::{linear, Dropout, DropoutConfigBuilder, Linear, LinearConfigBuilder, Module, ModuleMode, ReLU, Sequential, Trainable},
    seq, tensor, tensor_eq,
};

fn seeded_linear(input_dim: usize, output_dim: usize, seed: u64) -> Linear {
    Linear::new(
        LinearConfigBuilder::default()
            .input_dim(input_dim)
            .output_dim(output_dim)
            .seed(seed)
            .build()
            .unwrap(),
    )
}

#[test]
fn sequential_names_parameters_by_position() {
    let model = seq!(linear(2, 3), ReLU, linear(3, 1));
    let names: Vec<String> = model.parameters().keys().cloned().collect();
    assert_eq!(names, vec!["0.weight", "0.bias", "2.weight", "2.bias"]);
    assert_eq!(model.parameter_size(), 4);

    let output = model.forward(&tensor!([[1.0, 2.0], [3.0, 4.0]])).unwrap();
    assert_eq!(output.size(), vec![2, 1]);
}

#[test]
fn load_overwrites_matching_parameters() {
    let model = seeded_linear(1, 1, 0);
    let mut parameters = StateDict::new();
    parameters.insert("weight".to_owned(), tensor!([[3.0]]));
    parameters.insert("bias".to_owned(), tensor!([2.0]));
    model.load(&parameters).unwrap();

    let output = model.forward(&tensor!([[3.0]])).unwrap();
    assert_eq!(output.item().unwrap(), 11.0);
}

#[test]
fn load_rejects_shape_mismatch() {
    let model = seeded_linear(2, 1, 0);
    let mut parameters = StateDict::new();
    parameters.insert("weight".to_owned(), tensor!([[3.0]]));
    assert!(model.load(&parameters).is_err());
}

#[test]
fn failed_load_changes_nothing() {
    let model = seq!(seeded_linear(1, 1, 0), ReLU, seeded_linear(1, 1, 1));
    let before: Vec<f64> = model.parameters().values().map(|p| p.item().unwrap()).collect();
    let mut parameters = StateDict::new();
    parameters.insert("0.weight".to_owned(), tensor!([[5.0]]));
    parameters.insert("2.weight".to_owned(), tensor!([[1.0, 2.0]]));

    assert!(model.load(&parameters).is_err());
    let after: Vec<f64> = model.parameters().values().map(|p| p.item().unwrap()).collect();
    assert_eq!(after, before);
}

#[test]
fn strict_load_needs_exactly_the_same_names() {
    let model = seeded_linear(1, 1, 0);
    let mut parameters = StateDict::new();
    parameters.insert("weight".to_owned(), tensor!([[3.0]]));
    assert!(model.load_strict(&parameters).is_err());
    assert_eq!(model.weight.item().unwrap(), seeded_linear(1, 1, 0).weight.item().unwrap());

    parameters.insert("bias".to_owned(), tensor!([2.0]));
    parameters.insert("scale".to_owned(), tensor!([1.0]));
    let err = model.load_strict(&parameters).unwrap_err();
    assert!(err.to_string().contains("unexpected [scale]"));

    parameters.remove("scale");
    model.load_strict(&parameters).unwrap();
    assert_eq!(model.forward(&tensor!([[3.0]])).unwrap().item().unwrap(), 11.0);
}

#[test]
fn freeze_hides_parameters_from_training() {
    let model = seq!(seeded_linear(2, 2, 1), seeded_linear(2, 1, 2));
    assert_eq!(model.training_parameters().len(), 4);
    model[0].freeze();
    assert_eq!(model.training_parameters().len(), 2);
    model.unfreeze();
    assert_eq!(model.training_parameters().len(), 4);
}

#[test]
fn dropout_is_identity_in_eval_mode() {
    let dropout = Dropout::new(DropoutConfigBuilder::default().p(0.5).seed(7).build().unwrap()).unwrap();
    let input = Tensor::ones(&[4, 8]);

    dropout.eval();
    assert_eq!(dropout.mode(), ModuleMode::Eval);
    assert!(tensor_eq!(dropout.forward(&input).unwrap(), input));

    dropout.train();
    let output = dropout.forward(&input).unwrap().to_vec();
    assert!(output.iter().all(|&x| x == 0.0 || (x - 2.0).abs() < 1e-6));
}

#[test]
fn sequential_mode_reaches_children() {
    let dropout = Dropout::new(DropoutConfigBuilder::default().build().unwrap()).unwrap();
    let model: Sequential = seq!(dropout);
    model.eval();
    let input = tensor!([[1.0, 2.0]]);
    assert!(tensor_eq!(model.forward(&input).unwrap(), input));
}

#[test]
fn dropout_rejects_invalid_probability() {
    assert!(Dropout::new(DropoutConfigBuilder::default().p(1.5).build().unwrap()).is_err());
}
