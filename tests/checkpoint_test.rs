use std::fs;

use trainkit::{
    core::{to_record, Tensor},
    nn::{Linear, LinearConfigBuilder, MseLoss, Sequential, Trainable},
    optim::{adam, Adam, GradientDescent, GradientDescentBuilder, Optimize, Optimizer},
    seq, tensor,
    trainer::{
        Checkpoint, CheckpointConfigBuilder, Trainer, TrainerConfig, TrainerConfigBuilder,
        TrainerError,
    },
};

type TestTrainer = Trainer<Linear, MseLoss, Optimizer<GradientDescent>, Vec<(Tensor, Tensor)>>;

fn config(dir: &std::path::Path) -> TrainerConfig {
    TrainerConfigBuilder::default()
        .checkpoints(
            CheckpointConfigBuilder::default()
                .loc(dir.join("ckpt"))
                .build()
                .unwrap(),
        )
        .build()
        .unwrap()
}

fn model(seed: u64) -> Linear {
    Linear::new(
        LinearConfigBuilder::default()
            .input_dim(2)
            .output_dim(1)
            .seed(seed)
            .build()
            .unwrap(),
    )
}

fn batches() -> Vec<(Tensor, Tensor)> {
    vec![(
        tensor!([[1.0, 2.0], [3.0, -1.0]]),
        tensor!([[1.0], [0.5]]),
    )]
}

fn trainer(dir: &std::path::Path, seed: u64) -> TestTrainer {
    let model = model(seed);
    let algorithm = GradientDescentBuilder::default().momentum(0.9).build().unwrap();
    let optimizer = Optimizer::new(&model, algorithm, 0.01);
    let mut trainer = Trainer::from_parts(config(dir), batches(), model);
    trainer.set_criterion(MseLoss).set_optimizer(optimizer);
    trainer
}

#[test]
fn best_checkpoint_is_a_byte_copy() {
    let dir = tempfile::tempdir().unwrap();
    let trainer = trainer(dir.path(), 0);
    let state = trainer.checkpoint(1, 12.5).unwrap();

    let path = trainer.save_checkpoint(&state, true, None).unwrap();
    assert_eq!(path, dir.path().join("ckpt").join("checkpoint.ckpt"));
    let best = dir.path().join("ckpt").join("model_best.ckpt");
    assert_eq!(fs::read(&path).unwrap(), fs::read(&best).unwrap());
}

#[test]
fn non_best_checkpoint_leaves_best_file_alone() {
    let dir = tempfile::tempdir().unwrap();
    let trainer = trainer(dir.path(), 0);
    let state = trainer.checkpoint(1, 0.0).unwrap();
    trainer.save_checkpoint(&state, false, None).unwrap();
    assert!(!dir.path().join("ckpt").join("model_best.ckpt").exists());
}

#[test]
fn checkpoint_name_overrides_default() {
    let dir = tempfile::tempdir().unwrap();
    let trainer = trainer(dir.path(), 0);
    let state = trainer.checkpoint(2, 0.0).unwrap();
    let path = trainer.save_checkpoint(&state, false, Some("epoch_2.ckpt")).unwrap();
    assert_eq!(path, dir.path().join("ckpt").join("epoch_2.ckpt"));
    assert_eq!(Checkpoint::load(&path).unwrap(), state);
}

#[test]
fn load_restores_model_optimizer_and_progress() {
    let dir = tempfile::tempdir().unwrap();
    let mut original = trainer(dir.path(), 1);
    for epoch in 0..3 {
        original.train(epoch).unwrap();
    }
    let state = original.checkpoint(3, 42.0).unwrap();
    original.save_checkpoint(&state, false, None).unwrap();

    let mut resumed = trainer(dir.path(), 2);
    assert_ne!(
        to_record(&resumed.model().unwrap().parameters()),
        state.state_dict
    );
    let (epoch, best_prec1) = resumed.load_saved_checkpoint(None).unwrap();

    assert_eq!((epoch, best_prec1), (3, 42.0));
    assert_eq!(resumed.completed_epochs(), 3);
    assert_eq!(
        to_record(&resumed.model().unwrap().parameters()),
        to_record(&original.model().unwrap().parameters())
    );
    assert_eq!(
        resumed.optimizer().unwrap().state_dict(),
        original.optimizer().unwrap().state_dict()
    );
    assert_eq!(resumed.optimizer().unwrap().steps(), 3);

    // The restored parameters stay shared with the optimizer.
    resumed.train(3).unwrap();
    assert_ne!(
        to_record(&resumed.model().unwrap().parameters()),
        state.state_dict
    );
}

fn save_trained_checkpoint(dir: &std::path::Path) -> Checkpoint {
    let mut original = trainer(dir, 1);
    original.train(0).unwrap();
    let state = original.checkpoint(1, 7.0).unwrap();
    original.save_checkpoint(&state, false, None).unwrap();
    state
}

#[test]
fn load_rejects_checkpoint_with_other_parameter_names() {
    let dir = tempfile::tempdir().unwrap();
    save_trained_checkpoint(dir.path());

    // Same shapes, but the parameters are named `0.weight` and `0.bias`.
    let model = seq!(model(2));
    let optimizer = Optimizer::new(&model, GradientDescent::new(0.9), 0.01);
    let mut resumed: Trainer<Sequential, MseLoss, Optimizer<GradientDescent>, _> =
        Trainer::from_parts(config(dir.path()), batches(), model);
    resumed.set_criterion(MseLoss).set_optimizer(optimizer);
    let before = to_record(&resumed.model().unwrap().parameters());

    assert!(matches!(
        resumed.load_saved_checkpoint(None),
        Err(TrainerError::Framework(_))
    ));
    assert_eq!(to_record(&resumed.model().unwrap().parameters()), before);
    assert_eq!(resumed.completed_epochs(), 0);
    assert_eq!(resumed.current_lr(), 0.1);
}

#[test]
fn failed_optimizer_restore_leaves_model_untouched() {
    let dir = tempfile::tempdir().unwrap();
    save_trained_checkpoint(dir.path());

    let model = model(2);
    let optimizer = Optimizer::new(&model, adam(), 0.01);
    let mut resumed: Trainer<Linear, MseLoss, Optimizer<Adam>, _> =
        Trainer::from_parts(config(dir.path()), batches(), model);
    resumed.set_criterion(MseLoss).set_optimizer(optimizer);
    let model_before = to_record(&resumed.model().unwrap().parameters());
    let optimizer_before = resumed.optimizer().unwrap().state_dict();

    assert!(resumed.load_saved_checkpoint(None).is_err());
    assert_eq!(to_record(&resumed.model().unwrap().parameters()), model_before);
    assert_eq!(resumed.optimizer().unwrap().state_dict(), optimizer_before);
    assert_eq!(resumed.completed_epochs(), 0);
}

#[test]
fn missing_checkpoint_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut trainer = trainer(dir.path(), 0);
    assert!(matches!(
        trainer.load_saved_checkpoint(Some("nope.ckpt")),
        Err(TrainerError::Io { .. })
    ));
}

#[test]
fn corrupt_checkpoint_is_a_serialization_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut trainer = trainer(dir.path(), 0);
    fs::create_dir_all(dir.path().join("ckpt")).unwrap();
    fs::write(dir.path().join("ckpt").join("checkpoint.ckpt"), b"garbage").unwrap();
    assert!(matches!(
        trainer.load_saved_checkpoint(None),
        Err(TrainerError::Serialization { .. })
    ));
}

#[test]
fn loading_needs_config_model_and_optimizer() {
    let dir = tempfile::tempdir().unwrap();

    let mut trainer = TestTrainer::new();
    assert!(matches!(
        trainer.load_saved_checkpoint(None),
        Err(TrainerError::MissingConfig)
    ));
    trainer.set_config(config(dir.path()));
    assert!(matches!(
        trainer.load_saved_checkpoint(None),
        Err(TrainerError::MissingModel)
    ));
    trainer.set_model(model(0));
    assert!(matches!(
        trainer.load_saved_checkpoint(None),
        Err(TrainerError::MissingOptimizer)
    ));
}

#[test]
fn saving_needs_config() {
    let trainer = TestTrainer::new();
    let state = Checkpoint {
        epoch: 0,
        best_prec1: 0.0,
        state_dict: Default::default(),
        optimizer: Default::default(),
    };
    assert!(matches!(
        trainer.save_checkpoint(&state, true, None),
        Err(TrainerError::MissingConfig)
    ));
}
