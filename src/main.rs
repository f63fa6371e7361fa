use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;
use trainkit::{
    core::describe,
    dataset::{
        DataLoaderConfigBuilder, Dataset, LoadFromJson, TensorDataset, TensorDatasetJsonConfig,
    },
    nn::{CrossEntropyLoss, Linear, LinearConfigBuilder, ReLU, Sequential, Trainable},
    optim::{adam, GradientDescent, Optimizer, OptimizerAlgorithm},
    seq,
    trainer::{JsonLinesSink, Trainer, TrainerConfig},
};

/// Train a two-layer perceptron classifier on a JSON dataset.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Trainer configuration (JSON).
    #[arg(short, long)]
    config: PathBuf,
    /// Dataset: a JSON array of `{"input": [..], "label": <class index>}` objects.
    #[arg(short, long)]
    data: PathBuf,
    #[arg(long, default_value_t = 10)]
    epochs: usize,
    /// Width of the hidden layer.
    #[arg(long, default_value_t = 32)]
    hidden: usize,
    #[arg(long, default_value_t = 16)]
    batch_size: usize,
    /// Resume from the checkpoint named by `checkpoints.ckpt_fname`.
    #[arg(long)]
    resume: bool,
    #[arg(long, value_enum, default_value_t = OptimizerKind::Sgd)]
    optimizer: OptimizerKind,
    /// Seed for weight initialization and shuffling.
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OptimizerKind {
    Sgd,
    Adam,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let config = TrainerConfig::from_json_file(&args.config)?;
    let dataset = TensorDataset::from_json(&args.data, TensorDatasetJsonConfig::default())?;
    let (input_dim, num_classes) = input_and_class_count(&dataset)?;
    info!(
        samples = dataset.size(),
        input_dim, num_classes, "loaded {}", args.data.display()
    );

    let model = seq!(
        layer(input_dim, args.hidden, args.seed)?,
        ReLU,
        layer(args.hidden, num_classes, args.seed.map(|seed| seed + 1))?,
    );
    let lr = config.hyperparameters.lr;
    match args.optimizer {
        OptimizerKind::Sgd => {
            let optimizer = Optimizer::new(&model, GradientDescent::new(0.9), lr);
            run(&args, config, dataset, model, optimizer)
        }
        OptimizerKind::Adam => {
            let optimizer = Optimizer::new(&model, adam(), lr);
            run(&args, config, dataset, model, optimizer)
        }
    }
}

fn layer(input_dim: usize, output_dim: usize, seed: Option<u64>) -> Result<Linear> {
    let mut config = LinearConfigBuilder::default()
        .input_dim(input_dim)
        .output_dim(output_dim);
    if let Some(seed) = seed {
        config = config.seed(seed);
    }
    Ok(Linear::new(config.build()?))
}

/// Input width of the first sample, and one more than the largest class index.
fn input_and_class_count(dataset: &TensorDataset) -> Result<(usize, usize)> {
    let input_dim = match dataset.inputs().next() {
        Some(input) => input.numel(),
        None => bail!("the dataset is empty"),
    };
    let mut max_label = 0.0f32;
    for label in dataset.labels() {
        if label.numel() != 1 {
            bail!("expected one class index per sample, got a label of shape {:?}", label.size());
        }
        max_label = max_label.max(label.to_vec()[0]);
    }
    Ok((input_dim, max_label as usize + 1))
}

fn run<T: OptimizerAlgorithm>(
    args: &Args,
    config: TrainerConfig,
    dataset: TensorDataset,
    model: Sequential,
    optimizer: Optimizer<T>,
) -> Result<()> {
    let metrics_file = config.logs.metrics_file.clone();
    let mut loader_config = DataLoaderConfigBuilder::default()
        .batch_size(args.batch_size)
        .shuffle(true);
    if let Some(seed) = args.seed {
        loader_config = loader_config.seed(seed);
    }
    let loader = dataset.into_loader(loader_config.build()?);

    let mut trainer = Trainer::from_parts(config, loader, model);
    trainer
        .set_name("mlp")
        .set_criterion(CrossEntropyLoss)
        .set_optimizer(optimizer);
    if let Some(path) = metrics_file {
        trainer.set_metrics_sink(JsonLinesSink::open(path)?);
    }
    if let Some(model) = trainer.model() {
        info!("model parameters: {}", describe(&model.parameters()));
    }
    info!(count = trainer.trainable_parameters(), "trainable parameters");

    let (mut start_epoch, mut best_prec1) = (0, 0.0);
    if args.resume {
        (start_epoch, best_prec1) = trainer.load_saved_checkpoint(None)?;
    }
    for epoch in start_epoch..args.epochs {
        trainer.adjust_learning_rate(epoch)?;
        trainer.train(epoch)?;

        let prec1 = trainer.meters().top1.avg;
        let is_best = prec1 > best_prec1;
        best_prec1 = f64::max(prec1, best_prec1);
        let state = trainer.checkpoint(epoch + 1, best_prec1)?;
        let path = trainer.save_checkpoint(&state, is_best, None)?;
        info!(
            epoch = epoch + 1,
            loss = trainer.meters().losses.avg,
            prec1,
            best_prec1,
            "saved {}",
            path.display()
        );
    }
    Ok(())
}
