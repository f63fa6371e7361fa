use std::{path::PathBuf, time::Instant};

use tracing::info;

use crate::{
    core::{from_record, parameter_count, to_record, Tensor},
    dataset::{Batch, DataSource},
    nn::{Criterion, Module, Trainable},
    optim::{LrScheduler, Optimize, StepLR},
};

use super::{
    checkpoint::copy_checkpoint, Checkpoint, Meters, MetricsSink, Result, TracingSink,
    TrainerConfig, TrainerError,
};

/// Drives supervised training of a model `M` with a criterion `C`, an optimizer `O` and a data source `D`.
///
/// Every collaborator may be supplied at any time through its setter. [`Trainer::train`] refuses to run until all of model, config, criterion, optimizer and data are present.
///
/// ```ignore
/// let mut trainer = Trainer::new();
/// trainer
///     .set_config(config)
///     .set_data(loader)
///     .set_model(model)
///     .set_criterion(CrossEntropyLoss)
///     .set_optimizer(optimizer);
/// for epoch in 0..epochs {
///     trainer.adjust_learning_rate(epoch)?;
///     trainer.train(epoch)?;
/// }
/// ```
pub struct Trainer<M, C, O, D> {
    name: Option<String>,
    config: Option<TrainerConfig>,
    data: Option<D>,
    model: Option<M>,
    criterion: Option<C>,
    optimizer: Option<O>,
    trainable_parameters: Option<usize>,
    completed_epochs: usize,
    curr_lr: f64,
    global_step: u64,
    meters: Meters,
    metrics: Box<dyn MetricsSink>,
}

impl<M, C, O, D> Default for Trainer<M, C, O, D> {
    fn default() -> Self {
        Trainer {
            name: None,
            config: None,
            data: None,
            model: None,
            criterion: None,
            optimizer: None,
            trainable_parameters: None,
            completed_epochs: 0,
            curr_lr: 0.0,
            global_step: 0,
            meters: Meters::default(),
            metrics: Box::new(TracingSink),
        }
    }
}

impl<M, C, O, D> Trainer<M, C, O, D> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_name<S: Into<String>>(&mut self, name: S) -> &mut Self {
        self.name = Some(name.into());
        self
    }

    /// Also resets the current learning rate to `hyperparameters.lr`.
    pub fn set_config(&mut self, config: TrainerConfig) -> &mut Self {
        self.curr_lr = config.hyperparameters.lr;
        self.config = Some(config);
        self
    }

    pub fn set_data(&mut self, data: D) -> &mut Self {
        self.data = Some(data);
        self
    }

    pub fn set_criterion(&mut self, criterion: C) -> &mut Self {
        self.criterion = Some(criterion);
        self
    }

    pub fn set_optimizer(&mut self, optimizer: O) -> &mut Self {
        self.optimizer = Some(optimizer);
        self
    }

    /// Replace the sink that receives the per-batch `train_loss`. Defaults to [`TracingSink`].
    pub fn set_metrics_sink<S: MetricsSink + 'static>(&mut self, sink: S) -> &mut Self {
        self.metrics = Box::new(sink);
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn config(&self) -> Option<&TrainerConfig> {
        self.config.as_ref()
    }

    pub fn data(&self) -> Option<&D> {
        self.data.as_ref()
    }

    pub fn model(&self) -> Option<&M> {
        self.model.as_ref()
    }

    /// Mutable access to the model. The cached parameter count is dropped, since the caller may add or remove parameters.
    pub fn model_mut(&mut self) -> Option<&mut M> {
        self.trainable_parameters = None;
        self.model.as_mut()
    }

    pub fn criterion(&self) -> Option<&C> {
        self.criterion.as_ref()
    }

    pub fn optimizer(&self) -> Option<&O> {
        self.optimizer.as_ref()
    }

    pub fn optimizer_mut(&mut self) -> Option<&mut O> {
        self.optimizer.as_mut()
    }

    /// Number of epochs finished, either by [`Trainer::train`] or restored from a checkpoint.
    pub fn completed_epochs(&self) -> usize {
        self.completed_epochs
    }

    pub fn current_lr(&self) -> f64 {
        self.curr_lr
    }

    /// Number of optimizer steps taken by this trainer.
    pub fn global_step(&self) -> u64 {
        self.global_step
    }

    /// The meters of the last (or current) epoch.
    pub fn meters(&self) -> &Meters {
        &self.meters
    }

    /// Writes `state` to `<loc>/<name or ckpt_fname>`. When `is_best`, the written file is also copied to `<loc>/<best_ckpt_fname>`.
    ///
    /// Returns the path of the primary checkpoint file.
    pub fn save_checkpoint(
        &self,
        state: &Checkpoint,
        is_best: bool,
        checkpoint_name: Option<&str>,
    ) -> Result<PathBuf> {
        let config = self.config.as_ref().ok_or(TrainerError::MissingConfig)?;
        let path = config.checkpoint_path(checkpoint_name);
        state.save(&path)?;
        if is_best {
            copy_checkpoint(&path, &config.best_checkpoint_path())?;
        }
        Ok(path)
    }
}

impl<M: Trainable, C, O, D> Trainer<M, C, O, D> {
    pub fn from_parts(config: TrainerConfig, data: D, model: M) -> Self {
        let mut trainer = Self::new();
        trainer.set_config(config).set_data(data).set_model(model);
        trainer
    }

    /// Also counts the parameters of the new model.
    pub fn set_model(&mut self, model: M) -> &mut Self {
        self.model = Some(model);
        self.trainable_parameters = None;
        self.trainable_parameters = self.count_trainable_parameters().ok();
        self
    }

    /// Total number of scalar parameters of the model. The result is cached.
    pub fn count_trainable_parameters(&mut self) -> Result<usize> {
        let model = self.model.as_ref().ok_or(TrainerError::MissingModel)?;
        let count = parameter_count(&model.parameters());
        self.trainable_parameters = Some(count);
        Ok(count)
    }

    /// The cached parameter count, computed first if needed. Without a model this is 0.
    pub fn trainable_parameters(&mut self) -> usize {
        match self.trainable_parameters {
            Some(count) => count,
            None => self.count_trainable_parameters().unwrap_or(0),
        }
    }
}

impl<M: Trainable, C, O: Optimize, D> Trainer<M, C, O, D> {
    /// Snapshot the current model and optimizer state.
    pub fn checkpoint(&self, epoch: usize, best_prec1: f64) -> Result<Checkpoint> {
        let model = self.model.as_ref().ok_or(TrainerError::MissingModel)?;
        let optimizer = self.optimizer.as_ref().ok_or(TrainerError::MissingOptimizer)?;
        Ok(Checkpoint {
            epoch,
            best_prec1,
            state_dict: to_record(&model.parameters()),
            optimizer: optimizer.state_dict(),
        })
    }

    /// Restore the model and optimizer from `<loc>/<name or ckpt_fname>`, returning the saved `(epoch, best_prec1)`.
    ///
    /// The checkpoint must name exactly the model's parameters, with the same shapes, and carry a state the optimizer accepts. Otherwise an error is returned and neither the model nor the optimizer is touched.
    pub fn load_saved_checkpoint(&mut self, checkpoint_name: Option<&str>) -> Result<(usize, f64)> {
        let config = self.config.as_ref().ok_or(TrainerError::MissingConfig)?;
        let model = self.model.as_ref().ok_or(TrainerError::MissingModel)?;
        let optimizer = self.optimizer.as_mut().ok_or(TrainerError::MissingOptimizer)?;

        let path = config.checkpoint_path(checkpoint_name);
        let checkpoint = Checkpoint::load(&path)?;
        let state_dict = from_record(checkpoint.state_dict)?;
        model.check_strict(&state_dict)?;
        optimizer.check_state_dict(&checkpoint.optimizer)?;

        model.load_strict(&state_dict)?;
        optimizer.load_state_dict(checkpoint.optimizer)?;
        if let Some(&lr) = optimizer.learning_rates().first() {
            self.curr_lr = lr;
        }
        self.completed_epochs = checkpoint.epoch;
        info!(
            "=> loaded checkpoint '{}' (epoch {})",
            path.display(),
            checkpoint.epoch
        );
        Ok((checkpoint.epoch, checkpoint.best_prec1))
    }

    /// Set the learning rate of every parameter group to `lr * lr_decay ^ (epoch / lr_decay_epoch)`.
    pub fn adjust_learning_rate(&mut self, epoch: usize) -> Result<f64> {
        let config = self.config.as_ref().ok_or(TrainerError::MissingConfig)?;
        let optimizer = self.optimizer.as_mut().ok_or(TrainerError::MissingOptimizer)?;
        let hyperparameters = &config.hyperparameters;
        if hyperparameters.lr_decay_epoch == 0 {
            return Err(TrainerError::InvalidConfig(
                "hyperparameters.lr_decay_epoch must be positive".to_owned(),
            ));
        }
        let scheduler = StepLR::new(
            hyperparameters.lr,
            hyperparameters.lr_decay_epoch,
            hyperparameters.lr_decay,
        )?;
        let lr = scheduler.learning_rate(epoch);
        for group_lr in optimizer.learning_rates_mut() {
            *group_lr = lr;
        }
        self.curr_lr = lr;
        Ok(lr)
    }
}

impl<M, C, O, D> Trainer<M, C, O, D>
where
    D: DataSource,
    D::Input: Batch,
    D::Label: Batch,
    M: Module<D::Input, Tensor>,
    C: Criterion<Tensor, D::Label>,
    O: Optimize,
{
    /// Run one epoch over the data. `epoch` is zero-based and only used for logging.
    ///
    /// Any error inside the loop aborts the epoch and is returned as is.
    pub fn train(&mut self, epoch: usize) -> Result<()> {
        let model = self.model.as_ref().ok_or(TrainerError::MissingModel)?;
        let config = self.config.as_ref().ok_or(TrainerError::MissingConfig)?;
        let criterion = self.criterion.as_ref().ok_or(TrainerError::MissingCriterion)?;
        let optimizer = self.optimizer.as_mut().ok_or(TrainerError::MissingOptimizer)?;
        let data = self.data.as_ref().ok_or(TrainerError::MissingData)?;

        let log_interval = config.logs.log_interval;
        if log_interval == 0 {
            return Err(TrainerError::InvalidConfig(
                "logs.log_interval must be positive".to_owned(),
            ));
        }
        let device = if config.gpu { Some(config.device) } else { None };
        let (num_batches, dataset_len) = (data.len(), data.dataset_len());

        self.meters.reset();
        model.train();

        let mut end = Instant::now();
        for (batch_idx, batch) in data.batches().enumerate() {
            let (input, labels) = batch?;
            self.meters.data_time.update(end.elapsed().as_secs_f64(), 1);

            let (input, labels) = match device {
                Some(device) => (input.to_device(device)?, labels.to_device(device)?),
                None => (input, labels),
            };
            let batch_len = input.batch_len();

            let output = model.forward(&input)?;
            let loss = criterion.loss(&output, &labels)?;
            optimizer.zero_grad();
            loss.backward()?;
            let loss_value = loss.item()?;
            optimizer.step()?;
            self.global_step += 1;

            self.meters.losses.update(loss_value, batch_len);
            if let Some(prec1) = criterion.accuracy(&output, &labels, 1)? {
                self.meters.top1.update(prec1, batch_len);
            }
            if let Some(prec5) = criterion.accuracy(&output, &labels, 5)? {
                self.meters.top5.update(prec5, batch_len);
            }
            self.metrics
                .log_value("train_loss", loss_value, self.global_step)?;
            self.meters.batch_time.update(end.elapsed().as_secs_f64(), 1);
            end = Instant::now();

            if batch_idx % log_interval == 0 {
                info!(
                    "Train Epoch: {} [{}/{} ({:.0}%)]\tLoss: {:.6}\tlr: {:.6}",
                    epoch + 1,
                    batch_idx * batch_len,
                    dataset_len,
                    100.0 * batch_idx as f64 / num_batches as f64,
                    loss_value,
                    self.curr_lr
                );
            }
        }
        self.metrics.flush()?;
        self.completed_epochs = epoch + 1;
        Ok(())
    }
}
