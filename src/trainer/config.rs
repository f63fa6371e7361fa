use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::core::Device;

use super::{Result, TrainerError};

#[derive(Builder, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[builder(pattern = "owned")]
#[serde(default)]
pub struct Hyperparameters {
    /// Base learning rate, before any decay.
    #[builder(default = "0.1")]
    pub lr: f64,
    /// Factor applied to the learning rate every `lr_decay_epoch` epochs.
    #[builder(default = "0.1")]
    pub lr_decay: f64,
    #[builder(default = "30")]
    pub lr_decay_epoch: usize,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Hyperparameters {
            lr: 0.1,
            lr_decay: 0.1,
            lr_decay_epoch: 30,
        }
    }
}

#[derive(Builder, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[builder(pattern = "owned", setter(into))]
#[serde(default)]
pub struct CheckpointConfig {
    /// Directory holding the checkpoint files.
    #[builder(default = "PathBuf::from(\"checkpoints\")")]
    pub loc: PathBuf,
    #[builder(default = "\"checkpoint.ckpt\".to_owned()")]
    pub ckpt_fname: String,
    #[builder(default = "\"model_best.ckpt\".to_owned()")]
    pub best_ckpt_fname: String,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        CheckpointConfig {
            loc: PathBuf::from("checkpoints"),
            ckpt_fname: "checkpoint.ckpt".to_owned(),
            best_ckpt_fname: "model_best.ckpt".to_owned(),
        }
    }
}

#[derive(Builder, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[builder(pattern = "owned")]
#[serde(default)]
pub struct LogConfig {
    /// Print a progress line every `log_interval` batches.
    #[builder(default = "10")]
    pub log_interval: usize,
    /// Append every metric as a JSON line to this file.
    #[builder(default, setter(into, strip_option))]
    pub metrics_file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            log_interval: 10,
            metrics_file: None,
        }
    }
}

/// Everything a [`Trainer`](super::Trainer) reads from its configuration.
///
/// ```json
/// {
///   "hyperparameters": { "lr": 0.1, "lr_decay": 0.1, "lr_decay_epoch": 30 },
///   "checkpoints": { "loc": "checkpoints", "ckpt_fname": "checkpoint.ckpt", "best_ckpt_fname": "model_best.ckpt" },
///   "logs": { "log_interval": 10 },
///   "gpu": false,
///   "device": "cpu"
/// }
/// ```
///
/// Missing keys take their default values.
#[derive(Builder, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[builder(pattern = "owned")]
#[serde(default)]
pub struct TrainerConfig {
    #[builder(default)]
    pub hyperparameters: Hyperparameters,
    #[builder(default)]
    pub checkpoints: CheckpointConfig,
    #[builder(default)]
    pub logs: LogConfig,
    /// Move every batch to `device` before the forward pass.
    #[builder(default)]
    pub gpu: bool,
    #[builder(default)]
    pub device: Device,
}

impl TrainerConfig {
    pub fn from_json_str(json: &str) -> Result<TrainerConfig> {
        let config: TrainerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<TrainerConfig> {
        let path = path.as_ref();
        let file = File::open(path).map_err(TrainerError::io(path))?;
        let config: TrainerConfig = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |message: &str| Err(TrainerError::InvalidConfig(message.to_owned()));
        if !(self.hyperparameters.lr > 0.0) {
            return invalid("hyperparameters.lr must be positive");
        }
        if self.hyperparameters.lr_decay_epoch == 0 {
            return invalid("hyperparameters.lr_decay_epoch must be positive");
        }
        if self.logs.log_interval == 0 {
            return invalid("logs.log_interval must be positive");
        }
        Ok(())
    }

    /// `<loc>/<name>`, falling back to `ckpt_fname` when no name is given.
    pub fn checkpoint_path(&self, name: Option<&str>) -> PathBuf {
        self.checkpoints
            .loc
            .join(name.unwrap_or(&self.checkpoints.ckpt_fname))
    }

    pub fn best_checkpoint_path(&self) -> PathBuf {
        self.checkpoints.loc.join(&self.checkpoints.best_ckpt_fname)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_take_defaults() {
        let config = TrainerConfig::from_json_str(r#"{"hyperparameters": {"lr": 0.5}}"#).unwrap();
        assert_eq!(config.hyperparameters.lr, 0.5);
        assert_eq!(config.hyperparameters.lr_decay_epoch, 30);
        assert_eq!(config.logs.log_interval, 10);
        assert_eq!(config.device, Device::Cpu);
        assert!(!config.gpu);
        assert_eq!(
            config.checkpoint_path(None),
            PathBuf::from("checkpoints/checkpoint.ckpt")
        );
    }

    #[test]
    fn cuda_device_parses() {
        let config =
            TrainerConfig::from_json_str(r#"{"gpu": true, "device": {"cuda": 1}}"#).unwrap();
        assert_eq!(config.device, Device::Cuda(1));
    }

    #[test]
    fn zero_intervals_are_rejected() {
        for json in [
            r#"{"hyperparameters": {"lr_decay_epoch": 0}}"#,
            r#"{"logs": {"log_interval": 0}}"#,
            r#"{"hyperparameters": {"lr": 0.0}}"#,
        ] {
            assert!(matches!(
                TrainerConfig::from_json_str(json),
                Err(TrainerError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn builder_matches_defaults() {
        let built = TrainerConfigBuilder::default().build().unwrap();
        assert_eq!(built, TrainerConfig::default());
    }
}
