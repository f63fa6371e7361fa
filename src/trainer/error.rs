use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrainerError {
    #[error("no model is set, call `set_model` first")]
    MissingModel,
    #[error("no configuration is set, call `set_config` first")]
    MissingConfig,
    #[error("no criterion is set, call `set_criterion` first")]
    MissingCriterion,
    #[error("no optimizer is set, call `set_optimizer` first")]
    MissingOptimizer,
    #[error("no data is set, call `set_data` first")]
    MissingData,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("i/o error on {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode or decode {path:?}")]
    Serialization {
        path: PathBuf,
        #[source]
        source: bincode::Error,
    },
    #[error("invalid JSON")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Framework(#[from] anyhow::Error),
}

pub type Result<T, E = TrainerError> = std::result::Result<T, E>;

impl TrainerError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> TrainerError {
        let path = path.into();
        move |source| TrainerError::Io { path, source }
    }
}
