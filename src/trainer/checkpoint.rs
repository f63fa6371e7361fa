use std::{
    fs::{self, File},
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::{core::StateRecord, optim::OptimizerState};

use super::{Result, TrainerError};

/// A snapshot of training progress: enough to resume from `epoch` with the same model and optimizer state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Number of epochs completed when the snapshot was taken.
    pub epoch: usize,
    pub best_prec1: f64,
    pub state_dict: StateRecord,
    pub optimizer: OptimizerState,
}

impl Checkpoint {
    /// Writes the checkpoint to `path` via a temporary file in the same directory, creating the directory if needed.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(TrainerError::io(&dir))?;

        let mut file = NamedTempFile::new_in(&dir).map_err(TrainerError::io(&dir))?;
        {
            let mut writer = BufWriter::new(file.as_file_mut());
            bincode::serialize_into(&mut writer, self).map_err(|source| {
                TrainerError::Serialization {
                    path: path.to_path_buf(),
                    source,
                }
            })?;
            writer.flush().map_err(TrainerError::io(path))?;
        }
        file.as_file().sync_all().map_err(TrainerError::io(path))?;
        file.persist(path)
            .map_err(|err| TrainerError::io(path)(err.error))?;
        debug!(path = %path.display(), epoch = self.epoch, "checkpoint written");
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Checkpoint> {
        let path = path.as_ref();
        let file = File::open(path).map_err(TrainerError::io(path))?;
        bincode::deserialize_from(BufReader::new(file)).map_err(|source| {
            TrainerError::Serialization {
                path: path.to_path_buf(),
                source,
            }
        })
    }
}

/// Byte-for-byte copy of a written checkpoint to `to`. Copying a file onto itself is a no-op.
pub(crate) fn copy_checkpoint(from: &Path, to: &Path) -> Result<()> {
    if from == to {
        return Ok(());
    }
    if let Some(dir) = to.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(TrainerError::io(dir))?;
    }
    fs::copy(from, to).map_err(TrainerError::io(to))?;
    Ok(())
}
