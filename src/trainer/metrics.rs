use std::{
    fs::{File, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{Result, TrainerError};

/// A single named metric value, recorded at a global step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub name: String,
    pub value: f64,
    pub step: u64,
}

/// Receives one value per metric and step, e.g. the training loss of every batch.
pub trait MetricsSink {
    fn log_value(&mut self, name: &str, value: f64, step: u64) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Emits every metric as a `tracing` event on the `trainkit::metrics` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl MetricsSink for TracingSink {
    fn log_value(&mut self, name: &str, value: f64, step: u64) -> Result<()> {
        info!(target: "trainkit::metrics", name, value, step);
        Ok(())
    }
}

/// Appends every metric to a file, one JSON object per line.
#[derive(Debug)]
pub struct JsonLinesSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonLinesSink {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<JsonLinesSink> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(TrainerError::io(&path))?;
        Ok(JsonLinesSink {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MetricsSink for JsonLinesSink {
    fn log_value(&mut self, name: &str, value: f64, step: u64) -> Result<()> {
        let record = MetricRecord {
            name: name.to_owned(),
            value,
            step,
        };
        serde_json::to_writer(&mut self.writer, &record)?;
        self.writer
            .write_all(b"\n")
            .map_err(TrainerError::io(&self.path))
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush().map_err(TrainerError::io(&self.path))
    }
}

/// Keeps every metric in memory. Clones share the same records.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<MetricRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<MetricRecord> {
        self.records.lock().clone()
    }

    /// The values logged under `name`, in order.
    pub fn values(&self, name: &str) -> Vec<f64> {
        self.records
            .lock()
            .iter()
            .filter(|record| record.name == name)
            .map(|record| record.value)
            .collect()
    }
}

impl MetricsSink for MemorySink {
    fn log_value(&mut self, name: &str, value: f64, step: u64) -> Result<()> {
        self.records.lock().push(MetricRecord {
            name: name.to_owned(),
            value,
            step,
        });
        Ok(())
    }
}
