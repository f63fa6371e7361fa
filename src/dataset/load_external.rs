use std::{fs::File, io::BufReader, path::Path};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::Value;

use crate::core::Tensor;

use super::TensorDataset;

pub trait LoadFromJson: Sized {
    type ConfigType;

    fn from_json<P: AsRef<Path>>(path: P, config: Self::ConfigType) -> Result<Self>;
}

/// Names the fields of each JSON object that hold the input and the label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorDatasetJsonConfig {
    pub input_field: String,
    pub label_field: String,
}

impl Default for TensorDatasetJsonConfig {
    fn default() -> Self {
        TensorDatasetJsonConfig {
            input_field: "input".to_owned(),
            label_field: "label".to_owned(),
        }
    }
}

/// A label is either a single number, such as a class index, or a vector of targets.
#[derive(Deserialize)]
#[serde(untagged)]
enum JsonLabel {
    Scalar(f32),
    Vector(Vec<f32>),
}

impl JsonLabel {
    fn into_tensor(self) -> Tensor {
        match self {
            JsonLabel::Scalar(value) => Tensor::scalar(value),
            JsonLabel::Vector(values) => Tensor::from_slice(&values),
        }
    }
}

impl LoadFromJson for TensorDataset {
    type ConfigType = TensorDatasetJsonConfig;

    /// Reads a JSON array of objects such as `[{"input": [0.5, 1.0], "label": 1}]`.
    fn from_json<P: AsRef<Path>>(path: P, config: Self::ConfigType) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let json: Value = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("failed to parse {}", path.display()))?;
        let items = json
            .as_array()
            .ok_or_else(|| anyhow!("{} is not a JSON array", path.display()))?;

        let mut inputs = Vec::with_capacity(items.len());
        let mut labels = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let input = item
                .get(&config.input_field)
                .ok_or_else(|| anyhow!("item {} has no field {:?}", i, config.input_field))?;
            let label = item
                .get(&config.label_field)
                .ok_or_else(|| anyhow!("item {} has no field {:?}", i, config.label_field))?;
            let input: Vec<f32> = serde_json::from_value(input.clone())
                .with_context(|| format!("input of item {} is not a list of numbers", i))?;
            let label: JsonLabel = serde_json::from_value(label.clone())
                .with_context(|| format!("label of item {} is not a number or a list of numbers", i))?;
            inputs.push(Tensor::from_slice(&input));
            labels.push(label.into_tensor());
        }
        TensorDataset::from_tensors(inputs, labels)
    }
}
