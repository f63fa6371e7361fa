use anyhow::{ensure, Result};
use derive_builder::Builder;
use parking_lot::Mutex;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

use crate::core::{Device, Tensor};

/// A collection of samples that knows how to merge a handful of them into a batch.
pub trait Dataset {
    type DataType;
    type BatchType;

    fn data(&self) -> &[Self::DataType];

    fn size(&self) -> usize {
        self.data().len()
    }

    fn collate(data: Vec<&Self::DataType>) -> Result<Self::BatchType>;

    fn into_loader(self, config: DataLoaderConfig) -> DataLoader<Self>
    where
        Self: Sized,
    {
        DataLoader::new(self, config)
    }
}

#[derive(Builder, Debug, Clone, Copy, PartialEq, Eq)]
#[builder(pattern = "owned", build_fn(validate = "Self::validate"))]
pub struct DataLoaderConfig {
    #[builder(default = "1")]
    pub batch_size: usize,
    #[builder(default = "false")]
    pub shuffle: bool,
    /// Seed of the shuffling rng. `None` seeds from entropy.
    #[builder(default, setter(strip_option))]
    pub seed: Option<u64>,
}

impl DataLoaderConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        match self.batch_size {
            Some(0) => Err("batch_size must be positive".to_owned()),
            _ => Ok(()),
        }
    }
}

impl Default for DataLoaderConfig {
    fn default() -> Self {
        DataLoaderConfig {
            batch_size: 1,
            shuffle: false,
            seed: None,
        }
    }
}

/// Splits a [`Dataset`] into batches, optionally reshuffling the sample order on every pass.
#[derive(Debug)]
pub struct DataLoader<D: Dataset> {
    dataset: D,
    batch_size: usize,
    shuffle: bool,
    rng: Mutex<StdRng>,
}

impl<D: Dataset> DataLoader<D> {
    /// A zero `batch_size` is treated as 1.
    pub fn new(dataset: D, config: DataLoaderConfig) -> DataLoader<D> {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        DataLoader {
            dataset,
            batch_size: config.batch_size.max(1),
            shuffle: config.shuffle,
            rng: Mutex::new(rng),
        }
    }

    pub fn dataset(&self) -> &D {
        &self.dataset
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of batches per pass. The last batch may be smaller than `batch_size`.
    pub fn len(&self) -> usize {
        (self.dataset.size() + self.batch_size - 1) / self.batch_size
    }

    pub fn is_empty(&self) -> bool {
        self.dataset.size() == 0
    }

    pub fn iter(&self) -> DataLoaderIter<'_, D> {
        let mut order: Vec<usize> = (0..self.dataset.size()).collect();
        if self.shuffle {
            order.shuffle(&mut *self.rng.lock());
        }
        DataLoaderIter {
            loader: self,
            order,
            cursor: 0,
        }
    }
}

pub struct DataLoaderIter<'a, D: Dataset> {
    loader: &'a DataLoader<D>,
    order: Vec<usize>,
    cursor: usize,
}

impl<'a, D: Dataset> Iterator for DataLoaderIter<'a, D> {
    type Item = Result<D::BatchType>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.order.len() {
            return None;
        }
        let end = (self.cursor + self.loader.batch_size).min(self.order.len());
        let data = self.loader.dataset.data();
        let samples = self.order[self.cursor..end]
            .iter()
            .map(|&index| &data[index])
            .collect();
        self.cursor = end;
        Some(D::collate(samples))
    }
}

/// A batch that can report how many samples it holds and be moved to a device.
pub trait Batch: Sized {
    fn batch_len(&self) -> usize;
    fn to_device(&self, device: Device) -> Result<Self>;
}

impl Batch for Tensor {
    /// The size of the leading axis. A 0-d tensor counts as a single sample.
    fn batch_len(&self) -> usize {
        self.size().first().copied().unwrap_or(1)
    }

    fn to_device(&self, device: Device) -> Result<Self> {
        Tensor::to_device(self, device)
    }
}

/// Where a training loop gets its `(input, label)` batches from.
pub trait DataSource {
    type Input;
    type Label;

    /// One pass over the data.
    fn batches(&self) -> Box<dyn Iterator<Item = Result<(Self::Input, Self::Label)>> + '_>;

    /// Number of samples per pass.
    fn dataset_len(&self) -> usize;

    /// Number of batches per pass.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<D, I, L> DataSource for DataLoader<D>
where
    D: Dataset<BatchType = (I, L)>,
{
    type Input = I;
    type Label = L;

    fn batches(&self) -> Box<dyn Iterator<Item = Result<(I, L)>> + '_> {
        Box::new(self.iter())
    }

    fn dataset_len(&self) -> usize {
        self.dataset.size()
    }

    fn len(&self) -> usize {
        DataLoader::len(self)
    }
}

/// Pre-built batches, replayed in order on every pass.
impl<I, L> DataSource for Vec<(I, L)>
where
    I: Batch + Clone,
    L: Clone,
{
    type Input = I;
    type Label = L;

    fn batches(&self) -> Box<dyn Iterator<Item = Result<(I, L)>> + '_> {
        Box::new(
            self.iter()
                .map(|(input, label)| -> Result<(I, L)> { Ok((input.clone(), label.clone())) }),
        )
    }

    fn dataset_len(&self) -> usize {
        self.iter().map(|(input, _)| input.batch_len()).sum()
    }

    fn len(&self) -> usize {
        Vec::len(self)
    }
}

/// Checks that a dataset's inputs and labels pair up one to one.
pub(crate) fn ensure_same_len(inputs: usize, labels: usize) -> Result<()> {
    ensure!(
        inputs == labels,
        "dataset has {} inputs but {} labels",
        inputs,
        labels
    );
    Ok(())
}
