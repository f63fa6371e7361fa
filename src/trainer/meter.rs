/// Running average of a scalar, weighted by the number of samples each update stands for.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AverageMeter {
    pub val: f64,
    pub sum: f64,
    pub count: usize,
    pub avg: f64,
}

impl AverageMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn update(&mut self, val: f64, n: usize) {
        self.val = val;
        self.sum += val * n as f64;
        self.count += n;
        if self.count > 0 {
            self.avg = self.sum / self.count as f64;
        }
    }
}

/// The meters a [`Trainer`](super::Trainer) updates on every batch of an epoch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Meters {
    /// Seconds per batch, from the end of the previous batch to the end of this one.
    pub batch_time: AverageMeter,
    /// Seconds spent waiting for the data source.
    pub data_time: AverageMeter,
    pub losses: AverageMeter,
    pub top1: AverageMeter,
    pub top5: AverageMeter,
}

impl Meters {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
