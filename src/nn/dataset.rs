use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    tensor::{backend::Backend, Tensor},
};
use ndarray::{Array2, Axis};

use crate::analysis::rolling::{mean, sample_std};

/// One standardized feature row and its scaled target
#[derive(Debug, Clone)]
pub struct RegressionSample {
    pub features: Vec<f32>,
    pub target: f32,
}

#[derive(Debug, Clone)]
pub struct RegressionDataset {
    pub samples: Vec<RegressionSample>,
}

impl Dataset<RegressionSample> for RegressionDataset {
    fn get(&self, index: usize) -> Option<RegressionSample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// Per-column z-scoring fitted on the training matrix.
/// Constant columns get a unit scale.
#[derive(Debug, Clone, PartialEq)]
pub struct Standardizer {
    means: Vec<f64>,
    scales: Vec<f64>,
}

impl Standardizer {
    pub fn fit(x: &Array2<f64>) -> Self {
        let (means, scales) = x
            .axis_iter(Axis(1))
            .map(|col| {
                let values = col.to_vec();
                let s = sample_std(&values);
                let scale = if s.is_finite() && s > 1e-12 { s } else { 1.0 };
                (mean(&values), scale)
            })
            .unzip();
        Self { means, scales }
    }

    pub fn n_features(&self) -> usize {
        self.means.len()
    }

    /// Row-major standardized copy of `x`
    pub fn transform(&self, x: &Array2<f64>) -> Vec<f32> {
        x.rows()
            .into_iter()
            .flat_map(|row| {
                row.iter()
                    .zip(self.means.iter().zip(&self.scales))
                    .map(|(v, (m, s))| ((v - m) / s) as f32)
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

/// Build samples from standardized features; targets are shifted by
/// `target_mean` and divided by `target_scale`.
pub fn build_dataset(
    x: &Array2<f64>,
    y: &[f64],
    scaler: &Standardizer,
    target_mean: f64,
    target_scale: f64,
) -> RegressionDataset {
    let n_features = scaler.n_features();
    let flat = scaler.transform(x);
    let samples = flat
        .chunks(n_features.max(1))
        .zip(y)
        .map(|(features, &target)| RegressionSample {
            features: features.to_vec(),
            target: ((target - target_mean) / target_scale) as f32,
        })
        .collect();
    RegressionDataset { samples }
}

/// Batcher that converts RegressionSample slices into tensors for training
#[derive(Clone, Debug)]
pub struct RegressionBatcher<B: Backend> {
    device: B::Device,
}

impl<B: Backend> RegressionBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

/// Batched data for training
#[derive(Debug, Clone)]
pub struct RegressionBatch<B: Backend> {
    pub inputs: Tensor<B, 2>,  // [batch_size, num_features]
    pub targets: Tensor<B, 2>, // [batch_size, 1]
}

impl<B: Backend> Batcher<RegressionSample, RegressionBatch<B>> for RegressionBatcher<B> {
    fn batch(&self, items: Vec<RegressionSample>) -> RegressionBatch<B> {
        let batch_size = items.len();
        let num_features = items.first().map(|s| s.features.len()).unwrap_or(0);

        let mut input_data = Vec::with_capacity(batch_size * num_features);
        let mut target_data = Vec::with_capacity(batch_size);
        for sample in &items {
            input_data.extend_from_slice(&sample.features);
            target_data.push(sample.target);
        }

        let inputs = Tensor::<B, 1>::from_floats(input_data.as_slice(), &self.device)
            .reshape([batch_size, num_features]);
        let targets = Tensor::<B, 1>::from_floats(target_data.as_slice(), &self.device)
            .reshape([batch_size, 1]);

        RegressionBatch { inputs, targets }
    }
}
