use std::time::Instant;

use burn::{
    backend::{Autodiff, NdArray},
    data::dataloader::DataLoaderBuilder,
    module::AutodiffModule,
    module::Module,
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::{backend::Backend, Tensor},
};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::analysis::rolling::{mean, sample_std};
use crate::models::regressor::{check_shapes, mean_squared_error, Regressor, RegressorSpec};
use crate::models::ModelError;
use crate::nn::dataset::{build_dataset, RegressionBatcher, Standardizer};
use crate::nn::model::{MlpNet, MlpNetConfig};

/// CPU training backend: NdArray with autodiff
pub type CpuBackend = Autodiff<NdArray>;

/// Network hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MlpParams {
    pub hidden_size: usize,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub seed: u64,
}

impl Default for MlpParams {
    fn default() -> Self {
        Self {
            hidden_size: 64,
            epochs: 20,
            batch_size: 256,
            learning_rate: 1e-3,
            seed: 42,
        }
    }
}

impl RegressorSpec for MlpParams {
    type Model = MlpRegressor;

    fn build(&self) -> MlpRegressor {
        MlpRegressor {
            params: self.clone(),
            fitted: None,
        }
    }
}

#[derive(Debug)]
struct FittedNet {
    net: MlpNet<NdArray>,
    scaler: Standardizer,
    target_mean: f64,
    target_scale: f64,
}

/// Feed-forward network regressor trained with Adam on MSE
#[derive(Debug)]
pub struct MlpRegressor {
    params: MlpParams,
    fitted: Option<FittedNet>,
}

impl Regressor for MlpRegressor {
    fn fit(
        &mut self,
        x: &Array2<f64>,
        y: &[f64],
        eval_set: Option<(&Array2<f64>, &[f64])>,
    ) -> Result<(), ModelError> {
        check_shapes(x, y)?;

        let scaler = Standardizer::fit(x);
        let target_mean = mean(y);
        let s = sample_std(y);
        let target_scale = if s.is_finite() && s > 1e-12 { s } else { 1.0 };
        let dataset = build_dataset(x, y, &scaler, target_mean, target_scale);

        let device = <NdArray as Backend>::Device::default();
        <CpuBackend as Backend>::seed(self.params.seed);

        let batcher = RegressionBatcher::<CpuBackend>::new(device.clone());
        let dataloader = DataLoaderBuilder::new(batcher)
            .batch_size(self.params.batch_size.max(1))
            .shuffle(self.params.seed)
            .build(dataset);

        let mut model = MlpNetConfig {
            input_size: scaler.n_features(),
            hidden_size: self.params.hidden_size,
        }
        .init::<CpuBackend>(&device);
        let mut optim = AdamConfig::new().init();

        tracing::debug!(
            "Training MLP on {} rows x {} features ({} params)",
            x.nrows(),
            x.ncols(),
            model.num_params()
        );

        for epoch in 0..self.params.epochs {
            let epoch_start = Instant::now();
            let mut epoch_loss = 0.0;
            let mut batch_count = 0;

            for batch in dataloader.iter() {
                let output = model.forward(batch.inputs);
                let loss = mse_loss(output, batch.targets);

                let loss_val = loss.clone().into_data().to_vec::<f32>().unwrap_or_default();
                epoch_loss += loss_val.first().copied().unwrap_or(f32::NAN) as f64;
                batch_count += 1;

                let grads = loss.backward();
                let grads = GradientsParams::from_grads(grads, &model);
                model = optim.step(self.params.learning_rate, model, grads);
            }

            let avg_loss = if batch_count > 0 {
                epoch_loss / batch_count as f64
            } else {
                f64::NAN
            };
            tracing::debug!(
                epoch = epoch + 1,
                loss = avg_loss,
                ms = epoch_start.elapsed().as_millis() as u64
            );
        }

        self.fitted = Some(FittedNet {
            net: model.valid(),
            scaler,
            target_mean,
            target_scale,
        });

        if let Some((ex, ey)) = eval_set.filter(|(ex, _)| ex.nrows() > 0) {
            let predicted = self.predict(ex)?;
            tracing::debug!(valid_mse = mean_squared_error(&predicted, ey), "MLP validation");
        }
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Vec<f64>, ModelError> {
        let fitted = self.fitted.as_ref().ok_or(ModelError::NotFitted)?;
        if x.ncols() != fitted.scaler.n_features() {
            return Err(ModelError::Regressor(format!(
                "expected {} features, got {}",
                fitted.scaler.n_features(),
                x.ncols()
            )));
        }
        if x.nrows() == 0 {
            return Ok(vec![]);
        }

        let device = <NdArray as Backend>::Device::default();
        let input_data = fitted.scaler.transform(x);
        let input = Tensor::<NdArray, 1>::from_floats(input_data.as_slice(), &device)
            .reshape([x.nrows(), x.ncols()]);

        let output = fitted
            .net
            .forward(input)
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| ModelError::Regressor(format!("{:?}", e)))?;

        Ok(output
            .into_iter()
            .map(|v| v as f64 * fitted.target_scale + fitted.target_mean)
            .collect())
    }
}

/// Mean squared error loss
fn mse_loss(predictions: Tensor<CpuBackend, 2>, targets: Tensor<CpuBackend, 2>) -> Tensor<CpuBackend, 1> {
    let diff = predictions - targets;
    let sq = diff.clone() * diff;
    sq.mean()
}
