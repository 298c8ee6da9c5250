pub mod arima;
pub mod baselines;
pub mod boosting;
pub mod forest;
pub mod regressor;
pub mod supervised;
pub mod univariate_arima;

use std::fmt;
use std::ops::Range;

use ndarray::Array3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ForecastConfig;
use crate::data::models::ReturnTable;
use crate::nn::training::MlpParams;

use self::baselines::{NoReturnForecast, RollingGeometricAverage};
use self::boosting::BoostingParams;
use self::forest::ForestParams;
use self::supervised::{MultivariateRegressors, UnivariateRegressors, Validation};
use self::univariate_arima::UnivariateArimas;

/// Compounded forecasts, shape `(n_indices, n_symbols, n_steps)`.
/// `[i, s, k]` is the predicted growth `prod(1 + r)` over steps `1..=k + 1`
/// after origin `range.start + i`.
pub type ForecastArray = Array3<f64>;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model has not been fitted")]
    NotFitted,
    #[error("symbol {0} has no fitted model")]
    UnknownSymbol(String),
    #[error("pooled features need symbol {0}, which is missing from the table")]
    MissingFeatureSymbol(String),
    #[error("n_steps_predict {requested} exceeds the model horizon {max}")]
    HorizonTooLong { requested: usize, max: usize },
    #[error("invalid prediction range {start}..{end} for a table of {rows} rows")]
    InvalidRange { start: usize, end: usize, rows: usize },
    #[error("origin {start} needs at least {required} prior rows of history")]
    InsufficientHistory { start: usize, required: usize },
    #[error("fitting {symbol} failed: {reason}")]
    Fit { symbol: String, reason: String },
    #[error("regressor error: {0}")]
    Regressor(String),
}

/// Fit/predict capability shared by every forecasting model.
pub trait ForecastModel {
    fn name(&self) -> &'static str;

    fn fit(&mut self, train: &ReturnTable) -> Result<(), ModelError>;

    /// Forecasts for origins in `range`, or for the single origin
    /// `len - n_steps` when `range` is `None`.
    fn predict(
        &self,
        table: &ReturnTable,
        n_steps: usize,
        range: Option<Range<usize>>,
    ) -> Result<ForecastArray, ModelError>;
}

/// Resolve an optional origin range against a table of `n_rows` rows.
pub fn resolve_range(
    n_rows: usize,
    n_steps: usize,
    range: Option<Range<usize>>,
) -> Result<Range<usize>, ModelError> {
    let range = match range {
        Some(r) => r,
        None => {
            let start = n_rows.checked_sub(n_steps).ok_or(ModelError::InvalidRange {
                start: 0,
                end: 0,
                rows: n_rows,
            })?;
            start..start + 1
        }
    };
    if range.start >= range.end || range.end > n_rows {
        return Err(ModelError::InvalidRange {
            start: range.start,
            end: range.end,
            rows: n_rows,
        });
    }
    Ok(range)
}

/// Running product of `1 + r`.
pub fn compound(returns: &[f64]) -> Vec<f64> {
    let mut acc = 1.0;
    returns
        .iter()
        .map(|r| {
            acc *= 1.0 + r;
            acc
        })
        .collect()
}

/// Fails on the first symbol of `table` without a fitted model.
pub(crate) fn require_symbols<F>(table: &ReturnTable, is_fitted: F) -> Result<(), ModelError>
where
    F: Fn(&str) -> bool,
{
    match table.symbols().iter().find(|s| !is_fitted(s)) {
        Some(missing) => Err(ModelError::UnknownSymbol(missing.clone())),
        None => Ok(()),
    }
}

/// Model selection exposed on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ModelKind {
    NoReturn,
    RollingGeometric,
    Arima,
    BoostedTrees,
    RandomForest,
    Mlp,
    MultivariateBoostedTrees,
}

impl ModelKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::NoReturn => "no-return",
            Self::RollingGeometric => "rolling-geometric",
            Self::Arima => "arima",
            Self::BoostedTrees => "boosted-trees",
            Self::RandomForest => "random-forest",
            Self::Mlp => "mlp",
            Self::MultivariateBoostedTrees => "multivariate-boosted-trees",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Instantiate an unfitted model of `kind` forecasting `n_steps` horizons.
pub fn build_model(kind: ModelKind, cfg: &ForecastConfig, n_steps: usize) -> Box<dyn ForecastModel> {
    let features = cfg.feature_builder(n_steps);
    let validation = (cfg.validation_fraction > 0.0).then(|| Validation::TailFraction(cfg.validation_fraction));
    match kind {
        ModelKind::NoReturn => Box::new(NoReturnForecast),
        ModelKind::RollingGeometric => Box::new(RollingGeometricAverage::new(cfg.rolling_window)),
        ModelKind::Arima => Box::new(UnivariateArimas::new(cfg.arima)),
        ModelKind::BoostedTrees => Box::new(
            UnivariateRegressors::<BoostingParams>::new(cfg.boosting.clone(), features).with_validation(validation),
        ),
        ModelKind::RandomForest => Box::new(
            UnivariateRegressors::<ForestParams>::new(cfg.forest.clone(), features).with_validation(validation),
        ),
        ModelKind::Mlp => Box::new(
            UnivariateRegressors::<MlpParams>::new(cfg.mlp.clone(), features).with_validation(validation),
        ),
        ModelKind::MultivariateBoostedTrees => Box::new(
            MultivariateRegressors::<BoostingParams>::new(cfg.boosting.clone(), features)
                .with_validation(validation),
        ),
    }
}
