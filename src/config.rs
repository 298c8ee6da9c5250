use std::path::{Path, PathBuf};

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

use crate::analysis::rolling::RollingStat;
use crate::data::cache;
use crate::features::FeatureBuilder;
use crate::models::arima::ArimaOrder;
use crate::models::boosting::BoostingParams;
use crate::models::forest::ForestParams;
use crate::nn::training::MlpParams;

/// Data directory used when `ETF_FORECASTER_DATA_DIR` is unset
pub const DEFAULT_DATA_DIR: &str = "data";
pub const DATA_DIR_ENV: &str = "ETF_FORECASTER_DATA_DIR";

/// Paths relative to the data directory
pub const SYMBOLS_FILE: &str = "data_exploration/top_etfs.csv";
pub const SYMBOLS_COLUMN: &str = "fund_symbol";
pub const RETURNS_CACHE_FILE: &str = "etl/symbols_returns.csv";
pub const PREDICTIONS_FILE: &str = "predictions/forecast_prices.parquet";
pub const TRAINING_SUMMARY_FILE: &str = "predictions/training_summary.json";

/// Symbols with unusable histories
pub const EXCLUDED_SYMBOLS: &[&str] = &["RGI", "RYH", "RYT"];

/// Symbols pre-selected on the dashboard when present
pub const DASHBOARD_DEFAULT_SYMBOLS: &[&str] = &["SPY", "QQQ"];

/// Feature engineering
pub const FEATURE_WINDOWS: &[usize] = &[5, 20, 60, 180, 400];
pub const FEATURE_STATS: &[RollingStat] = &[
    RollingStat::Mean,
    RollingStat::Std,
    RollingStat::Min,
    RollingStat::Max,
];
pub const N_SHIFTS: usize = 20;
pub const N_STEPS_PREDICT: usize = 20;

/// Baselines and ARIMA
pub const ROLLING_AVERAGE_WINDOW: usize = 20;
pub const ARIMA_ORDER: ArimaOrder = ArimaOrder { p: 20, d: 1, q: 20 };
/// Trailing share of labeled origins held out as the regressors' evaluation
/// set; 0 trains on every origin
pub const VALIDATION_FRACTION: f64 = 0.0;

/// Backtesting
pub const TEST_FRACTION: f64 = 0.4;

/// Return cache reuse window (hours)
pub const CACHE_MAX_AGE_HOURS: u64 = 24;

/// Dashboard
pub const DASHBOARD_REFRESH_SECS: u64 = 300;
pub const DASHBOARD_TABLE_ROWS: usize = 5;

/// Yahoo Finance chart endpoint
pub const YAHOO_CHART_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";
pub const YAHOO_HISTORY_RANGE: &str = "max";

/// Runtime configuration. Defaults mirror the constants above; a JSON file
/// may override any subset of fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    pub data_dir: PathBuf,
    pub symbols_file: PathBuf,
    pub returns_cache_file: PathBuf,
    pub predictions_file: PathBuf,
    pub training_summary_file: PathBuf,
    pub excluded_symbols: Vec<String>,
    pub windows: Vec<usize>,
    pub stats: Vec<RollingStat>,
    pub n_shifts: usize,
    pub n_steps_predict: usize,
    pub rolling_window: usize,
    pub arima: ArimaOrder,
    pub boosting: BoostingParams,
    pub forest: ForestParams,
    pub mlp: MlpParams,
    pub validation_fraction: f64,
    pub test_fraction: f64,
    pub cache_max_age_hours: u64,
    pub refresh_secs: u64,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            data_dir: cache::cache_dir(),
            symbols_file: PathBuf::from(SYMBOLS_FILE),
            returns_cache_file: PathBuf::from(RETURNS_CACHE_FILE),
            predictions_file: PathBuf::from(PREDICTIONS_FILE),
            training_summary_file: PathBuf::from(TRAINING_SUMMARY_FILE),
            excluded_symbols: EXCLUDED_SYMBOLS.iter().map(|s| s.to_string()).collect(),
            windows: FEATURE_WINDOWS.to_vec(),
            stats: FEATURE_STATS.to_vec(),
            n_shifts: N_SHIFTS,
            n_steps_predict: N_STEPS_PREDICT,
            rolling_window: ROLLING_AVERAGE_WINDOW,
            arima: ARIMA_ORDER,
            boosting: BoostingParams::default(),
            forest: ForestParams::default(),
            mlp: MlpParams::default(),
            validation_fraction: VALIDATION_FRACTION,
            test_fraction: TEST_FRACTION,
            cache_max_age_hours: CACHE_MAX_AGE_HOURS,
            refresh_secs: DASHBOARD_REFRESH_SECS,
        }
    }
}

impl ForecastConfig {
    /// Defaults, overlaid with `path` when given. The data directory
    /// environment variable wins over the file.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut cfg = match path {
            Some(p) => {
                tracing::info!("Loading configuration from {}", p.display());
                cache::load_json::<Self>(p)?
            }
            None => Self::default(),
        };
        if let Some(dir) = std::env::var_os(DATA_DIR_ENV) {
            cfg.data_dir = PathBuf::from(dir);
        }
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings the feature builder and models cannot work with.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.windows.iter().all(|&w| w > 0),
            "Feature windows must be positive, got {:?}",
            self.windows
        );
        ensure!(self.n_steps_predict > 0, "n_steps_predict must be positive");
        ensure!(self.rolling_window > 0, "rolling_window must be positive");
        ensure!(
            (0.0..1.0).contains(&self.validation_fraction),
            "validation_fraction must be in [0, 1), got {}",
            self.validation_fraction
        );
        ensure!(
            (0.0..1.0).contains(&self.test_fraction),
            "test_fraction must be in [0, 1), got {}",
            self.test_fraction
        );
        Ok(())
    }

    /// Resolve a path against the data directory unless it is absolute.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.data_dir.join(path)
        }
    }

    pub fn symbols_path(&self) -> PathBuf {
        self.resolve(&self.symbols_file)
    }

    pub fn returns_cache_path(&self) -> PathBuf {
        self.resolve(&self.returns_cache_file)
    }

    pub fn predictions_path(&self) -> PathBuf {
        self.resolve(&self.predictions_file)
    }

    pub fn training_summary_path(&self) -> PathBuf {
        self.resolve(&self.training_summary_file)
    }

    /// Feature builder for forecasts of `n_steps` horizons.
    pub fn feature_builder(&self, n_steps: usize) -> FeatureBuilder {
        FeatureBuilder::new(self.windows.clone(), self.stats.clone(), self.n_shifts, n_steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "n_shifts": 5, "windows": [3, 7] }"#).unwrap();
        let cfg = ForecastConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.n_shifts, 5);
        assert_eq!(cfg.windows, vec![3, 7]);
        assert_eq!(cfg.n_steps_predict, N_STEPS_PREDICT);
        assert_eq!(cfg.arima, ARIMA_ORDER);
    }

    #[test]
    fn test_zero_window_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "windows": [0, 5] }"#).unwrap();
        let err = ForecastConfig::load(Some(&path)).unwrap_err().to_string();
        assert!(err.contains("windows"), "{}", err);
        assert!(ForecastConfig::default().validate().is_ok());
    }

    #[test]
    fn test_resolve_keeps_absolute_paths() {
        let cfg = ForecastConfig {
            data_dir: PathBuf::from("base"),
            ..ForecastConfig::default()
        };
        assert_eq!(cfg.resolve(Path::new("a.csv")), PathBuf::from("base/a.csv"));
        let abs = std::env::temp_dir().join("b.csv");
        assert_eq!(cfg.resolve(&abs), abs);
    }
}
