use anyhow::{ensure, Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::analysis::evaluation::{realized_forecast_array, summarize, EvaluationSummary};
use crate::config::ForecastConfig;
use crate::data::models::ReturnTable;
use crate::models::{build_model, ModelKind};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestReport {
    pub model: String,
    pub n_train: usize,
    pub n_test: usize,
    pub n_steps_predict: usize,
    pub first_origin: NaiveDate,
    pub last_origin: NaiveDate,
    pub evaluation: EvaluationSummary,
}

/// Fit on the chronological head of `table` and score walk-forward
/// forecasts from every origin in the tail that still has `n_steps`
/// realized returns after it. The tail always ends at the last row.
pub fn run_backtest(
    table: &ReturnTable,
    kind: ModelKind,
    cfg: &ForecastConfig,
    n_steps: usize,
    test_fraction: f64,
) -> Result<BacktestReport> {
    let (train, test) = table.train_test_split(test_fraction)?;
    let n_train = train.n_rows();
    let n = table.n_rows();
    let test_start = n - test.n_rows();
    ensure!(
        test_start + n_steps < n,
        "Test segment of {} rows is too short for {}-step forecasts",
        test.n_rows(),
        n_steps
    );
    let range = test_start..n - n_steps;

    let mut model = build_model(kind, cfg, n_steps);
    tracing::info!(
        "Backtesting {} on {} train rows, origins {}..{}",
        kind,
        n_train,
        range.start,
        range.end
    );
    model
        .fit(&train)
        .with_context(|| format!("Failed to fit {}", kind))?;
    let predicted = model
        .predict(table, n_steps, Some(range.clone()))
        .with_context(|| format!("Failed to forecast with {}", kind))?;
    let actual = realized_forecast_array(table, n_steps, range.clone())?;
    let evaluation = summarize(table.symbols(), &actual, &predicted)?;

    Ok(BacktestReport {
        model: kind.to_string(),
        n_train,
        n_test: test.n_rows(),
        n_steps_predict: n_steps,
        first_origin: table.dates()[range.start],
        last_origin: table.dates()[range.end - 1],
        evaluation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use ndarray::Array2;

    fn table(rows: usize, f: impl Fn(usize, usize) -> f64) -> ReturnTable {
        let start = NaiveDate::from_ymd_opt(2021, 1, 4).unwrap();
        ReturnTable::new(
            (0..rows).map(|i| start + Duration::days(i as i64)).collect(),
            vec!["SPY".into(), "QQQ".into()],
            Array2::from_shape_fn((rows, 2), |(t, s)| f(t, s)),
        )
        .unwrap()
    }

    #[test]
    fn test_rolling_geometric_exact_on_constant_returns() {
        let data = table(100, |_, s| 0.001 * (s + 1) as f64);
        let cfg = ForecastConfig {
            rolling_window: 10,
            ..ForecastConfig::default()
        };
        let report = run_backtest(&data, ModelKind::RollingGeometric, &cfg, 5, 0.4).unwrap();
        assert_eq!(report.n_train, 60);
        assert_eq!(report.n_test, 40);
        assert_eq!(report.evaluation.symbols.len(), 2);
        assert!(report.evaluation.mean_of_mean_errors < 1e-9);
    }

    #[test]
    fn test_no_return_error_matches_realized_growth() {
        let data = table(50, |_, _| 0.01);
        let report = run_backtest(&data, ModelKind::NoReturn, &ForecastConfig::default(), 1, 0.5).unwrap();
        // |1.01 - 1| / 1.01 at every origin
        let expected = 0.01 / 1.01;
        assert!((report.evaluation.median_of_median_errors - expected).abs() < 1e-12);
        assert_eq!(report.first_origin, data.dates()[25]);
        assert_eq!(report.last_origin, data.dates()[48]);
    }

    #[test]
    fn test_test_window_ends_at_last_row() {
        // 70 train rows and 30 test rows out of 101
        let data = table(101, |_, _| 0.01);
        let report = run_backtest(&data, ModelKind::NoReturn, &ForecastConfig::default(), 1, 0.3).unwrap();
        assert_eq!((report.n_train, report.n_test), (70, 30));
        assert_eq!(report.first_origin, data.dates()[71]);
        assert_eq!(report.last_origin, data.dates()[99]);
    }

    #[test]
    fn test_short_test_segment_is_rejected() {
        let data = table(20, |_, _| 0.0);
        assert!(run_backtest(&data, ModelKind::NoReturn, &ForecastConfig::default(), 10, 0.4).is_err());
    }
}
