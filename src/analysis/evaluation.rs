use std::fmt;
use std::ops::Range;

use anyhow::{ensure, Result};
use ndarray::{Array2, Array3, Axis};
use serde::{Deserialize, Serialize};

use crate::analysis::rolling::{finite_mean, mean, median};
use crate::data::models::ReturnTable;
use crate::models::ForecastArray;

/// Realized compounded returns laid out like a forecast array:
/// `[i, s, k] = prod_{j=1..=k+1} (1 + r[start + i + j])`.
pub fn realized_forecast_array(
    table: &ReturnTable,
    n_steps: usize,
    range: Range<usize>,
) -> Result<ForecastArray> {
    ensure!(
        range.start < range.end,
        "Empty evaluation range {}..{}",
        range.start,
        range.end
    );
    ensure!(
        range.end - 1 + n_steps < table.n_rows(),
        "Origin {} needs {} realized steps but the table ends at row {}",
        range.end - 1,
        n_steps,
        table.n_rows().saturating_sub(1)
    );

    let values = table.values();
    let mut out = Array3::zeros((range.len(), table.n_symbols(), n_steps));
    for (i, origin) in range.enumerate() {
        for s in 0..table.n_symbols() {
            let mut acc = 1.0;
            for k in 0..n_steps {
                acc *= 1.0 + values[[origin + k + 1, s]];
                out[[i, s, k]] = acc;
            }
        }
    }
    Ok(out)
}

fn check_same_shape(actual: &ForecastArray, predicted: &ForecastArray) -> Result<()> {
    ensure!(
        actual.dim() == predicted.dim(),
        "Realized array is {:?} but forecast array is {:?}",
        actual.dim(),
        predicted.dim()
    );
    Ok(())
}

fn relative_errors(actual: &ForecastArray, predicted: &ForecastArray) -> Array3<f64> {
    let mut err = actual - predicted;
    err.zip_mut_with(actual, |e, a| *e = e.abs() / a.abs());
    err
}

/// Mean relative error over horizons, shape `(n_indices, n_symbols)`.
pub fn origin_errors(actual: &ForecastArray, predicted: &ForecastArray) -> Result<Array2<f64>> {
    check_same_shape(actual, predicted)?;
    let err = relative_errors(actual, predicted);
    Ok(err.map_axis(Axis(2), |v| mean(&v.to_vec())))
}

/// Mean relative error over origins, shape `(n_symbols, n_steps)`. Origins
/// with a zero realized value are skipped.
pub fn mape_by_symbol_horizon(actual: &ForecastArray, predicted: &ForecastArray) -> Result<Array2<f64>> {
    check_same_shape(actual, predicted)?;
    let err = relative_errors(actual, predicted);
    Ok(err.map_axis(Axis(0), |v| finite_mean(&v.to_vec())))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolError {
    pub symbol: String,
    pub median_error: f64,
    pub mean_error: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSummary {
    pub median_of_median_errors: f64,
    pub mean_of_median_errors: f64,
    pub mean_of_mean_errors: f64,
    pub symbols: Vec<SymbolError>,
    /// `horizon_mape[s][k]`: MAPE of symbol `s` at step `k + 1`.
    pub horizon_mape: Vec<Vec<f64>>,
}

/// Per-symbol and cross-symbol error aggregates. Non-finite per-origin
/// errors, from a zero realized value, are left out of every aggregate.
pub fn summarize(
    symbols: &[String],
    actual: &ForecastArray,
    predicted: &ForecastArray,
) -> Result<EvaluationSummary> {
    ensure!(
        symbols.len() == actual.dim().1,
        "{} symbol names for {} forecast columns",
        symbols.len(),
        actual.dim().1
    );
    let per_origin = origin_errors(actual, predicted)?;
    let horizon = mape_by_symbol_horizon(actual, predicted)?;

    let symbol_errors: Vec<SymbolError> = symbols
        .iter()
        .zip(per_origin.columns())
        .map(|(symbol, col)| {
            let errors = col.to_vec();
            SymbolError {
                symbol: symbol.clone(),
                median_error: median(&errors),
                mean_error: finite_mean(&errors),
            }
        })
        .collect();

    let medians: Vec<f64> = symbol_errors.iter().map(|e| e.median_error).collect();
    let means: Vec<f64> = symbol_errors.iter().map(|e| e.mean_error).collect();

    Ok(EvaluationSummary {
        median_of_median_errors: median(&medians),
        mean_of_median_errors: finite_mean(&medians),
        mean_of_mean_errors: finite_mean(&means),
        symbols: symbol_errors,
        horizon_mape: horizon.rows().into_iter().map(|r| r.to_vec()).collect(),
    })
}

impl fmt::Display for EvaluationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<10} {:>12} {:>12}", "symbol", "median err", "mean err")?;
        for e in &self.symbols {
            writeln!(
                f,
                "{:<10} {:>12.5} {:>12.5}",
                e.symbol, e.median_error, e.mean_error
            )?;
        }
        writeln!(f, "median of median errors: {:.5}", self.median_of_median_errors)?;
        writeln!(f, "mean of median errors:   {:.5}", self.mean_of_median_errors)?;
        write!(f, "mean of mean errors:     {:.5}", self.mean_of_mean_errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use ndarray::array;

    fn table() -> ReturnTable {
        let start = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        ReturnTable::new(
            (0..5).map(|i| start + Duration::days(i)).collect(),
            vec!["AAA".into()],
            array![[0.0], [0.1], [0.1], [-0.5], [0.0]],
        )
        .unwrap()
    }

    #[test]
    fn test_realized_array_compounds_following_rows() {
        let realized = realized_forecast_array(&table(), 2, 0..2).unwrap();
        assert_eq!(realized.dim(), (2, 1, 2));
        assert!((realized[[0, 0, 0]] - 1.1).abs() < 1e-12);
        assert!((realized[[0, 0, 1]] - 1.21).abs() < 1e-12);
        assert!((realized[[1, 0, 1]] - 0.55).abs() < 1e-12);
    }

    #[test]
    fn test_realized_array_needs_future_rows() {
        assert!(realized_forecast_array(&table(), 2, 0..3).is_ok());
        assert!(realized_forecast_array(&table(), 2, 0..4).is_err());
        assert!(realized_forecast_array(&table(), 4, 0..1).is_ok());
        assert!(realized_forecast_array(&table(), 5, 0..1).is_err());
    }

    #[test]
    fn test_exact_predictions_have_zero_error() {
        let actual = realized_forecast_array(&table(), 2, 0..2).unwrap();
        let summary = summarize(&["AAA".into()], &actual, &actual.clone()).unwrap();
        assert_eq!(summary.mean_of_mean_errors, 0.0);
        assert_eq!(summary.median_of_median_errors, 0.0);
        assert!(summary.horizon_mape.iter().flatten().all(|&v| v == 0.0));
    }

    #[test]
    fn test_errors_invariant_under_doubling() {
        let actual = Array3::from_shape_fn((4, 2, 3), |(i, s, k)| 1.0 + 0.01 * (i + s + k) as f64);
        let predicted = actual.mapv(|v| v * 1.05 - 0.02);
        let symbols = vec!["A".to_string(), "B".to_string()];

        let base = summarize(&symbols, &actual, &predicted).unwrap();
        let doubled = summarize(&symbols, &(&actual * 2.0), &(&predicted * 2.0)).unwrap();
        assert!((base.mean_of_mean_errors - doubled.mean_of_mean_errors).abs() < 1e-12);
        assert!((base.median_of_median_errors - doubled.median_of_median_errors).abs() < 1e-12);
        assert!(base.mean_of_mean_errors > 0.0);
    }

    #[test]
    fn test_per_origin_error_is_mean_over_horizons() {
        let actual = Array3::from_elem((1, 1, 2), 2.0);
        let predicted = Array3::from_shape_vec((1, 1, 2), vec![1.0, 2.0]).unwrap();
        let errors = origin_errors(&actual, &predicted).unwrap();
        assert!((errors[[0, 0]] - 0.25).abs() < 1e-12);
        let mape = mape_by_symbol_horizon(&actual, &predicted).unwrap();
        assert_eq!(mape.dim(), (1, 2));
        assert!((mape[[0, 0]] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_zero_realized_value_is_left_out_of_aggregates() {
        let mut actual = Array3::from_elem((3, 2, 2), 1.1);
        actual[[1, 0, 0]] = 0.0;
        let predicted = Array3::from_elem((3, 2, 2), 1.0);
        let summary = summarize(&["A".into(), "B".into()], &actual, &predicted).unwrap();

        let expected = 0.1 / 1.1;
        for value in [
            summary.median_of_median_errors,
            summary.mean_of_median_errors,
            summary.mean_of_mean_errors,
        ] {
            assert!((value - expected).abs() < 1e-12, "{}", value);
        }
        assert!((summary.symbols[0].mean_error - expected).abs() < 1e-12);
        assert!((summary.horizon_mape[0][0] - expected).abs() < 1e-12);
    }

    #[test]
    fn test_shape_mismatch_is_rejected() {
        let a = Array3::from_elem((2, 1, 2), 1.0);
        let p = Array3::from_elem((2, 1, 3), 1.0);
        assert!(origin_errors(&a, &p).is_err());
        assert!(summarize(&["A".into()], &a, &p).is_err());
    }
}
