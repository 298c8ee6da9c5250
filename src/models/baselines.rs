use std::ops::Range;

use ndarray::Array3;

use crate::analysis::rolling::geometric_mean_growth;
use crate::data::models::ReturnTable;
use crate::models::{resolve_range, ForecastArray, ForecastModel, ModelError};

/// Zero-return forecast: every compounded step is 1.0.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoReturnForecast;

impl ForecastModel for NoReturnForecast {
    fn name(&self) -> &'static str {
        "no-return"
    }

    fn fit(&mut self, _train: &ReturnTable) -> Result<(), ModelError> {
        tracing::info!("No-return forecast uses the last observed value; nothing to fit");
        Ok(())
    }

    fn predict(
        &self,
        table: &ReturnTable,
        n_steps: usize,
        range: Option<Range<usize>>,
    ) -> Result<ForecastArray, ModelError> {
        let range = resolve_range(table.n_rows(), n_steps, range)?;
        Ok(Array3::ones((range.len(), table.n_symbols(), n_steps)))
    }
}

/// Trailing geometric-mean growth `g` over `window` returns ending at the
/// origin; step `k` forecasts `g^k`.
#[derive(Debug, Clone, Copy)]
pub struct RollingGeometricAverage {
    window: usize,
}

impl RollingGeometricAverage {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
        }
    }
}

impl ForecastModel for RollingGeometricAverage {
    fn name(&self) -> &'static str {
        "rolling-geometric"
    }

    fn fit(&mut self, _train: &ReturnTable) -> Result<(), ModelError> {
        tracing::info!(
            "Rolling geometric average over {} days is a fixed rule; nothing to fit",
            self.window
        );
        Ok(())
    }

    fn predict(
        &self,
        table: &ReturnTable,
        n_steps: usize,
        range: Option<Range<usize>>,
    ) -> Result<ForecastArray, ModelError> {
        let range = resolve_range(table.n_rows(), n_steps, range)?;
        if range.start + 1 < self.window {
            return Err(ModelError::InsufficientHistory {
                start: range.start,
                required: self.window - 1,
            });
        }

        let mut out = Array3::zeros((range.len(), table.n_symbols(), n_steps));
        for s in 0..table.n_symbols() {
            let series = table.column(s).to_vec();
            for (i, origin) in range.clone().enumerate() {
                let g = geometric_mean_growth(&series[origin + 1 - self.window..=origin]);
                for k in 0..n_steps {
                    out[[i, s, k]] = g.powi(k as i32 + 1);
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use ndarray::Array2;

    fn constant_table(r: f64, rows: usize, symbols: usize) -> ReturnTable {
        let start = NaiveDate::from_ymd_opt(2021, 1, 1).unwrap();
        ReturnTable::new(
            (0..rows).map(|i| start + Duration::days(i as i64)).collect(),
            (0..symbols).map(|i| format!("S{i}")).collect(),
            Array2::from_elem((rows, symbols), r),
        )
        .unwrap()
    }

    #[test]
    fn test_no_return_predicts_ones() {
        let table = constant_table(0.02, 50, 3);
        let out = NoReturnForecast.predict(&table, 5, Some(10..20)).unwrap();
        assert_eq!(out.dim(), (10, 3, 5));
        assert!(out.iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_rolling_geometric_on_constant_return() {
        let r = 0.01;
        let table = constant_table(r, 60, 2);
        let model = RollingGeometricAverage::new(20);
        let out = model.predict(&table, 5, Some(19..40)).unwrap();
        assert_eq!(out.dim(), (21, 2, 5));
        for ((_, _, k), &v) in out.indexed_iter() {
            let expected = (1.0 + r).powi(k as i32 + 1);
            assert!((v - expected).abs() < 1e-10, "step {}: expected {}, got {}", k, expected, v);
        }
    }

    #[test]
    fn test_rolling_geometric_default_range() {
        let table = constant_table(0.0, 40, 1);
        let out = RollingGeometricAverage::new(20).predict(&table, 20, None).unwrap();
        assert_eq!(out.dim(), (1, 1, 20));
    }

    #[test]
    fn test_rolling_geometric_needs_full_window() {
        let table = constant_table(0.0, 40, 1);
        let result = RollingGeometricAverage::new(20).predict(&table, 5, Some(10..12));
        assert!(matches!(result, Err(ModelError::InsufficientHistory { .. })));
    }
}
