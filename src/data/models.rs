use std::ops::Range;

use anyhow::{bail, ensure, Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use ndarray::{s, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

/// Date-indexed table of daily fractional returns, one column per symbol.
/// Missing observations are `NaN` until the table has been cleaned.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnTable {
    dates: Vec<NaiveDate>,
    symbols: Vec<String>,
    values: Array2<f64>,
}

impl ReturnTable {
    pub fn new(dates: Vec<NaiveDate>, symbols: Vec<String>, values: Array2<f64>) -> Result<Self> {
        ensure!(
            values.nrows() == dates.len() && values.ncols() == symbols.len(),
            "Return matrix is {}x{} but table has {} dates and {} symbols",
            values.nrows(),
            values.ncols(),
            dates.len(),
            symbols.len()
        );
        if let Some(w) = dates.windows(2).find(|w| w[0] >= w[1]) {
            bail!("Dates must be strictly increasing ({} is followed by {})", w[0], w[1]);
        }
        for (i, symbol) in symbols.iter().enumerate() {
            if symbols[..i].contains(symbol) {
                bail!("Duplicate symbol column {}", symbol);
            }
        }
        Ok(Self {
            dates,
            symbols,
            values,
        })
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn n_rows(&self) -> usize {
        self.dates.len()
    }

    pub fn n_symbols(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn symbol_index(&self, symbol: &str) -> Option<usize> {
        self.symbols.iter().position(|s| s == symbol)
    }

    pub fn column(&self, idx: usize) -> ArrayView1<'_, f64> {
        self.values.column(idx)
    }

    /// Contiguous copy of one symbol's returns.
    pub fn series(&self, symbol: &str) -> Option<Vec<f64>> {
        self.symbol_index(symbol).map(|i| self.column(i).to_vec())
    }

    pub fn slice_rows(&self, rows: Range<usize>) -> Self {
        let end = rows.end.min(self.n_rows());
        let start = rows.start.min(end);
        Self {
            dates: self.dates[start..end].to_vec(),
            symbols: self.symbols.clone(),
            values: self.values.slice(s![start..end, ..]).to_owned(),
        }
    }

    /// Sub-table with the given symbols, in the given order.
    pub fn select_symbols(&self, symbols: &[String]) -> Result<Self> {
        let idx = symbols
            .iter()
            .map(|s| {
                self.symbol_index(s)
                    .with_context(|| format!("Symbol {} not in return table", s))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(
            self.dates.clone(),
            symbols.to_vec(),
            self.values.select(Axis(1), &idx),
        )
    }

    /// Index of the first non-missing observation per symbol.
    pub fn first_valid_rows(&self) -> Vec<Option<usize>> {
        self.values
            .columns()
            .into_iter()
            .map(|col| col.iter().position(|v| v.is_finite()))
            .collect()
    }

    /// Compounded growth `prod(1 + r)` down each column.
    pub fn cumulative(&self) -> Array2<f64> {
        let mut out = self.values.mapv(|r| 1.0 + r);
        for mut col in out.columns_mut() {
            let mut acc = 1.0;
            for v in col.iter_mut() {
                acc *= *v;
                *v = acc;
            }
        }
        out
    }

    /// Chronological split. The head keeps `floor(n * (1 - f))` rows and the
    /// tail `floor(n * f)` rows.
    pub fn train_test_split(&self, test_fraction: f64) -> Result<(Self, Self)> {
        ensure!(
            (0.0..1.0).contains(&test_fraction),
            "test fraction must be in [0, 1), got {}",
            test_fraction
        );
        let n = self.n_rows();
        let n_train = (n as f64 * (1.0 - test_fraction)).floor() as usize;
        let n_test = (n as f64 * test_fraction).floor() as usize;
        Ok((
            self.slice_rows(0..n_train),
            self.slice_rows(n - n_test..n),
        ))
    }
}

/// Absolute price levels per symbol, the contents of the prediction artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceTable {
    pub dates: Vec<NaiveDate>,
    pub symbols: Vec<String>,
    pub prices: Array2<f64>,
    pub is_predicted: Vec<bool>,
}

impl PriceTable {
    pub fn new(
        dates: Vec<NaiveDate>,
        symbols: Vec<String>,
        prices: Array2<f64>,
        is_predicted: Vec<bool>,
    ) -> Result<Self> {
        ensure!(
            prices.nrows() == dates.len()
                && prices.ncols() == symbols.len()
                && is_predicted.len() == dates.len(),
            "Price matrix is {}x{} but table has {} dates, {} symbols and {} flags",
            prices.nrows(),
            prices.ncols(),
            dates.len(),
            symbols.len(),
            is_predicted.len()
        );
        Ok(Self {
            dates,
            symbols,
            prices,
            is_predicted,
        })
    }

    pub fn n_rows(&self) -> usize {
        self.dates.len()
    }

    pub fn symbol_index(&self, symbol: &str) -> Option<usize> {
        self.symbols.iter().position(|s| s == symbol)
    }

    /// Last observed (non-predicted) date.
    pub fn last_observed_date(&self) -> Option<NaiveDate> {
        self.dates
            .iter()
            .zip(&self.is_predicted)
            .filter(|(_, p)| !**p)
            .map(|(d, _)| *d)
            .last()
    }

    /// Row range of the trailing `n` rows.
    pub fn tail_rows(&self, n: usize) -> Range<usize> {
        self.n_rows().saturating_sub(n)..self.n_rows()
    }
}

/// Written next to the prediction artifact after each training run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub trained_at: NaiveDateTime,
    pub model: String,
    pub n_symbols: usize,
    pub n_steps_predict: usize,
    pub n_observations: usize,
    pub last_observed_date: NaiveDate,
    pub first_forecast_date: NaiveDate,
    pub last_forecast_date: NaiveDate,
    #[serde(default)]
    pub dropped_symbols: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn sample_table() -> ReturnTable {
        ReturnTable::new(
            (1..=5).map(day).collect(),
            vec!["AAA".into(), "BBB".into()],
            array![
                [0.1, f64::NAN],
                [0.0, f64::NAN],
                [-0.5, 0.2],
                [1.0, 0.0],
                [0.0, 0.1]
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_new_rejects_unsorted_dates() {
        let result = ReturnTable::new(
            vec![day(2), day(1)],
            vec!["AAA".into()],
            array![[0.0], [0.0]],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_new_rejects_duplicate_symbols() {
        let result = ReturnTable::new(
            vec![day(1)],
            vec!["AAA".into(), "AAA".into()],
            array![[0.0, 0.0]],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_first_valid_rows() {
        assert_eq!(sample_table().first_valid_rows(), vec![Some(0), Some(2)]);
    }

    #[test]
    fn test_cumulative_compounds_returns() {
        let cum = sample_table().cumulative();
        let expected = [1.1, 1.1, 0.55, 1.1, 1.1];
        for (got, want) in cum.column(0).iter().zip(expected) {
            assert!((got - want).abs() < 1e-12, "expected {}, got {}", want, got);
        }
    }

    #[test]
    fn test_train_test_split_floors_both_sides() {
        let (train, test) = sample_table().train_test_split(0.4).unwrap();
        assert_eq!(train.n_rows(), 3);
        assert_eq!(test.n_rows(), 2);
        assert_eq!(test.dates()[0], day(4));
    }

    #[test]
    fn test_select_symbols_reorders() {
        let table = sample_table();
        let picked = table.select_symbols(&["BBB".into(), "AAA".into()]).unwrap();
        assert_eq!(picked.symbols(), &["BBB".to_string(), "AAA".to_string()]);
        assert_eq!(picked.values()[[3, 1]], 1.0);
        assert!(table.select_symbols(&["ZZZ".into()]).is_err());
    }

    #[test]
    fn test_last_observed_date_skips_forecast_rows() {
        let prices = PriceTable::new(
            vec![day(1), day(2), day(3)],
            vec!["AAA".into()],
            array![[1.0], [2.0], [3.0]],
            vec![false, false, true],
        )
        .unwrap();
        assert_eq!(prices.last_observed_date(), Some(day(2)));
        assert_eq!(prices.tail_rows(5), 0..3);
    }
}
