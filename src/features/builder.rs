use std::ops::Range;

use chrono::NaiveDate;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::analysis::rolling::{rolling, RollingStat};
use crate::features::calendar::{calendar_fractions, CALENDAR_COLUMNS};

pub const N_FORECAST_COLUMN: &str = "n_forecast";

/// Turns one return series into a per-horizon supervised dataset.
///
/// A row is keyed by `(origin, horizon)`: its features describe the series
/// up to and including `origin` and its label is the return at
/// `origin + horizon`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureBuilder {
    pub windows: Vec<usize>,
    pub stats: Vec<RollingStat>,
    pub n_shifts: usize,
    pub n_steps: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub origin: usize,
    pub horizon: usize,
    pub features: Vec<f64>,
    pub label: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureTable {
    pub columns: Vec<String>,
    pub rows: Vec<FeatureRow>,
}

impl FeatureBuilder {
    pub fn new(windows: Vec<usize>, stats: Vec<RollingStat>, n_shifts: usize, n_steps: usize) -> Self {
        Self {
            windows,
            stats,
            n_shifts,
            n_steps,
        }
    }

    /// First origin whose lags and rolling windows stay inside the series.
    pub fn first_origin(&self) -> usize {
        self.windows
            .iter()
            .copied()
            .max()
            .unwrap_or(0)
            .max(self.n_shifts)
    }

    /// Origins that have a realized label for every horizon.
    pub fn labeled_origins(&self, len: usize) -> Range<usize> {
        let end = len.saturating_sub(self.n_steps);
        self.first_origin().min(end)..end
    }

    pub fn column_names(&self) -> Vec<String> {
        let mut names: Vec<String> = CALENDAR_COLUMNS.iter().map(|c| c.to_string()).collect();
        names.extend((0..self.n_shifts).map(|i| format!("shifted_{i}")));
        for window in &self.windows {
            for stat in &self.stats {
                names.push(format!("{}_{}", stat.name(), window));
            }
        }
        names.push(N_FORECAST_COLUMN.to_string());
        names
    }

    /// Labeled rows for every horizon `1..=n_steps` of every labeled origin,
    /// horizon-major.
    pub fn build(&self, dates: &[NaiveDate], series: &[f64]) -> FeatureTable {
        let origins = self.labeled_origins(series.len());
        self.build_rows(dates, series, origins, true)
    }

    /// Rows without labels for origins in `origins`. Origins before
    /// [`first_origin`](Self::first_origin) or past the series end are skipped.
    pub fn build_unlabeled(
        &self,
        dates: &[NaiveDate],
        series: &[f64],
        origins: Range<usize>,
    ) -> FeatureTable {
        let end = origins.end.min(series.len());
        let start = origins.start.max(self.first_origin()).min(end);
        self.build_rows(dates, series, start..end, false)
    }

    fn build_rows(
        &self,
        dates: &[NaiveDate],
        series: &[f64],
        origins: Range<usize>,
        labeled: bool,
    ) -> FeatureTable {
        let columns = self.column_names();
        if origins.is_empty() {
            return FeatureTable {
                columns,
                rows: vec![],
            };
        }

        let rolled: Vec<(usize, Vec<f64>)> = self
            .windows
            .iter()
            .flat_map(|&w| self.stats.iter().map(move |&stat| (w, stat)))
            .map(|(w, stat)| (w, rolling(series, w, stat)))
            .collect();

        let base: Vec<Vec<f64>> = origins
            .clone()
            .map(|t| {
                let mut features = Vec::with_capacity(columns.len());
                features.extend(calendar_fractions(dates[t]));
                features.extend((0..self.n_shifts).map(|i| series[t - i]));
                features.extend(rolled.iter().map(|(w, values)| values[t + 1 - w]));
                features
            })
            .collect();

        let mut rows = Vec::with_capacity(base.len() * self.n_steps);
        for horizon in 1..=self.n_steps {
            for (t, features) in origins.clone().zip(&base) {
                let mut features = features.clone();
                features.push(horizon as f64);
                let label = if labeled {
                    series.get(t + horizon).copied()
                } else {
                    None
                };
                rows.push(FeatureRow {
                    origin: t,
                    horizon,
                    features,
                    label,
                });
            }
        }

        FeatureTable { columns, rows }
    }
}

impl FeatureTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn n_features(&self) -> usize {
        self.columns.len()
    }

    pub fn keys(&self) -> Vec<(usize, usize)> {
        self.rows.iter().map(|r| (r.origin, r.horizon)).collect()
    }

    pub fn matrix(&self) -> Array2<f64> {
        Array2::from_shape_fn((self.rows.len(), self.n_features()), |(i, j)| {
            self.rows[i].features[j]
        })
    }

    /// Labels of every row, or `None` if any row is unlabeled.
    pub fn labels(&self) -> Option<Vec<f64>> {
        self.rows.iter().map(|r| r.label).collect()
    }

    pub fn filter_origins(&self, origins: &Range<usize>) -> Self {
        Self {
            columns: self.columns.clone(),
            rows: self
                .rows
                .iter()
                .filter(|r| origins.contains(&r.origin))
                .cloned()
                .collect(),
        }
    }

    /// `(train, valid)`: rows with `origin < valid.start`, and rows with
    /// origin inside `valid`.
    pub fn split_by_origin(&self, valid: &Range<usize>) -> (Self, Self) {
        (self.filter_origins(&(0..valid.start)), self.filter_origins(valid))
    }
}
