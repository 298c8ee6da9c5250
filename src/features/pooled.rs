use std::collections::HashMap;
use std::ops::Range;

use ndarray::Array2;

use crate::features::builder::{FeatureTable, N_FORECAST_COLUMN};

/// Feature tables of several symbols joined on `(origin, horizon)`.
///
/// Each symbol's feature columns are renamed `{feature}_{symbol}`; the
/// horizon column is shared and comes last. Labels stay per symbol.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PooledFeatureTable {
    pub columns: Vec<String>,
    pub symbols: Vec<String>,
    pub keys: Vec<(usize, usize)>,
    pub features: Vec<Vec<f64>>,
    /// `labels[s][row]` for `symbols[s]`
    pub labels: Vec<Vec<Option<f64>>>,
}

impl PooledFeatureTable {
    /// Inner join in the row order of the first table.
    pub fn pool(tables: &[(String, FeatureTable)]) -> Self {
        let Some((_, first)) = tables.first() else {
            return Self::default();
        };

        let mut columns = Vec::new();
        for (symbol, table) in tables {
            columns.extend(
                table
                    .columns
                    .iter()
                    .filter(|c| c.as_str() != N_FORECAST_COLUMN)
                    .map(|c| format!("{c}_{symbol}")),
            );
        }
        columns.push(N_FORECAST_COLUMN.to_string());

        let lookups: Vec<HashMap<(usize, usize), usize>> = tables
            .iter()
            .map(|(_, t)| {
                t.rows
                    .iter()
                    .enumerate()
                    .map(|(i, r)| ((r.origin, r.horizon), i))
                    .collect()
            })
            .collect();

        let mut pooled = Self {
            columns,
            symbols: tables.iter().map(|(s, _)| s.clone()).collect(),
            keys: Vec::new(),
            features: Vec::new(),
            labels: vec![Vec::new(); tables.len()],
        };

        for row in &first.rows {
            let key = (row.origin, row.horizon);
            let Some(positions) = lookups
                .iter()
                .map(|lookup| lookup.get(&key).copied())
                .collect::<Option<Vec<usize>>>()
            else {
                continue;
            };

            let mut features = Vec::with_capacity(pooled.columns.len());
            for ((_, table), &pos) in tables.iter().zip(&positions) {
                let row = &table.rows[pos];
                features.extend_from_slice(&row.features[..row.features.len().saturating_sub(1)]);
            }
            features.push(row.horizon as f64);

            for (s, ((_, table), &pos)) in tables.iter().zip(&positions).enumerate() {
                pooled.labels[s].push(table.rows[pos].label);
            }
            pooled.keys.push(key);
            pooled.features.push(features);
        }

        pooled
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn matrix(&self) -> Array2<f64> {
        Array2::from_shape_fn((self.features.len(), self.columns.len()), |(i, j)| {
            self.features[i][j]
        })
    }

    /// One symbol's labels, or `None` if the symbol is absent or a row is unlabeled.
    pub fn labels_for(&self, symbol: &str) -> Option<Vec<f64>> {
        let s = self.symbols.iter().position(|x| x == symbol)?;
        self.labels[s].iter().copied().collect()
    }

    pub fn filter_origins(&self, origins: &Range<usize>) -> Self {
        let keep: Vec<usize> = self
            .keys
            .iter()
            .enumerate()
            .filter(|(_, (origin, _))| origins.contains(origin))
            .map(|(i, _)| i)
            .collect();
        Self {
            columns: self.columns.clone(),
            symbols: self.symbols.clone(),
            keys: keep.iter().map(|&i| self.keys[i]).collect(),
            features: keep.iter().map(|&i| self.features[i].clone()).collect(),
            labels: self
                .labels
                .iter()
                .map(|l| keep.iter().map(|&i| l[i]).collect())
                .collect(),
        }
    }

    pub fn split_by_origin(&self, valid: &Range<usize>) -> (Self, Self) {
        (self.filter_origins(&(0..valid.start)), self.filter_origins(valid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::builder::FeatureRow;

    fn table(offset: f64, origins: &[usize]) -> FeatureTable {
        FeatureTable {
            columns: vec!["shifted_0".into(), N_FORECAST_COLUMN.into()],
            rows: origins
                .iter()
                .map(|&o| FeatureRow {
                    origin: o,
                    horizon: 1,
                    features: vec![o as f64 + offset, 1.0],
                    label: Some(offset),
                })
                .collect(),
        }
    }

    #[test]
    fn test_pool_renames_and_joins() {
        let pooled = PooledFeatureTable::pool(&[
            ("AAA".into(), table(0.0, &[1, 2, 3])),
            ("BBB".into(), table(100.0, &[2, 3, 4])),
        ]);
        assert_eq!(
            pooled.columns,
            vec!["shifted_0_AAA", "shifted_0_BBB", N_FORECAST_COLUMN]
        );
        assert_eq!(pooled.keys, vec![(2, 1), (3, 1)]);
        assert_eq!(pooled.features[0], vec![2.0, 102.0, 1.0]);
        assert_eq!(pooled.labels_for("BBB"), Some(vec![100.0, 100.0]));
        assert_eq!(pooled.labels_for("CCC"), None);
        assert_eq!(pooled.matrix().dim(), (2, 3));
    }

    #[test]
    fn test_split_by_origin() {
        let pooled = PooledFeatureTable::pool(&[("AAA".into(), table(0.0, &[1, 2, 3, 4]))]);
        let (train, valid) = pooled.split_by_origin(&(3..4));
        assert_eq!(train.keys, vec![(1, 1), (2, 1)]);
        assert_eq!(valid.keys, vec![(3, 1)]);
        assert_eq!(valid.labels[0].len(), 1);
    }
}
