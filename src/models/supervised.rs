use std::collections::HashMap;
use std::ops::Range;

use ndarray::{s, Array2, Array3};

use crate::data::models::ReturnTable;
use crate::features::{FeatureBuilder, FeatureTable, PooledFeatureTable};
use crate::models::regressor::{Regressor, RegressorSpec};
use crate::models::{require_symbols, resolve_range, ForecastArray, ForecastModel, ModelError};

/// Origins held out of training and handed to the regressor as its
/// evaluation set.
#[derive(Debug, Clone, PartialEq)]
pub enum Validation {
    Origins(Range<usize>),
    /// Trailing share of the labeled origins of the training table
    TailFraction(f64),
}

impl Validation {
    fn origins(&self, features: &FeatureBuilder, n_rows: usize) -> Range<usize> {
        match self {
            Self::Origins(r) => r.clone(),
            Self::TailFraction(f) => {
                let labeled = features.labeled_origins(n_rows);
                let n_valid = ((labeled.len() as f64 * f).round() as usize).min(labeled.len());
                labeled.end - n_valid..labeled.end
            }
        }
    }
}

/// One regressor per symbol, trained on every horizon of that symbol's
/// feature table (the horizon is itself a feature).
pub struct UnivariateRegressors<S: RegressorSpec> {
    spec: S,
    features: FeatureBuilder,
    validation: Option<Validation>,
    models: HashMap<String, S::Model>,
}

/// One regressor per symbol, trained on the pooled features of all
/// symbols against that symbol's labels.
pub struct MultivariateRegressors<S: RegressorSpec> {
    spec: S,
    features: FeatureBuilder,
    validation: Option<Validation>,
    symbols: Vec<String>,
    models: HashMap<String, S::Model>,
}

impl<S: RegressorSpec> UnivariateRegressors<S> {
    pub fn new(spec: S, features: FeatureBuilder) -> Self {
        Self {
            spec,
            features,
            validation: None,
            models: HashMap::new(),
        }
    }

    pub fn with_validation(mut self, validation: Option<Validation>) -> Self {
        self.validation = validation;
        self
    }

    pub fn is_fitted(&self, symbol: &str) -> bool {
        self.models.contains_key(symbol)
    }
}

impl<S: RegressorSpec> MultivariateRegressors<S> {
    pub fn new(spec: S, features: FeatureBuilder) -> Self {
        Self {
            spec,
            features,
            validation: None,
            symbols: Vec::new(),
            models: HashMap::new(),
        }
    }

    pub fn with_validation(mut self, validation: Option<Validation>) -> Self {
        self.validation = validation;
        self
    }
}

fn fit_error(symbol: &str, err: impl ToString) -> ModelError {
    ModelError::Fit {
        symbol: symbol.to_string(),
        reason: err.to_string(),
    }
}

fn check_request(
    features: &FeatureBuilder,
    n_rows: usize,
    n_steps: usize,
    range: Option<Range<usize>>,
) -> Result<Range<usize>, ModelError> {
    if n_steps > features.n_steps {
        return Err(ModelError::HorizonTooLong {
            requested: n_steps,
            max: features.n_steps,
        });
    }
    let range = resolve_range(n_rows, n_steps, range)?;
    if range.start < features.first_origin() {
        return Err(ModelError::InsufficientHistory {
            start: range.start,
            required: features.first_origin(),
        });
    }
    Ok(range)
}

/// Arrange per-row predictions into `(origin, step)` order and compound
/// them along the horizon. Every origin in `range` needs a prediction for
/// each horizon `1..=n_steps`.
pub fn assemble_compounded(
    keys: &[(usize, usize)],
    predictions: &[f64],
    range: &Range<usize>,
    n_steps: usize,
) -> Result<Array2<f64>, ModelError> {
    if keys.len() != predictions.len() {
        return Err(ModelError::Regressor(format!(
            "{} predictions for {} feature rows",
            predictions.len(),
            keys.len()
        )));
    }

    let mut grid = Array2::zeros((range.len(), n_steps));
    let mut filled = Array2::from_elem((range.len(), n_steps), false);
    for (&(origin, horizon), &p) in keys.iter().zip(predictions) {
        if range.contains(&origin) && (1..=n_steps).contains(&horizon) {
            grid[[origin - range.start, horizon - 1]] = p;
            filled[[origin - range.start, horizon - 1]] = true;
        }
    }
    if let Some(((i, k), _)) = filled.indexed_iter().find(|(_, f)| !**f) {
        return Err(ModelError::Regressor(format!(
            "no prediction for origin {} at horizon {}",
            range.start + i,
            k + 1
        )));
    }

    for mut row in grid.rows_mut() {
        let mut acc = 1.0;
        for v in row.iter_mut() {
            acc *= 1.0 + *v;
            *v = acc;
        }
    }
    Ok(grid)
}

/// Train/validation views of a labeled table.
fn split_rows(table: FeatureTable, valid: Option<&Range<usize>>) -> (FeatureTable, Option<FeatureTable>) {
    match valid {
        Some(v) => {
            let (train, valid) = table.split_by_origin(v);
            (train, Some(valid).filter(|t| !t.is_empty()))
        }
        None => (table, None),
    }
}

impl<S: RegressorSpec> ForecastModel for UnivariateRegressors<S> {
    fn name(&self) -> &'static str {
        "univariate-regressors"
    }

    fn fit(&mut self, train: &ReturnTable) -> Result<(), ModelError> {
        let valid = self
            .validation
            .as_ref()
            .map(|v| v.origins(&self.features, train.n_rows()));
        let mut models = HashMap::with_capacity(train.n_symbols());
        for (idx, symbol) in train.symbols().iter().enumerate() {
            let series = train.column(idx).to_vec();
            let table = self.features.build(train.dates(), &series);
            let (fit_rows, valid_rows) = split_rows(table, valid.as_ref());
            if fit_rows.is_empty() {
                return Err(fit_error(
                    symbol,
                    format!(
                        "no training rows from {} observations (need more than {})",
                        series.len(),
                        self.features.first_origin() + self.features.n_steps
                    ),
                ));
            }
            tracing::info!("Training {} on {} rows", symbol, fit_rows.len());

            let y = fit_rows
                .labels()
                .ok_or_else(|| fit_error(symbol, "unlabeled training row"))?;
            let eval = valid_rows.and_then(|v| v.labels().map(|l| (v.matrix(), l)));

            let mut model = self.spec.build();
            model
                .fit(
                    &fit_rows.matrix(),
                    &y,
                    eval.as_ref().map(|(x, y)| (x, y.as_slice())),
                )
                .map_err(|e| fit_error(symbol, e))?;
            models.insert(symbol.clone(), model);
        }
        self.models = models;
        Ok(())
    }

    fn predict(
        &self,
        table: &ReturnTable,
        n_steps: usize,
        range: Option<Range<usize>>,
    ) -> Result<ForecastArray, ModelError> {
        if self.models.is_empty() {
            return Err(ModelError::NotFitted);
        }
        require_symbols(table, |s| self.is_fitted(s))?;
        let range = check_request(&self.features, table.n_rows(), n_steps, range)?;

        let mut out = Array3::zeros((range.len(), table.n_symbols(), n_steps));
        for (s, symbol) in table.symbols().iter().enumerate() {
            let model = self
                .models
                .get(symbol)
                .ok_or_else(|| ModelError::UnknownSymbol(symbol.clone()))?;
            let series = table.column(s).to_vec();
            let rows = self
                .features
                .build_unlabeled(table.dates(), &series, range.clone());
            let predictions = model.predict(&rows.matrix())?;
            let grid = assemble_compounded(&rows.keys(), &predictions, &range, n_steps)?;
            out.slice_mut(s![.., s, ..]).assign(&grid);
        }
        Ok(out)
    }
}

impl<S: RegressorSpec> MultivariateRegressors<S> {
    fn pooled(
        &self,
        symbols: &[String],
        table: &ReturnTable,
        origins: Option<Range<usize>>,
    ) -> Result<PooledFeatureTable, ModelError> {
        let mut tables = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            let series = table
                .series(symbol)
                .ok_or_else(|| ModelError::MissingFeatureSymbol(symbol.clone()))?;
            let features = match &origins {
                Some(r) => self.features.build_unlabeled(table.dates(), &series, r.clone()),
                None => self.features.build(table.dates(), &series),
            };
            tables.push((symbol.clone(), features));
        }
        Ok(PooledFeatureTable::pool(&tables))
    }
}

impl<S: RegressorSpec> ForecastModel for MultivariateRegressors<S> {
    fn name(&self) -> &'static str {
        "multivariate-regressors"
    }

    fn fit(&mut self, train: &ReturnTable) -> Result<(), ModelError> {
        let symbols = train.symbols().to_vec();
        let pooled = self.pooled(&symbols, train, None)?;
        let valid = self
            .validation
            .as_ref()
            .map(|v| v.origins(&self.features, train.n_rows()));
        let (fit_rows, valid_rows) = match &valid {
            Some(v) => {
                let (t, v) = pooled.split_by_origin(v);
                (t, Some(v).filter(|p| !p.is_empty()))
            }
            None => (pooled, None),
        };
        if fit_rows.is_empty() {
            return Err(fit_error(
                &symbols.join(","),
                format!("no pooled training rows from {} observations", train.n_rows()),
            ));
        }

        let x = fit_rows.matrix();
        let x_valid = valid_rows.as_ref().map(|v| v.matrix());
        tracing::info!(
            "Pooled features: {} rows x {} columns across {} symbols",
            x.nrows(),
            x.ncols(),
            symbols.len()
        );

        let mut models = HashMap::with_capacity(symbols.len());
        for symbol in &symbols {
            tracing::info!("Training {}...", symbol);
            let y = fit_rows
                .labels_for(symbol)
                .ok_or_else(|| fit_error(symbol, "unlabeled training row"))?;
            let y_valid = valid_rows.as_ref().and_then(|v| v.labels_for(symbol));
            let eval = x_valid.as_ref().zip(y_valid.as_deref());

            let mut model = self.spec.build();
            model.fit(&x, &y, eval).map_err(|e| fit_error(symbol, e))?;
            models.insert(symbol.clone(), model);
        }
        self.symbols = symbols;
        self.models = models;
        Ok(())
    }

    fn predict(
        &self,
        table: &ReturnTable,
        n_steps: usize,
        range: Option<Range<usize>>,
    ) -> Result<ForecastArray, ModelError> {
        if self.models.is_empty() {
            return Err(ModelError::NotFitted);
        }
        require_symbols(table, |s| self.models.contains_key(s))?;
        let range = check_request(&self.features, table.n_rows(), n_steps, range)?;

        let pooled = self.pooled(&self.symbols, table, Some(range.clone()))?;
        let x = pooled.matrix();

        let mut out = Array3::zeros((range.len(), table.n_symbols(), n_steps));
        for (s, symbol) in table.symbols().iter().enumerate() {
            let model = self
                .models
                .get(symbol)
                .ok_or_else(|| ModelError::UnknownSymbol(symbol.clone()))?;
            let predictions = model.predict(&x)?;
            let grid = assemble_compounded(&pooled.keys, &predictions, &range, n_steps)?;
            out.slice_mut(s![.., s, ..]).assign(&grid);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::rolling::RollingStat;
    use crate::models::boosting::BoostingParams;
    use chrono::{Duration, NaiveDate};

    /// Predicts the horizon column (last feature) scaled by a constant.
    struct HorizonEcho(f64);

    impl Regressor for HorizonEcho {
        fn fit(
            &mut self,
            _x: &Array2<f64>,
            _y: &[f64],
            _eval_set: Option<(&Array2<f64>, &[f64])>,
        ) -> Result<(), ModelError> {
            Ok(())
        }

        fn predict(&self, x: &Array2<f64>) -> Result<Vec<f64>, ModelError> {
            let last = x.ncols() - 1;
            Ok(x.column(last).iter().map(|h| h * self.0).collect())
        }
    }

    struct EchoSpec(f64);

    impl RegressorSpec for EchoSpec {
        type Model = HorizonEcho;

        fn build(&self) -> HorizonEcho {
            HorizonEcho(self.0)
        }
    }

    fn features(n_steps: usize) -> FeatureBuilder {
        FeatureBuilder::new(vec![5, 10], vec![RollingStat::Mean, RollingStat::Std], 5, n_steps)
    }

    fn table(rows: usize, symbols: &[&str]) -> ReturnTable {
        let start = NaiveDate::from_ymd_opt(2019, 1, 1).unwrap();
        let values = Array2::from_shape_fn((rows, symbols.len()), |(t, s)| {
            0.01 * (((t + 3 * s) as f64) * 0.7).sin()
        });
        ReturnTable::new(
            (0..rows).map(|i| start + Duration::days(i as i64)).collect(),
            symbols.iter().map(|s| s.to_string()).collect(),
            values,
        )
        .unwrap()
    }

    #[test]
    fn test_assemble_sorts_and_compounds() {
        // horizon-major keys for origins 10 and 11
        let keys = vec![(10, 1), (11, 1), (10, 2), (11, 2)];
        let preds = vec![0.1, 0.0, 0.1, -0.5];
        let grid = assemble_compounded(&keys, &preds, &(10..12), 2).unwrap();
        assert!((grid[[0, 0]] - 1.1).abs() < 1e-12);
        assert!((grid[[0, 1]] - 1.21).abs() < 1e-12);
        assert!((grid[[1, 1]] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_assemble_truncates_to_requested_steps() {
        let keys = vec![(0, 1), (0, 2), (0, 3)];
        let grid = assemble_compounded(&keys, &[0.0, 0.0, 0.0], &(0..1), 2).unwrap();
        assert_eq!(grid.dim(), (1, 2));
    }

    #[test]
    fn test_assemble_reports_missing_horizon() {
        let keys = vec![(0, 1)];
        assert!(assemble_compounded(&keys, &[0.0], &(0..1), 2).is_err());
    }

    #[test]
    fn test_univariate_forecast_shape_and_values() {
        let data = table(80, &["AAA", "BBB"]);
        let mut model = UnivariateRegressors::new(EchoSpec(0.01), features(4));
        model.fit(&data).unwrap();
        let out = model.predict(&data, 3, Some(20..30)).unwrap();
        assert_eq!(out.dim(), (10, 2, 3));
        let expected = [1.01, 1.01 * 1.02, 1.01 * 1.02 * 1.03];
        for k in 0..3 {
            assert!((out[[4, 1, k]] - expected[k]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_default_range_forecasts_single_origin() {
        let data = table(80, &["AAA"]);
        let mut model = UnivariateRegressors::new(EchoSpec(0.0), features(4));
        model.fit(&data).unwrap();
        let out = model.predict(&data, 4, None).unwrap();
        assert_eq!(out.dim(), (1, 1, 4));
        // forecasting from the final observation also works
        let last = model.predict(&data, 4, Some(79..80)).unwrap();
        assert_eq!(last.dim(), (1, 1, 4));
    }

    #[test]
    fn test_prediction_errors() {
        let data = table(80, &["AAA"]);
        let mut model = UnivariateRegressors::new(EchoSpec(0.0), features(4));
        assert!(matches!(model.predict(&data, 2, None), Err(ModelError::NotFitted)));
        model.fit(&data).unwrap();
        assert!(matches!(
            model.predict(&data, 5, None),
            Err(ModelError::HorizonTooLong { requested: 5, max: 4 })
        ));
        assert!(matches!(
            model.predict(&data, 2, Some(3..6)),
            Err(ModelError::InsufficientHistory { .. })
        ));
        assert!(matches!(
            model.predict(&table(80, &["ZZZ"]), 2, None),
            Err(ModelError::UnknownSymbol(_))
        ));
    }

    #[test]
    fn test_too_short_series_fails_fit() {
        let data = table(12, &["AAA"]);
        let mut model = UnivariateRegressors::new(EchoSpec(0.0), features(4));
        assert!(matches!(model.fit(&data), Err(ModelError::Fit { .. })));
    }

    #[test]
    fn test_boosted_trees_with_validation() {
        let data = table(120, &["AAA"]);
        let params = BoostingParams {
            n_rounds: 10,
            learning_rate: 0.1,
            min_samples_leaf: 5,
            ..BoostingParams::default()
        };
        let mut model = UnivariateRegressors::new(params, features(3)).with_validation(Some(Validation::Origins(90..110)));
        model.fit(&data).unwrap();
        let out = model.predict(&data, 3, Some(100..110)).unwrap();
        assert_eq!(out.dim(), (10, 1, 3));
        assert!(out.iter().all(|v| v.is_finite() && *v > 0.0));
    }

    #[test]
    fn test_multivariate_uses_all_symbols() {
        let data = table(90, &["AAA", "BBB", "CCC"]);
        let mut model = MultivariateRegressors::new(EchoSpec(0.01), features(3)).with_validation(Some(Validation::Origins(60..70)));
        model.fit(&data).unwrap();

        let out = model.predict(&data, 2, Some(40..45)).unwrap();
        assert_eq!(out.dim(), (5, 3, 2));
        assert!((out[[0, 2, 1]] - 1.01 * 1.02).abs() < 1e-12);

        let missing_input = data.select_symbols(&["AAA".into()]).unwrap();
        assert!(matches!(
            model.predict(&missing_input, 2, Some(40..45)),
            Err(ModelError::MissingFeatureSymbol(s)) if s == "BBB"
        ));
    }

    #[test]
    fn test_failed_refit_keeps_previous_symbols() {
        let data = table(90, &["AAA", "BBB"]);
        let mut model = MultivariateRegressors::new(EchoSpec(0.01), features(3));
        model.fit(&data).unwrap();
        let before = model.predict(&data, 2, Some(40..45)).unwrap();

        let too_short = table(12, &["AAA", "BBB", "CCC"]);
        assert!(matches!(model.fit(&too_short), Err(ModelError::Fit { .. })));
        assert_eq!(model.symbols, vec!["AAA".to_string(), "BBB".to_string()]);
        assert_eq!(model.predict(&data, 2, Some(40..45)).unwrap(), before);
    }

    #[test]
    fn test_tail_fraction_holds_out_last_labeled_origins() {
        // labeled origins of 80 rows with windows up to 10 and 4 steps: 10..76
        let valid = Validation::TailFraction(0.5).origins(&features(4), 80);
        assert_eq!(valid, 43..76);
        assert_eq!(Validation::Origins(5..9).origins(&features(4), 80), 5..9);
        assert!(Validation::TailFraction(0.0).origins(&features(4), 80).is_empty());
    }
}
